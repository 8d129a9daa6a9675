use clap::Parser;
use insights_cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    insights_cli::init_tracing();
    if !insights_cli::run_main(cli).await? {
        std::process::exit(1);
    }
    Ok(())
}
