//! `insights` command line: runs lanes and inspects their progress.

use anyhow::Context;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use clap::Parser;
use insights_pipeline::InsightsConfig;
use insights_pipeline::LaneOutcome;
use insights_pipeline::SummaryOverrides;
use insights_pipeline::run_lanes;
use insights_state::Lane;
use insights_state::StateRuntime;
use insights_state::default_db_path;
use owo_colors::OwoColorize;
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Incremental learning-insights pipeline.
///
/// Without a subcommand every selected lane is run.
#[derive(Debug, Parser)]
#[command(name = "insights", version, bin_name = "insights")]
pub struct Cli {
    /// SQLite database. Defaults to $INSIGHTS_HOME/insights.sqlite or
    /// ~/.insights/insights.sqlite.
    #[arg(long, env = "INSIGHTS_DB", global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Lane to process; repeat for several. Defaults to every lane.
    #[arg(long = "lane", value_name = "LANE", global = true)]
    pub lanes: Vec<Lane>,

    /// Ask the summary service for a short description of each lesson.
    #[arg(long, env = "ENABLE_LLM_SUMMARIES", global = true)]
    pub enable_summaries: bool,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "AI_SUMMARY_MODEL", global = true)]
    pub summary_model: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    #[arg(long, env = "AI_SUMMARY_BASE_URL", global = true)]
    pub summary_base_url: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::Subcommand)]
pub enum Command {
    /// Process new attempts for the selected lanes (default).
    Run,
    /// Print each lane's checkpoint and latest run.
    Status,
}

impl Cli {
    /// Lanes to act on, in execution order.
    pub fn selected_lanes(&self) -> Vec<Lane> {
        Lane::ORDERED
            .into_iter()
            .filter(|lane| self.lanes.is_empty() || self.lanes.contains(lane))
            .collect()
    }

    fn summary_overrides(&self) -> SummaryOverrides {
        SummaryOverrides {
            enabled: self.enable_summaries.then_some(true),
            api_key: self.api_key.clone(),
            model: self.summary_model.clone(),
            base_url: self.summary_base_url.clone(),
        }
    }
}

/// Install the stderr `fmt` subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .with_filter(env_filter);
    let _ = tracing_subscriber::registry().with(fmt_layer).try_init();
}

/// Execute `cli`. Returns `Ok(false)` when at least one lane failed.
pub async fn run_main(cli: Cli) -> anyhow::Result<bool> {
    let config = match cli.config.as_deref() {
        Some(path) => InsightsConfig::load(path)?,
        None => InsightsConfig::default(),
    };
    let db_path = cli
        .db
        .clone()
        .or_else(|| config.db_path.clone())
        .unwrap_or_else(default_db_path);
    let runtime = StateRuntime::init(db_path.clone())
        .await
        .with_context(|| format!("open insights db {}", db_path.display()))?;
    let color = std::io::stdout().is_terminal();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let summarizer =
                insights_summary::from_config(&config.summarizer_config(cli.summary_overrides()));
            let outcomes =
                run_lanes(&cli.selected_lanes(), &config, runtime, summarizer).await;
            for outcome in &outcomes {
                println!("{}", outcome_line(outcome, color));
            }
            Ok(outcomes.iter().all(|outcome| outcome.result.is_ok()))
        }
        Command::Status => {
            for line in status_lines(&runtime, &cli.selected_lanes(), color).await? {
                println!("{line}");
            }
            Ok(true)
        }
    }
}

pub fn outcome_line(outcome: &LaneOutcome, color: bool) -> String {
    match &outcome.result {
        Ok(report) => {
            let label = paint("ok", color, true);
            let counts = report.counts;
            format!(
                "{label} {lane}: {entities} entity rows, {lessons} lesson rows, {summaries} summaries (run_id={run_id})",
                lane = outcome.lane,
                entities = counts.entity_rows_written,
                lessons = counts.lesson_rows_written,
                summaries = counts.summaries_written,
                run_id = report.run_id,
            )
        }
        Err(err) => {
            let label = paint("failed", color, false);
            format!("{label} {lane}: {err:#}", lane = outcome.lane)
        }
    }
}

pub async fn status_lines(
    runtime: &StateRuntime,
    lanes: &[Lane],
    color: bool,
) -> anyhow::Result<Vec<String>> {
    let mut lines = Vec::with_capacity(lanes.len());
    for lane in lanes {
        let spec = lane.spec();
        let checkpoint = runtime
            .get_checkpoint(spec.job_name)
            .await?
            .map_or_else(|| "never".to_string(), format_time);
        let run = match runtime.latest_job_run(spec.job_name).await? {
            Some(run) => {
                let status = run.status.as_str();
                let status = match run.status {
                    insights_state::JobRunStatus::Success => paint(status, color, true),
                    insights_state::JobRunStatus::Failed => paint(status, color, false),
                    insights_state::JobRunStatus::Started => status.to_string(),
                };
                let mut line = format!("{status} at {}", format_time(run.started_at));
                if let Some(error) = run.error_message {
                    line.push_str(&format!(" ({error})"));
                }
                line
            }
            None => "no runs".to_string(),
        };
        lines.push(format!(
            "{lane} [{job}] checkpoint={checkpoint} last_run={run}",
            job = spec.job_name
        ));
    }
    Ok(lines)
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn paint(text: &str, color: bool, good: bool) -> String {
    match (color, good) {
        (false, _) => text.to_string(),
        (true, true) => text.green().to_string(),
        (true, false) => text.red().bold().to_string(),
    }
}
