use insights_state::StateRuntime;
use insights_test_support::ts;
use insights_test_support::unique_temp_dir;
use pretty_assertions::assert_eq;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_sets_for_different_jobs_both_land() {
    let home = unique_temp_dir();
    let runtime = StateRuntime::init(home.join("insights.sqlite"))
        .await
        .expect("initialize runtime");

    let (spelling, math) = tokio::join!(
        runtime.set_checkpoint("spelling_ai_phase1", ts(1_700_000_000_100)),
        runtime.set_checkpoint("math_ai_phase1", ts(1_700_000_000_200)),
    );
    spelling.expect("spelling checkpoint");
    math.expect("math checkpoint");

    let checkpoints: Vec<(String, i64)> = runtime
        .list_checkpoints()
        .await
        .expect("list checkpoints")
        .into_iter()
        .map(|checkpoint| {
            (
                checkpoint.job_name,
                checkpoint.last_processed_at.timestamp_millis(),
            )
        })
        .collect();
    assert_eq!(
        checkpoints,
        vec![
            ("math_ai_phase1".to_string(), 1_700_000_000_200),
            ("spelling_ai_phase1".to_string(), 1_700_000_000_100),
        ]
    );

    let _ = tokio::fs::remove_dir_all(home).await;
}
