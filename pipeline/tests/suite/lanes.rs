use async_trait::async_trait;
use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use insights_pipeline::InsightsConfig;
use insights_pipeline::LaneOrchestrator;
use insights_pipeline::LaneReport;
use insights_pipeline::LaneSettings;
use insights_pipeline::LaneState;
use insights_pipeline::LaneStore;
use insights_pipeline::run_lanes;
use insights_state::EntityAggregate;
use insights_state::JobRunCompletion;
use insights_state::JobRunCounts;
use insights_state::JobRunHandle;
use insights_state::JobRunStatus;
use insights_state::Lane;
use insights_state::LaneSpec;
use insights_state::LessonRollup;
use insights_state::StateRuntime;
use insights_state::WeaknessWeights;
use insights_summary::DisabledSummarizer;
use insights_summary::Summarizer;
use insights_test_support::RawAttempt;
use insights_test_support::insert_attempts;
use insights_test_support::provision_source;
use insights_test_support::ts;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::Arc;

const T0: i64 = 1_700_000_000_000;

fn disabled() -> Arc<dyn Summarizer> {
    Arc::new(DisabledSummarizer)
}

async fn seeded_spelling() -> Arc<StateRuntime> {
    let runtime = StateRuntime::open_in_memory().await.expect("open db");
    let spec = Lane::Spelling.spec();
    provision_source(&runtime, spec).await.expect("provision");
    insert_attempts(
        &runtime,
        spec,
        &[
            RawAttempt::new(1, 10, "cat", true, 200, ts(T0)),
            RawAttempt::new(1, 10, "cat", false, 400, ts(T0 + 1_000)),
            RawAttempt::new(1, 10, "dog", true, 100, ts(T0 + 2_000)),
            RawAttempt::new(2, 11, "owl", false, 900, ts(T0 + 3_000)),
        ],
    )
    .await
    .expect("insert attempts");
    runtime
}

async fn run_lane(
    store: Arc<dyn LaneStore>,
    lane: Lane,
) -> (LaneState, anyhow::Result<LaneReport>) {
    let mut orchestrator =
        LaneOrchestrator::new(lane, LaneSettings::default(), store, disabled());
    let result = orchestrator.run().await;
    (orchestrator.state(), result)
}

/// Insight rows with the write timestamp dropped.
async fn insight_snapshot(
    runtime: &StateRuntime,
    spec: &LaneSpec,
) -> (Vec<EntityAggregate>, Vec<LessonRollup>) {
    let entities = runtime
        .list_entity_insights(spec)
        .await
        .expect("list entities")
        .into_iter()
        .map(|insight| insight.aggregate)
        .collect();
    let lessons = runtime
        .list_lesson_insights(spec)
        .await
        .expect("list lessons")
        .into_iter()
        .map(|insight| insight.rollup)
        .collect();
    (entities, lessons)
}

async fn entity_keys(runtime: &StateRuntime, spec: &LaneSpec) -> Vec<String> {
    runtime
        .list_entity_insights(spec)
        .await
        .expect("list entities")
        .into_iter()
        .map(|insight| insight.aggregate.entity_key)
        .collect()
}

#[tokio::test]
async fn successful_run_writes_insights_and_advances_checkpoint() {
    let runtime = seeded_spelling().await;
    let spec = Lane::Spelling.spec();

    let (state, result) = run_lane(runtime.clone(), Lane::Spelling).await;
    let report = result.expect("lane succeeds");

    assert_eq!(state, LaneState::Succeeded);
    assert_eq!(report.since, None);
    assert_eq!(
        report.counts,
        JobRunCounts {
            processed_attempts: 4,
            entity_rows_written: 3,
            lesson_rows_written: 2,
            summaries_written: 0,
        }
    );
    assert_eq!(
        runtime
            .get_checkpoint(spec.job_name)
            .await
            .expect("read checkpoint"),
        Some(report.checkpoint)
    );

    let run = runtime
        .latest_job_run(spec.job_name)
        .await
        .expect("latest run")
        .expect("run exists");
    assert_eq!(run.run_id, report.run_id);
    assert_eq!(run.status, JobRunStatus::Success);
    assert_eq!(run.counts, Some(report.counts));
    assert_eq!(run.model_version.as_deref(), Some("phase1-v1"));

    let lesson = runtime
        .get_lesson_insight(spec, 1, 10)
        .await
        .expect("load lesson")
        .expect("lesson exists");
    assert_eq!(lesson.rollup.attempts_total, 3);
    assert_eq!(lesson.rollup.top_weak_entities, vec!["cat", "dog"]);
    assert_eq!(lesson.summary_text, None);
}

#[tokio::test]
async fn rerun_over_same_window_reproduces_identical_rows() {
    let runtime = seeded_spelling().await;
    let spec = Lane::Spelling.spec();

    run_lane(runtime.clone(), Lane::Spelling)
        .await
        .1
        .expect("first run");
    let first = insight_snapshot(&runtime, spec).await;

    sqlx::query("DELETE FROM platform_ai_job_checkpoints")
        .execute(runtime.pool())
        .await
        .expect("reset checkpoint");
    run_lane(runtime.clone(), Lane::Spelling)
        .await
        .1
        .expect("second run");

    assert_eq!(insight_snapshot(&runtime, spec).await, first);
}

#[tokio::test]
async fn later_run_only_touches_keys_with_new_attempts() {
    let runtime = seeded_spelling().await;
    let spec = Lane::Spelling.spec();
    run_lane(runtime.clone(), Lane::Spelling)
        .await
        .1
        .expect("first run");
    let before = runtime
        .list_entity_insights(spec)
        .await
        .expect("list entities");

    let idle = run_lane(runtime.clone(), Lane::Spelling)
        .await
        .1
        .expect("idle run");
    assert_eq!(idle.counts, JobRunCounts::default());
    assert_eq!(
        runtime
            .list_entity_insights(spec)
            .await
            .expect("list entities"),
        before
    );

    let later = Utc::now() + Duration::minutes(5);
    insert_attempts(
        &runtime,
        spec,
        &[RawAttempt::new(1, 10, "dog", false, 300, later)],
    )
    .await
    .expect("insert late attempt");
    let report = run_lane(runtime.clone(), Lane::Spelling)
        .await
        .1
        .expect("incremental run");

    assert_eq!(report.since, Some(idle.checkpoint));
    assert_eq!(report.counts.processed_attempts, 2);
    assert_eq!(report.counts.entity_rows_written, 1);
    let dog = runtime
        .list_entity_insights(spec)
        .await
        .expect("list entities")
        .into_iter()
        .find(|insight| insight.aggregate.entity_key == "dog")
        .expect("dog row");
    assert_eq!(dog.aggregate.attempts_total, 2);
    assert_eq!(dog.aggregate.attempts_incorrect, 1);
}

#[tokio::test]
async fn failure_after_entity_write_keeps_checkpoint_and_records_failure() {
    let runtime = seeded_spelling().await;
    let spec = Lane::Spelling.spec();
    let previous = ts(T0 - 60_000);
    runtime
        .set_checkpoint(spec.job_name, previous)
        .await
        .expect("seed checkpoint");
    let store = Arc::new(FaultyStore {
        inner: runtime.clone(),
        fault: Fault::Rollup,
    });

    let (state, result) = run_lane(store, Lane::Spelling).await;
    let err = result.expect_err("rollup failure fails the lane");

    assert_eq!(state, LaneState::Failed);
    assert!(format!("{err:#}").contains("rollup store offline"));
    assert_eq!(
        runtime
            .get_checkpoint(spec.job_name)
            .await
            .expect("read checkpoint"),
        Some(previous)
    );
    assert_eq!(
        runtime
            .list_entity_insights(spec)
            .await
            .expect("list entities")
            .len(),
        3
    );
    let run = runtime
        .latest_job_run(spec.job_name)
        .await
        .expect("latest run")
        .expect("run exists");
    assert_eq!(run.status, JobRunStatus::Failed);
    assert!(
        run.error_message
            .as_deref()
            .is_some_and(|message| message.contains("build spelling lesson rollups"))
    );
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn unreadable_checkpoint_processes_all_history() {
    let runtime = seeded_spelling().await;
    let spec = Lane::Spelling.spec();
    runtime
        .set_checkpoint(spec.job_name, ts(T0 + 10_000))
        .await
        .expect("seed checkpoint");
    let store = Arc::new(FaultyStore {
        inner: runtime.clone(),
        fault: Fault::CheckpointRead,
    });

    let report = run_lane(store, Lane::Spelling)
        .await
        .1
        .expect("lane succeeds");

    assert_eq!(report.since, None);
    assert_eq!(report.counts.entity_rows_written, 3);
}

#[tokio::test]
async fn empty_window_is_a_successful_no_op() {
    let runtime = StateRuntime::open_in_memory().await.expect("open db");
    let spec = Lane::Arithmetic.spec();
    provision_source(&runtime, spec).await.expect("provision");

    let (state, result) = run_lane(runtime.clone(), Lane::Arithmetic).await;
    let report = result.expect("lane succeeds");

    assert_eq!(state, LaneState::Succeeded);
    assert_eq!(report.counts, JobRunCounts::default());
    let insight_tables: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'math_ai_%'",
    )
    .fetch_one(runtime.pool())
    .await
    .expect("count tables");
    assert_eq!(insight_tables, 0);
    assert_eq!(
        runtime
            .get_checkpoint(spec.job_name)
            .await
            .expect("read checkpoint"),
        Some(report.checkpoint)
    );
}

#[tokio::test]
async fn capped_run_advances_and_skips_older_keys_until_they_change() {
    let runtime = StateRuntime::open_in_memory().await.expect("open db");
    let spec = Lane::Spelling.spec();
    provision_source(&runtime, spec).await.expect("provision");
    insert_attempts(
        &runtime,
        spec,
        &[
            RawAttempt::new(1, 10, "cat", false, 400, ts(T0)),
            RawAttempt::new(1, 10, "dog", true, 200, ts(T0 + 1_000)),
        ],
    )
    .await
    .expect("insert attempts");
    let settings = LaneSettings {
        aggregate_limit: 1,
        ..LaneSettings::default()
    };

    let first = LaneOrchestrator::new(
        Lane::Spelling,
        settings.clone(),
        runtime.clone(),
        disabled(),
    )
    .run()
    .await
    .expect("first run");
    assert!(first.capped);
    assert_eq!(entity_keys(&runtime, spec).await, vec!["dog"]);
    assert_eq!(
        runtime
            .get_checkpoint(spec.job_name)
            .await
            .expect("read checkpoint"),
        Some(first.checkpoint)
    );

    // "cat" was touched by the capped run but has no newer attempt.
    let idle = LaneOrchestrator::new(
        Lane::Spelling,
        settings.clone(),
        runtime.clone(),
        disabled(),
    )
    .run()
    .await
    .expect("idle run");
    assert!(!idle.capped);
    assert_eq!(entity_keys(&runtime, spec).await, vec!["dog"]);

    insert_attempts(
        &runtime,
        spec,
        &[RawAttempt::new(
            1,
            10,
            "cat",
            true,
            200,
            Utc::now() + Duration::minutes(5),
        )],
    )
    .await
    .expect("insert late attempt");
    LaneOrchestrator::new(Lane::Spelling, settings, runtime.clone(), disabled())
        .run()
        .await
        .expect("third run");
    let cat = runtime
        .list_entity_insights(spec)
        .await
        .expect("list entities")
        .into_iter()
        .find(|insight| insight.aggregate.entity_key == "cat")
        .expect("cat row");
    assert_eq!(cat.aggregate.attempts_total, 2);
}

#[tokio::test]
async fn orchestrator_runs_only_once() {
    let runtime = seeded_spelling().await;
    let mut orchestrator =
        LaneOrchestrator::new(Lane::Spelling, LaneSettings::default(), runtime, disabled());

    orchestrator.run().await.expect("first run");

    assert!(orchestrator.run().await.is_err());
    assert_eq!(orchestrator.state(), LaneState::Succeeded);
}

#[tokio::test]
async fn run_lanes_attempts_every_lane_in_fixed_order() {
    let runtime = seeded_spelling().await;
    // The vocabulary source table is never provisioned, so that lane fails.
    let outcomes = run_lanes(
        &[Lane::Spelling, Lane::Vocabulary, Lane::Spelling],
        &InsightsConfig::default(),
        runtime.clone(),
        disabled(),
    )
    .await;

    let summary: Vec<(Lane, bool)> = outcomes
        .iter()
        .map(|outcome| (outcome.lane, outcome.result.is_ok()))
        .collect();
    assert_eq!(
        summary,
        vec![(Lane::Vocabulary, false), (Lane::Spelling, true)]
    );
    let vocabulary = runtime
        .latest_job_run(Lane::Vocabulary.spec().job_name)
        .await
        .expect("latest run")
        .expect("run exists");
    assert_eq!(vocabulary.status, JobRunStatus::Failed);
    assert_eq!(
        runtime
            .get_checkpoint(Lane::Vocabulary.spec().job_name)
            .await
            .expect("read checkpoint"),
        None
    );
}

#[derive(Clone, Copy)]
enum Fault {
    CheckpointRead,
    Rollup,
}

/// Delegates to a real store but fails one step.
struct FaultyStore {
    inner: Arc<StateRuntime>,
    fault: Fault,
}

#[async_trait]
impl LaneStore for FaultyStore {
    async fn begin_job_run(&self, spec: &LaneSpec) -> anyhow::Result<JobRunHandle> {
        self.inner.begin_job_run(spec).await
    }

    async fn complete_job_run(
        &self,
        handle: &JobRunHandle,
        completion: &JobRunCompletion,
    ) -> anyhow::Result<()> {
        self.inner.complete_job_run(handle, completion).await
    }

    async fn get_checkpoint(&self, job_name: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        match self.fault {
            Fault::CheckpointRead => anyhow::bail!("checkpoint store unreachable"),
            Fault::Rollup => self.inner.get_checkpoint(job_name).await,
        }
    }

    async fn set_checkpoint(
        &self,
        job_name: &str,
        last_processed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.inner.set_checkpoint(job_name, last_processed_at).await
    }

    async fn aggregate_entities(
        &self,
        spec: &LaneSpec,
        since: Option<DateTime<Utc>>,
        limit: usize,
        weights: &WeaknessWeights,
    ) -> anyhow::Result<Vec<EntityAggregate>> {
        self.inner
            .aggregate_entities(spec, since, limit, weights)
            .await
    }

    async fn count_unresolved_labels(
        &self,
        spec: &LaneSpec,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<i64> {
        self.inner.count_unresolved_labels(spec, since).await
    }

    async fn entity_labels(
        &self,
        spec: &LaneSpec,
        keys: &[String],
    ) -> anyhow::Result<HashMap<String, String>> {
        self.inner.entity_labels(spec, keys).await
    }

    async fn upsert_entity_insights(
        &self,
        spec: &LaneSpec,
        rows: &[EntityAggregate],
        model_version: &str,
    ) -> anyhow::Result<usize> {
        self.inner
            .upsert_entity_insights(spec, rows, model_version)
            .await
    }

    async fn build_lesson_rollups(
        &self,
        spec: &LaneSpec,
        limit: usize,
    ) -> anyhow::Result<Vec<LessonRollup>> {
        match self.fault {
            Fault::Rollup => anyhow::bail!("rollup store offline"),
            Fault::CheckpointRead => self.inner.build_lesson_rollups(spec, limit).await,
        }
    }

    async fn upsert_lesson_insights(
        &self,
        spec: &LaneSpec,
        rollups: &[LessonRollup],
        model_version: &str,
    ) -> anyhow::Result<usize> {
        self.inner
            .upsert_lesson_insights(spec, rollups, model_version)
            .await
    }

    async fn update_lesson_summary(
        &self,
        spec: &LaneSpec,
        user_id: i64,
        lesson_id: i64,
        summary_text: &str,
        summary_model_version: &str,
    ) -> anyhow::Result<bool> {
        self.inner
            .update_lesson_summary(spec, user_id, lesson_id, summary_text, summary_model_version)
            .await
    }
}
