use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use insights_state::EntityAggregate;
use insights_state::JobRunCompletion;
use insights_state::JobRunHandle;
use insights_state::LaneSpec;
use insights_state::LessonRollup;
use insights_state::StateRuntime;
use insights_state::WeaknessWeights;
use std::collections::HashMap;

/// Storage operations a lane run needs.
///
/// [`StateRuntime`] is the production implementation; the seam exists so a
/// run can be driven against a store that fails at a chosen step.
#[async_trait]
pub trait LaneStore: Send + Sync {
    async fn begin_job_run(&self, spec: &LaneSpec) -> anyhow::Result<JobRunHandle>;

    async fn complete_job_run(
        &self,
        handle: &JobRunHandle,
        completion: &JobRunCompletion,
    ) -> anyhow::Result<()>;

    async fn get_checkpoint(&self, job_name: &str) -> anyhow::Result<Option<DateTime<Utc>>>;

    async fn set_checkpoint(
        &self,
        job_name: &str,
        last_processed_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn aggregate_entities(
        &self,
        spec: &LaneSpec,
        since: Option<DateTime<Utc>>,
        limit: usize,
        weights: &WeaknessWeights,
    ) -> anyhow::Result<Vec<EntityAggregate>>;

    async fn count_unresolved_labels(
        &self,
        spec: &LaneSpec,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<i64>;

    async fn entity_labels(
        &self,
        spec: &LaneSpec,
        keys: &[String],
    ) -> anyhow::Result<HashMap<String, String>>;

    async fn upsert_entity_insights(
        &self,
        spec: &LaneSpec,
        rows: &[EntityAggregate],
        model_version: &str,
    ) -> anyhow::Result<usize>;

    async fn build_lesson_rollups(
        &self,
        spec: &LaneSpec,
        limit: usize,
    ) -> anyhow::Result<Vec<LessonRollup>>;

    async fn upsert_lesson_insights(
        &self,
        spec: &LaneSpec,
        rollups: &[LessonRollup],
        model_version: &str,
    ) -> anyhow::Result<usize>;

    async fn update_lesson_summary(
        &self,
        spec: &LaneSpec,
        user_id: i64,
        lesson_id: i64,
        summary_text: &str,
        summary_model_version: &str,
    ) -> anyhow::Result<bool>;
}

#[async_trait]
impl LaneStore for StateRuntime {
    async fn begin_job_run(&self, spec: &LaneSpec) -> anyhow::Result<JobRunHandle> {
        StateRuntime::begin_job_run(self, spec).await
    }

    async fn complete_job_run(
        &self,
        handle: &JobRunHandle,
        completion: &JobRunCompletion,
    ) -> anyhow::Result<()> {
        StateRuntime::complete_job_run(self, handle, completion).await
    }

    async fn get_checkpoint(&self, job_name: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        StateRuntime::get_checkpoint(self, job_name).await
    }

    async fn set_checkpoint(
        &self,
        job_name: &str,
        last_processed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        StateRuntime::set_checkpoint(self, job_name, last_processed_at).await
    }

    async fn aggregate_entities(
        &self,
        spec: &LaneSpec,
        since: Option<DateTime<Utc>>,
        limit: usize,
        weights: &WeaknessWeights,
    ) -> anyhow::Result<Vec<EntityAggregate>> {
        StateRuntime::aggregate_entities(self, spec, since, limit, weights).await
    }

    async fn count_unresolved_labels(
        &self,
        spec: &LaneSpec,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<i64> {
        StateRuntime::count_unresolved_labels(self, spec, since).await
    }

    async fn entity_labels(
        &self,
        spec: &LaneSpec,
        keys: &[String],
    ) -> anyhow::Result<HashMap<String, String>> {
        StateRuntime::entity_labels(self, spec, keys).await
    }

    async fn upsert_entity_insights(
        &self,
        spec: &LaneSpec,
        rows: &[EntityAggregate],
        model_version: &str,
    ) -> anyhow::Result<usize> {
        StateRuntime::upsert_entity_insights(self, spec, rows, model_version).await
    }

    async fn build_lesson_rollups(
        &self,
        spec: &LaneSpec,
        limit: usize,
    ) -> anyhow::Result<Vec<LessonRollup>> {
        StateRuntime::build_lesson_rollups(self, spec, limit).await
    }

    async fn upsert_lesson_insights(
        &self,
        spec: &LaneSpec,
        rollups: &[LessonRollup],
        model_version: &str,
    ) -> anyhow::Result<usize> {
        StateRuntime::upsert_lesson_insights(self, spec, rollups, model_version).await
    }

    async fn update_lesson_summary(
        &self,
        spec: &LaneSpec,
        user_id: i64,
        lesson_id: i64,
        summary_text: &str,
        summary_model_version: &str,
    ) -> anyhow::Result<bool> {
        StateRuntime::update_lesson_summary(
            self,
            spec,
            user_id,
            lesson_id,
            summary_text,
            summary_model_version,
        )
        .await
    }
}
