use crate::LaneSettings;
use crate::LaneStore;
use anyhow::Context;
use chrono::DateTime;
use chrono::SubsecRound;
use chrono::Utc;
use insights_state::JobRunCompletion;
use insights_state::JobRunCounts;
use insights_state::JobRunHandle;
use insights_state::Lane;
use insights_state::LaneSpec;
use insights_state::LessonRollup;
use insights_summary::LessonStats;
use insights_summary::Summarizer;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use tracing::info;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// Outcome of a successful lane run.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneReport {
    pub lane: Lane,
    pub run_id: String,
    /// Checkpoint the run started from; `None` means all history.
    pub since: Option<DateTime<Utc>>,
    /// Checkpoint the run advanced to.
    pub checkpoint: DateTime<Utc>,
    pub counts: JobRunCounts,
    /// In-window facts dropped because their label has no entity.
    pub unresolved_labels: i64,
    /// Aggregation hit the configured limit. Touched keys beyond it stay
    /// stale until they receive another attempt.
    pub capped: bool,
}

/// Drives one lane through `Idle -> Running -> {Succeeded, Failed}`.
///
/// The checkpoint only moves after aggregation, both upserts and the rollup
/// succeeded. Summaries are best effort and never fail the lane.
pub struct LaneOrchestrator {
    spec: &'static LaneSpec,
    settings: LaneSettings,
    store: Arc<dyn LaneStore>,
    summarizer: Arc<dyn Summarizer>,
    state: LaneState,
}

impl LaneOrchestrator {
    pub fn new(
        lane: Lane,
        settings: LaneSettings,
        store: Arc<dyn LaneStore>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            spec: lane.spec(),
            settings,
            store,
            summarizer,
            state: LaneState::Idle,
        }
    }

    pub fn lane(&self) -> Lane {
        self.spec.lane
    }

    pub fn state(&self) -> LaneState {
        self.state
    }

    /// Run the lane once. A failed run is recorded as `FAILED` and the error
    /// is returned to the caller.
    pub async fn run(&mut self) -> anyhow::Result<LaneReport> {
        if self.state != LaneState::Idle {
            anyhow::bail!("lane {} already ran (state {:?})", self.spec.lane, self.state);
        }
        let lane = self.spec.lane;
        let handle = match self.store.begin_job_run(self.spec).await {
            Ok(handle) => handle,
            Err(err) => {
                self.state = LaneState::Failed;
                return Err(err.context(format!("begin {lane} job run")));
            }
        };
        self.state = LaneState::Running;
        info!(
            lane = %lane,
            run_id = %handle.run_id,
            job_name = self.spec.job_name,
            "lane started"
        );

        let report = match self.run_body(&handle).await {
            Ok(report) => report,
            Err(err) => {
                self.state = LaneState::Failed;
                let message = format!("{err:#}");
                warn!(lane = %lane, run_id = %handle.run_id, "lane failed: {message}");
                if let Err(complete_err) = self
                    .store
                    .complete_job_run(&handle, &JobRunCompletion::failure(message))
                    .await
                {
                    warn!(
                        lane = %lane,
                        run_id = %handle.run_id,
                        "failed to record failed run: {complete_err:#}"
                    );
                }
                return Err(err);
            }
        };

        let completion =
            JobRunCompletion::success(report.counts, self.settings.model_version.as_str());
        if let Err(err) = self.store.complete_job_run(&handle, &completion).await {
            self.state = LaneState::Failed;
            return Err(err.context(format!("record {lane} job run success")));
        }
        self.state = LaneState::Succeeded;
        info!(
            lane = %lane,
            run_id = %handle.run_id,
            processed_attempts = report.counts.processed_attempts,
            entity_rows = report.counts.entity_rows_written,
            lesson_rows = report.counts.lesson_rows_written,
            summaries = report.counts.summaries_written,
            "lane complete"
        );
        Ok(report)
    }

    async fn run_body(&self, handle: &JobRunHandle) -> anyhow::Result<LaneReport> {
        let spec = self.spec;
        let lane = spec.lane;
        let settings = &self.settings;
        // Captured before reading so facts landing mid-run fall in the next window.
        let now = Utc::now().trunc_subsecs(3);

        let since = match self.store.get_checkpoint(spec.job_name).await {
            Ok(since) => since,
            Err(err) => {
                warn!(
                    lane = %lane,
                    "checkpoint unreadable, processing all history: {err:#}"
                );
                None
            }
        };
        debug!(lane = %lane, since = ?since, "aggregating");

        let rows = self
            .store
            .aggregate_entities(spec, since, settings.aggregate_limit, &settings.weights)
            .await
            .with_context(|| format!("aggregate {lane} attempts"))?;
        let capped = rows.len() >= settings.aggregate_limit;
        if capped {
            warn!(
                lane = %lane,
                limit = settings.aggregate_limit,
                "aggregation limit reached; older touched keys are skipped until they see new attempts"
            );
        }
        let unresolved_labels = match self.store.count_unresolved_labels(spec, since).await {
            Ok(count) => count,
            Err(err) => {
                warn!(lane = %lane, "failed to count unresolved labels: {err:#}");
                0
            }
        };
        if unresolved_labels > 0 {
            warn!(
                lane = %lane,
                unresolved_labels,
                "dropped attempts whose label matches no entity"
            );
        }

        let mut counts = JobRunCounts {
            processed_attempts: rows.iter().map(|row| row.attempts_total).sum(),
            ..JobRunCounts::default()
        };
        if !rows.is_empty() {
            let written = self
                .store
                .upsert_entity_insights(spec, &rows, settings.model_version.as_str())
                .await
                .with_context(|| format!("write {lane} entity insights"))?;
            counts.entity_rows_written = to_count(written);

            let rollups = self
                .store
                .build_lesson_rollups(spec, settings.rollup_limit)
                .await
                .with_context(|| format!("build {lane} lesson rollups"))?;
            let written = self
                .store
                .upsert_lesson_insights(spec, &rollups, settings.model_version.as_str())
                .await
                .with_context(|| format!("write {lane} lesson insights"))?;
            counts.lesson_rows_written = to_count(written);

            counts.summaries_written = self.write_summaries(&rollups).await;
        }

        self.store
            .set_checkpoint(spec.job_name, now)
            .await
            .with_context(|| format!("advance {lane} checkpoint"))?;

        Ok(LaneReport {
            lane,
            run_id: handle.run_id.clone(),
            since,
            checkpoint: now,
            counts,
            unresolved_labels,
            capped,
        })
    }

    async fn write_summaries(&self, rollups: &[LessonRollup]) -> i64 {
        if !self.summarizer.is_enabled() {
            return 0;
        }
        let lane = self.spec.lane;
        let summary_model_version = self.settings.summary_model_version();
        let labels = self.focus_labels(rollups).await;
        let mut written = 0;
        for rollup in rollups {
            let stats = LessonStats {
                attempts_total: rollup.attempts_total,
                accuracy_rate: rollup.accuracy_rate,
                avg_response_ms: rollup.avg_response_ms,
                focus_entities: rollup
                    .top_weak_entities
                    .iter()
                    .map(|key| labels.get(key).unwrap_or(key).clone())
                    .collect(),
            };
            let Some(summary) = self.summarizer.summarize(&stats).await else {
                continue;
            };
            match self
                .store
                .update_lesson_summary(
                    self.spec,
                    rollup.user_id,
                    rollup.lesson_id,
                    summary.as_str(),
                    summary_model_version.as_str(),
                )
                .await
            {
                Ok(true) => written += 1,
                Ok(false) => debug!(
                    lane = %lane,
                    user_id = rollup.user_id,
                    lesson_id = rollup.lesson_id,
                    "lesson row missing; summary dropped"
                ),
                Err(err) => warn!(
                    lane = %lane,
                    user_id = rollup.user_id,
                    lesson_id = rollup.lesson_id,
                    "failed to store lesson summary: {err:#}"
                ),
            }
        }
        written
    }

    /// Words for the weak-entity keys of lanes that key entities by lookup id.
    /// Keys without a label are shown as-is.
    async fn focus_labels(&self, rollups: &[LessonRollup]) -> HashMap<String, String> {
        if self.spec.lookup.is_none() {
            return HashMap::new();
        }
        let keys: Vec<String> = rollups
            .iter()
            .flat_map(|rollup| rollup.top_weak_entities.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        match self.store.entity_labels(self.spec, &keys).await {
            Ok(labels) => labels,
            Err(err) => {
                warn!(lane = %self.spec.lane, "failed to resolve entity labels: {err:#}");
                HashMap::new()
            }
        }
    }
}

fn to_count(rows: usize) -> i64 {
    i64::try_from(rows).unwrap_or(i64::MAX)
}
