//! Lane orchestration for the insights pipeline.
//!
//! Each lane reads raw attempts past its checkpoint, rewrites the entity and
//! lesson insights they touch, optionally attaches summaries and then
//! advances the checkpoint. All coordination goes through the store; lanes
//! share no in-process state.

mod config;
mod orchestrator;
mod store;

use insights_state::Lane;
use insights_summary::Summarizer;
use std::sync::Arc;
use tracing::error;

pub use config::DEFAULT_AGGREGATE_LIMIT;
pub use config::DEFAULT_MODEL_VERSION;
pub use config::DEFAULT_ROLLUP_LIMIT;
pub use config::InsightsConfig;
pub use config::LaneSettings;
pub use config::LaneToml;
pub use config::SUMMARY_MODEL_VERSION_SUFFIX;
pub use config::SummaryOverrides;
pub use config::SummaryToml;
pub use config::WeightsToml;
pub use orchestrator::LaneOrchestrator;
pub use orchestrator::LaneReport;
pub use orchestrator::LaneState;
pub use store::LaneStore;

/// Result of one lane within a multi-lane invocation.
#[derive(Debug)]
pub struct LaneOutcome {
    pub lane: Lane,
    pub result: anyhow::Result<LaneReport>,
}

/// Run `lanes` sequentially in [`Lane::ORDERED`] order.
///
/// Duplicates are ignored. Every lane is attempted even when an earlier one
/// fails; inspect the outcomes to decide the process exit status.
pub async fn run_lanes(
    lanes: &[Lane],
    config: &InsightsConfig,
    store: Arc<dyn LaneStore>,
    summarizer: Arc<dyn Summarizer>,
) -> Vec<LaneOutcome> {
    let mut outcomes = Vec::new();
    for lane in Lane::ORDERED {
        if !lanes.contains(&lane) {
            continue;
        }
        let result = match config.lane_settings(lane) {
            Ok(settings) => {
                LaneOrchestrator::new(lane, settings, Arc::clone(&store), Arc::clone(&summarizer))
                    .run()
                    .await
            }
            Err(err) => Err(err),
        };
        if let Err(err) = &result {
            error!(lane = %lane, "lane failed: {err:#}");
        }
        outcomes.push(LaneOutcome { lane, result });
    }
    outcomes
}
