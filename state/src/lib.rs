//! SQLite-backed state for the incremental insights pipeline.
//!
//! This crate owns every table the pipeline reads or writes: per-job
//! checkpoints, the job run log, and the entity/lesson insight tables of each
//! lane. Raw attempt tables belong to the producing system and are only read.
//! Lane sequencing lives in `insights-pipeline`.

mod model;
mod paths;
mod runtime;

/// Preferred entrypoint: owns the connection pool.
pub use runtime::StateRuntime;

pub use model::Checkpoint;
pub use model::EntityAggregate;
pub use model::EntityInsight;
pub use model::EntityLookup;
pub use model::JobRun;
pub use model::JobRunCompletion;
pub use model::JobRunCounts;
pub use model::JobRunHandle;
pub use model::JobRunStatus;
pub use model::Lane;
pub use model::LaneSpec;
pub use model::LessonInsight;
pub use model::LessonRollup;
pub use model::SourceSchema;
pub use model::SubjectScope;
pub use model::TOP_WEAK_ENTITIES;
pub use model::TargetTables;
pub use model::WeaknessWeights;
pub use model::accuracy_rate;
pub use paths::INSIGHTS_DB_FILENAME;
pub use paths::default_db_path;

/// Table holding one `last_processed_at` row per job name.
pub const CHECKPOINTS_TABLE: &str = "platform_ai_job_checkpoints";
/// Table holding one row per lane execution.
pub const JOB_RUNS_TABLE: &str = "platform_ai_job_runs";
