mod checkpoint;
mod insight;
mod job_run;
mod lane;
mod weakness;

pub use checkpoint::Checkpoint;
pub use insight::EntityAggregate;
pub use insight::EntityInsight;
pub use insight::LessonInsight;
pub use insight::LessonRollup;
pub use insight::TOP_WEAK_ENTITIES;
pub use job_run::JobRun;
pub use job_run::JobRunCompletion;
pub use job_run::JobRunCounts;
pub use job_run::JobRunHandle;
pub use job_run::JobRunStatus;
pub use lane::EntityLookup;
pub use lane::Lane;
pub use lane::LaneSpec;
pub use lane::SourceSchema;
pub use lane::SubjectScope;
pub use lane::TargetTables;
pub use weakness::WeaknessWeights;
pub use weakness::accuracy_rate;

pub(crate) use checkpoint::CheckpointRow;
pub(crate) use insight::EntityAggregateRow;
pub(crate) use insight::EntityInsightRow;
pub(crate) use insight::LessonInsightRow;
pub(crate) use job_run::JobRunRow;
