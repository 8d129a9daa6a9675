use crate::paths::epoch_millis_to_datetime;
use chrono::DateTime;
use chrono::Utc;

/// Processing watermark for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub job_name: String,
    /// Facts at or before this instant have been folded into insights.
    pub last_processed_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CheckpointRow {
    pub(crate) job_name: String,
    pub(crate) last_processed_at: i64,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = anyhow::Error;

    fn try_from(value: CheckpointRow) -> Result<Self, Self::Error> {
        Ok(Self {
            job_name: value.job_name,
            last_processed_at: epoch_millis_to_datetime(value.last_processed_at)?,
        })
    }
}
