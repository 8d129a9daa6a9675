use crate::Lane;
use crate::paths::epoch_millis_to_datetime;
use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    Started,
    Success,
    Failed,
}

impl JobRunStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            JobRunStatus::Started => "STARTED",
            JobRunStatus::Success => "SUCCESS",
            JobRunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "STARTED" => Ok(Self::Started),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            _ => Err(anyhow::anyhow!("invalid job run status: {value}")),
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, JobRunStatus::Success | JobRunStatus::Failed)
    }
}

/// Returned by `begin_job_run`; identifies the row to finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunHandle {
    pub id: i64,
    /// Opaque correlation token for logs.
    pub run_id: String,
    pub lane: Lane,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobRunCounts {
    pub processed_attempts: i64,
    pub entity_rows_written: i64,
    pub lesson_rows_written: i64,
    pub summaries_written: i64,
}

/// Terminal update written by `complete_job_run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRunCompletion {
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    pub counts: Option<JobRunCounts>,
    pub model_version: Option<String>,
}

impl JobRunCompletion {
    pub fn success(counts: JobRunCounts, model_version: impl Into<String>) -> Self {
        Self {
            status: JobRunStatus::Success,
            error_message: None,
            counts: Some(counts),
            model_version: Some(model_version.into()),
        }
    }

    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            status: JobRunStatus::Failed,
            error_message: Some(error_message.into()),
            counts: None,
            model_version: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    pub id: i64,
    pub run_id: String,
    pub job_name: String,
    pub lane: Lane,
    pub status: JobRunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub counts: Option<JobRunCounts>,
    pub model_version: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRunRow {
    pub(crate) id: i64,
    pub(crate) run_id: String,
    pub(crate) job_name: String,
    pub(crate) lane: String,
    pub(crate) status: String,
    pub(crate) started_at: i64,
    pub(crate) finished_at: Option<i64>,
    pub(crate) error_message: Option<String>,
    pub(crate) processed_attempts: Option<i64>,
    pub(crate) entity_rows_written: Option<i64>,
    pub(crate) lesson_rows_written: Option<i64>,
    pub(crate) summaries_written: Option<i64>,
    pub(crate) model_version: Option<String>,
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = anyhow::Error;

    fn try_from(value: JobRunRow) -> Result<Self, Self::Error> {
        let counts = value.processed_attempts.map(|processed_attempts| JobRunCounts {
            processed_attempts,
            entity_rows_written: value.entity_rows_written.unwrap_or_default(),
            lesson_rows_written: value.lesson_rows_written.unwrap_or_default(),
            summaries_written: value.summaries_written.unwrap_or_default(),
        });
        Ok(Self {
            id: value.id,
            run_id: value.run_id,
            job_name: value.job_name,
            lane: Lane::from_str(value.lane.as_str())
                .map_err(|_| anyhow::anyhow!("invalid lane: {}", value.lane))?,
            status: JobRunStatus::parse(value.status.as_str())?,
            started_at: epoch_millis_to_datetime(value.started_at)?,
            finished_at: value
                .finished_at
                .map(epoch_millis_to_datetime)
                .transpose()?,
            error_message: value.error_message,
            counts,
            model_version: value.model_version,
        })
    }
}
