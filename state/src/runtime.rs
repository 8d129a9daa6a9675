use crate::CHECKPOINTS_TABLE;
use crate::Checkpoint;
use crate::EntityAggregate;
use crate::EntityInsight;
use crate::JOB_RUNS_TABLE;
use crate::JobRun;
use crate::JobRunCompletion;
use crate::JobRunHandle;
use crate::LaneSpec;
use crate::LessonInsight;
use crate::LessonRollup;
use crate::TOP_WEAK_ENTITIES;
use crate::TargetTables;
use crate::WeaknessWeights;
use crate::model::CheckpointRow;
use crate::model::EntityAggregateRow;
use crate::model::EntityInsightRow;
use crate::model::JobRunRow;
use crate::model::LessonInsightRow;
use crate::paths::datetime_to_epoch_millis;
use chrono::DateTime;
use chrono::SubsecRound;
use chrono::Utc;
use log::LevelFilter;
use sqlx::ConnectOptions;
use sqlx::Executor;
use sqlx::QueryBuilder;
use sqlx::Sqlite;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::sqlite::SqliteJournalMode;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::sqlite::SqliteSynchronous;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

mod aggregate;
mod checkpoints;
mod insights;
mod job_runs;

/// Handle to the insights database.
///
/// Every method borrows the pool for one statement or one transaction. A
/// transaction dropped before `commit` rolls back, so an error on any path
/// leaves previously committed state untouched.
#[derive(Clone)]
pub struct StateRuntime {
    db_path: Option<PathBuf>,
    pool: Arc<SqlitePool>,
}

impl StateRuntime {
    /// Open (creating if needed) the SQLite database at `db_path`.
    ///
    /// Tables are provisioned lazily by the write paths that need them.
    pub async fn init(db_path: PathBuf) -> anyhow::Result<Arc<Self>> {
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pool = match open_sqlite(&db_path).await {
            Ok(pool) => Arc::new(pool),
            Err(err) => {
                warn!("failed to open insights db at {}: {err}", db_path.display());
                return Err(err);
            }
        };
        Ok(Arc::new(Self {
            db_path: Some(db_path),
            pool,
        }))
    }

    /// Open a private in-memory database. Useful for focused tests.
    pub async fn open_in_memory() -> anyhow::Result<Arc<Self>> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .log_statements(LevelFilter::Off);
        // Every in-memory connection is a separate database; pin exactly one.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Arc::new(Self {
            db_path: None,
            pool: Arc::new(pool),
        }))
    }

    /// Database file backing this runtime, `None` when in memory.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Underlying pool, for producer-side provisioning of raw tables.
    pub fn pool(&self) -> &SqlitePool {
        self.pool.as_ref()
    }

    async fn table_exists(&self, table: &str) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(row.is_some())
    }
}

async fn open_sqlite(path: &Path) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .log_statements(LevelFilter::Off);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Current time at the precision timestamps are persisted with.
fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}
