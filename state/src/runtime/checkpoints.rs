use super::*;

impl StateRuntime {
    /// Last processed instant recorded for `job_name`.
    ///
    /// Returns `None` for a job that never completed and for a database whose
    /// checkpoint table has not been provisioned yet; both mean "process all
    /// history".
    pub async fn get_checkpoint(&self, job_name: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        if !self.table_exists(CHECKPOINTS_TABLE).await? {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, CheckpointRow>(&format!(
            r#"
SELECT job_name, last_processed_at
FROM {CHECKPOINTS_TABLE}
WHERE job_name = ?
            "#
        ))
        .bind(job_name)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row
            .map(Checkpoint::try_from)
            .transpose()?
            .map(|checkpoint| checkpoint.last_processed_at))
    }

    /// All recorded checkpoints ordered by job name.
    pub async fn list_checkpoints(&self) -> anyhow::Result<Vec<Checkpoint>> {
        if !self.table_exists(CHECKPOINTS_TABLE).await? {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, CheckpointRow>(&format!(
            "SELECT job_name, last_processed_at FROM {CHECKPOINTS_TABLE} ORDER BY job_name ASC"
        ))
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.into_iter().map(Checkpoint::try_from).collect()
    }

    /// Upsert the checkpoint for `job_name`, provisioning the table on first
    /// use. Callers are responsible for passing non-decreasing timestamps.
    pub async fn set_checkpoint(
        &self,
        job_name: &str,
        last_processed_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        ensure_checkpoints_table(&mut *tx).await?;
        sqlx::query(&format!(
            r#"
INSERT INTO {CHECKPOINTS_TABLE} (job_name, last_processed_at)
VALUES (?, ?)
ON CONFLICT(job_name) DO UPDATE SET
    last_processed_at = excluded.last_processed_at
            "#
        ))
        .bind(job_name)
        .bind(datetime_to_epoch_millis(last_processed_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn ensure_checkpoints_table<'e, E>(executor: E) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    executor
        .execute(
            format!(
                r#"
CREATE TABLE IF NOT EXISTS {CHECKPOINTS_TABLE} (
    job_name TEXT PRIMARY KEY,
    last_processed_at INTEGER NOT NULL
)
                "#
            )
            .as_str(),
        )
        .await?;
    Ok(())
}
