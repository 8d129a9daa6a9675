use super::*;

const JOB_RUN_COLUMNS: &str = r#"
    id,
    run_id,
    job_name,
    lane,
    status,
    started_at,
    finished_at,
    error_message,
    processed_attempts,
    entity_rows_written,
    lesson_rows_written,
    summaries_written,
    model_version
"#;

impl StateRuntime {
    /// Record the start of a lane execution in `STARTED` state.
    pub async fn begin_job_run(&self, spec: &LaneSpec) -> anyhow::Result<JobRunHandle> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = now_millis();
        let mut tx = self.pool.begin().await?;
        ensure_job_runs_table(&mut *tx).await?;
        let result = sqlx::query(&format!(
            r#"
INSERT INTO {JOB_RUNS_TABLE} (run_id, job_name, lane, status, started_at)
VALUES (?, ?, ?, ?, ?)
            "#
        ))
        .bind(run_id.as_str())
        .bind(spec.job_name)
        .bind(spec.lane.to_string())
        .bind(crate::JobRunStatus::Started.as_str())
        .bind(datetime_to_epoch_millis(started_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(JobRunHandle {
            id: result.last_insert_rowid(),
            run_id,
            lane: spec.lane,
            job_name: spec.job_name.to_string(),
            started_at,
        })
    }

    /// Write the terminal state of a run.
    ///
    /// The update is keyed by run id and overwrites unconditionally, so a
    /// repeated call simply rewrites the same terminal row.
    pub async fn complete_job_run(
        &self,
        handle: &JobRunHandle,
        completion: &JobRunCompletion,
    ) -> anyhow::Result<()> {
        if !completion.status.is_final() {
            anyhow::bail!(
                "job run {} cannot complete with non-terminal status {}",
                handle.run_id,
                completion.status.as_str()
            );
        }
        let counts = completion.counts;
        let result = sqlx::query(&format!(
            r#"
UPDATE {JOB_RUNS_TABLE}
SET
    status = ?,
    finished_at = ?,
    error_message = ?,
    processed_attempts = ?,
    entity_rows_written = ?,
    lesson_rows_written = ?,
    summaries_written = ?,
    model_version = ?
WHERE id = ?
            "#
        ))
        .bind(completion.status.as_str())
        .bind(datetime_to_epoch_millis(now_millis()))
        .bind(completion.error_message.as_deref())
        .bind(counts.map(|counts| counts.processed_attempts))
        .bind(counts.map(|counts| counts.entity_rows_written))
        .bind(counts.map(|counts| counts.lesson_rows_written))
        .bind(counts.map(|counts| counts.summaries_written))
        .bind(completion.model_version.as_deref())
        .bind(handle.id)
        .execute(self.pool.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            anyhow::bail!("job run {} (id {}) not found", handle.run_id, handle.id);
        }
        Ok(())
    }

    pub async fn get_job_run(&self, id: i64) -> anyhow::Result<Option<JobRun>> {
        if !self.table_exists(JOB_RUNS_TABLE).await? {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, JobRunRow>(&format!(
            "SELECT {JOB_RUN_COLUMNS} FROM {JOB_RUNS_TABLE} WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(JobRun::try_from).transpose()
    }

    /// Most recently started run for `job_name`.
    pub async fn latest_job_run(&self, job_name: &str) -> anyhow::Result<Option<JobRun>> {
        if !self.table_exists(JOB_RUNS_TABLE).await? {
            return Ok(None);
        }
        let row = sqlx::query_as::<_, JobRunRow>(&format!(
            r#"
SELECT {JOB_RUN_COLUMNS}
FROM {JOB_RUNS_TABLE}
WHERE job_name = ?
ORDER BY id DESC
LIMIT 1
            "#
        ))
        .bind(job_name)
        .fetch_optional(self.pool.as_ref())
        .await?;
        row.map(JobRun::try_from).transpose()
    }
}

async fn ensure_job_runs_table<'e, E>(executor: E) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    executor
        .execute(
            format!(
                r#"
CREATE TABLE IF NOT EXISTS {JOB_RUNS_TABLE} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL UNIQUE,
    job_name TEXT NOT NULL,
    lane TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    finished_at INTEGER,
    error_message TEXT,
    processed_attempts INTEGER,
    entity_rows_written INTEGER,
    lesson_rows_written INTEGER,
    summaries_written INTEGER,
    model_version TEXT
)
                "#
            )
            .as_str(),
        )
        .await?;
    Ok(())
}
