use super::*;

impl StateRuntime {
    /// Insert-or-replace entity insights keyed on `(user, lesson, entity)`.
    ///
    /// Every derived column is overwritten, `evaluated_at` is refreshed and
    /// `model_version` stamped. The batch commits as one transaction. An
    /// empty batch returns `0` without touching the database.
    pub async fn upsert_entity_insights(
        &self,
        spec: &LaneSpec,
        rows: &[EntityAggregate],
        model_version: &str,
    ) -> anyhow::Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let target = &spec.target;
        let evaluated_at = datetime_to_epoch_millis(now_millis());
        let sql = format!(
            r#"
INSERT INTO {table} (
    user_id,
    lesson_id,
    {entity},
    attempts_total,
    attempts_incorrect,
    accuracy_rate,
    avg_response_ms,
    last_attempt_at,
    last_incorrect_at,
    weakness_score,
    evaluated_at,
    model_version
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
ON CONFLICT(user_id, lesson_id, {entity}) DO UPDATE SET
    attempts_total = excluded.attempts_total,
    attempts_incorrect = excluded.attempts_incorrect,
    accuracy_rate = excluded.accuracy_rate,
    avg_response_ms = excluded.avg_response_ms,
    last_attempt_at = excluded.last_attempt_at,
    last_incorrect_at = excluded.last_incorrect_at,
    weakness_score = excluded.weakness_score,
    evaluated_at = excluded.evaluated_at,
    model_version = excluded.model_version
            "#,
            table = target.entity_table,
            entity = target.entity_column,
        );

        let mut tx = self.pool.begin().await?;
        ensure_entity_table(&mut *tx, target).await?;
        for row in rows {
            sqlx::query(sql.as_str())
                .bind(row.user_id)
                .bind(row.lesson_id)
                .bind(row.entity_key.as_str())
                .bind(row.attempts_total)
                .bind(row.attempts_incorrect)
                .bind(row.accuracy_rate)
                .bind(row.avg_response_ms)
                .bind(datetime_to_epoch_millis(row.last_attempt_at))
                .bind(row.last_incorrect_at.map(datetime_to_epoch_millis))
                .bind(row.weakness_score)
                .bind(evaluated_at)
                .bind(model_version)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    /// Derive lesson rollups from the stored entity insights.
    ///
    /// One rollup per `(user, lesson)` with at least one entity row, ordered
    /// by most recent activity and capped at `limit`. The weak-entity list is
    /// weakest first: descending weakness score, then descending attempts,
    /// then entity key.
    pub async fn build_lesson_rollups(
        &self,
        spec: &LaneSpec,
        limit: usize,
    ) -> anyhow::Result<Vec<LessonRollup>> {
        let target = &spec.target;
        if !self.table_exists(target.entity_table).await? {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
WITH lesson_agg AS (
    SELECT
        user_id,
        lesson_id,
        SUM(attempts_total) AS attempts_total,
        AVG(accuracy_rate) AS accuracy_rate,
        AVG(avg_response_ms) AS avg_response_ms,
        MAX(last_attempt_at) AS last_attempt_at
    FROM {table}
    GROUP BY user_id, lesson_id
    ORDER BY last_attempt_at DESC, user_id ASC, lesson_id ASC
    LIMIT ?
),
ranked AS (
    SELECT
        e.user_id,
        e.lesson_id,
        e.{entity} AS entity_key,
        ROW_NUMBER() OVER (
            PARTITION BY e.user_id, e.lesson_id
            ORDER BY e.weakness_score DESC, e.attempts_total DESC, e.{entity} ASC
        ) AS weak_rank
    FROM {table} e
    JOIN lesson_agg a ON a.user_id = e.user_id AND a.lesson_id = e.lesson_id
)
SELECT
    a.user_id,
    a.lesson_id,
    a.attempts_total,
    a.accuracy_rate,
    a.avg_response_ms,
    a.last_attempt_at,
    r.entity_key
FROM lesson_agg a
JOIN ranked r ON r.user_id = a.user_id AND r.lesson_id = a.lesson_id
WHERE r.weak_rank <= ?
ORDER BY a.last_attempt_at DESC, a.user_id ASC, a.lesson_id ASC, r.weak_rank ASC
            "#,
            table = target.entity_table,
            entity = target.entity_column,
        );
        let rows = sqlx::query_as::<_, RollupRow>(sql.as_str())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .bind(TOP_WEAK_ENTITIES as i64)
            .fetch_all(self.pool.as_ref())
            .await?;

        let mut rollups: Vec<LessonRollup> = Vec::new();
        for row in rows {
            if let Some(current) = rollups.last_mut()
                && current.user_id == row.user_id
                && current.lesson_id == row.lesson_id
            {
                current.top_weak_entities.push(row.entity_key);
                continue;
            }
            rollups.push(LessonRollup {
                user_id: row.user_id,
                lesson_id: row.lesson_id,
                attempts_total: row.attempts_total,
                accuracy_rate: row.accuracy_rate,
                avg_response_ms: row.avg_response_ms,
                last_attempt_at: crate::paths::epoch_millis_to_datetime(row.last_attempt_at)?,
                top_weak_entities: vec![row.entity_key],
            });
        }
        Ok(rollups)
    }

    /// Insert-or-replace lesson insights keyed on `(user, lesson)`.
    ///
    /// New rows start without a summary; existing summaries are left as they
    /// are. The batch commits as one transaction.
    pub async fn upsert_lesson_insights(
        &self,
        spec: &LaneSpec,
        rollups: &[LessonRollup],
        model_version: &str,
    ) -> anyhow::Result<usize> {
        if rollups.is_empty() {
            return Ok(0);
        }
        let target = &spec.target;
        let evaluated_at = datetime_to_epoch_millis(now_millis());
        let sql = format!(
            r#"
INSERT INTO {table} (
    user_id,
    lesson_id,
    attempts_total,
    accuracy_rate,
    avg_response_ms,
    last_attempt_at,
    {weak},
    summary_text,
    summary_model_version,
    summarized_at,
    evaluated_at,
    model_version
) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, NULL, ?, ?)
ON CONFLICT(user_id, lesson_id) DO UPDATE SET
    attempts_total = excluded.attempts_total,
    accuracy_rate = excluded.accuracy_rate,
    avg_response_ms = excluded.avg_response_ms,
    last_attempt_at = excluded.last_attempt_at,
    {weak} = excluded.{weak},
    evaluated_at = excluded.evaluated_at,
    model_version = excluded.model_version
            "#,
            table = target.lesson_table,
            weak = target.weak_list_column,
        );

        let mut tx = self.pool.begin().await?;
        ensure_lesson_table(&mut *tx, target).await?;
        for rollup in rollups {
            let top_weak_json = serde_json::to_string(&rollup.top_weak_entities)?;
            sqlx::query(sql.as_str())
                .bind(rollup.user_id)
                .bind(rollup.lesson_id)
                .bind(rollup.attempts_total)
                .bind(rollup.accuracy_rate)
                .bind(rollup.avg_response_ms)
                .bind(datetime_to_epoch_millis(rollup.last_attempt_at))
                .bind(top_weak_json)
                .bind(evaluated_at)
                .bind(model_version)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(rollups.len())
    }

    /// Set the natural-language summary of an existing lesson row.
    ///
    /// Only the summary columns change. Returns `false` when the lesson row
    /// does not exist.
    pub async fn update_lesson_summary(
        &self,
        spec: &LaneSpec,
        user_id: i64,
        lesson_id: i64,
        summary_text: &str,
        summary_model_version: &str,
    ) -> anyhow::Result<bool> {
        let table = spec.target.lesson_table;
        if !self.table_exists(table).await? {
            return Ok(false);
        }
        let result = sqlx::query(&format!(
            r#"
UPDATE {table}
SET
    summary_text = ?,
    summary_model_version = ?,
    summarized_at = ?
WHERE user_id = ? AND lesson_id = ?
            "#
        ))
        .bind(summary_text)
        .bind(summary_model_version)
        .bind(datetime_to_epoch_millis(now_millis()))
        .bind(user_id)
        .bind(lesson_id)
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// All entity insights of a lane ordered by key.
    pub async fn list_entity_insights(&self, spec: &LaneSpec) -> anyhow::Result<Vec<EntityInsight>> {
        let target = &spec.target;
        if !self.table_exists(target.entity_table).await? {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, EntityInsightRow>(&format!(
            r#"
SELECT
    user_id,
    lesson_id,
    {entity} AS entity_key,
    attempts_total,
    attempts_incorrect,
    accuracy_rate,
    avg_response_ms,
    last_attempt_at,
    last_incorrect_at,
    weakness_score,
    evaluated_at,
    model_version
FROM {table}
ORDER BY user_id ASC, lesson_id ASC, {entity} ASC
            "#,
            table = target.entity_table,
            entity = target.entity_column,
        ))
        .fetch_all(self.pool.as_ref())
        .await?;
        rows.into_iter().map(EntityInsight::try_from).collect()
    }

    /// All lesson insights of a lane ordered by key.
    pub async fn list_lesson_insights(&self, spec: &LaneSpec) -> anyhow::Result<Vec<LessonInsight>> {
        self.query_lesson_insights(spec, None).await
    }

    pub async fn get_lesson_insight(
        &self,
        spec: &LaneSpec,
        user_id: i64,
        lesson_id: i64,
    ) -> anyhow::Result<Option<LessonInsight>> {
        Ok(self
            .query_lesson_insights(spec, Some((user_id, lesson_id)))
            .await?
            .into_iter()
            .next())
    }

    async fn query_lesson_insights(
        &self,
        spec: &LaneSpec,
        key: Option<(i64, i64)>,
    ) -> anyhow::Result<Vec<LessonInsight>> {
        let target = &spec.target;
        if !self.table_exists(target.lesson_table).await? {
            return Ok(Vec::new());
        }
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            r#"
SELECT
    user_id,
    lesson_id,
    attempts_total,
    accuracy_rate,
    avg_response_ms,
    last_attempt_at,
    {weak} AS top_weak_json,
    summary_text,
    summary_model_version,
    summarized_at,
    evaluated_at,
    model_version
FROM {table}
            "#,
            table = target.lesson_table,
            weak = target.weak_list_column,
        ));
        if let Some((user_id, lesson_id)) = key {
            builder
                .push(" WHERE user_id = ")
                .push_bind(user_id)
                .push(" AND lesson_id = ")
                .push_bind(lesson_id);
        }
        builder.push(" ORDER BY user_id ASC, lesson_id ASC");
        let rows = builder
            .build_query_as::<LessonInsightRow>()
            .fetch_all(self.pool.as_ref())
            .await?;
        rows.into_iter().map(LessonInsight::try_from).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RollupRow {
    user_id: i64,
    lesson_id: i64,
    attempts_total: i64,
    accuracy_rate: f64,
    avg_response_ms: f64,
    last_attempt_at: i64,
    entity_key: String,
}

async fn ensure_entity_table<'e, E>(executor: E, target: &TargetTables) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    executor
        .execute(
            format!(
                r#"
CREATE TABLE IF NOT EXISTS {table} (
    user_id INTEGER NOT NULL,
    lesson_id INTEGER NOT NULL,
    {entity} TEXT NOT NULL,
    attempts_total INTEGER NOT NULL,
    attempts_incorrect INTEGER NOT NULL,
    accuracy_rate REAL NOT NULL,
    avg_response_ms REAL NOT NULL,
    last_attempt_at INTEGER NOT NULL,
    last_incorrect_at INTEGER,
    weakness_score REAL NOT NULL,
    evaluated_at INTEGER NOT NULL,
    model_version TEXT NOT NULL,
    PRIMARY KEY (user_id, lesson_id, {entity})
)
                "#,
                table = target.entity_table,
                entity = target.entity_column,
            )
            .as_str(),
        )
        .await?;
    Ok(())
}

async fn ensure_lesson_table<'e, E>(executor: E, target: &TargetTables) -> anyhow::Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    executor
        .execute(
            format!(
                r#"
CREATE TABLE IF NOT EXISTS {table} (
    user_id INTEGER NOT NULL,
    lesson_id INTEGER NOT NULL,
    attempts_total INTEGER NOT NULL,
    accuracy_rate REAL NOT NULL,
    avg_response_ms REAL NOT NULL,
    last_attempt_at INTEGER NOT NULL,
    {weak} TEXT NOT NULL,
    summary_text TEXT,
    summary_model_version TEXT,
    summarized_at INTEGER,
    evaluated_at INTEGER NOT NULL,
    model_version TEXT NOT NULL,
    PRIMARY KEY (user_id, lesson_id)
)
                "#,
                table = target.lesson_table,
                weak = target.weak_list_column,
            )
            .as_str(),
        )
        .await?;
    Ok(())
}
