use super::*;
use crate::EntityLookup;
use crate::SourceSchema;
use std::collections::HashMap;

impl StateRuntime {
    /// Aggregate raw facts per `(user, lesson, entity)` for every key touched
    /// after `since` (every key when `since` is `None`).
    ///
    /// Touched keys are recomputed from their full in-scope history, so the
    /// result can replace stored insights wholesale. Facts whose label has no
    /// lookup match are excluded. Results are ordered by most recent activity
    /// and capped at `limit`.
    pub async fn aggregate_entities(
        &self,
        spec: &LaneSpec,
        since: Option<DateTime<Utc>>,
        limit: usize,
        weights: &WeaknessWeights,
    ) -> anyhow::Result<Vec<EntityAggregate>> {
        let source = &spec.source;
        let entity_expr = entity_key_expr(source, spec.lookup.as_ref());
        let occurred = source.occurred_at_column;
        let correct = source.correct_column;
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            r#"
SELECT
    a.{user} AS user_id,
    a.{lesson} AS lesson_id,
    {entity_expr} AS entity_key,
    COUNT(*) AS attempts_total,
    SUM(CASE WHEN a.{correct} = 0 THEN 1 ELSE 0 END) AS attempts_incorrect,
    COALESCE(AVG(a.{response}), 0.0) AS avg_response_ms,
    MAX(a.{occurred}) AS last_attempt_at,
    MAX(CASE WHEN a.{correct} = 0 THEN a.{occurred} END) AS last_incorrect_at
FROM {table} a
            "#,
            user = source.user_column,
            lesson = source.lesson_column,
            response = source.response_ms_column,
            table = source.table,
        ));
        if let Some(lookup) = spec.lookup.as_ref() {
            push_lookup_join(&mut builder, source, lookup, "JOIN");
        }
        push_source_filters(&mut builder, source);
        builder.push(format!(
            " GROUP BY a.{}, a.{}, {entity_expr}",
            source.user_column, source.lesson_column
        ));
        if let Some(since) = since {
            builder
                .push(format!(" HAVING MAX(a.{occurred}) > "))
                .push_bind(datetime_to_epoch_millis(since));
        }
        builder.push(
            " ORDER BY last_attempt_at DESC, user_id ASC, lesson_id ASC, entity_key ASC LIMIT ",
        );
        builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = builder
            .build_query_as::<EntityAggregateRow>()
            .fetch_all(self.pool.as_ref())
            .await?;
        rows.into_iter()
            .map(|row| row.into_aggregate(weights))
            .collect()
    }

    /// Count in-scope facts after `since` whose label has no lookup match.
    ///
    /// Always zero for lanes where the label is the entity key.
    pub async fn count_unresolved_labels(
        &self,
        spec: &LaneSpec,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<i64> {
        let Some(lookup) = spec.lookup.as_ref() else {
            return Ok(0);
        };
        let source = &spec.source;
        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT COUNT(*) FROM {} a", source.table));
        push_lookup_join(&mut builder, source, lookup, "LEFT JOIN");
        push_source_filters(&mut builder, source);
        builder.push(format!(" AND l.{} IS NULL", lookup.key_column));
        if let Some(since) = since {
            builder
                .push(format!(" AND a.{} > ", source.occurred_at_column))
                .push_bind(datetime_to_epoch_millis(since));
        }
        let count: i64 = builder
            .build_query_scalar::<i64>()
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(count)
    }

    /// Display label of each entity key resolved through the lane's lookup.
    ///
    /// Keys with no lookup row, and every key of a lane whose label is the
    /// key, are absent from the map.
    pub async fn entity_labels(
        &self,
        spec: &LaneSpec,
        keys: &[String],
    ) -> anyhow::Result<HashMap<String, String>> {
        let Some(lookup) = spec.lookup.as_ref() else {
            return Ok(HashMap::new());
        };
        if keys.is_empty() || !self.table_exists(lookup.table).await? {
            return Ok(HashMap::new());
        }
        let key = lookup.key_column;
        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT CAST({key} AS TEXT) AS entity_key, MIN(trim({label})) AS label FROM {table} WHERE CAST({key} AS TEXT) IN (",
            label = lookup.label_column,
            table = lookup.table,
        ));
        let mut separated = builder.separated(", ");
        for entity_key in keys {
            separated.push_bind(entity_key.as_str());
        }
        separated.push_unseparated(")");
        builder.push(format!(" GROUP BY CAST({key} AS TEXT)"));
        let rows = builder
            .build_query_as::<(String, String)>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(rows.into_iter().collect())
    }
}

fn entity_key_expr(source: &SourceSchema, lookup: Option<&EntityLookup>) -> String {
    match lookup {
        Some(lookup) => format!("CAST(l.{} AS TEXT)", lookup.key_column),
        None => format!("CAST(a.{} AS TEXT)", source.label_column),
    }
}

fn push_lookup_join(
    builder: &mut QueryBuilder<'_, Sqlite>,
    source: &SourceSchema,
    lookup: &EntityLookup,
    join: &str,
) {
    // One key per normalized label; a fact matches at most one lookup row.
    builder.push(format!(
        " {join} (SELECT lower(trim({lookup_label})) AS normalized_label, MIN({key}) AS {key} \
         FROM {table} GROUP BY lower(trim({lookup_label}))) l \
         ON l.normalized_label = lower(trim(a.{label}))",
        table = lookup.table,
        key = lookup.key_column,
        lookup_label = lookup.label_column,
        label = source.label_column,
    ));
}

fn push_source_filters(builder: &mut QueryBuilder<'_, Sqlite>, source: &SourceSchema) {
    builder.push(" WHERE 1 = 1");
    if let Some(scope) = source.subject_scope.as_ref() {
        builder.push(format!(" AND a.{} IN (", scope.column));
        let mut separated = builder.separated(", ");
        for subject in scope.allowed {
            separated.push_bind(*subject);
        }
        separated.push_unseparated(")");
    }
    if let Some(archived) = source.archived_column {
        builder.push(format!(" AND a.{archived} IS NULL"));
    }
}
