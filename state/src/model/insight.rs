use crate::paths::epoch_millis_to_datetime;
use anyhow::Result;
use chrono::DateTime;
use chrono::Utc;

/// Maximum length of a lesson's weak-entity list.
pub const TOP_WEAK_ENTITIES: usize = 5;

/// Aggregated statistics for one `(user, lesson, entity)` key.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityAggregate {
    pub user_id: i64,
    pub lesson_id: i64,
    pub entity_key: String,
    pub attempts_total: i64,
    pub attempts_incorrect: i64,
    /// Fraction of correct attempts in `[0, 1]`.
    pub accuracy_rate: f64,
    pub avg_response_ms: f64,
    pub last_attempt_at: DateTime<Utc>,
    pub last_incorrect_at: Option<DateTime<Utc>>,
    pub weakness_score: f64,
}

/// A persisted entity insight row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityInsight {
    pub aggregate: EntityAggregate,
    pub evaluated_at: DateTime<Utc>,
    pub model_version: String,
}

/// Lesson-level rollup derived from entity insights.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonRollup {
    pub user_id: i64,
    pub lesson_id: i64,
    pub attempts_total: i64,
    /// Mean of the entity accuracy rates.
    pub accuracy_rate: f64,
    /// Mean of the entity response times.
    pub avg_response_ms: f64,
    pub last_attempt_at: DateTime<Utc>,
    /// Weakest first; at most [`TOP_WEAK_ENTITIES`] keys.
    pub top_weak_entities: Vec<String>,
}

/// A persisted lesson insight row.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonInsight {
    pub rollup: LessonRollup,
    pub summary_text: Option<String>,
    pub summary_model_version: Option<String>,
    pub summarized_at: Option<DateTime<Utc>>,
    pub evaluated_at: DateTime<Utc>,
    pub model_version: String,
}

/// Raw grouping output; scores are derived in Rust.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntityAggregateRow {
    pub(crate) user_id: i64,
    pub(crate) lesson_id: i64,
    pub(crate) entity_key: String,
    pub(crate) attempts_total: i64,
    pub(crate) attempts_incorrect: i64,
    pub(crate) avg_response_ms: f64,
    pub(crate) last_attempt_at: i64,
    pub(crate) last_incorrect_at: Option<i64>,
}

impl EntityAggregateRow {
    pub(crate) fn into_aggregate(
        self,
        weights: &crate::WeaknessWeights,
    ) -> Result<EntityAggregate> {
        let accuracy_rate = crate::accuracy_rate(self.attempts_total, self.attempts_incorrect);
        Ok(EntityAggregate {
            user_id: self.user_id,
            lesson_id: self.lesson_id,
            entity_key: self.entity_key,
            attempts_total: self.attempts_total,
            attempts_incorrect: self.attempts_incorrect,
            accuracy_rate,
            avg_response_ms: self.avg_response_ms,
            last_attempt_at: epoch_millis_to_datetime(self.last_attempt_at)?,
            last_incorrect_at: self
                .last_incorrect_at
                .map(epoch_millis_to_datetime)
                .transpose()?,
            weakness_score: weights.score(accuracy_rate),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntityInsightRow {
    pub(crate) user_id: i64,
    pub(crate) lesson_id: i64,
    pub(crate) entity_key: String,
    pub(crate) attempts_total: i64,
    pub(crate) attempts_incorrect: i64,
    pub(crate) accuracy_rate: f64,
    pub(crate) avg_response_ms: f64,
    pub(crate) last_attempt_at: i64,
    pub(crate) last_incorrect_at: Option<i64>,
    pub(crate) weakness_score: f64,
    pub(crate) evaluated_at: i64,
    pub(crate) model_version: String,
}

impl TryFrom<EntityInsightRow> for EntityInsight {
    type Error = anyhow::Error;

    fn try_from(value: EntityInsightRow) -> Result<Self, Self::Error> {
        Ok(Self {
            aggregate: EntityAggregate {
                user_id: value.user_id,
                lesson_id: value.lesson_id,
                entity_key: value.entity_key,
                attempts_total: value.attempts_total,
                attempts_incorrect: value.attempts_incorrect,
                accuracy_rate: value.accuracy_rate,
                avg_response_ms: value.avg_response_ms,
                last_attempt_at: epoch_millis_to_datetime(value.last_attempt_at)?,
                last_incorrect_at: value
                    .last_incorrect_at
                    .map(epoch_millis_to_datetime)
                    .transpose()?,
                weakness_score: value.weakness_score,
            },
            evaluated_at: epoch_millis_to_datetime(value.evaluated_at)?,
            model_version: value.model_version,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct LessonInsightRow {
    pub(crate) user_id: i64,
    pub(crate) lesson_id: i64,
    pub(crate) attempts_total: i64,
    pub(crate) accuracy_rate: f64,
    pub(crate) avg_response_ms: f64,
    pub(crate) last_attempt_at: i64,
    pub(crate) top_weak_json: String,
    pub(crate) summary_text: Option<String>,
    pub(crate) summary_model_version: Option<String>,
    pub(crate) summarized_at: Option<i64>,
    pub(crate) evaluated_at: i64,
    pub(crate) model_version: String,
}

impl TryFrom<LessonInsightRow> for LessonInsight {
    type Error = anyhow::Error;

    fn try_from(value: LessonInsightRow) -> Result<Self, Self::Error> {
        Ok(Self {
            rollup: LessonRollup {
                user_id: value.user_id,
                lesson_id: value.lesson_id,
                attempts_total: value.attempts_total,
                accuracy_rate: value.accuracy_rate,
                avg_response_ms: value.avg_response_ms,
                last_attempt_at: epoch_millis_to_datetime(value.last_attempt_at)?,
                top_weak_entities: serde_json::from_str(value.top_weak_json.as_str())?,
            },
            summary_text: value.summary_text,
            summary_model_version: value.summary_model_version,
            summarized_at: value
                .summarized_at
                .map(epoch_millis_to_datetime)
                .transpose()?,
            evaluated_at: epoch_millis_to_datetime(value.evaluated_at)?,
            model_version: value.model_version,
        })
    }
}
