use serde::Deserialize;
use serde::Serialize;

/// One independent data domain with its own checkpoint and insight tables.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Lane {
    Vocabulary,
    Spelling,
    Arithmetic,
}

impl Lane {
    /// Execution order used when several lanes run in one invocation.
    pub const ORDERED: [Lane; 3] = [Lane::Vocabulary, Lane::Spelling, Lane::Arithmetic];

    pub fn spec(self) -> &'static LaneSpec {
        match self {
            Lane::Vocabulary => &VOCABULARY,
            Lane::Spelling => &SPELLING,
            Lane::Arithmetic => &ARITHMETIC,
        }
    }
}

/// Everything that differs between lanes: where raw facts live, how labels
/// resolve to entities, and where insights land.
///
/// Identifiers are interpolated into SQL, so they are `'static` constants and
/// never come from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneSpec {
    pub lane: Lane,
    /// Checkpoint and run-log key.
    pub job_name: &'static str,
    pub source: SourceSchema,
    /// Label → canonical key join. `None` means the label is the key.
    pub lookup: Option<EntityLookup>,
    pub target: TargetTables,
}

/// Column mapping of a raw attempt table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSchema {
    pub table: &'static str,
    pub user_column: &'static str,
    pub lesson_column: &'static str,
    pub label_column: &'static str,
    pub correct_column: &'static str,
    pub response_ms_column: &'static str,
    /// Epoch milliseconds.
    pub occurred_at_column: &'static str,
    pub subject_scope: Option<SubjectScope>,
    /// Rows with a non-null value here are ignored.
    pub archived_column: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectScope {
    pub column: &'static str,
    pub allowed: &'static [i64],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLookup {
    pub table: &'static str,
    pub label_column: &'static str,
    pub key_column: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTables {
    pub entity_table: &'static str,
    pub entity_column: &'static str,
    pub lesson_table: &'static str,
    pub weak_list_column: &'static str,
}

const SYNONYM_COURSE_IDS: &[i64] = &[2, 3, 4, 5, 6, 7, 8, 9];

static VOCABULARY: LaneSpec = LaneSpec {
    lane: Lane::Vocabulary,
    job_name: "synonym_ai_phase1",
    source: SourceSchema {
        table: "attempts",
        user_column: "user_id",
        lesson_column: "lesson_id",
        label_column: "headword",
        correct_column: "is_correct",
        response_ms_column: "response_ms",
        occurred_at_column: "ts",
        subject_scope: Some(SubjectScope {
            column: "course_id",
            allowed: SYNONYM_COURSE_IDS,
        }),
        archived_column: Some("archived_at"),
    },
    lookup: Some(EntityLookup {
        table: "synonym_words",
        label_column: "headword",
        key_column: "word_id",
    }),
    target: TargetTables {
        entity_table: "synonym_ai_word_insights",
        entity_column: "word_id",
        lesson_table: "synonym_ai_lesson_insights",
        weak_list_column: "top_weak_word_ids",
    },
};

static SPELLING: LaneSpec = LaneSpec {
    lane: Lane::Spelling,
    job_name: "spelling_ai_phase1",
    source: SourceSchema {
        table: "spelling_attempts",
        user_column: "user_id",
        lesson_column: "lesson_id",
        label_column: "word",
        correct_column: "is_correct",
        response_ms_column: "response_ms",
        occurred_at_column: "ts",
        subject_scope: None,
        archived_column: None,
    },
    lookup: None,
    target: TargetTables {
        entity_table: "spelling_ai_word_insights",
        entity_column: "headword",
        lesson_table: "spelling_ai_lesson_insights",
        weak_list_column: "top_weak_headwords",
    },
};

static ARITHMETIC: LaneSpec = LaneSpec {
    lane: Lane::Arithmetic,
    job_name: "math_ai_phase1",
    source: SourceSchema {
        table: "math_attempts",
        user_column: "user_id",
        lesson_column: "lesson_id",
        label_column: "question_id",
        correct_column: "is_correct",
        response_ms_column: "response_ms",
        occurred_at_column: "ts",
        subject_scope: None,
        archived_column: None,
    },
    lookup: None,
    target: TargetTables {
        entity_table: "math_ai_question_insights",
        entity_column: "question_id",
        lesson_table: "math_ai_lesson_insights",
        weak_list_column: "top_weak_question_ids",
    },
};
