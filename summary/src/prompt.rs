use crate::LessonStats;

pub const SYSTEM_MESSAGE: &str = "You summarise learning performance clearly and neutrally.";

/// Compact prompt describing one lesson's performance.
pub fn lesson_summary_prompt(stats: &LessonStats) -> String {
    let accuracy_percent = (stats.accuracy_rate * 100.0).round() as i64;
    let avg_response_ms = stats.avg_response_ms.trunc() as i64;
    let focus = stats.focus_entities.join(", ");
    format!(
        "Summarise this learner's performance in neutral, parent-friendly language.

Lesson performance:
- Total attempts: {attempts}
- Accuracy rate: {accuracy_percent}%
- Average response time: {avg_response_ms} ms
- Focus words: {focus}

Rules:
- Do NOT give advice
- Do NOT predict future performance
- Use calm, factual language
- 1-2 sentences only",
        attempts = stats.attempts_total,
    )
}
