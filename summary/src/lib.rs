//! Optional natural-language summaries of lesson performance.
//!
//! The pipeline only sees the [`Summarizer`] trait. Absence of text is a
//! normal answer: the disabled variant always returns `None`, and the HTTP
//! variant returns `None` on any failure after logging it.

mod client;
mod prompt;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing::warn;

pub use client::ChatCompletionsSummarizer;
pub use client::SummaryError;
pub use prompt::SYSTEM_MESSAGE;
pub use prompt::lesson_summary_prompt;

pub const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SUMMARY_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_SUMMARY_TIMEOUT: Duration = Duration::from_secs(30);

/// Lesson statistics a summary is generated from.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonStats {
    pub attempts_total: i64,
    /// Fraction of correct attempts in `[0, 1]`.
    pub accuracy_rate: f64,
    pub avg_response_ms: f64,
    /// Focus entities in rollup order.
    pub focus_entities: Vec<String>,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Short neutral description of `stats`, or `None` to skip the summary.
    async fn summarize(&self, stats: &LessonStats) -> Option<String>;

    /// Whether this summarizer can ever produce text.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Summarizer used when summaries are off or no credentials are available.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _stats: &LessonStats) -> Option<String> {
        None
    }

    fn is_enabled(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummarizerConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            model: DEFAULT_SUMMARY_MODEL.to_string(),
            base_url: DEFAULT_SUMMARY_BASE_URL.to_string(),
            timeout: DEFAULT_SUMMARY_TIMEOUT,
        }
    }
}

/// Pick the summarizer variant for `config`.
///
/// The HTTP variant is chosen only when summaries are enabled and an API key
/// is present; anything else (including a client that fails to build) yields
/// [`DisabledSummarizer`].
pub fn from_config(config: &SummarizerConfig) -> Arc<dyn Summarizer> {
    if !config.enabled {
        info!("lesson summaries disabled");
        return Arc::new(DisabledSummarizer);
    }
    let Some(api_key) = config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
    else {
        info!("lesson summaries enabled but no API key is set; skipping summaries");
        return Arc::new(DisabledSummarizer);
    };
    match ChatCompletionsSummarizer::new(
        config.base_url.as_str(),
        api_key,
        config.model.as_str(),
        config.timeout,
    ) {
        Ok(summarizer) => {
            info!(model = %config.model, "lesson summaries enabled");
            Arc::new(summarizer)
        }
        Err(err) => {
            warn!("failed to build summary client, skipping summaries: {err}");
            Arc::new(DisabledSummarizer)
        }
    }
}
