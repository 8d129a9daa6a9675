use crate::LessonStats;
use crate::Summarizer;
use crate::prompt::SYSTEM_MESSAGE;
use crate::prompt::lesson_summary_prompt;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use tracing::warn;

const TEMPERATURE: f64 = 0.2;
const MAX_TOKENS: u32 = 120;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("summary request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("summary request returned {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("malformed summary response: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Summarizer backed by an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Clone, Debug)]
pub struct ChatCompletionsSummarizer {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsSummarizer {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, SummaryError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// One completion round trip. `Ok(None)` when the model returned no text.
    pub async fn request_summary(&self, stats: &LessonStats) -> Result<Option<String>, SummaryError> {
        let prompt = lesson_summary_prompt(stats);
        let request = ChatRequest {
            model: self.model.as_str(),
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_MESSAGE,
                },
                ChatMessage {
                    role: "user",
                    content: prompt.as_str(),
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let res = self
            .http
            .post(self.url.as_str())
            .bearer_auth(self.api_key.as_str())
            .json(&request)
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(SummaryError::Status { status, body });
        }
        let response: ChatResponse = serde_json::from_str(&body)?;
        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty()))
    }
}

#[async_trait]
impl Summarizer for ChatCompletionsSummarizer {
    async fn summarize(&self, stats: &LessonStats) -> Option<String> {
        match self.request_summary(stats).await {
            Ok(Some(summary)) => Some(summary),
            Ok(None) => {
                debug!("summary completion returned no text");
                None
            }
            Err(err) => {
                warn!("lesson summary skipped: {err}");
                None
            }
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}
