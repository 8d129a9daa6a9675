use anyhow::Context;
use insights_state::Lane;
use insights_state::WeaknessWeights;
use insights_summary::DEFAULT_SUMMARY_BASE_URL;
use insights_summary::DEFAULT_SUMMARY_MODEL;
use insights_summary::DEFAULT_SUMMARY_TIMEOUT;
use insights_summary::SummarizerConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_AGGREGATE_LIMIT: usize = 500;
pub const DEFAULT_ROLLUP_LIMIT: usize = 500;
pub const DEFAULT_MODEL_VERSION: &str = "phase1-v1";
/// Appended to the lane model version when stamping summaries.
pub const SUMMARY_MODEL_VERSION_SUFFIX: &str = "+llm";

/// On-disk configuration, every field optional.
///
/// ```toml
/// db_path = "/var/lib/insights/insights.sqlite"
///
/// [weights]
/// correct = 0.3
/// incorrect = 0.7
///
/// [lanes.vocabulary]
/// aggregate_limit = 1000
///
/// [summary]
/// enabled = true
/// model = "gpt-4o-mini"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InsightsConfig {
    pub db_path: Option<PathBuf>,
    pub weights: Option<WeightsToml>,
    /// Keyed by lane name (`vocabulary`, `spelling`, `arithmetic`).
    pub lanes: BTreeMap<String, LaneToml>,
    pub summary: SummaryToml,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeightsToml {
    pub correct: f64,
    pub incorrect: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LaneToml {
    pub aggregate_limit: Option<usize>,
    pub rollup_limit: Option<usize>,
    pub model_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SummaryToml {
    pub enabled: Option<bool>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Values taken from the command line or environment; they win over the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryOverrides {
    pub enabled: Option<bool>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

/// Resolved per-lane knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct LaneSettings {
    pub aggregate_limit: usize,
    pub rollup_limit: usize,
    pub model_version: String,
    pub weights: WeaknessWeights,
}

impl LaneSettings {
    pub fn summary_model_version(&self) -> String {
        format!("{}{SUMMARY_MODEL_VERSION_SUFFIX}", self.model_version)
    }
}

impl Default for LaneSettings {
    fn default() -> Self {
        Self {
            aggregate_limit: DEFAULT_AGGREGATE_LIMIT,
            rollup_limit: DEFAULT_ROLLUP_LIMIT,
            model_version: DEFAULT_MODEL_VERSION.to_string(),
            weights: WeaknessWeights::DEFAULT,
        }
    }
}

impl InsightsConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(contents)?;
        for name in config.lanes.keys() {
            name.parse::<Lane>()
                .map_err(|_| anyhow::anyhow!("unknown lane `{name}` in [lanes]"))?;
        }
        Ok(config)
    }

    pub fn weakness_weights(&self) -> anyhow::Result<WeaknessWeights> {
        match self.weights {
            Some(WeightsToml { correct, incorrect }) => WeaknessWeights::new(correct, incorrect),
            None => Ok(WeaknessWeights::DEFAULT),
        }
    }

    pub fn lane_settings(&self, lane: Lane) -> anyhow::Result<LaneSettings> {
        let overrides = self.lanes.get(&lane.to_string()).cloned().unwrap_or_default();
        let settings = LaneSettings {
            aggregate_limit: overrides.aggregate_limit.unwrap_or(DEFAULT_AGGREGATE_LIMIT),
            rollup_limit: overrides.rollup_limit.unwrap_or(DEFAULT_ROLLUP_LIMIT),
            model_version: overrides
                .model_version
                .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string()),
            weights: self.weakness_weights()?,
        };
        if settings.aggregate_limit == 0 || settings.rollup_limit == 0 {
            anyhow::bail!("{lane} limits must be positive");
        }
        Ok(settings)
    }

    pub fn summarizer_config(&self, overrides: SummaryOverrides) -> SummarizerConfig {
        let file = &self.summary;
        SummarizerConfig {
            enabled: overrides.enabled.or(file.enabled).unwrap_or(false),
            api_key: overrides.api_key,
            model: overrides
                .model
                .or_else(|| file.model.clone())
                .unwrap_or_else(|| DEFAULT_SUMMARY_MODEL.to_string()),
            base_url: overrides
                .base_url
                .or_else(|| file.base_url.clone())
                .unwrap_or_else(|| DEFAULT_SUMMARY_BASE_URL.to_string()),
            timeout: file
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SUMMARY_TIMEOUT),
        }
    }
}
