use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// High-performer threshold knobs.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Absolute floor, in percent.
    pub floor_percent: f64,
    pub mean_multiplier: f64,
    /// Share of ranked groups eligible for selection.
    pub top_fraction: f64,
    /// Below this many groups only the single best group is eligible.
    pub min_groups_for_fraction: usize,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            floor_percent: 8.0,
            mean_multiplier: 1.2,
            top_fraction: 0.2,
            min_groups_for_fraction: 5,
        }
    }
}

/// Keyword effectiveness tier cutoffs, in percent.
#[derive(Debug, Clone)]
pub struct TierCutoffs {
    pub high: f64,
    pub medium: f64,
}

impl Default for TierCutoffs {
    fn default() -> Self {
        Self {
            high: 12.0,
            medium: 8.0,
        }
    }
}

/// Weights of the fallback predicted-rate heuristic.
#[derive(Debug, Clone)]
pub struct PredictionWeights {
    /// Share given to the keyword rate; the rest goes to the dataset mean.
    pub keyword_weight: f64,
    pub optimal_min_chars: usize,
    pub optimal_max_chars: usize,
    pub length_penalty_per_char: f64,
    pub max_length_penalty: f64,
    pub audience_bonus: f64,
    /// Supporting records at which confidence reaches 0.5.
    pub confidence_half_point: f64,
}

impl Default for PredictionWeights {
    fn default() -> Self {
        Self {
            keyword_weight: 0.7,
            optimal_min_chars: 30,
            optimal_max_chars: 50,
            length_penalty_per_char: 0.05,
            max_length_penalty: 2.0,
            audience_bonus: 0.5,
            confidence_half_point: 10.0,
        }
    }
}

/// Everything the analysis engine needs, independent of where it came from.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub max_upload_bytes: usize,
    pub selector: SelectorConfig,
    pub tiers: TierCutoffs,
    pub prediction: PredictionWeights,
    /// Size of the top-N lists in service/weekday stats and summaries.
    pub top_n: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            selector: SelectorConfig::default(),
            tiers: TierCutoffs::default(),
            prediction: PredictionWeights::default(),
            top_n: 5,
        }
    }
}

/// OpenAI-compatible chat completion endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub analysis: AnalysisConfig,
    /// `None` when no API key is set; generation then uses templates only.
    pub llm: Option<LlmConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = AnalysisConfig::default();
        let analysis = AnalysisConfig {
            max_upload_bytes: parse_var("NOTI_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            selector: SelectorConfig {
                floor_percent: parse_var("NOTI_FLOOR_PERCENT", defaults.selector.floor_percent)?,
                mean_multiplier: parse_var(
                    "NOTI_MEAN_MULTIPLIER",
                    defaults.selector.mean_multiplier,
                )?,
                top_fraction: parse_var("NOTI_TOP_FRACTION", defaults.selector.top_fraction)?,
                ..defaults.selector
            },
            tiers: TierCutoffs {
                high: parse_var("NOTI_TIER_HIGH", defaults.tiers.high)?,
                medium: parse_var("NOTI_TIER_MEDIUM", defaults.tiers.medium)?,
            },
            prediction: defaults.prediction,
            top_n: parse_var("NOTI_TOP_N", defaults.top_n)?,
        };

        let llm = match env::var("OPENAI_API_KEY") {
            Ok(api_key) if !api_key.trim().is_empty() => Some(LlmConfig {
                api_key,
                base_url: env::var("OPENAI_BASE_URL")
                    .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
                model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
                timeout: Duration::from_secs(parse_var("LLM_TIMEOUT_SECS", 20u64)?),
            }),
            _ => None,
        };

        Ok(Self { analysis, llm })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a valid number")),
        Err(_) => Ok(default),
    }
}
