use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::GenerationFailure;
use crate::models::AnalysisSnapshot;
use crate::synthesizer::GenerationRequest;

const SYSTEM_PROMPT: &str = "You write Korean push-notification marketing copy for loan services, \
grounded in measured click-rate data. Every message must start with (광고).";
const GROUNDING_KEYWORDS: usize = 5;
const GROUNDING_MESSAGES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundingKeyword {
    pub term: String,
    pub label: String,
    pub average_click_rate: f64,
    pub matches: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundingMessage {
    pub message: String,
    pub average_click_rate: f64,
    pub occurrences: usize,
}

/// Snapshot statistics handed to the external model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grounding {
    pub record_count: usize,
    pub dataset_mean: Option<f64>,
    pub top_keywords: Vec<GroundingKeyword>,
    pub top_messages: Vec<GroundingMessage>,
}

impl Grounding {
    pub fn from_snapshot(snapshot: &AnalysisSnapshot) -> Self {
        Self {
            record_count: snapshot.overview.record_count,
            dataset_mean: snapshot.overview.mean_click_rate,
            top_keywords: snapshot
                .ranked_keywords()
                .into_iter()
                .take(GROUNDING_KEYWORDS)
                .map(|(keyword, perf)| GroundingKeyword {
                    term: keyword.copy_term().to_string(),
                    label: keyword.label().to_string(),
                    average_click_rate: perf.average_click_rate,
                    matches: perf.matching_message_count,
                })
                .collect(),
            top_messages: snapshot
                .high_performers
                .groups
                .iter()
                .take(GROUNDING_MESSAGES)
                .map(|group| GroundingMessage {
                    message: group.message_text.clone(),
                    average_click_rate: group.average_click_rate,
                    occurrences: group.occurrences,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationPrompt {
    pub system: String,
    pub prompt: String,
    pub grounding: Grounding,
    pub timeout: Duration,
}

/// One candidate as returned by an external model, before scoring.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawCandidate {
    pub style: String,
    pub message: String,
    #[serde(default)]
    pub predicted_rate: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateEnvelope {
    candidates: Vec<RawCandidate>,
}

#[async_trait]
pub trait CopyGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &GenerationPrompt)
        -> Result<Vec<RawCandidate>, GenerationFailure>;
}

/// Default generator: always declines, so templates are used.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGenerator;

#[async_trait]
impl CopyGenerator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _prompt: &GenerationPrompt,
    ) -> Result<Vec<RawCandidate>, GenerationFailure> {
        Err(GenerationFailure::Disabled)
    }
}

/// Chat-completions client for OpenAI and compatible endpoints.
#[derive(Clone)]
pub struct OpenAiCompatGenerator {
    http_client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatGenerator {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            http_client: Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait]
impl CopyGenerator for OpenAiCompatGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &GenerationPrompt,
    ) -> Result<Vec<RawCandidate>, GenerationFailure> {
        if self.api_key.trim().is_empty() {
            return Err(GenerationFailure::MissingCredential("OPENAI_API_KEY".to_string()));
        }
        let start = Instant::now();

        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.prompt},
            ],
            "temperature": 0.7,
            "max_tokens": 2000,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .timeout(prompt.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationFailure::Timeout(prompt.timeout)
                } else {
                    GenerationFailure::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "chat completion API error");
            return Err(GenerationFailure::Api {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerationFailure::Malformed(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| GenerationFailure::Malformed("response has no content".to_string()))?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis(),
            grounding_records = prompt.grounding.record_count,
            grounding_keywords = prompt.grounding.top_keywords.len(),
            grounding_messages = prompt.grounding.top_messages.len(),
            "chat completion finished"
        );
        parse_candidates(&content)
    }
}

/// Parses `{"candidates": [...]}`, tolerating a surrounding code fence.
pub fn parse_candidates(content: &str) -> Result<Vec<RawCandidate>, GenerationFailure> {
    let trimmed = content.trim();
    let json_text = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    let envelope: CandidateEnvelope = serde_json::from_str(json_text.trim())
        .map_err(|e| GenerationFailure::Malformed(e.to_string()))?;

    let candidates: Vec<RawCandidate> = envelope
        .candidates
        .into_iter()
        .filter(|c| !c.message.trim().is_empty())
        .collect();
    if candidates.is_empty() {
        return Err(GenerationFailure::Malformed("no candidates returned".to_string()));
    }
    Ok(candidates)
}

pub fn build_prompt(
    request: &GenerationRequest,
    snapshot: &AnalysisSnapshot,
    timeout: Duration,
) -> GenerationPrompt {
    let grounding = Grounding::from_snapshot(snapshot);
    let mut prompt = String::new();

    prompt.push_str("## Measured performance\n");
    prompt.push_str(&format!("- Records analyzed: {}\n", grounding.record_count));
    if let Some(mean) = grounding.dataset_mean {
        prompt.push_str(&format!("- Mean click rate: {mean:.2}%\n"));
    }
    for keyword in &grounding.top_keywords {
        prompt.push_str(&format!(
            "- Keyword '{}' ({}): {:.2}% average over {} rows\n",
            keyword.term, keyword.label, keyword.average_click_rate, keyword.matches
        ));
    }

    prompt.push_str("\n## High-performing messages\n");
    if grounding.top_messages.is_empty() {
        prompt.push_str("- none cleared the threshold\n");
    }
    for message in &grounding.top_messages {
        prompt.push_str(&format!(
            "- \"{}\" ({:.2}%, sent {} times)\n",
            message.message, message.average_click_rate, message.occurrences
        ));
    }

    prompt.push_str("\n## Request\n");
    prompt.push_str(&format!("{}\n", request.description.trim()));
    prompt.push_str(&format!("Service: {}\n", request.service.as_deref().unwrap_or("any")));
    prompt.push_str(&format!("Audience: {}\n", request.audience.as_deref().unwrap_or("general")));
    prompt.push_str(&format!("Tone: {}\n", request.tone.label()));
    if !request.keyword_hints.is_empty() {
        prompt.push_str(&format!("Keywords: {}\n", request.keyword_hints.join(", ")));
    }

    prompt.push_str(
        "\nWrite three new messages in different styles. Reuse the proven keywords, do not copy \
         the examples verbatim. Answer with JSON only: {\"candidates\": [{\"style\": string, \
         \"message\": string, \"predicted_rate\": number, \"reasoning\": string}]}\n",
    );

    GenerationPrompt {
        system: SYSTEM_PROMPT.to_string(),
        prompt,
        grounding,
        timeout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_fenced_json() {
        let plain = r#"{"candidates": [{"style": "혜택 강조형", "message": "(광고) 혜택", "predicted_rate": 11.8, "reasoning": "benefit"}]}"#;
        let parsed = parse_candidates(plain).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].predicted_rate, Some(11.8));

        let fenced = format!("```json\n{plain}\n```");
        assert_eq!(parse_candidates(&fenced).unwrap(), parsed);
    }

    #[test]
    fn rejects_empty_or_invalid_payloads() {
        assert!(matches!(
            parse_candidates(r#"{"candidates": []}"#),
            Err(GenerationFailure::Malformed(_))
        ));
        assert!(matches!(
            parse_candidates(r#"{"candidates": [{"style": "x", "message": "  "}]}"#),
            Err(GenerationFailure::Malformed(_))
        ));
        assert!(matches!(
            parse_candidates("Style 1: (광고) 혜택"),
            Err(GenerationFailure::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn disabled_generator_always_declines() {
        let prompt = GenerationPrompt {
            system: String::new(),
            prompt: String::new(),
            grounding: Grounding {
                record_count: 0,
                dataset_mean: None,
                top_keywords: Vec::new(),
                top_messages: Vec::new(),
            },
            timeout: Duration::from_secs(1),
        };
        let result = DisabledGenerator.generate(&prompt).await;
        assert!(matches!(result, Err(GenerationFailure::Disabled)));
    }
}
