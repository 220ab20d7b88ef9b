use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::aggregate::mean;
use crate::config::PredictionWeights;
use crate::error::GenerationFailure;
use crate::keywords::{self, Keyword};
use crate::llm::{build_prompt, CopyGenerator, DisabledGenerator, RawCandidate};
use crate::models::{AnalysisSnapshot, KeywordPerformance, Tone};

const DEFAULT_SERVICE: &str = "대출";
const DEFAULT_AUDIENCE: &str = "고객";
const FALLBACK_KEYWORDS: [Keyword; 2] = [Keyword::Benefit, Keyword::Rate];
const RELATED_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub description: String,
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
    pub tone: Tone,
    #[serde(default)]
    pub keyword_hints: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateSource {
    External,
    Template,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub style: String,
    pub message: String,
    pub predicted_rate: f64,
    pub reasoning: String,
    /// 0..1, grows with the number of records behind the keywords used.
    pub confidence: f64,
    pub source: CandidateSource,
}

/// An existing high performer relevant to the request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedMessage {
    pub message: String,
    pub average_click_rate: f64,
    pub services: Vec<String>,
    pub match_score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutcome {
    pub source: CandidateSource,
    pub generator: String,
    /// Why the external generator was not used, when it was not.
    pub fallback_reason: Option<String>,
    pub candidates: Vec<Candidate>,
    pub related: Vec<RelatedMessage>,
}

struct Template {
    style: &'static str,
    text: &'static str,
}

const fn t(style: &'static str, text: &'static str) -> Template {
    Template { style, text }
}

const PROMOTIONAL_HINTED: [Template; 3] = [
    t("혜택 강조형", "(광고) {audience}님만을 위한 특별 {kw1} 혜택! {service} 확인하고 최대 혜택 받기 👉"),
    t("개인화 맞춤형", "(광고) {audience}님의 조건에 딱 맞는 {service} 찾았어요! {kw_list} 확인하고 맞춤 혜택 받기"),
    t("키워드 집중형", "(광고) 🎉 {kw1}·{kw2} 모두 챙기는 {service}, 지금 바로 확인하기 👉"),
];
const PROMOTIONAL: [Template; 3] = [
    t("혜택 강조형", "(광고) 🎉 {service} {kw1} 혜택! 지금 바로 확인하기 👉"),
    t("개인화 맞춤형", "(광고) {audience}님, {kw1}부터 {kw2}까지 {service} 혜택을 확인해보세요"),
    t("데이터 기반형", "(광고) 💰 {kw1} 혜택이 가장 반응 좋았던 {service}, 내 조건 1분만에 확인하기"),
];
const URGENT_HINTED: [Template; 3] = [
    t("긴급성 강조형", "(광고) ⚡ 마감임박! {service} {kw1} 기회를 놓치지 마세요. 지금 바로 확인하기"),
    t("한정 특가형", "(광고) 오늘만! {audience}님께 {kw_list} 한정 제공 👉 서둘러 확인하기"),
    t("손실 회피형", "(광고) 🔥 {kw1} 조건 곧 종료! {service} 놓치면 후회하는 {kw2} 기회"),
];
const URGENT: [Template; 3] = [
    t("긴급성 강조형", "(광고) ⚡ 긴급! {service} {kw1} 조건이 곧 마감돼요. 지금 바로 확인하기"),
    t("한정 특가형", "(광고) 오늘만 {kw1} 특별 제공! {audience}님, 서둘러 확인하세요 👉"),
    t("손실 회피형", "(광고) 🚨 마지막 기회! {service} {kw1}·{kw2} 놓치지 말고 확인"),
];
const INFORMATIONAL_HINTED: [Template; 3] = [
    t("정보 제공형", "(광고) {service} {kw1} 정보를 확인해보세요. {kw_list} 조건 한눈에 보기"),
    t("안내형", "(광고) {audience}님께 맞는 {service} {kw1} 안내 - 자세히 확인하기"),
    t("비교형", "(광고) {kw1}·{kw2} 기준으로 {service} 조건을 비교해보세요"),
];
const INFORMATIONAL: [Template; 3] = [
    t("정보 제공형", "(광고) {service} 조건 확인하기 - {kw1} 정보를 한눈에"),
    t("안내형", "(광고) {audience}님을 위한 {service} {kw1} 안내, 자세히 확인하기"),
    t("비교형", "(광고) 나에게 맞는 {service} {kw1} 쉽게 비교해보세요"),
];
const EMPATHETIC_HINTED: [Template; 3] = [
    t("공감형", "(광고) {audience}님의 {kw1} 고민, 해결책이 있어요. {service} 확인하기"),
    t("문제 해결형", "(광고) {kw1} 부담이시라면? {service}에서 {kw2}까지 확인해보세요"),
    t("상담형", "(광고) {audience}님께 꼭 맞는 {kw_list}, {service} 맞춤 상품 찾기"),
];
const EMPATHETIC: [Template; 3] = [
    t("공감형", "(광고) {service} 고민 끝! {audience}님께 맞는 {kw1} 확인하기"),
    t("문제 해결형", "(광고) {kw1} 부담 해결, {service} 더 나은 조건 찾기"),
    t("상담형", "(광고) {audience}님의 {service} 고민, {kw1}·{kw2}부터 차근차근 확인해보세요"),
];

fn template_bank(tone: Tone, hinted: bool) -> &'static [Template] {
    match (tone, hinted) {
        (Tone::Promotional, true) => &PROMOTIONAL_HINTED,
        (Tone::Promotional, false) => &PROMOTIONAL,
        (Tone::Urgent, true) => &URGENT_HINTED,
        (Tone::Urgent, false) => &URGENT,
        (Tone::Informational, true) => &INFORMATIONAL_HINTED,
        (Tone::Informational, false) => &INFORMATIONAL,
        (Tone::Empathetic, true) => &EMPATHETIC_HINTED,
        (Tone::Empathetic, false) => &EMPATHETIC,
    }
}

/// Copy terms used to fill keyword placeholders, best candidates first.
#[derive(Debug, Clone, PartialEq)]
struct KeywordChoice {
    terms: Vec<String>,
    hinted: bool,
}

fn push_term(terms: &mut Vec<String>, term: &str) {
    if !term.is_empty() && !terms.iter().any(|t| t == term) {
        terms.push(term.to_string());
    }
}

/// Hints first (unknown hints kept verbatim), then keywords found in the
/// description ranked by snapshot performance, then the snapshot's best
/// keywords, then fixed defaults, until two terms are available.
fn choose_keywords(request: &GenerationRequest, snapshot: &AnalysisSnapshot) -> KeywordChoice {
    let mut terms: Vec<String> = Vec::new();
    let hints: Vec<&str> = request
        .keyword_hints
        .iter()
        .map(|h| h.trim())
        .filter(|h| !h.is_empty())
        .collect();

    for hint in &hints {
        match Keyword::from_hint(hint) {
            Some(keyword) => push_term(&mut terms, keyword.copy_term()),
            None => push_term(&mut terms, hint),
        }
    }

    let mut described = keywords::detect(&request.description);
    described.sort_by(|a, b| {
        let rate = |k: &Keyword| snapshot.keyword(*k).and_then(|s| s.average_click_rate());
        match (rate(a), rate(b)) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
    });
    for keyword in described {
        push_term(&mut terms, keyword.copy_term());
    }

    for (keyword, _) in snapshot.ranked_keywords() {
        if terms.len() >= 2 {
            break;
        }
        push_term(&mut terms, keyword.copy_term());
    }
    for keyword in FALLBACK_KEYWORDS {
        if terms.len() >= 2 {
            break;
        }
        push_term(&mut terms, keyword.copy_term());
    }

    KeywordChoice {
        terms,
        hinted: !hints.is_empty(),
    }
}

fn fill(template: &Template, request: &GenerationRequest, choice: &KeywordChoice) -> String {
    let service = request
        .service
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SERVICE);
    let audience = request
        .audience
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .unwrap_or(DEFAULT_AUDIENCE);
    let kw1 = choice.terms.first().map(String::as_str).unwrap_or_default();
    let kw2 = choice.terms.get(1).map(String::as_str).unwrap_or(kw1);
    let kw_list = choice.terms.iter().take(3).cloned().collect::<Vec<_>>().join(", ");

    let text = template
        .text
        .replace("{service}", service)
        .replace("{audience}", audience)
        .replace("{kw_list}", &kw_list)
        .replace("{kw1}", kw1)
        .replace("{kw2}", kw2);
    crate::ingest::normalize_message(&text)
}

#[derive(Debug, Clone, PartialEq)]
struct Prediction {
    rate: f64,
    confidence: f64,
    reasoning: String,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Heuristic click-rate prediction for one message against the snapshot.
fn predict(
    text: &str,
    request: &GenerationRequest,
    snapshot: &AnalysisSnapshot,
    weights: &PredictionWeights,
) -> Prediction {
    let used: Vec<(Keyword, &KeywordPerformance)> = keywords::detect(text)
        .into_iter()
        .filter_map(|k| snapshot.keyword(k)?.performance.as_ref().map(|p| (k, p)))
        .collect();

    let base = snapshot.overview.mean_click_rate.unwrap_or(0.0);
    let keyword_rates: Vec<f64> = used.iter().map(|(_, p)| p.average_click_rate).collect();
    let keyword_rate = mean(&keyword_rates).unwrap_or(base);
    let blended = weights.keyword_weight * keyword_rate + (1.0 - weights.keyword_weight) * base;

    let length = text.chars().count();
    let distance = if length < weights.optimal_min_chars {
        weights.optimal_min_chars - length
    } else {
        length.saturating_sub(weights.optimal_max_chars)
    };
    let penalty = (distance as f64 * weights.length_penalty_per_char).min(weights.max_length_penalty);

    let audience = request
        .audience
        .as_deref()
        .map(str::trim)
        .filter(|a| !a.is_empty() && text.contains(*a));
    let bonus = if audience.is_some() { weights.audience_bonus } else { 0.0 };

    let support: usize = used.iter().map(|(_, p)| p.matching_message_count).sum();
    let confidence = support as f64 / (support as f64 + weights.confidence_half_point);

    let mut reasoning = if used.is_empty() {
        format!("No scored keyword appears in the text, so the dataset mean of {base:.2}% is the basis.")
    } else {
        let stats: Vec<String> = used
            .iter()
            .map(|(k, p)| {
                format!(
                    "'{}' ({}) averages {:.2}% over {} rows, tier {}",
                    k.copy_term(),
                    k.label(),
                    p.average_click_rate,
                    p.matching_message_count,
                    p.tier.label()
                )
            })
            .collect();
        format!("Keyword evidence: {}.", stats.join("; "))
    };
    if penalty > 0.0 {
        reasoning.push_str(&format!(
            " Length {} chars is outside the {}-{} band (-{:.2}pp).",
            length, weights.optimal_min_chars, weights.optimal_max_chars, penalty
        ));
    } else {
        reasoning.push_str(&format!(
            " Length {} chars fits the {}-{} band.",
            length, weights.optimal_min_chars, weights.optimal_max_chars
        ));
    }
    if let Some(audience) = audience {
        reasoning.push_str(&format!(" Names the audience '{audience}' (+{bonus:.2}pp)."));
    }

    Prediction {
        rate: round2((blended - penalty + bonus).clamp(0.0, 100.0)),
        confidence: round2(confidence),
        reasoning,
    }
}

/// High performers sharing the requested service (+3) or description
/// keywords (+2 each).
fn related_messages(request: &GenerationRequest, snapshot: &AnalysisSnapshot) -> Vec<RelatedMessage> {
    let wanted = keywords::detect(&request.description);
    let service = request.service.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let mut related: Vec<RelatedMessage> = snapshot
        .high_performers
        .groups
        .iter()
        .filter_map(|group| {
            let mut score = 0u32;
            if let Some(service) = service {
                if group.services.iter().any(|s| s.contains(service)) {
                    score += 3;
                }
            }
            let found = keywords::detect(&group.message_text);
            score += 2 * wanted.iter().filter(|k| found.contains(k)).count() as u32;
            (score > 0).then(|| RelatedMessage {
                message: group.message_text.clone(),
                average_click_rate: group.average_click_rate,
                services: group.services.iter().cloned().collect(),
                match_score: (score * 10).min(100),
            })
        })
        .collect();

    related.sort_by(|a, b| {
        b.match_score
            .cmp(&a.match_score)
            .then_with(|| b.average_click_rate.total_cmp(&a.average_click_rate))
            .then_with(|| a.message.cmp(&b.message))
    });
    related.truncate(RELATED_LIMIT);
    related
}

pub struct Synthesizer {
    generator: Arc<dyn CopyGenerator>,
    weights: PredictionWeights,
    timeout: Duration,
}

impl Synthesizer {
    pub fn new(generator: Arc<dyn CopyGenerator>, weights: PredictionWeights, timeout: Duration) -> Self {
        Self {
            generator,
            weights,
            timeout,
        }
    }

    pub fn template_only(weights: PredictionWeights) -> Self {
        Self::new(Arc::new(DisabledGenerator), weights, Duration::from_secs(1))
    }

    /// Never fails: any external failure turns into template candidates.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        snapshot: &AnalysisSnapshot,
    ) -> GenerationOutcome {
        let related = related_messages(request, snapshot);

        match self.call_external(request, snapshot).await {
            Ok(raw) => {
                info!(
                    generator = self.generator.name(),
                    candidates = raw.len(),
                    "external generation succeeded"
                );
                GenerationOutcome {
                    source: CandidateSource::External,
                    generator: self.generator.name().to_string(),
                    fallback_reason: None,
                    candidates: raw
                        .into_iter()
                        .map(|c| self.score_external(c, request, snapshot))
                        .collect(),
                    related,
                }
            }
            Err(failure) => {
                if matches!(failure, GenerationFailure::Disabled) {
                    debug!("external generation disabled, using templates");
                } else {
                    warn!(
                        generator = self.generator.name(),
                        error = %failure,
                        "external generation failed, falling back to templates"
                    );
                }
                GenerationOutcome {
                    source: CandidateSource::Template,
                    generator: "templates".to_string(),
                    fallback_reason: Some(failure.to_string()),
                    candidates: self.fallback(request, snapshot),
                    related,
                }
            }
        }
    }

    async fn call_external(
        &self,
        request: &GenerationRequest,
        snapshot: &AnalysisSnapshot,
    ) -> Result<Vec<RawCandidate>, GenerationFailure> {
        let prompt = build_prompt(request, snapshot, self.timeout);
        match tokio::time::timeout(self.timeout, self.generator.generate(&prompt)).await {
            Ok(Ok(raw)) if raw.is_empty() => {
                Err(GenerationFailure::Malformed("no candidates returned".to_string()))
            }
            Ok(result) => result,
            Err(_) => Err(GenerationFailure::Timeout(self.timeout)),
        }
    }

    fn score_external(
        &self,
        raw: RawCandidate,
        request: &GenerationRequest,
        snapshot: &AnalysisSnapshot,
    ) -> Candidate {
        let message = crate::ingest::normalize_message(&raw.message);
        let prediction = predict(&message, request, snapshot, &self.weights);
        let predicted_rate = raw
            .predicted_rate
            .filter(|r| r.is_finite())
            .map(|r| round2(r.clamp(0.0, 100.0)))
            .unwrap_or(prediction.rate);

        Candidate {
            style: raw.style,
            predicted_rate,
            reasoning: raw
                .reasoning
                .filter(|r| !r.trim().is_empty())
                .unwrap_or(prediction.reasoning),
            confidence: prediction.confidence,
            source: CandidateSource::External,
            message,
        }
    }

    /// Deterministic template path: same request and snapshot, same output.
    pub fn fallback(&self, request: &GenerationRequest, snapshot: &AnalysisSnapshot) -> Vec<Candidate> {
        let choice = choose_keywords(request, snapshot);

        template_bank(request.tone, choice.hinted)
            .iter()
            .map(|template| {
                let message = fill(template, request, &choice);
                let prediction = predict(&message, request, snapshot, &self.weights);
                Candidate {
                    style: template.style.to_string(),
                    predicted_rate: prediction.rate,
                    reasoning: format!(
                        "{} copy in a {} tone. {}",
                        template.style,
                        request.tone.label(),
                        prediction.reasoning
                    ),
                    confidence: prediction.confidence,
                    source: CandidateSource::Template,
                    message,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::aggregate::build_snapshot;
    use crate::config::AnalysisConfig;
    use crate::llm::GenerationPrompt;
    use crate::test_support::record;

    fn snapshot() -> AnalysisSnapshot {
        let records = vec![
            record("(광고) 🎉 최대 혜택 확인하기", "신용대출", 14.0),
            record("(광고) 🎉 최대 혜택 확인하기", "신용대출", 12.0),
            record("(광고) 혜택 가득한 신용대출", "신용대출", 10.0),
            record("(광고) 금리 비교해보세요", "주택담보대출", 6.0),
            record("(광고) 한도 조회", "신용점수조회", 3.0),
        ];
        build_snapshot(&records, &AnalysisConfig::default())
    }

    fn request(tone: Tone) -> GenerationRequest {
        GenerationRequest {
            description: "직장인 대상 금리 할인 혜택 안내".to_string(),
            service: Some("신용대출".to_string()),
            audience: Some("직장인".to_string()),
            tone,
            keyword_hints: Vec::new(),
        }
    }

    struct StalledGenerator;

    #[async_trait]
    impl CopyGenerator for StalledGenerator {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn generate(
            &self,
            _prompt: &GenerationPrompt,
        ) -> Result<Vec<RawCandidate>, GenerationFailure> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    struct CannedGenerator;

    #[async_trait]
    impl CopyGenerator for CannedGenerator {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(
            &self,
            prompt: &GenerationPrompt,
        ) -> Result<Vec<RawCandidate>, GenerationFailure> {
            assert!(prompt.prompt.contains("혜택"));
            assert!(!prompt.grounding.top_keywords.is_empty());
            Ok(vec![
                RawCandidate {
                    style: "혜택 강조형".to_string(),
                    message: "(광고)  직장인님 혜택 확인".to_string(),
                    predicted_rate: Some(11.8),
                    reasoning: Some("benefit keyword".to_string()),
                },
                RawCandidate {
                    style: "정보형".to_string(),
                    message: "(광고) 금리 안내".to_string(),
                    predicted_rate: None,
                    reasoning: None,
                },
            ])
        }
    }

    #[test]
    fn fallback_is_deterministic() {
        let synthesizer = Synthesizer::template_only(PredictionWeights::default());
        let snapshot = snapshot();
        let first = synthesizer.fallback(&request(Tone::Promotional), &snapshot);
        let second = synthesizer.fallback(&request(Tone::Promotional), &snapshot);

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert!(first.iter().all(|c| c.message.starts_with("(광고)")));
        assert!(first.iter().all(|c| c.source == CandidateSource::Template));
    }

    #[test]
    fn every_tone_and_hint_combination_yields_candidates() {
        let synthesizer = Synthesizer::template_only(PredictionWeights::default());
        let snapshot = snapshot();
        for tone in [Tone::Promotional, Tone::Urgent, Tone::Informational, Tone::Empathetic] {
            for hints in [vec![], vec!["한도".to_string()]] {
                let req = GenerationRequest {
                    keyword_hints: hints,
                    ..request(tone)
                };
                let candidates = synthesizer.fallback(&req, &snapshot);
                assert!((2..=4).contains(&candidates.len()));
                assert!(candidates.iter().all(|c| !c.message.contains('{')));
                assert!(candidates.iter().all(|c| (0.0..=100.0).contains(&c.predicted_rate)));
            }
        }
    }

    #[test]
    fn hints_lead_keyword_choice_and_switch_templates() {
        let snapshot = snapshot();
        let hinted = GenerationRequest {
            keyword_hints: vec!["limit".to_string(), "우대".to_string()],
            ..request(Tone::Urgent)
        };
        let choice = choose_keywords(&hinted, &snapshot);
        assert!(choice.hinted);
        assert_eq!(choice.terms[0], "한도");
        assert_eq!(choice.terms[1], "우대");

        let plain = choose_keywords(&request(Tone::Urgent), &snapshot);
        assert!(!plain.hinted);
        // Described keywords ranked by snapshot average: 혜택 (12.0) before 금리 (6.0).
        assert_eq!(plain.terms[0], "혜택");
        assert_eq!(plain.terms[1], "금리");
    }

    #[test]
    fn prediction_combines_keyword_rate_length_and_audience() {
        let snapshot = snapshot();
        let weights = PredictionWeights::default();
        let req = request(Tone::Promotional);

        // 32 chars, contains 혜택 (avg 12.0) and the audience.
        let text = "(광고) 직장인님만을 위한 특별 혜택! 지금 바로 보기 👉";
        assert_eq!(text.chars().count(), 32);
        let prediction = predict(text, &req, &snapshot, &weights);
        // mean is 9.0: 0.7 * 12.0 + 0.3 * 9.0 + 0.5
        assert_eq!(prediction.rate, 11.6);
        assert!(prediction.reasoning.contains("'혜택' (benefit) averages 12.00% over 3 rows"));
        assert!(prediction.reasoning.contains("'직장인'"));
        assert_eq!(prediction.confidence, round2(3.0 / 13.0));

        let short = predict("(광고) 혜택", &req, &snapshot, &weights);
        // 7 chars: 23 short, penalty 1.15
        assert_eq!(short.rate, 9.95);
    }

    #[test]
    fn related_messages_score_service_and_keywords() {
        let snapshot = snapshot();
        let related = related_messages(&request(Tone::Promotional), &snapshot);
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].message, "(광고) 🎉 최대 혜택 확인하기");
        assert_eq!(related[0].match_score, 50);
    }

    #[tokio::test]
    async fn disabled_generator_uses_templates() {
        let synthesizer = Synthesizer::template_only(PredictionWeights::default());
        let outcome = synthesizer.generate(&request(Tone::Informational), &snapshot()).await;
        assert_eq!(outcome.source, CandidateSource::Template);
        assert_eq!(outcome.fallback_reason.as_deref(), Some("external generation is disabled"));
        assert_eq!(outcome.candidates.len(), 3);
    }

    #[tokio::test]
    async fn timeout_falls_back_to_templates() {
        let synthesizer = Synthesizer::new(
            Arc::new(StalledGenerator),
            PredictionWeights::default(),
            Duration::from_millis(20),
        );
        let snapshot = snapshot();
        let outcome = synthesizer.generate(&request(Tone::Urgent), &snapshot).await;

        assert_eq!(outcome.source, CandidateSource::Template);
        assert!(outcome.fallback_reason.unwrap().contains("timed out"));
        assert_eq!(
            outcome.candidates,
            Synthesizer::template_only(PredictionWeights::default())
                .fallback(&request(Tone::Urgent), &snapshot)
        );
    }

    #[tokio::test]
    async fn external_candidates_are_scored_against_the_snapshot() {
        let synthesizer = Synthesizer::new(
            Arc::new(CannedGenerator),
            PredictionWeights::default(),
            Duration::from_secs(5),
        );
        let outcome = synthesizer.generate(&request(Tone::Promotional), &snapshot()).await;

        assert_eq!(outcome.source, CandidateSource::External);
        assert_eq!(outcome.generator, "canned");
        assert_eq!(outcome.candidates[0].message, "(광고) 직장인님 혜택 확인");
        assert_eq!(outcome.candidates[0].predicted_rate, 11.8);
        assert_eq!(outcome.candidates[0].reasoning, "benefit keyword");
        assert!(outcome.candidates[1].reasoning.contains("'금리' (rate)"));
        assert!(outcome.candidates[1].confidence > 0.0);
    }
}
