//! Quality metrics for agent outputs
//!
//! Every evaluator returns the same four scores in [0, 1]: factual
//! consistency, relevance, hallucination (higher is worse) and correctness.
//! Evaluators never fail; degenerate input still yields four numbers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::config::{EvaluatorKind, GatewayConfig, ScoringConfig};
use crate::error::Result;
use crate::llm::{GeminiProvider, LLMProvider, LLMRequest};

/// One of the four reported metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Factual,
    Relevance,
    Hallucination,
    Correctness,
}

impl MetricKind {
    pub const ALL: [MetricKind; 4] = [
        MetricKind::Factual,
        MetricKind::Relevance,
        MetricKind::Hallucination,
        MetricKind::Correctness,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MetricKind::Factual => "factual",
            MetricKind::Relevance => "relevance",
            MetricKind::Hallucination => "hallucination",
            MetricKind::Correctness => "correctness",
        }
    }

    /// Whether lower values are better
    pub fn inverted(&self) -> bool {
        matches!(self, MetricKind::Hallucination)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scores for one output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricScores {
    pub factual: f64,
    pub relevance: f64,
    pub hallucination: f64,
    pub correctness: f64,
}

impl MetricScores {
    /// Build scores, clamping each into [0, 1] (NaN becomes 0)
    pub fn new(factual: f64, relevance: f64, hallucination: f64, correctness: f64) -> Self {
        Self {
            factual: unit(factual),
            relevance: unit(relevance),
            hallucination: unit(hallucination),
            correctness: unit(correctness),
        }
    }

    pub fn get(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::Factual => self.factual,
            MetricKind::Relevance => self.relevance,
            MetricKind::Hallucination => self.hallucination,
            MetricKind::Correctness => self.correctness,
        }
    }

    /// Scale toward the bad end of every metric by `factor` (1.0 = unchanged)
    pub fn penalize(self, factor: f64) -> Self {
        let factor = unit(factor);
        Self::new(
            self.factual * factor,
            self.relevance * factor,
            1.0 - (1.0 - self.hallucination) * factor,
            self.correctness * factor,
        )
    }
}

fn unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Scores a model output against a query and a ground-truth string
#[async_trait]
pub trait MetricEvaluator: Send + Sync {
    async fn evaluate(&self, query: &str, output: &str, ground_truth: &str) -> MetricScores;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Build the evaluator selected by `scoring.evaluator`.
///
/// The judge calls the gateway model and needs credentials; without them
/// scoring falls back to [`HeuristicEvaluator`].
///
/// # Errors
///
/// Fails when the judge's HTTP client cannot be built.
pub fn evaluator_from_config(
    scoring: &ScoringConfig,
    gateway: &GatewayConfig,
) -> Result<Arc<dyn MetricEvaluator>> {
    select_evaluator(scoring.evaluator, gateway, gateway.resolve_api_key())
}

fn select_evaluator(
    kind: EvaluatorKind,
    gateway: &GatewayConfig,
    api_key: Option<String>,
) -> Result<Arc<dyn MetricEvaluator>> {
    match (kind, api_key) {
        (EvaluatorKind::Heuristic, _) => Ok(Arc::new(HeuristicEvaluator::new())),
        (EvaluatorKind::Judge, Some(api_key)) => {
            let provider = GeminiProvider::from_config(gateway, api_key)?;
            Ok(Arc::new(JudgeEvaluator::new(Arc::new(provider))))
        }
        (EvaluatorKind::Judge, None) => {
            tracing::warn!("LLM judge requested without credentials, scoring heuristically");
            Ok(Arc::new(HeuristicEvaluator::new()))
        }
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "did", "do", "for", "from", "give", "how",
    "in", "is", "it", "me", "of", "on", "or", "show", "that", "the", "this", "to", "was", "what",
    "why", "with",
];

/// Split text into lowercase tokens. Digit groups joined by `.` or `,` stay
/// one token, with the commas dropped (`120,000` → `120000`).
fn tokenize(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        let joins_digits = (c == '.' || c == ',')
            && i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());

        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if joins_digits {
            if c == '.' {
                current.push('.');
            }
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn terms(text: &str) -> BTreeSet<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| {
            t.parse::<f64>().is_ok()
                || (t.chars().count() > 1 && !STOPWORDS.contains(&t.as_str()))
        })
        .collect()
}

fn numbers(text: &str) -> Vec<f64> {
    tokenize(text)
        .iter()
        .filter_map(|t| t.parse::<f64>().ok())
        .filter(|n| n.is_finite())
        .collect()
}

/// Share of `reference` terms found in `candidate`; 0 when `reference` is empty
fn coverage(reference: &BTreeSet<String>, candidate: &BTreeSet<String>) -> f64 {
    if reference.is_empty() {
        return 0.0;
    }
    reference.intersection(candidate).count() as f64 / reference.len() as f64
}

/// Deterministic token-overlap evaluator
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEvaluator;

impl HeuristicEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous scoring
    pub fn score(&self, query: &str, output: &str, ground_truth: &str) -> MetricScores {
        let output_terms = terms(output);
        let relevance = coverage(&terms(query), &output_terms);
        let factual = coverage(&terms(ground_truth), &output_terms);

        let output_numbers = numbers(output);
        let hallucination = if output_numbers.is_empty() {
            0.0
        } else {
            let supported: Vec<f64> = numbers(query)
                .into_iter()
                .chain(numbers(ground_truth))
                .collect();
            let unsupported = output_numbers
                .iter()
                .filter(|n| !supported.iter().any(|s| (*s - **n).abs() < 1e-9))
                .count();
            unsupported as f64 / output_numbers.len() as f64
        };

        let correctness = (factual + relevance) / 2.0 * (1.0 - hallucination);
        MetricScores::new(factual, relevance, hallucination, correctness)
    }
}

#[async_trait]
impl MetricEvaluator for HeuristicEvaluator {
    async fn evaluate(&self, query: &str, output: &str, ground_truth: &str) -> MetricScores {
        self.score(query, output, ground_truth)
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

/// LLM-as-judge evaluator with heuristic fallback
pub struct JudgeEvaluator {
    provider: Arc<dyn LLMProvider>,
    fallback: HeuristicEvaluator,
}

impl JudgeEvaluator {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            fallback: HeuristicEvaluator,
        }
    }

    fn prompt(query: &str, output: &str, ground_truth: &str) -> String {
        format!(
            r#"Score the response below against the query and the expected answer.

Return ONLY a JSON object with four numbers between 0.0 and 1.0:
{{"factual": <consistency with the expected answer>,
 "relevance": <how well it addresses the query>,
 "hallucination": <share of unsupported claims, higher is worse>,
 "correctness": <overall answer correctness>}}

Query:
{}

Expected answer:
{}

Response:
{}"#,
            query, ground_truth, output
        )
    }
}

/// Pull the outermost JSON object out of free text and parse it
fn parse_judgement(text: &str) -> Option<MetricScores> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }

    #[derive(Deserialize)]
    struct Judgement {
        factual: f64,
        relevance: f64,
        hallucination: f64,
        correctness: f64,
    }

    let j: Judgement = serde_json::from_str(&text[start..=end]).ok()?;
    Some(MetricScores::new(j.factual, j.relevance, j.hallucination, j.correctness))
}

#[async_trait]
impl MetricEvaluator for JudgeEvaluator {
    async fn evaluate(&self, query: &str, output: &str, ground_truth: &str) -> MetricScores {
        let request = LLMRequest::from_prompt(Self::prompt(query, output, ground_truth))
            .with_temperature(0.0);

        match self.provider.generate_request(&request).await {
            Ok(response) => match parse_judgement(&response.content) {
                Some(scores) => scores,
                None => {
                    tracing::warn!("Judge returned unparseable scores, using heuristic");
                    self.fallback.score(query, output, ground_truth)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Judge call failed, using heuristic");
                self.fallback.score(query, output, ground_truth)
            }
        }
    }

    fn name(&self) -> &'static str {
        "judge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EvalFlowError;
    use crate::llm::LLMResponse;

    fn assert_unit(scores: &MetricScores) {
        for kind in MetricKind::ALL {
            let v = scores.get(kind);
            assert!((0.0..=1.0).contains(&v), "{} = {} out of range", kind, v);
        }
    }

    #[test]
    fn test_tokenize_keeps_numbers_whole() {
        assert_eq!(
            tokenize("Sales=120,000, Growth=5.2%."),
            ["sales", "120000", "growth", "5.2"]
        );
    }

    #[test]
    fn test_serializes_exactly_four_keys() {
        let value = serde_json::to_value(MetricScores::new(0.1, 0.2, 0.3, 0.4)).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys.len(), 4);
        for kind in MetricKind::ALL {
            assert!(keys.contains(&kind.name().to_string()));
        }
    }

    #[test]
    fn test_matching_output_scores_high() {
        let scores = HeuristicEvaluator.score(
            "Show me NY sales",
            "NY sales were 120000 with growth of 5.2 percent",
            "Sales=120000, Growth=5.2",
        );
        assert_eq!(scores.factual, 1.0);
        assert_eq!(scores.relevance, 1.0);
        assert_eq!(scores.hallucination, 0.0);
        assert_eq!(scores.correctness, 1.0);
    }

    #[test]
    fn test_unsupported_numbers_raise_hallucination() {
        let scores = HeuristicEvaluator.score(
            "Show me NY sales",
            "NY sales were 999999 with growth of 5.2",
            "Sales=120000, Growth=5.2",
        );
        assert_eq!(scores.hallucination, 0.5);
        assert!(scores.factual < 1.0);
        assert!(scores.correctness < 0.5);
    }

    #[test]
    fn test_off_topic_output_has_low_relevance() {
        let scores = HeuristicEvaluator.score(
            "Show me NY sales",
            "The weather in Paris is sunny today",
            "Sales=120000, Growth=5.2",
        );
        assert!(scores.relevance < 0.2, "relevance {}", scores.relevance);
        assert!(scores.factual < 0.2);
        assert!(scores.correctness < 0.2);
    }

    #[test]
    fn test_partially_relevant_output() {
        let off_topic = HeuristicEvaluator.score("Show me NY sales", "Paris is sunny", "");
        let partial = HeuristicEvaluator.score("Show me NY sales", "NY looks stable", "");
        let full = HeuristicEvaluator.score("Show me NY sales", "NY sales look stable", "");

        assert!(partial.relevance > 0.0);
        assert!(partial.relevance < full.relevance);
        assert!(off_topic.relevance < partial.relevance);
    }

    #[test]
    fn test_empty_inputs_still_score() {
        let scores = HeuristicEvaluator.score("", "", "");
        assert_unit(&scores);
        assert_eq!(scores, MetricScores::new(0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn test_scores_are_deterministic() {
        let a = HeuristicEvaluator.score("q a b", "a 1 2", "b 2");
        let b = HeuristicEvaluator.score("q a b", "a 1 2", "b 2");
        assert_eq!(a, b);
    }

    #[test]
    fn test_clamp_and_nan() {
        let scores = MetricScores::new(1.5, -0.5, f64::NAN, 0.5);
        assert_eq!(scores, MetricScores::new(1.0, 0.0, 0.0, 0.5));
    }

    #[test]
    fn test_penalize() {
        let scores = MetricScores::new(0.8, 0.6, 0.2, 0.4).penalize(0.5);
        assert!((scores.factual - 0.4).abs() < 1e-12);
        assert!((scores.relevance - 0.3).abs() < 1e-12);
        assert!((scores.hallucination - 0.6).abs() < 1e-12);
        assert!((scores.correctness - 0.2).abs() < 1e-12);
        assert_unit(&scores);
    }

    #[test]
    fn test_parse_judgement() {
        let text = concat!(
            "Here you go:\n",
            r#"{"factual": 0.9, "relevance": 1.2, "hallucination": 0.1, "correctness": 0.8}"#,
            "\nDone"
        );
        let scores = parse_judgement(text).unwrap();
        assert_eq!(scores.relevance, 1.0);
        assert_eq!(scores.factual, 0.9);

        assert!(parse_judgement("no json here").is_none());
        assert!(parse_judgement("{\"factual\": 0.5}").is_none());
    }

    struct FixedProvider(std::result::Result<String, String>);

    #[async_trait]
    impl LLMProvider for FixedProvider {
        async fn generate_request(&self, _request: &LLMRequest) -> Result<LLMResponse> {
            match &self.0 {
                Ok(content) => Ok(LLMResponse {
                    content: content.clone(),
                    usage: None,
                }),
                Err(e) => Err(EvalFlowError::gateway(e.clone())),
            }
        }
    }

    #[tokio::test]
    async fn test_judge_uses_model_scores() {
        let judge = JudgeEvaluator::new(Arc::new(FixedProvider(Ok(
            r#"{"factual": 0.9, "relevance": 0.8, "hallucination": 0.05, "correctness": 0.85}"#
                .to_string(),
        ))));
        let scores = judge.evaluate("q", "o", "g").await;
        assert_eq!(scores, MetricScores::new(0.9, 0.8, 0.05, 0.85));
    }

    #[tokio::test]
    async fn test_judge_falls_back_on_failure() {
        let expected = HeuristicEvaluator.score("NY sales", "NY sales 120000", "Sales=120000");

        let failing = JudgeEvaluator::new(Arc::new(FixedProvider(Err("down".to_string()))));
        assert_eq!(failing.evaluate("NY sales", "NY sales 120000", "Sales=120000").await, expected);

        let garbled = JudgeEvaluator::new(Arc::new(FixedProvider(Ok("great answer".to_string()))));
        assert_eq!(garbled.evaluate("NY sales", "NY sales 120000", "Sales=120000").await, expected);
    }

    #[test]
    fn test_select_evaluator() {
        let gateway = GatewayConfig::default();

        let heuristic = select_evaluator(EvaluatorKind::Heuristic, &gateway, Some("k".into()));
        assert_eq!(heuristic.unwrap().name(), "heuristic");

        let judge = select_evaluator(EvaluatorKind::Judge, &gateway, Some("k".into()));
        assert_eq!(judge.unwrap().name(), "judge");

        let keyless = select_evaluator(EvaluatorKind::Judge, &gateway, None);
        assert_eq!(keyless.unwrap().name(), "heuristic");
    }
}
