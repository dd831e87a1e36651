//! Decides whether a question can be answered from the stored tables.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::prompts::{tables_context, FEASIBILITY_PROMPT};
use crate::llm::{strip_code_fence, CompletionRequest, CompletionService};
use crate::models::StoredTable;

const POSITIVE_WORDS: &[&str] = &["yes", "true", "fulfillable", "possible"];
const NEGATIVE_WORDS: &[&str] = &["no", "false", "impossible", "cannot"];

/// Classifier verdict for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feasibility {
    #[serde(default)]
    pub is_fulfillable: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default = "default_reasoning")]
    pub reasoning: String,
    #[serde(default)]
    pub suggested_approach: String,
    #[serde(default)]
    pub required_tables: BTreeSet<String>,
}

fn default_reasoning() -> String {
    "No reasoning provided".to_string()
}

impl Feasibility {
    fn unanswerable(reasoning: impl Into<String>) -> Self {
        Self {
            is_fulfillable: false,
            confidence: 0.0,
            reasoning: reasoning.into(),
            suggested_approach: "Try rephrasing the question.".to_string(),
            required_tables: BTreeSet::new(),
        }
    }
}

/// Parse a model response, degrading to the keyword heuristic when it is
/// not the expected JSON object.
pub fn parse_response(response: &str) -> Feasibility {
    match serde_json::from_str::<Feasibility>(strip_code_fence(response)) {
        Ok(mut parsed) => {
            parsed.confidence = if parsed.confidence.is_finite() {
                parsed.confidence.clamp(0.0, 1.0)
            } else {
                0.0
            };
            parsed
        }
        Err(e) => {
            debug!("Feasibility response is not JSON ({}), using keywords", e);
            keyword_fallback(response)
        }
    }
}

/// Low-confidence guess from positive and negative words in free text.
pub fn keyword_fallback(response: &str) -> Feasibility {
    let lowered = response.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    let positive = words.iter().filter(|w| POSITIVE_WORDS.contains(*w)).count();
    let negative = words.iter().filter(|w| NEGATIVE_WORDS.contains(*w)).count();
    let excerpt: String = response.chars().take(200).collect();

    Feasibility {
        is_fulfillable: positive > negative,
        confidence: if positive + negative > 0 { 0.3 } else { 0.1 },
        reasoning: format!("Keyword analysis of unstructured response: {}", excerpt),
        suggested_approach: "Try rephrasing the question for a clearer analysis.".to_string(),
        required_tables: BTreeSet::new(),
    }
}

/// Asks the completion service whether a question fits the stored tables.
pub struct FeasibilityClassifier {
    llm: Arc<dyn CompletionService>,
    timeout: Duration,
}

impl FeasibilityClassifier {
    pub fn new(llm: Arc<dyn CompletionService>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Classify a question. Never fails: transport errors and timeouts
    /// produce a not-fulfillable verdict with zero confidence.
    pub async fn classify(&self, question: &str, tables: &[StoredTable]) -> Feasibility {
        let prompt = FEASIBILITY_PROMPT
            .replace("{tables}", &tables_context(tables))
            .replace("{question}", question);
        let request = CompletionRequest::prompt(prompt)
            .with_max_tokens(500)
            .with_temperature(0.1);

        let verdict = match tokio::time::timeout(self.timeout, self.llm.complete(request)).await {
            Ok(Ok(response)) => parse_response(&response.text),
            Ok(Err(e)) => {
                warn!("Feasibility request failed: {}", e);
                Feasibility::unanswerable(format!("Analysis failed: {}", e))
            }
            Err(_) => {
                warn!("Feasibility request timed out after {:?}", self.timeout);
                Feasibility::unanswerable("Analysis timed out")
            }
        };

        info!(
            "Feasibility: fulfillable={}, confidence={:.2}",
            verdict.is_fulfillable, verdict.confidence
        );
        verdict
    }
}
