//! Match explanation contract and the deterministic default provider.
//!
//! Natural-language generation lives outside this crate; what lives here is
//! the provider trait, the rules that shape an explanation (key factors,
//! improvement suggestions), and the deterministic fallback used whenever a
//! provider fails. Explanation failures never propagate as errors.

use crate::types::{Category, CategoryScores};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Category scores above this threshold count as key factors.
const KEY_FACTOR_THRESHOLD: f32 = 0.3;

/// Number of key factors reported.
const KEY_FACTOR_LIMIT: usize = 3;

/// Category scores below this threshold earn improvement suggestions.
const SUGGESTION_THRESHOLD: f32 = 0.5;

/// Maximum improvement suggestions reported.
const SUGGESTION_LIMIT: usize = 5;

/// Everything a provider needs to explain one match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationRequest {
    pub candidate_id: String,
    pub vacancy_id: String,
    pub score: f32,
    pub category_scores: CategoryScores,
}

/// One explained match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub text: String,
    /// Top categories driving the match, strongest first.
    pub key_factors: Vec<String>,
    /// Present only when some categories scored below the suggestion
    /// threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

/// Produces explanations for scored matches.
///
/// Callers treat any error as a signal to fall back to
/// [`fallback_explanation`]; a provider failure is never a caller-visible
/// error.
#[async_trait]
pub trait ExplanationProvider: Send + Sync {
    async fn explain(&self, request: &ExplanationRequest) -> Result<Explanation, ExplainError>;
}

/// Error type for explanation providers.
#[derive(Debug, thiserror::Error)]
#[error("explanation provider failed: {0}")]
pub struct ExplainError(pub String);

/// The top categories with a score above the key-factor threshold,
/// strongest first, capped at three.
#[must_use]
pub fn key_factors(scores: &CategoryScores) -> Vec<String> {
    scores
        .ranked()
        .into_iter()
        .filter(|(_, score)| *score > KEY_FACTOR_THRESHOLD)
        .take(KEY_FACTOR_LIMIT)
        .map(|(category, score)| format!("{} ({score:.2})", factor_name(category)))
        .collect()
}

/// Improvement suggestions for the categories scoring below the suggestion
/// threshold; `None` when no category is weak.
#[must_use]
pub fn improvement_suggestions(scores: &CategoryScores) -> Option<Vec<String>> {
    let suggestions: Vec<String> = scores
        .ranked()
        .into_iter()
        .rev()
        .filter(|(_, score)| *score < SUGGESTION_THRESHOLD)
        .take(SUGGESTION_LIMIT)
        .map(|(category, _)| suggestion_for(category).to_string())
        .collect();

    if suggestions.is_empty() {
        None
    } else {
        Some(suggestions)
    }
}

/// Deterministic explanation built purely from the overall score and the
/// best category score. Used whenever a provider fails, and as the body of
/// the rule-based default provider.
#[must_use]
pub fn fallback_explanation(score: f32, scores: &CategoryScores) -> Explanation {
    let best = scores
        .ranked()
        .into_iter()
        .next()
        .expect("there is always at least one category");

    let quality = if best.1 >= 0.7 {
        "good"
    } else if best.1 >= 0.5 {
        "moderate"
    } else {
        "basic"
    };

    let text = format!(
        "The candidate shows a {} match with this vacancy (overall score {:.2}). \
         The strongest alignment is in {}.",
        quality,
        score,
        factor_name(best.0)
    );

    Explanation {
        text,
        key_factors: key_factors(scores),
        suggestions: improvement_suggestions(scores),
    }
}

fn factor_name(category: Category) -> &'static str {
    match category {
        Category::Skills => "technical skills",
        Category::Career => "career experience",
        Category::Culture => "cultural fit",
        Category::Salary => "compensation expectations",
    }
}

fn suggestion_for(category: Category) -> &'static str {
    match category {
        Category::Skills => {
            "Expand the skills profile with concrete technologies, tools, and recent project work"
        }
        Category::Career => {
            "Describe career trajectory and measurable achievements in more detail"
        }
        Category::Culture => {
            "Clarify preferred working style, team values, and collaboration preferences"
        }
        Category::Salary => {
            "State compensation expectations and flexibility on benefits or location"
        }
    }
}

/// Default provider: applies the deterministic rules directly.
///
/// A deployment with an LLM-backed provider swaps this out at construction
/// time; the engine and service are indifferent.
#[derive(Debug, Default, Clone)]
pub struct RuleBasedExplainer;

#[async_trait]
impl ExplanationProvider for RuleBasedExplainer {
    async fn explain(&self, request: &ExplanationRequest) -> Result<Explanation, ExplainError> {
        Ok(fallback_explanation(
            request.score,
            &request.category_scores,
        ))
    }
}
