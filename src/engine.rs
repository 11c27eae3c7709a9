//! Matching and ranking engine.
//!
//! The engine orchestrates profile retrieval, per-category cosine scoring,
//! weighted aggregation, filtering, ranking, and batch fan-out. It is the
//! sole stateful coordinator: the store and the weight provider are
//! injected, and the only internal state is the one-shot initialization
//! cell. The engine is cheap to clone (shared inner Arc), so calls for
//! different candidates run fully in parallel.

use crate::error::{EngineError, EngineResult};
use crate::scoring::{cosine_similarity, weighted_score};
use crate::storage::VectorStore;
use crate::types::{Category, CategoryScores, EntityProfile, EntityType, Metadata};
use crate::weights::{MatchWeights, WeightProvider};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Caller-facing bounds on the number of returned matches.
pub const MIN_TOP_K: usize = 1;
pub const MAX_TOP_K: usize = 100;
pub const DEFAULT_TOP_K: usize = 10;

/// One match request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub candidate_id: String,

    /// Explicit vacancies to rank. When absent, all known vacancies are
    /// enumerated from the store's entity index.
    #[serde(default)]
    pub vacancy_ids: Option<Vec<String>>,

    /// Number of top matches to return, within [1, 100].
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Caller-supplied weights; the process-wide vector is used when absent.
    #[serde(default)]
    pub weights: Option<MatchWeights>,

    /// Minimum overall score a vacancy must reach to be included.
    #[serde(default)]
    pub min_score: f32,

    /// Caller-imposed deadline for the scan. When it expires mid-scan, the
    /// results ranked so far are returned with `timed_out` set.
    #[serde(skip)]
    pub deadline: Option<Duration>,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl MatchRequest {
    /// A request with defaults for everything but the candidate.
    #[must_use]
    pub fn new(candidate_id: impl Into<String>) -> Self {
        Self {
            candidate_id: candidate_id.into(),
            vacancy_ids: None,
            top_k: DEFAULT_TOP_K,
            weights: None,
            min_score: 0.0,
            deadline: None,
        }
    }

    fn validate(&self) -> EngineResult<()> {
        if self.candidate_id.trim().is_empty() {
            return Err(EngineError::invalid_request("candidate_id must not be empty"));
        }
        if !(MIN_TOP_K..=MAX_TOP_K).contains(&self.top_k) {
            return Err(EngineError::invalid_request(format!(
                "top_k must be within [{MIN_TOP_K}, {MAX_TOP_K}], got {}",
                self.top_k
            )));
        }
        if !self.min_score.is_finite() || !(0.0..=1.0).contains(&self.min_score) {
            return Err(EngineError::invalid_request(format!(
                "min_score must be within [0, 1], got {}",
                self.min_score
            )));
        }
        Ok(())
    }
}

/// One ranked vacancy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub vacancy_id: String,
    /// Weighted overall score, clamped to [0, 1].
    pub score: f32,
    /// Per-category breakdown; all four categories are always present,
    /// 0.0 where either side lacks the category.
    pub category_scores: CategoryScores,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// Ranked response for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResponse {
    pub candidate_id: String,
    /// Matches in descending score order, truncated to the requested count.
    pub matches: Vec<MatchResult>,
    /// Qualifying vacancies before truncation. When `timed_out` is set this
    /// counts only the scanned portion of the vacancy set.
    pub total_found: usize,
    pub search_time_ms: f64,
    /// The weight vector this call actually used.
    pub weights_used: MatchWeights,
    /// Set when the caller's deadline expired before the scan finished.
    #[serde(default)]
    pub timed_out: bool,
}

struct EngineInner {
    store: Arc<dyn VectorStore>,
    weights: Arc<dyn WeightProvider>,
    ready: OnceCell<()>,
}

/// The matching engine. Clone freely; clones share the same store, weight
/// provider, and initialization state.
#[derive(Clone)]
pub struct MatchEngine {
    inner: Arc<EngineInner>,
}

impl MatchEngine {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, weights: Arc<dyn WeightProvider>) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                store,
                weights,
                ready: OnceCell::new(),
            }),
        }
    }

    /// Lazily initializes the store exactly once. Every public operation
    /// funnels through here; once initialization succeeds the engine stays
    /// ready for the rest of the process lifetime.
    pub(crate) async fn ensure_ready(&self) -> EngineResult<()> {
        self.inner
            .ready
            .get_or_try_init(|| async {
                self.inner.store.init().await.map_err(|e| EngineError::InitFailed {
                    reason: e.to_string(),
                })
            })
            .await?;
        Ok(())
    }

    /// Whether initialization has already succeeded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.ready.initialized()
    }

    /// Loads an entity's profile, or `None` when it has no vectors.
    async fn load_profile(
        &self,
        entity_id: &str,
        entity_type: EntityType,
    ) -> EngineResult<Option<EntityProfile>> {
        let records = self.inner.store.get_by_entity(entity_id, entity_type).await?;
        Ok(EntityProfile::from_records(entity_id, entity_type, records))
    }

    /// Finds and ranks matching vacancies for one candidate.
    ///
    /// Failures local to a single vacancy (profile load error, dimension
    /// mismatch) are logged and that vacancy is skipped; only a missing
    /// candidate profile or invalid input fails the call. Ties in the
    /// ranking keep their original iteration order; there is no secondary
    /// sort key.
    pub async fn find_matches(&self, request: MatchRequest) -> EngineResult<MatchResponse> {
        let started = Instant::now();
        request.validate()?;
        self.ensure_ready().await?;

        let candidate = self
            .load_profile(&request.candidate_id, EntityType::Candidate)
            .await?
            .ok_or_else(|| EngineError::ProfileNotFound {
                entity_type: EntityType::Candidate,
                entity_id: request.candidate_id.clone(),
            })?;

        // One snapshot for the whole call; a concurrent update must not
        // change results mid-computation.
        let weights = match request.weights {
            Some(raw) => raw.normalized()?,
            None => self.inner.weights.snapshot(),
        };

        let vacancy_ids = match request.vacancy_ids {
            Some(ids) => ids,
            None => self.inner.store.list_entity_ids(EntityType::Vacancy).await?,
        };

        let deadline = request.deadline.map(|d| started + d);
        let mut qualifying: Vec<MatchResult> = Vec::new();
        let mut timed_out = false;

        for vacancy_id in &vacancy_ids {
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                timed_out = true;
                tracing::warn!(
                    candidate_id = %request.candidate_id,
                    scanned = qualifying.len(),
                    remaining = vacancy_ids.len(),
                    "match deadline expired, returning partial ranking"
                );
                break;
            }

            match self.match_one(&candidate, vacancy_id, &weights).await {
                Ok(Some(result)) => {
                    if result.score >= request.min_score {
                        qualifying.push(result);
                    }
                }
                // Vacancy has no vectors: nothing to rank, not a failure
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        candidate_id = %request.candidate_id,
                        vacancy_id = %vacancy_id,
                        error = %e,
                        "skipping vacancy after scoring failure"
                    );
                }
            }
        }

        let total_found = qualifying.len();
        // Stable sort: equal scores keep vacancy iteration order
        qualifying.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("scores are never NaN"));
        qualifying.truncate(request.top_k);

        Ok(MatchResponse {
            candidate_id: request.candidate_id,
            matches: qualifying,
            total_found,
            search_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            weights_used: weights,
            timed_out,
        })
    }

    /// Scores one candidate/vacancy pair.
    ///
    /// Returns `None` when the vacancy has no stored vectors. A category
    /// missing on either side contributes 0.0 and is never an error; a
    /// dimension mismatch within a shared category is.
    async fn match_one(
        &self,
        candidate: &EntityProfile,
        vacancy_id: &str,
        weights: &MatchWeights,
    ) -> EngineResult<Option<MatchResult>> {
        let Some(vacancy) = self.load_profile(vacancy_id, EntityType::Vacancy).await? else {
            return Ok(None);
        };

        let mut category_scores = CategoryScores::default();
        for category in Category::ALL {
            let (Some(candidate_vector), Some(vacancy_vector)) =
                (candidate.vectors.get(&category), vacancy.vectors.get(&category))
            else {
                continue;
            };
            category_scores.set(category, cosine_similarity(candidate_vector, vacancy_vector)?);
        }

        let score = weighted_score(&category_scores, weights);

        Ok(Some(MatchResult {
            vacancy_id: vacancy_id.to_string(),
            score,
            category_scores,
            metadata: if vacancy.metadata.is_empty() {
                None
            } else {
                Some(vacancy.metadata)
            },
        }))
    }

    /// Ranks the given vacancies for several candidates concurrently.
    ///
    /// One task per candidate; a failure isolated to one candidate yields
    /// an empty result list for that candidate and never cancels the
    /// others. The returned map always carries every input candidate id as
    /// a key. Weights are resolved once, before fan-out, so every task
    /// scores with the same snapshot.
    pub async fn batch_match(
        &self,
        candidate_ids: &[String],
        vacancy_ids: &[String],
        weights: Option<MatchWeights>,
    ) -> EngineResult<HashMap<String, Vec<MatchResult>>> {
        self.ensure_ready().await?;

        let weights = match weights {
            Some(raw) => raw.normalized()?,
            None => self.inner.weights.snapshot(),
        };

        let mut tasks: JoinSet<(String, Vec<MatchResult>)> = JoinSet::new();
        for candidate_id in candidate_ids {
            let engine = self.clone();
            let candidate_id = candidate_id.clone();
            let vacancy_ids = vacancy_ids.to_vec();
            tasks.spawn(async move {
                let results = engine
                    .rank_for_candidate(&candidate_id, &vacancy_ids, &weights)
                    .await;
                (candidate_id, results)
            });
        }

        // Pre-seed every requested candidate so the key set survives even a
        // panicked task.
        let mut results: HashMap<String, Vec<MatchResult>> = candidate_ids
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((candidate_id, matches)) => {
                    results.insert(candidate_id, matches);
                }
                Err(e) => {
                    tracing::error!(error = %e, "batch match task failed to join");
                }
            }
        }

        Ok(results)
    }

    /// Sequential per-candidate unit of work for `batch_match`. All
    /// failures are contained here: a candidate that cannot be matched
    /// produces an empty list.
    async fn rank_for_candidate(
        &self,
        candidate_id: &str,
        vacancy_ids: &[String],
        weights: &MatchWeights,
    ) -> Vec<MatchResult> {
        let candidate = match self.load_profile(candidate_id, EntityType::Candidate).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                tracing::warn!(candidate_id, "batch match: candidate has no vectors");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(candidate_id, error = %e, "batch match: candidate load failed");
                return Vec::new();
            }
        };

        let mut matches = Vec::new();
        for vacancy_id in vacancy_ids {
            match self.match_one(&candidate, vacancy_id, weights).await {
                Ok(Some(result)) => matches.push(result),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        candidate_id,
                        vacancy_id = %vacancy_id,
                        error = %e,
                        "batch match: skipping vacancy"
                    );
                }
            }
        }

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("scores are never NaN"));
        matches
    }

    /// Current category scores and weighted score for one pair, computed on
    /// demand; feeds explanation requests.
    pub async fn score_pair(
        &self,
        candidate_id: &str,
        vacancy_id: &str,
    ) -> EngineResult<(f32, CategoryScores)> {
        self.ensure_ready().await?;

        let candidate = self
            .load_profile(candidate_id, EntityType::Candidate)
            .await?
            .ok_or_else(|| EngineError::ProfileNotFound {
                entity_type: EntityType::Candidate,
                entity_id: candidate_id.to_string(),
            })?;

        let weights = self.inner.weights.snapshot();
        let result = self
            .match_one(&candidate, vacancy_id, &weights)
            .await?
            .ok_or_else(|| EngineError::ProfileNotFound {
                entity_type: EntityType::Vacancy,
                entity_id: vacancy_id.to_string(),
            })?;

        Ok((result.score, result.category_scores))
    }

    /// Store liveness, for health reporting.
    pub async fn store_ping(&self) -> EngineResult<()> {
        self.inner.store.ping().await?;
        Ok(())
    }
}

impl std::fmt::Debug for MatchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchEngine")
            .field("ready", &self.inner.ready.initialized())
            .finish_non_exhaustive()
    }
}
