//! Transport-agnostic service facade.
//!
//! `MatcherService` is the crate's public operation surface: ingestion,
//! matching, explanation, weight management, and health. A transport layer
//! (HTTP, gRPC, CLI) marshals its requests into these calls and maps
//! `EngineError::status_code()` onto its own fault vocabulary; nothing in
//! here knows about any transport.

use crate::config::Settings;
use crate::embedding::{self, EmbeddingProvider};
use crate::engine::{MatchEngine, MatchRequest, MatchResponse, MatchResult};
use crate::error::{EngineError, EngineResult};
use crate::explain::{
    Explanation, ExplanationProvider, ExplanationRequest, RuleBasedExplainer, fallback_explanation,
};
use crate::storage::{self, VectorStore};
use crate::types::{Category, EntityType, Metadata, VectorRecord};
use crate::weights::{MatchWeights, WeightManager};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Bounds on ingested text length, in characters.
pub const MIN_TEXT_CHARS: usize = 10;
pub const MAX_TEXT_CHARS: usize = 10_000;

/// Request to embed and store one piece of entity text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEmbeddingRequest {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub text: String,
    pub category: Category,
    #[serde(default)]
    pub metadata: Option<Metadata>,
}

/// Outcome of an ingestion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEmbeddingResponse {
    pub vector_id: String,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub category: Category,
    pub created_at: DateTime<Utc>,
}

/// Health of one subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// Per-subsystem health map plus the rolled-up status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub services: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// The assembled service: engine, store, providers, and weight state.
#[derive(Clone)]
pub struct MatcherService {
    engine: MatchEngine,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    explainer: Arc<dyn ExplanationProvider>,
    weights: Arc<WeightManager>,
}

impl MatcherService {
    /// Assembles the service from explicit parts. Tests and embedders with
    /// special providers use this; deployments go through `from_settings`.
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        explainer: Arc<dyn ExplanationProvider>,
        weights: Arc<WeightManager>,
    ) -> Self {
        Self {
            engine: MatchEngine::new(Arc::clone(&store), weights.clone()),
            store,
            embedder,
            explainer,
            weights,
        }
    }

    /// Builds the backend, provider, and weight state from settings and
    /// assembles the service around them.
    pub async fn from_settings(settings: &Settings) -> EngineResult<Self> {
        let store = storage::from_settings(settings).await?;
        let embedder = embedding::from_settings(&settings.embedding)?;
        let weights = Arc::new(WeightManager::try_new(
            settings.matching.default_weights,
        )?);
        Ok(Self::new(
            store,
            embedder,
            Arc::new(RuleBasedExplainer),
            weights,
        ))
    }

    /// Replaces the explanation provider, keeping everything else.
    #[must_use]
    pub fn with_explainer(mut self, explainer: Arc<dyn ExplanationProvider>) -> Self {
        self.explainer = explainer;
        self
    }

    /// Access to the underlying engine for callers that need raw matching.
    #[must_use]
    pub fn engine(&self) -> &MatchEngine {
        &self.engine
    }

    /// Embeds the text and stores it under the entity's deterministic
    /// record id. Re-ingesting the same (entity, type, category) overwrites
    /// the previous vector instead of accumulating a duplicate.
    pub async fn create_embedding_record(
        &self,
        request: CreateEmbeddingRequest,
    ) -> EngineResult<CreateEmbeddingResponse> {
        let text = request.text.trim();
        if request.entity_id.trim().is_empty() {
            return Err(EngineError::invalid_request("entity_id must not be empty"));
        }
        let chars = text.chars().count();
        if !(MIN_TEXT_CHARS..=MAX_TEXT_CHARS).contains(&chars) {
            return Err(EngineError::invalid_request(format!(
                "text must be {MIN_TEXT_CHARS}-{MAX_TEXT_CHARS} characters, got {chars}"
            )));
        }

        let vector = self.embedder.generate(text).await?;
        let record = VectorRecord::new(
            request.entity_id,
            request.entity_type,
            request.category,
            vector,
            request.metadata.unwrap_or_default(),
        );

        let response = CreateEmbeddingResponse {
            vector_id: record.id.clone(),
            entity_id: record.entity_id.clone(),
            entity_type: record.entity_type,
            category: record.category,
            created_at: record.created_at,
        };

        self.engine.ensure_ready().await?;
        self.store.upsert(record).await?;
        tracing::debug!(vector_id = %response.vector_id, "stored embedding record");
        Ok(response)
    }

    /// Ranked matches for one candidate. See [`MatchEngine::find_matches`].
    pub async fn find_matches(&self, request: MatchRequest) -> EngineResult<MatchResponse> {
        self.engine.find_matches(request).await
    }

    /// Ranked matches for several candidates at once. See
    /// [`MatchEngine::batch_match`].
    pub async fn batch_match(
        &self,
        candidate_ids: &[String],
        vacancy_ids: &[String],
        weights: Option<MatchWeights>,
    ) -> EngineResult<HashMap<String, Vec<MatchResult>>> {
        self.engine.batch_match(candidate_ids, vacancy_ids, weights).await
    }

    /// Explains the current match between a candidate and a vacancy.
    ///
    /// The pair is scored on demand with the current weight snapshot, then
    /// handed to the explanation provider. Provider failures degrade to the
    /// deterministic fallback and never surface as errors; only an unknown
    /// candidate or vacancy fails the call.
    pub async fn get_explanation(
        &self,
        candidate_id: &str,
        vacancy_id: &str,
    ) -> EngineResult<Explanation> {
        let (score, category_scores) = self.engine.score_pair(candidate_id, vacancy_id).await?;

        let request = ExplanationRequest {
            candidate_id: candidate_id.to_string(),
            vacancy_id: vacancy_id.to_string(),
            score,
            category_scores,
        };

        match self.explainer.explain(&request).await {
            Ok(explanation) => Ok(explanation),
            Err(e) => {
                tracing::warn!(
                    candidate_id,
                    vacancy_id,
                    error = %e,
                    "explanation provider failed, using deterministic fallback"
                );
                Ok(fallback_explanation(score, &category_scores))
            }
        }
    }

    /// Validates, normalizes, and installs a new weight vector; echoes the
    /// normalized weights now in effect.
    pub fn update_weights(&self, weights: MatchWeights) -> EngineResult<MatchWeights> {
        let normalized = self.weights.update(weights)?;
        tracing::info!(?normalized, "match weights updated");
        Ok(normalized)
    }

    /// The current normalized weight vector.
    #[must_use]
    pub fn get_weights(&self) -> MatchWeights {
        self.weights.current()
    }

    /// Probes every subsystem and reports a per-service status map.
    pub async fn health_check(&self) -> HealthReport {
        let mut services = HashMap::new();

        match self.engine.store_ping().await {
            Ok(()) => {
                services.insert("vector_store".to_string(), "healthy".to_string());
            }
            Err(e) => {
                services.insert("vector_store".to_string(), format!("unhealthy: {e}"));
            }
        }

        services.insert(
            "embedding_provider".to_string(),
            format!("healthy (dimension {})", self.embedder.dimension()),
        );

        let weights = self.weights.current();
        if (weights.sum() - 1.0).abs() < crate::weights::WEIGHT_SUM_EPSILON {
            services.insert("weights".to_string(), "healthy".to_string());
        } else {
            services.insert(
                "weights".to_string(),
                format!("unhealthy: sum {}", weights.sum()),
            );
        }

        let status = if services.values().all(|s| s.starts_with("healthy")) {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        };

        HealthReport {
            status,
            services,
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Debug for MatcherService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatcherService")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbedder;
    use crate::storage::MemoryStore;

    fn service() -> (MatcherService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = MatcherService::new(
            store.clone(),
            Arc::new(HashEmbedder::new(64)),
            Arc::new(RuleBasedExplainer),
            Arc::new(WeightManager::default()),
        );
        (service, store)
    }

    fn ingest(entity_id: &str, entity_type: EntityType, category: Category, text: &str) -> CreateEmbeddingRequest {
        CreateEmbeddingRequest {
            entity_id: entity_id.to_string(),
            entity_type,
            text: text.to_string(),
            category,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn ingestion_rejects_short_and_long_text() {
        let (service, _) = service();

        let err = service
            .create_embedding_record(ingest("c-1", EntityType::Candidate, Category::Skills, "tiny"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), "VALIDATION_ERROR");

        let long = "x".repeat(MAX_TEXT_CHARS + 1);
        let err = service
            .create_embedding_record(ingest("c-1", EntityType::Candidate, Category::Skills, &long))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn ingestion_is_idempotent_per_identity() {
        let (service, store) = service();

        let first = service
            .create_embedding_record(ingest(
                "c-1",
                EntityType::Candidate,
                Category::Skills,
                "rust, tokio, distributed systems",
            ))
            .await
            .unwrap();
        let second = service
            .create_embedding_record(ingest(
                "c-1",
                EntityType::Candidate,
                Category::Skills,
                "kubernetes, go, platform engineering",
            ))
            .await
            .unwrap();

        assert_eq!(first.vector_id, second.vector_id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn end_to_end_ingest_then_match() {
        let (service, _) = service();

        service
            .create_embedding_record(ingest(
                "c-1",
                EntityType::Candidate,
                Category::Skills,
                "senior rust engineer, async services, postgres",
            ))
            .await
            .unwrap();
        service
            .create_embedding_record(ingest(
                "v-rust",
                EntityType::Vacancy,
                Category::Skills,
                "senior rust engineer, async services, postgres",
            ))
            .await
            .unwrap();
        service
            .create_embedding_record(ingest(
                "v-paint",
                EntityType::Vacancy,
                Category::Skills,
                "watercolor instructor for community art classes",
            ))
            .await
            .unwrap();

        let response = service
            .find_matches(MatchRequest::new("c-1"))
            .await
            .unwrap();
        assert_eq!(response.total_found, 2);
        assert_eq!(response.matches[0].vacancy_id, "v-rust");
        assert!(response.matches[0].score > response.matches[1].score);
    }

    #[tokio::test]
    async fn explanation_degrades_to_fallback() {
        struct FailingExplainer;

        #[async_trait::async_trait]
        impl ExplanationProvider for FailingExplainer {
            async fn explain(
                &self,
                _request: &ExplanationRequest,
            ) -> Result<Explanation, crate::explain::ExplainError> {
                Err(crate::explain::ExplainError("model offline".to_string()))
            }
        }

        let (service, _) = service();
        let service = service.with_explainer(Arc::new(FailingExplainer));

        service
            .create_embedding_record(ingest(
                "c-1",
                EntityType::Candidate,
                Category::Skills,
                "embedded c++ and rtos experience",
            ))
            .await
            .unwrap();
        service
            .create_embedding_record(ingest(
                "v-1",
                EntityType::Vacancy,
                Category::Skills,
                "embedded c++ and rtos experience",
            ))
            .await
            .unwrap();

        let explanation = service.get_explanation("c-1", "v-1").await.unwrap();
        assert!(!explanation.text.is_empty());
    }

    #[tokio::test]
    async fn explanation_for_unknown_pair_is_not_found() {
        let (service, _) = service();
        let err = service.get_explanation("nobody", "nothing").await.unwrap_err();
        assert_eq!(err.status_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn weight_update_echoes_normalized() {
        let (service, _) = service();
        let updated = service
            .update_weights(MatchWeights::new(0.5, 0.5, 0.5, 0.5))
            .unwrap();
        assert!((updated.skills - 0.25).abs() < 1e-9);
        assert_eq!(service.get_weights(), updated);

        let err = service
            .update_weights(MatchWeights::new(0.0, 0.0, 0.0, 0.0))
            .unwrap_err();
        assert_eq!(err.status_code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn health_reports_every_subsystem() {
        let (service, _) = service();
        let report = service.health_check().await;
        assert_eq!(report.status, HealthState::Healthy);
        assert!(report.services.contains_key("vector_store"));
        assert!(report.services.contains_key("embedding_provider"));
        assert!(report.services.contains_key("weights"));
    }
}
