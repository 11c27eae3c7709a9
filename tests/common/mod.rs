//! Shared builders for integration tests.
//!
//! Everything runs against the in-process store and the deterministic hash
//! embedder, so tests need no network, no model download, and no database.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;

use vecmatch::api::MatcherService;
use vecmatch::embedding::HashEmbedder;
use vecmatch::explain::RuleBasedExplainer;
use vecmatch::storage::{MemoryStore, VectorStore};
use vecmatch::types::{Category, EntityType, Metadata, VectorRecord};
use vecmatch::weights::WeightManager;

/// Embedding dimension used across the integration tests.
pub const TEST_DIMENSION: usize = 64;

/// A fully assembled service over a shared in-memory store.
pub fn test_service() -> (MatcherService, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let service = MatcherService::new(
        store.clone(),
        Arc::new(HashEmbedder::new(TEST_DIMENSION)),
        Arc::new(RuleBasedExplainer),
        Arc::new(WeightManager::default()),
    );
    (service, store)
}

/// Stores a raw vector for an entity, bypassing the embedding provider.
pub async fn seed_vector(
    store: &MemoryStore,
    entity_id: &str,
    entity_type: EntityType,
    category: Category,
    vector: Vec<f32>,
) {
    store
        .upsert(VectorRecord::new(
            entity_id,
            entity_type,
            category,
            vector,
            Metadata::new(),
        ))
        .await
        .expect("seeding the memory store never fails");
}

/// Unit vector in the plane at the given angle from [1, 0]. Cosine
/// similarity against [1, 0] equals cos(angle), which makes expected
/// scores easy to state exactly.
pub fn unit_at(angle_radians: f32) -> Vec<f32> {
    vec![angle_radians.cos(), angle_radians.sin()]
}
