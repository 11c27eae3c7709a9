//! Vector storage abstraction and its backends.
//!
//! One object-safe async trait covers the full capability set: persist by
//! id, point lookup, entity-scoped retrieval, similarity search, deletion,
//! and entity-id enumeration. Backends with very different native query
//! mechanisms (an ANN service, a relational store with a vector extension,
//! an in-process map) honor identical contracts; all filter and query
//! construction stays internal to each implementation.

pub mod memory;
pub mod postgres;
pub mod qdrant;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;
pub use qdrant::QdrantStore;

use crate::config::{Settings, StoreBackend};
use crate::error::StoreResult;
use crate::types::{Category, EntityType, Metadata, VectorRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// One hit from a similarity search.
#[derive(Debug, Clone)]
pub struct SimilarMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Durable keyed storage of per-category embedding vectors.
///
/// Implementations must be safe for concurrent independent reads and for
/// idempotent concurrent writes: `upsert` is keyed by the record's
/// deterministic id, so two racing upserts of the same logical record
/// converge on one row.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent backend initialization (create the collection, ensure the
    /// schema). Called lazily by the engine before the first operation.
    async fn init(&self) -> StoreResult<()>;

    /// Inserts or fully replaces the record with the same id.
    ///
    /// Never a partial write. The `created_at` of an overwritten record is
    /// preserved; `updated_at` is taken from the incoming record.
    async fn upsert(&self, record: VectorRecord) -> StoreResult<()>;

    /// Point lookup by record id.
    async fn get(&self, id: &str) -> StoreResult<Option<VectorRecord>>;

    /// All current records of one entity, keyed by category.
    ///
    /// At most one entry per category, guaranteed by the deterministic id
    /// scheme, under which a (entity, category) pair always maps to the
    /// same physical row.
    async fn get_by_entity(
        &self,
        entity_id: &str,
        entity_type: EntityType,
    ) -> StoreResult<HashMap<Category, VectorRecord>>;

    /// Ranked similarity search within one (category, entity type) slice.
    ///
    /// `filter` adds exact-match conditions on metadata fields; how the
    /// conditions translate into the backend's native query language is
    /// the backend's business.
    async fn search_similar(
        &self,
        query: &[f32],
        category: Category,
        entity_type: EntityType,
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> StoreResult<Vec<SimilarMatch>>;

    /// Removes a record. Deleting a missing id is not an error.
    async fn delete(&self, id: &str) -> StoreResult<()>;

    /// All distinct entity ids of the given type.
    ///
    /// The secondary entity index that makes unscoped matching possible;
    /// each backend enumerates through its native mechanism.
    async fn list_entity_ids(&self, entity_type: EntityType) -> StoreResult<Vec<String>>;

    /// Cheap liveness probe for health reporting.
    async fn ping(&self) -> StoreResult<()>;
}

/// Builds the store selected by the settings.
///
/// Backend-specific construction failures surface as `Unavailable` so the
/// caller can distinguish a misconfigured deployment from a coding error.
pub async fn from_settings(settings: &Settings) -> StoreResult<Arc<dyn VectorStore>> {
    match settings.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Qdrant => {
            let store = QdrantStore::new(&settings.store.qdrant, settings.embedding.dimension)?;
            Ok(Arc::new(store))
        }
        StoreBackend::Postgres => {
            let store =
                PostgresStore::connect(&settings.store.postgres, settings.embedding.dimension)
                    .await?;
            Ok(Arc::new(store))
        }
    }
}

/// Shared helper: true when every filter entry matches the metadata.
pub(crate) fn metadata_matches(metadata: &Metadata, filter: Option<&Metadata>) -> bool {
    match filter {
        None => true,
        Some(conditions) => conditions
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected)),
    }
}
