//! In-process vector store backed by a concurrent map.
//!
//! The reference backend for tests and offline development: linear-scan
//! similarity, no durability. Because it implements the same contract as
//! the service-backed stores, the whole engine can run against it
//! unchanged.

use crate::error::StoreResult;
use crate::scoring::cosine_similarity;
use crate::storage::{SimilarMatch, VectorStore, metadata_matches};
use crate::types::{Category, EntityType, Metadata, VectorRecord};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

/// DashMap-backed store keyed by record id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, VectorRecord>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held. Test helper.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn init(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn upsert(&self, mut record: VectorRecord) -> StoreResult<()> {
        if let Some(existing) = self.records.get(&record.id) {
            record.created_at = existing.created_at;
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<VectorRecord>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn get_by_entity(
        &self,
        entity_id: &str,
        entity_type: EntityType,
    ) -> StoreResult<HashMap<Category, VectorRecord>> {
        let mut by_category = HashMap::new();
        for entry in self.records.iter() {
            if entry.entity_id == entity_id && entry.entity_type == entity_type {
                by_category.insert(entry.category, entry.value().clone());
            }
        }
        Ok(by_category)
    }

    async fn search_similar(
        &self,
        query: &[f32],
        category: Category,
        entity_type: EntityType,
        top_k: usize,
        filter: Option<&Metadata>,
    ) -> StoreResult<Vec<SimilarMatch>> {
        let mut hits: Vec<SimilarMatch> = Vec::new();
        for entry in self.records.iter() {
            if entry.category != category || entry.entity_type != entity_type {
                continue;
            }
            if !metadata_matches(&entry.metadata, filter) {
                continue;
            }
            // Records with a different dimension cannot be scored against
            // this query; skip them rather than failing the scan.
            let Ok(score) = cosine_similarity(query, &entry.vector) else {
                continue;
            };
            hits.push(SimilarMatch {
                id: entry.id.clone(),
                score,
                metadata: entry.metadata.clone(),
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).expect("scores are never NaN"));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        self.records.remove(id);
        Ok(())
    }

    async fn list_entity_ids(&self, entity_type: EntityType) -> StoreResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.entity_type == entity_type)
            .map(|entry| entry.entity_id.clone())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(
        entity_id: &str,
        entity_type: EntityType,
        category: Category,
        vector: Vec<f32>,
    ) -> VectorRecord {
        VectorRecord::new(entity_id, entity_type, category, vector, Metadata::new())
    }

    #[tokio::test]
    async fn upsert_same_identity_overwrites() {
        let store = MemoryStore::new();
        let first = record("c-1", EntityType::Candidate, Category::Skills, vec![1.0, 0.0]);
        let created_at = first.created_at;
        store.upsert(first).await.unwrap();
        store
            .upsert(record("c-1", EntityType::Candidate, Category::Skills, vec![0.0, 1.0]))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        let stored = store
            .get("candidate:c-1:skills")
            .await
            .unwrap()
            .expect("record should exist");
        assert_eq!(stored.vector, vec![0.0, 1.0]);
        // Overwrite keeps the original creation time
        assert_eq!(stored.created_at, created_at);
    }

    #[tokio::test]
    async fn get_by_entity_groups_by_category() {
        let store = MemoryStore::new();
        store
            .upsert(record("c-1", EntityType::Candidate, Category::Skills, vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert(record("c-1", EntityType::Candidate, Category::Career, vec![0.0, 1.0]))
            .await
            .unwrap();
        // Same id, different entity type: must not leak into the result
        store
            .upsert(record("c-1", EntityType::Vacancy, Category::Skills, vec![1.0, 0.0]))
            .await
            .unwrap();

        let profile = store
            .get_by_entity("c-1", EntityType::Candidate)
            .await
            .unwrap();
        assert_eq!(profile.len(), 2);
        assert!(profile.contains_key(&Category::Skills));
        assert!(profile.contains_key(&Category::Career));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store
            .upsert(record("c-1", EntityType::Candidate, Category::Skills, vec![1.0]))
            .await
            .unwrap();
        store.delete("candidate:c-1:skills").await.unwrap();
        // Second delete of the same id succeeds quietly
        store.delete("candidate:c-1:skills").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let store = MemoryStore::new();
        store
            .upsert(record("v-1", EntityType::Vacancy, Category::Skills, vec![1.0, 0.0]))
            .await
            .unwrap();
        store
            .upsert(record("v-2", EntityType::Vacancy, Category::Skills, vec![0.0, 1.0]))
            .await
            .unwrap();
        store
            .upsert(record(
                "v-3",
                EntityType::Vacancy,
                Category::Skills,
                vec![0.7071, 0.7071],
            ))
            .await
            .unwrap();

        let hits = store
            .search_similar(&[1.0, 0.0], Category::Skills, EntityType::Vacancy, 2, None)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "vacancy:v-1:skills");
        assert_eq!(hits[1].id, "vacancy:v-3:skills");
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn search_applies_metadata_filter() {
        let store = MemoryStore::new();
        let mut remote = Metadata::new();
        remote.insert("remote".into(), true.into());
        store
            .upsert(VectorRecord::new(
                "v-1",
                EntityType::Vacancy,
                Category::Skills,
                vec![1.0, 0.0],
                remote.clone(),
            ))
            .await
            .unwrap();
        store
            .upsert(record("v-2", EntityType::Vacancy, Category::Skills, vec![1.0, 0.0]))
            .await
            .unwrap();

        let hits = store
            .search_similar(
                &[1.0, 0.0],
                Category::Skills,
                EntityType::Vacancy,
                10,
                Some(&remote),
            )
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "vacancy:v-1:skills");
    }

    #[tokio::test]
    async fn list_entity_ids_is_deduplicated_by_type() {
        let store = MemoryStore::new();
        store
            .upsert(record("v-1", EntityType::Vacancy, Category::Skills, vec![1.0]))
            .await
            .unwrap();
        store
            .upsert(record("v-1", EntityType::Vacancy, Category::Career, vec![1.0]))
            .await
            .unwrap();
        store
            .upsert(record("v-2", EntityType::Vacancy, Category::Skills, vec![1.0]))
            .await
            .unwrap();
        store
            .upsert(record("c-1", EntityType::Candidate, Category::Skills, vec![1.0]))
            .await
            .unwrap();

        let ids = store.list_entity_ids(EntityType::Vacancy).await.unwrap();
        assert_eq!(ids, vec!["v-1".to_string(), "v-2".to_string()]);
    }
}
