//! Qdrant-backed vector store.
//!
//! Speaks the Qdrant REST API directly: point upserts, filtered scroll for
//! entity-scoped retrieval, and the native search endpoint for similarity.
//! Qdrant point ids must be UUIDs, so the deterministic record id string is
//! mapped through UUIDv5. The mapping is itself deterministic, which keeps
//! the overwrite-on-reingest invariant.

use crate::config::QdrantConfig;
use crate::error::{StoreError, StoreResult};
use crate::storage::{SimilarMatch, VectorStore};
use crate::types::{Category, EntityType, Metadata, VectorRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Scroll page size when enumerating entity ids.
const SCROLL_PAGE_SIZE: usize = 256;

/// REST client for one Qdrant collection.
pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    dimension: usize,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ScrollResult {
    points: Vec<PointPayload>,
    #[serde(default)]
    next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct PointPayload {
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    vector: Option<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    score: f32,
    #[serde(default)]
    payload: Option<Value>,
}

impl QdrantStore {
    /// Builds the client from settings. Fails only on malformed settings
    /// (e.g. an API key that cannot become a header value); the service
    /// itself is first contacted in `init`.
    pub fn new(config: &QdrantConfig, dimension: usize) -> StoreResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(api_key) = &config.api_key {
            let value = reqwest::header::HeaderValue::from_str(api_key)
                .map_err(|e| StoreError::backend("configure", e))?;
            headers.insert("api-key", value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::backend("configure", e))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            dimension,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    /// Deterministic Qdrant point id for a record id.
    fn point_id(record_id: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, record_id.as_bytes()).to_string()
    }

    /// Filter clauses shared by entity-scoped queries.
    fn entity_filter(entity_id: Option<&str>, entity_type: EntityType) -> Vec<Value> {
        let mut must = vec![json!({"key": "entity_type", "match": {"value": entity_type.as_str()}})];
        if let Some(id) = entity_id {
            must.push(json!({"key": "entity_id", "match": {"value": id}}));
        }
        must
    }

    fn record_payload(record: &VectorRecord) -> Value {
        json!({
            "record_id": record.id,
            "entity_id": record.entity_id,
            "entity_type": record.entity_type.as_str(),
            "category": record.category.as_str(),
            "created_at": record.created_at.to_rfc3339(),
            "updated_at": record.updated_at.to_rfc3339(),
            "meta": Value::Object(record.metadata.clone()),
        })
    }

    fn parse_record(payload: &Value, vector: Option<Vec<f32>>) -> StoreResult<VectorRecord> {
        let field = |name: &str| -> StoreResult<&str> {
            payload
                .get(name)
                .and_then(Value::as_str)
                .ok_or_else(|| StoreError::CorruptRecord {
                    id: payload
                        .get("record_id")
                        .and_then(Value::as_str)
                        .unwrap_or("<unknown>")
                        .to_string(),
                    reason: format!("payload field '{name}' missing or not a string"),
                })
        };

        let id = field("record_id")?.to_string();
        let corrupt = |reason: String| StoreError::CorruptRecord {
            id: id.clone(),
            reason,
        };

        let entity_type: EntityType = field("entity_type")?
            .parse()
            .map_err(|e| corrupt(format!("{e}")))?;
        let category: Category = field("category")?
            .parse()
            .map_err(|e| corrupt(format!("{e}")))?;
        let parse_time = |name: &str| -> StoreResult<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(field(name)?)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad {name} timestamp: {e}")))
        };

        let metadata = match payload.get("meta") {
            Some(Value::Object(map)) => map.clone(),
            _ => Metadata::new(),
        };

        Ok(VectorRecord {
            entity_id: field("entity_id")?.to_string(),
            entity_type,
            category,
            vector: vector.ok_or_else(|| corrupt("point returned without vector".to_string()))?,
            metadata,
            created_at: parse_time("created_at")?,
            updated_at: parse_time("updated_at")?,
            id,
        })
    }

    async fn read_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        operation: &str,
    ) -> StoreResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::SERVICE_UNAVAILABLE {
                return Err(StoreError::unavailable(format!("{operation}: {body}")));
            }
            return Err(StoreError::backend(operation, format!("{status}: {body}")));
        }
        let parsed: ApiResponse<T> = response.json().await?;
        Ok(parsed.result)
    }

    /// Fetches a point's payload+vector by Qdrant point id.
    async fn fetch_point(&self, point_id: &str) -> StoreResult<Option<PointPayload>> {
        let body = json!({
            "ids": [point_id],
            "with_payload": true,
            "with_vector": true,
        });
        let response = self
            .client
            .post(self.collection_url("/points"))
            .json(&body)
            .send()
            .await?;
        let mut points: Vec<PointPayload> = Self::read_response(response, "fetch point").await?;
        Ok(if points.is_empty() {
            None
        } else {
            Some(points.remove(0))
        })
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn init(&self) -> StoreResult<()> {
        // Existence check first: creating an existing collection would fail
        let response = self
            .client
            .get(self.collection_url(""))
            .send()
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        if response.status() != StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::unavailable(format!("collection check: {body}")));
        }

        let body = json!({
            "vectors": {"size": self.dimension, "distance": "Cosine"},
        });
        let response = self
            .client
            .put(self.collection_url(""))
            .json(&body)
            .send()
            .await?;
        Self::read_response::<Value>(response, "create collection").await?;
        tracing::info!(collection = %self.collection, "created qdrant collection");
        Ok(())
    }

    async fn upsert(&self, mut record: VectorRecord) -> StoreResult<()> {
        if record.vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: record.vector.len(),
            });
        }

        let point_id = Self::point_id(&record.id);

        // A point upsert replaces the whole payload, so carry over the
        // original creation time of any record being overwritten.
        if let Some(existing) = self.fetch_point(&point_id).await?
            && let Some(payload) = existing.payload
            && let Some(created) = payload.get("created_at").and_then(Value::as_str)
            && let Ok(created) = DateTime::parse_from_rfc3339(created)
        {
            record.created_at = created.with_timezone(&Utc);
        }

        let body = json!({
            "points": [{
                "id": point_id,
                "vector": record.vector,
                "payload": Self::record_payload(&record),
            }],
        });
        let response = self
            .client
            .put(format!("{}?wait=true", self.collection_url("/points")))
            .json(&body)
            .send()
            .await?;
        Self::read_response::<Value>(response, "upsert").await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<VectorRecord>> {
        match self.fetch_point(&Self::point_id(id)).await? {
            None => Ok(None),
            Some(point) => {
                let payload = point.payload.ok_or_else(|| StoreError::CorruptRecord {
                    id: id.to_string(),
                    reason: "point has no payload".to_string(),
                })?;
                Ok(Some(Self::parse_record(&payload, point.vector)?))
            }
        }
    }

    async fn get_by_entity(
        &self,
        entity_id: &str,
        entity_type: EntityType,
    ) -> StoreResult<HashMap<Category, VectorRecord>> {
        let body = json!({
            "filter": {"must": Self::entity_filter(Some(entity_id), entity_type)},
            "with_payload": true,
            "with_vector": true,
            // One point per category is the storage invariant; a small
            // page still surfaces any legacy duplicates for the overwrite
            // in the map below.
            "limit": 16,
        });
        let response = self
            .client
            .post(self.collection_url("/points/scroll"))
            .json(&body)
            .send()
            .await?;
        let scroll: ScrollResult = Self::read_response(response, "scroll entity").await?;

        let mut by_category = HashMap::new();
        for point in scroll.points {
            let Some(payload) = point.payload else {
                continue;
            };
            let record = Self::parse_record(&payload, point.vector)?;
            by_category.insert(record.category, record);
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
        let mut must = Self::entity_filter(None, entity_type);
        must.push(json!({"key": "category", "match": {"value": category.as_str()}}));
        if let Some(conditions) = filter {
            for (key, value) in conditions {
                must.push(json!({"key": format!("meta.{key}"), "match": {"value": value}}));
            }
        }

        let body = json!({
            "vector": query,
            "limit": top_k,
            "filter": {"must": must},
            "with_payload": true,
        });
        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&body)
            .send()
            .await?;
        let hits: Vec<SearchHit> = Self::read_response(response, "search").await?;

        Ok(hits
            .into_iter()
            .filter_map(|hit| {
                let payload = hit.payload?;
                let id = payload.get("record_id")?.as_str()?.to_string();
                let metadata = match payload.get("meta") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Metadata::new(),
                };
                Some(SimilarMatch {
                    id,
                    score: hit.score,
                    metadata,
                })
            })
            .collect())
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let body = json!({"points": [Self::point_id(id)]});
        let response = self
            .client
            .post(format!("{}?wait=true", self.collection_url("/points/delete")))
            .json(&body)
            .send()
            .await?;
        Self::read_response::<Value>(response, "delete").await?;
        Ok(())
    }

    async fn list_entity_ids(&self, entity_type: EntityType) -> StoreResult<Vec<String>> {
        let mut ids = Vec::new();
        let mut offset: Option<Value> = None;

        loop {
            let mut body = json!({
                "filter": {"must": Self::entity_filter(None, entity_type)},
                "with_payload": {"include": ["entity_id"]},
                "with_vector": false,
                "limit": SCROLL_PAGE_SIZE,
            });
            if let Some(offset) = &offset {
                body["offset"] = offset.clone();
            }

            let response = self
                .client
                .post(self.collection_url("/points/scroll"))
                .json(&body)
                .send()
                .await?;
            let scroll: ScrollResult = Self::read_response(response, "scroll ids").await?;

            for point in scroll.points {
                if let Some(entity_id) = point
                    .payload
                    .as_ref()
                    .and_then(|p| p.get("entity_id"))
                    .and_then(Value::as_str)
                {
                    ids.push(entity_id.to_string());
                }
            }

            match scroll.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn ping(&self) -> StoreResult<()> {
        let response = self.client.get(format!("{}/healthz", self.base_url)).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(StoreError::unavailable(format!(
                "qdrant health endpoint returned {}",
                response.status()
            )))
        }
    }
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore")
            .field("base_url", &self.base_url)
            .field("collection", &self.collection)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_deterministic() {
        let a = QdrantStore::point_id("candidate:c-1:skills");
        let b = QdrantStore::point_id("candidate:c-1:skills");
        assert_eq!(a, b);
        assert_ne!(a, QdrantStore::point_id("candidate:c-1:career"));
        // Valid UUID, as Qdrant requires
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn payload_roundtrip() {
        let mut metadata = Metadata::new();
        metadata.insert("city".into(), "Osaka".into());
        let record = VectorRecord::new(
            "c-1",
            EntityType::Candidate,
            Category::Skills,
            vec![0.0; 4],
            metadata,
        );

        let payload = QdrantStore::record_payload(&record);
        let parsed = QdrantStore::parse_record(&payload, Some(record.vector.clone())).unwrap();
        assert_eq!(parsed.id, record.id);
        assert_eq!(parsed.entity_id, "c-1");
        assert_eq!(parsed.entity_type, EntityType::Candidate);
        assert_eq!(parsed.category, Category::Skills);
        assert_eq!(parsed.metadata.get("city").unwrap(), "Osaka");
        assert_eq!(parsed.created_at, record.created_at);
    }

    #[test]
    fn parse_record_rejects_missing_fields() {
        let payload = json!({"record_id": "x", "entity_id": "c-1"});
        let err = QdrantStore::parse_record(&payload, Some(vec![0.0])).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { .. }));
    }
}
