//! Postgres-backed vector store using the pgvector extension.
//!
//! The relational variant of the store: one row per record, `ON CONFLICT`
//! upserts keyed by the deterministic id, JSONB containment for metadata
//! filters, and the pgvector `<=>` cosine-distance operator for similarity
//! search. Vectors cross the wire in pgvector's text format and are cast
//! inside the query, which keeps the crate free of a client-side vector
//! type mapping.

use crate::config::PostgresConfig;
use crate::error::{StoreError, StoreResult};
use crate::storage::{SimilarMatch, VectorStore};
use crate::types::{Category, EntityType, Metadata, VectorRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use std::collections::HashMap;

/// Connection pool plus the dimension the schema was created with.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    dimension: usize,
}

impl PostgresStore {
    /// Connects the pool. The schema is ensured later by `init`.
    pub async fn connect(config: &PostgresConfig, dimension: usize) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(StoreError::unavailable)?;
        Ok(Self { pool, dimension })
    }

    /// Wraps an existing pool; used by tests that manage their own database.
    #[must_use]
    pub fn with_pool(pool: PgPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    /// pgvector text representation: `[x1,x2,...]`.
    fn format_vector(vector: &[f32]) -> String {
        let mut out = String::with_capacity(vector.len() * 10 + 2);
        out.push('[');
        for (i, value) in vector.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(&value.to_string());
        }
        out.push(']');
        out
    }

    fn parse_vector(text: &str, id: &str) -> StoreResult<Vec<f32>> {
        let inner = text
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .ok_or_else(|| StoreError::CorruptRecord {
                id: id.to_string(),
                reason: format!("embedding column is not in pgvector text format: {text:.32}"),
            })?;
        if inner.trim().is_empty() {
            return Ok(Vec::new());
        }
        inner
            .split(',')
            .map(|part| {
                part.trim().parse::<f32>().map_err(|e| StoreError::CorruptRecord {
                    id: id.to_string(),
                    reason: format!("bad embedding component '{part}': {e}"),
                })
            })
            .collect()
    }

    fn row_to_record(row: &PgRow) -> StoreResult<VectorRecord> {
        let id: String = row.try_get("id").map_err(StoreError::from)?;
        let corrupt = |reason: String| StoreError::CorruptRecord {
            id: id.clone(),
            reason,
        };

        let entity_type: EntityType = row
            .try_get::<String, _>("entity_type")
            .map_err(StoreError::from)?
            .parse()
            .map_err(|e| corrupt(format!("{e}")))?;
        let category: Category = row
            .try_get::<String, _>("category")
            .map_err(StoreError::from)?
            .parse()
            .map_err(|e| corrupt(format!("{e}")))?;

        let embedding_text: String = row.try_get("embedding").map_err(StoreError::from)?;
        let vector = Self::parse_vector(&embedding_text, &id)?;

        let metadata = match row.try_get::<Value, _>("metadata").map_err(StoreError::from)? {
            Value::Object(map) => map,
            _ => Metadata::new(),
        };

        Ok(VectorRecord {
            entity_id: row.try_get("entity_id").map_err(StoreError::from)?,
            entity_type,
            category,
            vector,
            metadata,
            created_at: row
                .try_get::<DateTime<Utc>, _>("created_at")
                .map_err(StoreError::from)?,
            updated_at: row
                .try_get::<DateTime<Utc>, _>("updated_at")
                .map_err(StoreError::from)?,
            id,
        })
    }
}

#[async_trait]
impl VectorStore for PostgresStore {
    async fn init(&self) -> StoreResult<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS embedding_records (
                id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                entity_type TEXT NOT NULL,
                category TEXT NOT NULL,
                embedding vector({}) NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
            self.dimension
        );
        sqlx::query(&create_table).execute(&self.pool).await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS embedding_records_entity_idx
             ON embedding_records (entity_type, entity_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS embedding_records_slice_idx
             ON embedding_records (entity_type, category)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert(&self, record: VectorRecord) -> StoreResult<()> {
        if record.vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: record.vector.len(),
            });
        }

        // created_at is not part of the conflict update: an overwrite keeps
        // the original creation time.
        sqlx::query(
            "INSERT INTO embedding_records
                 (id, entity_id, entity_type, category, embedding, metadata, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5::vector, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                 entity_id = EXCLUDED.entity_id,
                 entity_type = EXCLUDED.entity_type,
                 category = EXCLUDED.category,
                 embedding = EXCLUDED.embedding,
                 metadata = EXCLUDED.metadata,
                 updated_at = EXCLUDED.updated_at",
        )
        .bind(&record.id)
        .bind(&record.entity_id)
        .bind(record.entity_type.as_str())
        .bind(record.category.as_str())
        .bind(Self::format_vector(&record.vector))
        .bind(Value::Object(record.metadata.clone()))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<VectorRecord>> {
        let row = sqlx::query(
            "SELECT id, entity_id, entity_type, category, embedding::text AS embedding,
                    metadata, created_at, updated_at
             FROM embedding_records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn get_by_entity(
        &self,
        entity_id: &str,
        entity_type: EntityType,
    ) -> StoreResult<HashMap<Category, VectorRecord>> {
        let rows = sqlx::query(
            "SELECT id, entity_id, entity_type, category, embedding::text AS embedding,
                    metadata, created_at, updated_at
             FROM embedding_records WHERE entity_id = $1 AND entity_type = $2",
        )
        .bind(entity_id)
        .bind(entity_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut by_category = HashMap::new();
        for row in &rows {
            let record = Self::row_to_record(row)?;
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
        // `<=>` is cosine distance; similarity = 1 - distance. The JSONB
        // containment operator covers the exact-match metadata filter.
        let rows = sqlx::query(
            "SELECT id, metadata, 1 - (embedding <=> $1::vector) AS score
             FROM embedding_records
             WHERE category = $2
               AND entity_type = $3
               AND metadata @> $4
             ORDER BY embedding <=> $1::vector
             LIMIT $5",
        )
        .bind(Self::format_vector(query))
        .bind(category.as_str())
        .bind(entity_type.as_str())
        .bind(Value::Object(filter.cloned().unwrap_or_default()))
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let metadata = match row.try_get::<Value, _>("metadata")? {
                    Value::Object(map) => map,
                    _ => Metadata::new(),
                };
                Ok(SimilarMatch {
                    id: row.try_get("id")?,
                    score: row.try_get::<f64, _>("score")? as f32,
                    metadata,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM embedding_records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_entity_ids(&self, entity_type: EntityType) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT entity_id FROM embedding_records
             WHERE entity_type = $1 ORDER BY entity_id",
        )
        .bind(entity_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get("entity_id"))
            .collect::<Result<Vec<String>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
