//! Core domain types for the matching engine.
//!
//! Every entity carries up to one embedding vector per category; the four
//! categories are fixed and every scoring structure accounts for all of
//! them. Record identity is a deterministic function of
//! (entity type, entity id, category) so that re-ingestion overwrites
//! instead of accumulating duplicates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Default embedding dimension (all-MiniLM-L6-v2 model).
pub const DEFAULT_DIMENSION: usize = 384;

/// The four semantic facets an entity is embedded under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Skills,
    Career,
    Culture,
    Salary,
}

impl Category {
    /// All categories, in the canonical scoring order.
    pub const ALL: [Category; 4] = [
        Category::Skills,
        Category::Career,
        Category::Culture,
        Category::Salary,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Skills => "skills",
            Category::Career => "career",
            Category::Culture => "culture",
            Category::Salary => "salary",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skills" => Ok(Category::Skills),
            "career" => Ok(Category::Career),
            "culture" => Ok(Category::Culture),
            "salary" => Ok(Category::Salary),
            other => Err(UnknownVariant {
                kind: "category",
                value: other.to_string(),
            }),
        }
    }
}

/// Which side of the match an entity is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Candidate,
    Vacancy,
}

impl EntityType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Candidate => "candidate",
            EntityType::Vacancy => "vacancy",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "candidate" => Ok(EntityType::Candidate),
            "vacancy" => Ok(EntityType::Vacancy),
            other => Err(UnknownVariant {
                kind: "entity type",
                value: other.to_string(),
            }),
        }
    }
}

/// Error for parsing the closed string enums above.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Derives the storage id for a record.
///
/// The id is a pure function of (entity type, entity id, category), never
/// of wall-clock time, so upserting the same logical record twice always
/// targets the same physical row and overwrites it.
#[must_use]
pub fn record_id(entity_type: EntityType, entity_id: &str, category: Category) -> String {
    format!("{entity_type}:{entity_id}:{category}")
}

/// Free-form metadata attached to records and results.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// One stored embedding vector with its identity and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub category: Category,
    /// Unit-length vector produced by the embedding provider. The engine
    /// trusts this and never re-normalizes.
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VectorRecord {
    /// Builds a record with its deterministic id and fresh timestamps.
    #[must_use]
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        category: Category,
        vector: Vec<f32>,
        metadata: Metadata,
    ) -> Self {
        let entity_id = entity_id.into();
        let now = Utc::now();
        Self {
            id: record_id(entity_type, &entity_id, category),
            entity_id,
            entity_type,
            category,
            vector,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Read-time aggregation of one entity's vectors. Never persisted.
#[derive(Debug, Clone)]
pub struct EntityProfile {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub vectors: HashMap<Category, Vec<f32>>,
    /// Metadata merged across the entity's records.
    pub metadata: Metadata,
}

impl EntityProfile {
    /// Assembles a profile from the per-category records of one entity.
    ///
    /// Returns `None` when the entity has no stored vectors at all.
    #[must_use]
    pub fn from_records(
        entity_id: &str,
        entity_type: EntityType,
        records: HashMap<Category, VectorRecord>,
    ) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        let mut vectors = HashMap::with_capacity(records.len());
        let mut metadata = Metadata::new();
        for (category, record) in records {
            metadata.extend(record.metadata);
            vectors.insert(category, record.vector);
        }
        Some(Self {
            entity_id: entity_id.to_string(),
            entity_type,
            vectors,
            metadata,
        })
    }
}

/// Per-category similarity scores for one candidate/vacancy pair.
///
/// Every category is a named field, so a score is structurally present for
/// all four even when the underlying vectors are missing (0.0 in that case).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CategoryScores {
    pub skills: f32,
    pub career: f32,
    pub culture: f32,
    pub salary: f32,
}

impl CategoryScores {
    #[must_use]
    pub fn get(&self, category: Category) -> f32 {
        match category {
            Category::Skills => self.skills,
            Category::Career => self.career,
            Category::Culture => self.culture,
            Category::Salary => self.salary,
        }
    }

    pub fn set(&mut self, category: Category, score: f32) {
        match category {
            Category::Skills => self.skills = score,
            Category::Career => self.career = score,
            Category::Culture => self.culture = score,
            Category::Salary => self.salary = score,
        }
    }

    /// The best single category score, used by the explanation fallback.
    #[must_use]
    pub fn max(&self) -> f32 {
        Category::ALL
            .iter()
            .map(|c| self.get(*c))
            .fold(f32::MIN, f32::max)
    }

    /// Categories with their scores, highest first.
    #[must_use]
    pub fn ranked(&self) -> Vec<(Category, f32)> {
        let mut pairs: Vec<(Category, f32)> =
            Category::ALL.iter().map(|c| (*c, self.get(*c))).collect();
        pairs.sort_by(|a, b| b.1.partial_cmp(&a.1).expect("scores are never NaN"));
        pairs
    }
}
