//! Match weight vector and its process-wide holder.
//!
//! Weights are validated and normalized in a single whole-vector pass: the
//! sum of the four raw components is computed once up front and each
//! component is divided by it. An incremental per-field recomputation is
//! order-dependent and deliberately not used here.
//!
//! The engine reads weights through the [`WeightProvider`] trait and takes
//! exactly one snapshot per call, so an update landing mid-computation
//! never changes that call's results.

use crate::error::{EngineError, EngineResult};
use crate::types::Category;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Tolerance for the weights-sum-to-one invariant after normalization.
pub const WEIGHT_SUM_EPSILON: f64 = 1e-9;

/// One non-negative weight per category.
///
/// Weights are f64 so the sum-to-one invariant holds within
/// [`WEIGHT_SUM_EPSILON`]; similarity scores stay f32 like the embedding
/// vectors they come from. Values are `Copy`, so every read hands out an
/// independent copy rather than a shared reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchWeights {
    pub skills: f64,
    pub career: f64,
    pub culture: f64,
    pub salary: f64,
}

impl Default for MatchWeights {
    fn default() -> Self {
        Self {
            skills: 0.4,
            career: 0.3,
            culture: 0.2,
            salary: 0.1,
        }
    }
}

impl MatchWeights {
    #[must_use]
    pub fn new(skills: f64, career: f64, culture: f64, salary: f64) -> Self {
        Self {
            skills,
            career,
            culture,
            salary,
        }
    }

    #[must_use]
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Skills => self.skills,
            Category::Career => self.career,
            Category::Culture => self.culture,
            Category::Salary => self.salary,
        }
    }

    /// Validates the raw components and returns the normalized vector.
    ///
    /// Each component must be within [0, 1]. The sum of the four raw
    /// components is computed once and each component divided by it, one
    /// coherent pass over the whole vector. Fails when the sum is
    /// zero, since no meaningful ranking can come out of all-zero weights.
    pub fn normalized(&self) -> EngineResult<Self> {
        for category in Category::ALL {
            let value = self.get(category);
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EngineError::InvalidWeights {
                    reason: format!("weight '{category}' must be within [0, 1], got {value}"),
                });
            }
        }

        let sum = self.skills + self.career + self.culture + self.salary;
        if sum == 0.0 {
            return Err(EngineError::InvalidWeights {
                reason: "weights sum to zero; at least one category must carry weight".to_string(),
            });
        }

        Ok(Self {
            skills: self.skills / sum,
            career: self.career / sum,
            culture: self.culture / sum,
            salary: self.salary / sum,
        })
    }

    /// Sum of the four components.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.skills + self.career + self.culture + self.salary
    }
}

/// Read side of the weight state, injected into the engine.
///
/// Implementations return immutable snapshots; the engine never holds a
/// reference into shared weight state.
pub trait WeightProvider: Send + Sync {
    /// An independent copy of the current normalized weights.
    fn snapshot(&self) -> MatchWeights;
}

/// Process-wide holder of the current weight vector.
///
/// `update` replaces the held vector atomically as a whole under an
/// exclusive lock, never field-by-field, so concurrent readers cannot
/// observe a half-updated vector.
#[derive(Debug)]
pub struct WeightManager {
    current: RwLock<MatchWeights>,
}

impl Default for WeightManager {
    fn default() -> Self {
        Self::new(MatchWeights::default())
    }
}

impl WeightManager {
    /// Creates a manager holding the given initial weights, normalized.
    ///
    /// Panics only if the built-in defaults are invalid, which would be a
    /// programming error; use [`WeightManager::try_new`] for caller input.
    #[must_use]
    pub fn new(initial: MatchWeights) -> Self {
        Self {
            current: RwLock::new(
                initial
                    .normalized()
                    .expect("initial weights must be valid"),
            ),
        }
    }

    /// Fallible constructor for caller-supplied initial weights.
    pub fn try_new(initial: MatchWeights) -> EngineResult<Self> {
        Ok(Self {
            current: RwLock::new(initial.normalized()?),
        })
    }

    /// Validates, normalizes, and atomically replaces the held vector.
    ///
    /// Returns the normalized weights now in effect.
    pub fn update(&self, new_weights: MatchWeights) -> EngineResult<MatchWeights> {
        let normalized = new_weights.normalized()?;
        *self.current.write() = normalized;
        Ok(normalized)
    }

    /// An independent copy of the held vector.
    #[must_use]
    pub fn current(&self) -> MatchWeights {
        *self.current.read()
    }
}

impl WeightProvider for WeightManager {
    fn snapshot(&self) -> MatchWeights {
        self.current()
    }
}
