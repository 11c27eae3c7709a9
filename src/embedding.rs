//! Embedding provider contract and implementations.
//!
//! The matching core never generates embeddings itself; it consumes this
//! trait. Providers return unit-normalized vectors of a fixed dimension;
//! downstream cosine scoring trusts that and never re-normalizes.
//!
//! Batch generation is bounded: inputs are split into sub-batches of at
//! most `batch_size` texts per provider round trip, with a pacing pause
//! between round trips to respect upstream rate limits.

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{EmbeddingError, EmbeddingResult};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Generates unit-normalized embedding vectors from text.
///
/// Implementations must be thread-safe; the service calls them from
/// concurrent request handlers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embedding for a single text.
    async fn generate(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Embeddings for multiple texts, one per input, in input order.
    ///
    /// The default implementation slices the input into bounded sub-batches
    /// and paces the round trips; providers with native batch endpoints
    /// only implement `generate_chunk`.
    async fn generate_batch(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for (i, chunk) in texts.chunks(self.batch_size().max(1)).enumerate() {
            if i > 0 && !self.batch_pause().is_zero() {
                tokio::time::sleep(self.batch_pause()).await;
            }
            all.extend(self.generate_chunk(chunk).await?);
        }
        Ok(all)
    }

    /// One provider round trip; input length is already bounded.
    async fn generate_chunk(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Dimension of the vectors this provider produces.
    fn dimension(&self) -> usize;

    /// Maximum texts per round trip.
    fn batch_size(&self) -> usize;

    /// Pause between round trips.
    fn batch_pause(&self) -> Duration;
}

/// Builds the provider selected by the settings.
pub fn from_settings(config: &EmbeddingConfig) -> EmbeddingResult<Arc<dyn EmbeddingProvider>> {
    match config.backend {
        EmbeddingBackend::FastEmbed => Ok(Arc::new(FastEmbedProvider::new(config)?)),
        EmbeddingBackend::Hash => Ok(Arc::new(HashEmbedder::new(config.dimension))),
    }
}

/// Local fastembed implementation (AllMiniLML6V2, 384 dimensions).
///
/// The model output is L2-normalized, satisfying the unit-length contract.
/// fastembed's API is synchronous, so calls run on the blocking pool.
pub struct FastEmbedProvider {
    model: Arc<Mutex<TextEmbedding>>,
    dimension: usize,
    batch_size: usize,
    batch_pause: Duration,
}

impl FastEmbedProvider {
    /// Initializes the local model, downloading it on first use.
    pub fn new(config: &EmbeddingConfig) -> EmbeddingResult<Self> {
        let mut options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false);
        if let Some(cache_dir) = &config.cache_dir {
            options = options.with_cache_dir(cache_dir.clone());
        }

        let model =
            TextEmbedding::try_new(options).map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dimension: config.dimension,
            batch_size: config.batch_size,
            batch_pause: Duration::from_millis(config.batch_pause_ms),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn generate(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        let input = [text.to_string()];
        let mut vectors = self.generate_chunk(&input).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Generation("model returned no embedding".to_string()))
    }

    async fn generate_chunk(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let owned: Vec<String> = texts.to_vec();
        let expected = self.dimension;

        let embeddings = tokio::task::spawn_blocking(move || {
            model
                .lock()
                .map_err(|_| {
                    EmbeddingError::Generation(
                        "embedding model lock poisoned by a panicked thread".to_string(),
                    )
                })?
                .embed(owned, None)
                .map_err(|e| EmbeddingError::Generation(e.to_string()))
        })
        .await
        .map_err(|e| EmbeddingError::Generation(format!("embedding task failed: {e}")))??;

        for embedding in &embeddings {
            if embedding.len() != expected {
                return Err(EmbeddingError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        Ok(embeddings)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn batch_pause(&self) -> Duration {
        self.batch_pause
    }
}

/// Deterministic embedder for tests and offline development.
///
/// Hashes character trigrams into a fixed number of buckets and
/// L2-normalizes the result, so equal texts always produce equal vectors
/// and similar texts land near each other. No model download, no network.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut vector = vec![0.0_f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();
        for window in chars.windows(3) {
            let mut hasher = DefaultHasher::new();
            window.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    async fn generate(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        Ok(self.embed_one(text))
    }

    async fn generate_chunk(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn batch_size(&self) -> usize {
        100
    }

    fn batch_pause(&self) -> Duration {
        Duration::ZERO
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new(32);
        let a = embedder.generate("senior rust engineer").await.unwrap();
        let b = embedder.generate("senior rust engineer").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn hash_embedder_output_is_normalized() {
        let embedder = HashEmbedder::new(64);
        let v = embedder.generate("distributed systems experience").await.unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn different_texts_differ() {
        let embedder = HashEmbedder::new(64);
        let a = embedder.generate("frontend designer with figma").await.unwrap();
        let b = embedder.generate("kernel developer in c").await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn batch_preserves_order_and_length() {
        let embedder = HashEmbedder::new(16);
        let texts: Vec<String> = (0..7).map(|i| format!("text number {i}")).collect();
        let batch = embedder.generate_batch(&texts).await.unwrap();
        assert_eq!(batch.len(), texts.len());
        for (text, vector) in texts.iter().zip(&batch) {
            assert_eq!(*vector, embedder.generate(text).await.unwrap());
        }
    }

    #[tokio::test]
    async fn batch_splits_into_bounded_chunks() {
        // A provider that records chunk sizes to verify the bound
        struct Counting {
            sizes: std::sync::Mutex<Vec<usize>>,
        }

        #[async_trait]
        impl EmbeddingProvider for Counting {
            async fn generate(&self, _text: &str) -> EmbeddingResult<Vec<f32>> {
                Ok(vec![1.0])
            }
            async fn generate_chunk(&self, texts: &[String]) -> EmbeddingResult<Vec<Vec<f32>>> {
                self.sizes.lock().unwrap().push(texts.len());
                Ok(texts.iter().map(|_| vec![1.0]).collect())
            }
            fn dimension(&self) -> usize {
                1
            }
            fn batch_size(&self) -> usize {
                3
            }
            fn batch_pause(&self) -> Duration {
                Duration::ZERO
            }
        }

        let provider = Counting {
            sizes: std::sync::Mutex::new(Vec::new()),
        };
        let texts: Vec<String> = (0..8).map(|i| i.to_string()).collect();
        let out = provider.generate_batch(&texts).await.unwrap();
        assert_eq!(out.len(), 8);
        assert_eq!(*provider.sizes.lock().unwrap(), vec![3, 3, 2]);
    }
}
