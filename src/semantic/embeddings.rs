//! Embedding model wrapper for fastembed.
//!
//! Provides a high-level interface for generating embeddings:
//! - `Encoder` trait so the model can be swapped out (tests use a mock)
//! - `FastEmbedEncoder`, loaded once at startup with a configurable cache directory
//! - `EncoderService`, the shared handle every component receives

use fastembed::{InitOptions, TextEmbedding};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Model returned {got} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Embedding model unavailable: {0}")]
    Unavailable(String),
}

/// A text embedding model.
///
/// `encode` must be deterministic for a fixed model and input.
pub trait Encoder: Send + Sync {
    /// Canonical model name, also the source of the model version tag.
    fn name(&self) -> &str;

    /// Fixed output dimension D.
    fn dimensions(&self) -> usize;

    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodingError>;

    /// SHA256 of the model name. Stored with persisted vectors so that vectors
    /// from another model are never compared with this one's.
    fn model_id(&self) -> [u8; 32] {
        model_id_hash(self.name())
    }
}

pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    Sha256::digest(model_name.as_bytes()).into()
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct FastEmbedEncoder {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl FastEmbedEncoder {
    /// Load the model with the given name.
    ///
    /// The model is downloaded on first use if not cached.
    /// Models are cached in the `models/` subdirectory of `cache_dir`.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EncodingError> {
        let (model_enum, canonical_name) = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EncodingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        // Loading blocks on the download when the model is not cached yet.
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(TextEmbedding::try_new(options));
        });

        let mut model = match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(|e| EncodingError::InitFailed(e.to_string()))?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(EncodingError::DownloadTimeout(timeout.as_secs()))
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(EncodingError::InitFailed(
                    "model loader thread exited".to_string(),
                ))
            }
        };

        let dimensions = Self::probe_dimensions(&mut model)?;

        log::info!("loaded embedding model '{canonical_name}' ({dimensions} dimensions)");

        Ok(Self {
            model: Mutex::new(model),
            model_name: canonical_name.to_string(),
            dimensions,
        })
    }

    /// Parse model name string to fastembed enum and the canonical spelling
    /// of the name. Case and aliases do not change the canonical name.
    fn parse_model_name(
        name: &str,
    ) -> Result<(fastembed::EmbeddingModel, &'static str), EncodingError> {
        use fastembed::EmbeddingModel as Model;

        let model = match name.to_lowercase().as_str() {
            "all-mpnet-base-v2" | "allmpnetbasev2" => (Model::AllMpnetBaseV2, "all-mpnet-base-v2"),
            "all-minilm-l6-v2" | "allminiml6v2" => (Model::AllMiniLML6V2, "all-minilm-l6-v2"),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => (Model::AllMiniLML6V2Q, "all-minilm-l6-v2-q"),
            "bge-small-en-v1.5" | "bgesmallenv15" => (Model::BGESmallENV15, "bge-small-en-v1.5"),
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                (Model::BGESmallENV15Q, "bge-small-en-v1.5-q")
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => (Model::BGEBaseENV15, "bge-base-en-v1.5"),
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => (Model::BGEBaseENV15Q, "bge-base-en-v1.5-q"),
            "bge-large-en-v1.5" | "bgelargeenv15" => (Model::BGELargeENV15, "bge-large-en-v1.5"),
            "bge-large-en-v1.5-q" | "bgelargeenv15q" => {
                (Model::BGELargeENV15Q, "bge-large-en-v1.5-q")
            }
            _ => {
                return Err(EncodingError::InvalidModel(format!(
                    "Unknown model: {}. Supported models: all-mpnet-base-v2, all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5 (add -q suffix for quantized)",
                    name
                )))
            }
        };

        Ok(model)
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EncodingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EncodingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EncodingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Encoder for FastEmbedEncoder {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        let mut model = self.model.lock().map_err(|e| {
            EncodingError::Unavailable(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EncodingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EncodingError::EmbeddingFailed("No embedding returned".to_string()))
    }
}

/// Process-wide encoder handle.
///
/// Built once at startup and passed as `Arc<EncoderService>` to the catalog
/// service, the backfill job and the search service. Limits how many encode
/// calls run at once and rejects output of the wrong dimension.
pub struct EncoderService {
    encoder: Arc<dyn Encoder>,
    slots: Mutex<usize>,
    slot_freed: Condvar,
}

impl EncoderService {
    pub fn new(encoder: Arc<dyn Encoder>, max_concurrent: usize) -> Self {
        Self {
            encoder,
            slots: Mutex::new(max_concurrent.max(1)),
            slot_freed: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        self.encoder.name()
    }

    pub fn dimensions(&self) -> usize {
        self.encoder.dimensions()
    }

    pub fn model_id(&self) -> [u8; 32] {
        self.encoder.model_id()
    }

    /// Encode `text`, blocking while all inference slots are busy.
    pub fn encode(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        let _slot = self.acquire_slot()?;
        self.encode_in_slot(text)
    }

    /// Like `encode`, but returns `Ok(None)` without running the model if
    /// `cancelled` is set by the time a slot frees up.
    pub fn encode_unless_cancelled(
        &self,
        text: &str,
        cancelled: &AtomicBool,
    ) -> Result<Option<Vec<f32>>, EncodingError> {
        let _slot = self.acquire_slot()?;
        if cancelled.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.encode_in_slot(text).map(Some)
    }

    fn encode_in_slot(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        let embedding = self.encoder.encode(text)?;
        let expected = self.encoder.dimensions();
        if embedding.len() != expected {
            return Err(EncodingError::DimensionMismatch {
                expected,
                got: embedding.len(),
            });
        }

        Ok(embedding)
    }

    fn acquire_slot(&self) -> Result<SlotGuard<'_>, EncodingError> {
        let poisoned = |e: String| EncodingError::Unavailable(format!("Encoder slots poisoned: {e}"));

        let mut free = self.slots.lock().map_err(|e| poisoned(e.to_string()))?;
        while *free == 0 {
            free = self
                .slot_freed
                .wait(free)
                .map_err(|e| poisoned(e.to_string()))?;
        }
        *free -= 1;

        Ok(SlotGuard { service: self })
    }
}

struct SlotGuard<'a> {
    service: &'a EncoderService,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut free) = self.service.slots.lock() {
            *free += 1;
        }
        self.service.slot_freed.notify_one();
    }
}
