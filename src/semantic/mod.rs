//! Semantic search infrastructure for meal embeddings.
//!
//! Local embedding generation with fastembed-rs and in-memory vector
//! similarity search.
//!
//! # Architecture
//!
//! - `normalize`: Canonical text a meal is embedded from, and its content hash
//! - `embeddings`: `Encoder` trait, fastembed implementation, shared `EncoderService`
//! - `index`: `NearestNeighborIndex` trait and the in-memory cosine index
//! - `storage`: Binary encoding of `vectors.bin`
//! - `backfill`: Batch job that embeds meals missing an embedding
//! - `service`: Query-side search with timeout

mod backfill;
pub mod embeddings;
mod index;
mod normalize;
mod service;
mod storage;

pub use backfill::{BackfillJob, BackfillReport};
pub use embeddings::{model_id_hash, Encoder, EncoderService, EncodingError, FastEmbedEncoder};
pub use index::{IndexError, NearestNeighborIndex, SearchResult, VectorIndex};
pub use normalize::{content_hash, normalize_meal_text};
pub use service::{SearchService, SearchUnavailable};
pub use storage::{encode_vectors, read_vectors, VectorStorageError};

/// Default embedding model name.
pub const DEFAULT_MODEL: &str = "all-mpnet-base-v2";

/// Default minimum similarity for a search match.
pub const DEFAULT_THRESHOLD: f32 = 0.35;

/// Default number of results per search.
pub const DEFAULT_MATCH_COUNT: usize = 10;
