//! Query-side semantic search.
//!
//! Encodes the query with the shared encoder and hands the vector to a
//! `NearestNeighborIndex`. Results come back in the index's order; nothing is
//! re-ranked here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use crate::semantic::embeddings::{EncoderService, EncodingError};
use crate::semantic::index::{IndexError, NearestNeighborIndex, SearchResult};

/// Errors that make a search fail as a whole. Searches are never retried.
#[derive(Debug, thiserror::Error)]
pub enum SearchUnavailable {
    #[error("query encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    #[error("index lookup failed: {0}")]
    Index(#[from] IndexError),

    #[error("search timed out after {0:?}")]
    TimedOut(Duration),

    #[error("index was built with a different embedding model")]
    ModelMismatch,

    #[error("search worker exited without a result")]
    WorkerLost,
}

pub struct SearchService {
    encoder: Arc<EncoderService>,
    index: Arc<dyn NearestNeighborIndex>,
    match_count: usize,
    timeout: Duration,
}

impl SearchService {
    /// # Arguments
    /// * `match_count` - default number of results per query
    /// * `timeout` - upper bound on encode + lookup for one query
    pub fn new(
        encoder: Arc<EncoderService>,
        index: Arc<dyn NearestNeighborIndex>,
        match_count: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            encoder,
            index,
            match_count,
            timeout,
        }
    }

    pub fn match_count(&self) -> usize {
        self.match_count
    }

    /// Up to `match_count` results, best first.
    pub fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchUnavailable> {
        self.search_with_limit(query, self.match_count)
    }

    pub fn search_with_limit(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<SearchResult>, SearchUnavailable> {
        if let Some(index_model) = self.index.model_id() {
            if index_model != self.encoder.model_id() {
                return Err(SearchUnavailable::ModelMismatch);
            }
        }

        if k == 0 {
            return Ok(vec![]);
        }

        let (tx, rx) = mpsc::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let encoder = self.encoder.clone();
        let index = self.index.clone();
        let query = query.to_string();

        {
            let cancelled = cancelled.clone();
            std::thread::spawn(move || {
                let result = match encoder.encode_unless_cancelled(&query, &cancelled) {
                    Ok(Some(vector)) if !cancelled.load(Ordering::SeqCst) => {
                        index.search(&vector, k).map_err(SearchUnavailable::from)
                    }
                    Ok(_) => {
                        log::debug!("dropping search abandoned by its caller");
                        return;
                    }
                    Err(err) => Err(err.into()),
                };

                // The receiver is gone if the caller already timed out.
                let _ = tx.send(result);
            });
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                // A worker still queued for an encode slot gives up instead of
                // holding it for a result nobody reads.
                cancelled.store(true, Ordering::SeqCst);
                log::warn!("search timed out after {:?}", self.timeout);
                Err(SearchUnavailable::TimedOut(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SearchUnavailable::WorkerLost),
        }
    }
}
