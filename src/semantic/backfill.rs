//! Batch job that embeds every catalog item still missing an embedding.
//!
//! Each item commits on its own, so an interrupted run leaves a valid,
//! partially backfilled catalog and the next run picks up where it stopped.

use std::sync::Arc;
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::catalog::{CatalogError, CatalogItem, CatalogStore};
use crate::semantic::embeddings::EncoderService;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    pub succeeded: usize,
    pub failed: usize,
    /// Items whose text changed while they were being encoded.
    pub skipped: usize,
}

pub struct BackfillJob {
    store: Arc<dyn CatalogStore>,
    encoder: Arc<EncoderService>,
    progress: ProgressBar,
}

impl BackfillJob {
    pub fn new(store: Arc<dyn CatalogStore>, encoder: Arc<EncoderService>) -> Self {
        Self {
            store,
            encoder,
            progress: ProgressBar::hidden(),
        }
    }

    /// Draw a progress bar on stderr while running.
    pub fn with_progress_bar(mut self) -> Self {
        let progress = ProgressBar::new(0);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")
        {
            progress.set_style(style.progress_chars("=> "));
        }
        self.progress = progress;
        self
    }

    /// Encode and store an embedding for every item that lacks one.
    ///
    /// Never fails as a whole: per-item failures are logged and counted.
    /// Only a failure to list the missing items is reported as an error.
    pub fn run(&self) -> Result<BackfillReport, CatalogError> {
        let now = Instant::now();
        let items = self.store.list_items_missing_embedding()?;
        let mut report = BackfillReport::default();

        if items.is_empty() {
            log::info!("backfill: nothing to do");
            return Ok(report);
        }

        log::info!(
            "backfill: encoding {} items with '{}'",
            items.len(),
            self.encoder.name()
        );
        self.progress.set_length(items.len() as u64);

        for item in items {
            self.progress.set_message(item.name.clone());

            match self.backfill_item(&item) {
                Ok(()) => report.succeeded += 1,
                Err(BackfillItemError::Stale) => {
                    log::info!("backfill: meal {} changed while encoding, skipped", item.id);
                    report.skipped += 1;
                }
                Err(BackfillItemError::Failed(err)) => {
                    log::warn!("backfill: meal {} failed: {err}", item.id);
                    report.failed += 1;
                }
            }

            self.progress.inc(1);
        }

        self.progress.finish_and_clear();

        log::info!(
            "backfill: {} succeeded, {} failed, {} skipped in {}ms",
            report.succeeded,
            report.failed,
            report.skipped,
            now.elapsed().as_millis()
        );

        Ok(report)
    }

    fn backfill_item(&self, item: &CatalogItem) -> Result<(), BackfillItemError> {
        let embedding = self
            .encoder
            .encode(&item.normalized_text())
            .map_err(|e| BackfillItemError::Failed(e.to_string()))?;

        match self
            .store
            .update_embedding_only(item.id, item.content_hash(), embedding)
        {
            Ok(()) => Ok(()),
            // Deleted or rewritten since it was listed; the writer stored its own embedding.
            Err(CatalogError::Stale(_)) | Err(CatalogError::NotFound(_)) => {
                Err(BackfillItemError::Stale)
            }
            Err(err) => Err(BackfillItemError::Failed(err.to_string())),
        }
    }
}

enum BackfillItemError {
    Stale,
    Failed(String),
}
