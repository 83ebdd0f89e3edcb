use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::app::errors::AppError;
use crate::catalog::{
    validate_price, CatalogItem, CatalogStats, CatalogStore, EmbeddingState, MealFields,
    PriceRecord,
};
use crate::semantic::{BackfillJob, BackfillReport, EncoderService, SearchResult, SearchService};

/// A meal joined with its price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MealListing {
    #[serde(flatten)]
    pub item: CatalogItem,
    /// Absent only for meals loaded from disk without a price row.
    pub price: Option<f64>,
    pub embedding: EmbeddingState,
}

/// A search hit hydrated with the meal and its price.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MealMatch {
    #[serde(flatten)]
    pub meal: MealListing,
    pub score: f32,
}

/// Owns the meal lifecycle.
///
/// Every create and update encodes the meal text first and only then commits
/// text, embedding and price together. If encoding fails nothing is written.
pub struct CatalogService {
    store: Arc<dyn CatalogStore>,
    encoder: Arc<EncoderService>,
    search: SearchService,
    /// In-flight updates per meal id.
    encoding: Mutex<HashMap<u64, usize>>,
}

impl CatalogService {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        encoder: Arc<EncoderService>,
        search: SearchService,
    ) -> Self {
        Self {
            store,
            encoder,
            search,
            encoding: Mutex::new(HashMap::new()),
        }
    }

    pub fn create_meal(&self, meal: MealFields, price: f64) -> Result<MealListing, AppError> {
        Self::validate(&meal, price)?;

        let embedding = self.encoder.encode(&meal.normalized_text())?;
        let item = self.store.write_item(None, meal, embedding, price)?;

        log::info!("created meal {} '{}'", item.id, item.name);

        Ok(self.listing(item, Some(price)))
    }

    /// Replace the text fields of a meal and re-encode it.
    ///
    /// `price: None` keeps the current price.
    pub fn update_meal(
        &self,
        id: u64,
        meal: MealFields,
        price: Option<f64>,
    ) -> Result<MealListing, AppError> {
        self.store.get_item(id)?;

        let price = match price {
            Some(price) => price,
            None => self.store.get_price(id).map(|record| record.price).map_err(|_| {
                AppError::InvalidInput(format!("meal {id} has no price, one must be given"))
            })?,
        };
        Self::validate(&meal, price)?;

        let item = {
            let _encoding = self.mark_encoding(id);
            let embedding = self.encoder.encode(&meal.normalized_text())?;
            self.store.write_item(Some(id), meal, embedding, price)?
        };

        log::info!("updated meal {id}");

        Ok(self.listing(item, Some(price)))
    }

    /// Change a meal's price. Never re-encodes.
    pub fn update_price(&self, id: u64, price: f64) -> Result<PriceRecord, AppError> {
        let record = self.store.update_price(id, price)?;
        log::info!("meal {id} now costs {price}");
        Ok(record)
    }

    pub fn delete_meal(&self, id: u64) -> Result<(), AppError> {
        self.store.delete_item(id)?;
        log::info!("deleted meal {id}");
        Ok(())
    }

    pub fn get_meal(&self, id: u64) -> Result<MealListing, AppError> {
        let item = self.store.get_item(id)?;
        let price = self.store.get_price(id).ok().map(|record| record.price);
        Ok(self.listing(item, price))
    }

    pub fn list_meals(&self) -> Result<Vec<MealListing>, AppError> {
        let items = self.store.list_items()?;
        Ok(items
            .into_iter()
            .map(|item| {
                let price = self.store.get_price(item.id).ok().map(|record| record.price);
                self.listing(item, price)
            })
            .collect())
    }

    /// Search with the configured match count and hydrate the hits, best first.
    pub fn search_meals(&self, query: &str) -> Result<Vec<MealMatch>, AppError> {
        let results = self.search.search(query)?;
        self.hydrate(results)
    }

    pub fn search_meals_with_limit(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MealMatch>, AppError> {
        let results = self.search.search_with_limit(query, limit)?;
        self.hydrate(results)
    }

    /// Hits deleted between the lookup and the hydration are left out.
    fn hydrate(&self, results: Vec<SearchResult>) -> Result<Vec<MealMatch>, AppError> {
        let mut matches = Vec::with_capacity(results.len());
        for result in results {
            match self.get_meal(result.id) {
                Ok(meal) => matches.push(MealMatch {
                    meal,
                    score: result.score,
                }),
                Err(AppError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            }
        }

        Ok(matches)
    }

    pub fn backfill(&self, progress: bool) -> Result<BackfillReport, AppError> {
        let mut job = BackfillJob::new(self.store.clone(), self.encoder.clone());
        if progress {
            job = job.with_progress_bar();
        }
        Ok(job.run()?)
    }

    pub fn stats(&self) -> Result<CatalogStats, AppError> {
        Ok(self.store.stats()?)
    }

    fn validate(meal: &MealFields, price: f64) -> Result<(), AppError> {
        if meal.name.trim().is_empty() {
            return Err(AppError::InvalidInput("meal name must not be empty".to_string()));
        }
        validate_price(price)?;
        Ok(())
    }

    fn listing(&self, item: CatalogItem, price: Option<f64>) -> MealListing {
        let embedding = self.state_of(&item);
        MealListing {
            item,
            price,
            embedding,
        }
    }

    fn state_of(&self, item: &CatalogItem) -> EmbeddingState {
        let encoding = self
            .encoding
            .lock()
            .map(|ids| ids.get(&item.id).is_some_and(|count| *count > 0))
            .unwrap_or(false);

        if encoding {
            EmbeddingState::Encoding
        } else {
            item.embedding_state()
        }
    }

    fn mark_encoding(&self, id: u64) -> EncodingMark<'_> {
        if let Ok(mut ids) = self.encoding.lock() {
            *ids.entry(id).or_insert(0) += 1;
        }
        EncodingMark { service: self, id }
    }
}

/// Clears the `Encoding` state of a meal when its update finishes.
struct EncodingMark<'a> {
    service: &'a CatalogService,
    id: u64,
}

impl Drop for EncodingMark<'_> {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.service.encoding.lock() {
            if let Some(count) = ids.get_mut(&self.id) {
                *count -= 1;
                if *count == 0 {
                    ids.remove(&self.id);
                }
            }
        }
    }
}
