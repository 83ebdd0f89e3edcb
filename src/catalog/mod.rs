//! Meal catalog: item records, their embeddings and their price records.
//!
//! - `CatalogStore`: the persistence boundary every other component talks to
//! - `CatalogCsv`: CSV + `vectors.bin` implementation with staged commits
//! - `CatalogIndex`: nearest-neighbor search over the committed embeddings

mod index;
mod store;

use serde::{Deserialize, Serialize};

use crate::semantic::{content_hash, normalize_meal_text, IndexError, VectorStorageError};

pub use index::CatalogIndex;
pub use store::CatalogCsv;

/// Nutritional attributes of a meal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nutrition {
    pub calories: u32,
    pub protein: u32,
    pub carbs: u32,
    pub fats: u32,
}

/// A committed catalog item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogItem {
    pub id: u64,
    pub name: String,
    pub ingredients: String,
    pub cuisine: Option<String>,
    #[serde(flatten)]
    pub nutrition: Nutrition,
    pub image_url: Option<String>,

    /// Derived from the current name, ingredients and cuisine. Always of the
    /// model's dimension when present.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl CatalogItem {
    pub fn normalized_text(&self) -> String {
        normalize_meal_text(&self.name, &self.ingredients, self.cuisine.as_deref())
    }

    pub fn content_hash(&self) -> u64 {
        content_hash(&self.name, &self.ingredients, self.cuisine.as_deref())
    }

    pub fn embedding_state(&self) -> EmbeddingState {
        if self.embedding.is_some() {
            EmbeddingState::Present
        } else {
            EmbeddingState::Missing
        }
    }
}

/// The text and attributes a caller supplies when writing a meal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MealFields {
    pub name: String,
    pub ingredients: String,
    #[serde(default)]
    pub cuisine: Option<String>,
    #[serde(default)]
    pub nutrition: Nutrition,

    /// On update, `None` keeps the stored image reference.
    #[serde(default)]
    pub image_url: Option<String>,
}

impl MealFields {
    pub fn normalized_text(&self) -> String {
        normalize_meal_text(&self.name, &self.ingredients, self.cuisine.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub meal_id: u64,
    pub price: f64,
}

/// Where an item's embedding is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingState {
    Missing,
    /// A create or update of the item is being encoded.
    Encoding,
    Present,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub items: usize,
    pub embedded: usize,
    pub missing: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("meal {0} not found")]
    NotFound(u64),

    #[error("catalog write failed: {0}")]
    Write(String),

    #[error("embedding for meal {0} was computed from text that has since changed")]
    Stale(u64),

    #[error("invalid embedding: {0}")]
    InvalidEmbedding(#[from] IndexError),

    #[error("invalid price: {0}")]
    InvalidPrice(f64),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("vector file error: {0}")]
    Vectors(#[from] VectorStorageError),

    #[error("catalog metadata is malformed: {0}")]
    Meta(String),

    #[error("catalog lock poisoned")]
    Poisoned,
}

/// Persistence boundary for meals, embeddings and prices.
///
/// Every mutating call either commits completely or leaves the previously
/// committed state untouched. Concurrent writes to the same meal are
/// last-write-wins.
pub trait CatalogStore: Send + Sync {
    fn list_items(&self) -> Result<Vec<CatalogItem>, CatalogError>;

    fn get_item(&self, id: u64) -> Result<CatalogItem, CatalogError>;

    fn get_price(&self, id: u64) -> Result<PriceRecord, CatalogError>;

    /// Items whose embedding is null.
    fn list_items_missing_embedding(&self) -> Result<Vec<CatalogItem>, CatalogError>;

    /// Persist text fields, embedding and price as one unit.
    ///
    /// `id: None` creates a new meal; `Some(id)` replaces an existing one and
    /// fails with `NotFound` if it does not exist.
    fn write_item(
        &self,
        id: Option<u64>,
        meal: MealFields,
        embedding: Vec<f32>,
        price: f64,
    ) -> Result<CatalogItem, CatalogError>;

    /// Write only the embedding column.
    ///
    /// `content_hash` identifies the text the embedding was computed from;
    /// if the meal's text has changed since, nothing is written and `Stale`
    /// is returned.
    fn update_embedding_only(
        &self,
        id: u64,
        content_hash: u64,
        embedding: Vec<f32>,
    ) -> Result<(), CatalogError>;

    /// Change the price without touching text or embedding.
    fn update_price(&self, id: u64, price: f64) -> Result<PriceRecord, CatalogError>;

    /// Remove the meal and its price record as one unit.
    fn delete_item(&self, id: u64) -> Result<(), CatalogError>;

    fn stats(&self) -> Result<CatalogStats, CatalogError>;
}

pub(crate) fn validate_price(price: f64) -> Result<(), CatalogError> {
    if price.is_finite() && price >= 0.0 {
        Ok(())
    } else {
        Err(CatalogError::InvalidPrice(price))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> CatalogItem {
        CatalogItem {
            id: 7,
            name: "Falafel Wrap".to_string(),
            ingredients: "chickpeas, tahini".to_string(),
            cuisine: Some("Levantine".to_string()),
            nutrition: Nutrition {
                calories: 540,
                protein: 18,
                carbs: 60,
                fats: 22,
            },
            image_url: None,
            embedding: None,
        }
    }

    #[test]
    fn test_item_text_matches_fields_text() {
        let item = item();
        let fields = MealFields {
            name: item.name.clone(),
            ingredients: item.ingredients.clone(),
            cuisine: item.cuisine.clone(),
            ..Default::default()
        };
        assert_eq!(item.normalized_text(), fields.normalized_text());
    }

    #[test]
    fn test_embedding_state() {
        let mut item = item();
        assert_eq!(item.embedding_state(), EmbeddingState::Missing);
        item.embedding = Some(vec![1.0]);
        assert_eq!(item.embedding_state(), EmbeddingState::Present);
    }

    #[test]
    fn test_item_json_flattens_nutrition_and_hides_embedding() {
        let mut item = item();
        item.embedding = Some(vec![0.5; 4]);

        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["calories"], 540);
        assert_eq!(json["cuisine"], "Levantine");
        assert!(json.get("embedding").is_none());
        assert!(json.get("nutrition").is_none());
    }

    #[test]
    fn test_validate_price() {
        assert!(validate_price(0.0).is_ok());
        assert!(validate_price(12.5).is_ok());
        assert!(matches!(validate_price(-1.0), Err(CatalogError::InvalidPrice(_))));
        assert!(matches!(validate_price(f64::NAN), Err(CatalogError::InvalidPrice(_))));
    }
}
