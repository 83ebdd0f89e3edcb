//! CSV-backed catalog.
//!
//! Files in the catalog directory:
//! - `meals.csv`: one row per meal (text fields, nutrition, image reference)
//! - `meal_prices.csv`: one row per meal price, keyed by meal id
//! - `vectors.bin`: embeddings, see `semantic::storage`
//! - `catalog.yaml`: the next meal id to hand out
//!
//! The whole catalog lives in memory as an immutable snapshot. Readers clone
//! the current snapshot and never wait on disk I/O. Writers are serialized by
//! a separate lock: a mutation builds the next snapshot from the current one,
//! commits the files it touched through `StorageManager::commit` and only
//! then swaps the snapshot in. A failed commit leaves memory untouched.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::{
    validate_price, CatalogError, CatalogItem, CatalogStats, CatalogStore, MealFields, Nutrition,
    PriceRecord,
};
use crate::semantic::{
    content_hash, encode_vectors, read_vectors, IndexError, SearchResult, VectorIndex,
    VectorStorageError,
};
use crate::storage::StorageManager;

const MEALS_FILE: &str = "meals.csv";
const PRICES_FILE: &str = "meal_prices.csv";
const VECTORS_FILE: &str = "vectors.bin";
const META_FILE: &str = "catalog.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MealRow {
    id: u64,
    name: String,
    ingredients: String,
    cuisine: Option<String>,
    calories: u32,
    protein: u32,
    carbs: u32,
    fats: u32,
    image_url: Option<String>,
}

impl MealRow {
    fn new(id: u64, meal: MealFields, previous_image: Option<String>) -> Self {
        Self {
            id,
            name: meal.name,
            ingredients: meal.ingredients,
            cuisine: meal.cuisine,
            calories: meal.nutrition.calories,
            protein: meal.nutrition.protein,
            carbs: meal.nutrition.carbs,
            fats: meal.nutrition.fats,
            image_url: meal.image_url.or(previous_image),
        }
    }

    fn content_hash(&self) -> u64 {
        content_hash(&self.name, &self.ingredients, self.cuisine.as_deref())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PriceRow {
    meal_id: u64,
    price: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct CatalogMeta {
    next_id: u64,
}

/// Which files a mutation has to rewrite. `meals` also rewrites `catalog.yaml`.
#[derive(Debug, Clone, Copy)]
struct Files {
    meals: bool,
    prices: bool,
    vectors: bool,
}

const ALL_FILES: Files = Files {
    meals: true,
    prices: true,
    vectors: true,
};

#[derive(Clone)]
struct CatalogState {
    meals: BTreeMap<u64, MealRow>,
    prices: BTreeMap<u64, f64>,
    vectors: VectorIndex,
    next_id: u64,
}

impl CatalogState {
    fn item(&self, row: &MealRow) -> CatalogItem {
        CatalogItem {
            id: row.id,
            name: row.name.clone(),
            ingredients: row.ingredients.clone(),
            cuisine: row.cuisine.clone(),
            nutrition: Nutrition {
                calories: row.calories,
                protein: row.protein,
                carbs: row.carbs,
                fats: row.fats,
            },
            image_url: row.image_url.clone(),
            embedding: self.vectors.get(row.id).map(|entry| entry.embedding.clone()),
        }
    }

    fn row(&self, id: u64) -> Result<&MealRow, CatalogError> {
        self.meals.get(&id).ok_or(CatalogError::NotFound(id))
    }
}

/// Catalog persisted as two CSV files, a vector file and a small metadata file.
pub struct CatalogCsv {
    state: RwLock<Arc<CatalogState>>,
    writer: Mutex<()>,
    storage: Arc<dyn StorageManager>,
    model_id: [u8; 32],
}

impl CatalogCsv {
    /// Load the catalog, creating empty files if there is none yet.
    ///
    /// Embeddings stored for a different model or dimension are discarded,
    /// as are embeddings whose text no longer matches their meal. Those
    /// meals come back without an embedding and are picked up by backfill.
    pub fn load(
        storage: Arc<dyn StorageManager>,
        model_id: [u8; 32],
        dimensions: usize,
    ) -> Result<Self, CatalogError> {
        let now = Instant::now();
        let is_new = !storage.exists(MEALS_FILE);
        let mut needs_save = is_new;

        let meals: BTreeMap<u64, MealRow> = Self::read_csv::<MealRow>(storage.as_ref(), MEALS_FILE)?
            .into_iter()
            .map(|row| (row.id, row))
            .collect();

        let mut prices: BTreeMap<u64, f64> = Self::read_csv::<PriceRow>(storage.as_ref(), PRICES_FILE)?
            .into_iter()
            .map(|row| (row.meal_id, row.price))
            .collect();

        let mut vectors = if storage.exists(VECTORS_FILE) {
            let bytes = storage.read(VECTORS_FILE)?;
            match read_vectors(&mut bytes.as_slice(), &model_id, dimensions) {
                Ok(index) => index,
                Err(err @ VectorStorageError::ModelMismatch)
                | Err(err @ VectorStorageError::DimensionMismatch { .. }) => {
                    log::warn!("{err}; discarding stored embeddings, run backfill to rebuild them");
                    needs_save = true;
                    VectorIndex::new(dimensions)
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            needs_save = true;
            VectorIndex::new(dimensions)
        };

        let before = vectors.len();
        vectors.retain(|id, entry| {
            meals
                .get(&id)
                .is_some_and(|row| row.content_hash() == entry.content_hash)
        });
        if vectors.len() != before {
            log::warn!(
                "dropped {} stale or orphaned embeddings",
                before - vectors.len()
            );
            needs_save = true;
        }

        let orphan_prices = prices.len();
        prices.retain(|id, _| meals.contains_key(id));
        if prices.len() != orphan_prices {
            log::warn!(
                "dropped {} price records without a meal",
                orphan_prices - prices.len()
            );
            needs_save = true;
        }

        for id in meals.keys().filter(|id| !prices.contains_key(id)) {
            log::warn!("meal {id} has no price record");
        }

        // Ids of deleted meals stay retired, even the highest one.
        let first_free = meals.keys().next_back().map(|id| id + 1).unwrap_or(0);
        let next_id = match Self::read_meta(storage.as_ref())? {
            Some(meta) => {
                if meta.next_id < first_free {
                    needs_save = true;
                }
                meta.next_id.max(first_free)
            }
            None => {
                needs_save = true;
                first_free
            }
        };

        let state = CatalogState {
            meals,
            prices,
            vectors,
            next_id,
        };

        if needs_save {
            if is_new {
                log::info!("creating new catalog");
            }
            Self::commit(storage.as_ref(), &model_id, &state, ALL_FILES)?;
        }

        log::debug!(
            "took {}ms to load catalog ({} embeddings)",
            now.elapsed().as_micros() as f64 / 1000.0,
            state.vectors.len()
        );

        Ok(Self {
            state: RwLock::new(Arc::new(state)),
            writer: Mutex::new(()),
            storage,
            model_id,
        })
    }

    /// Version tag of the model the stored embeddings belong to.
    pub fn model_id(&self) -> [u8; 32] {
        self.model_id
    }

    /// Cosine search over committed embeddings.
    pub fn nearest(
        &self,
        query: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        let state = self
            .snapshot()
            .map_err(|_| IndexError::Unavailable("catalog lock poisoned".to_string()))?;
        state.vectors.search(query, threshold, limit)
    }

    fn snapshot(&self) -> Result<Arc<CatalogState>, CatalogError> {
        self.state
            .read()
            .map(|state| Arc::clone(&state))
            .map_err(|_| CatalogError::Poisoned)
    }

    /// Run `f` on a copy of the current state, commit `files` from the copy
    /// and publish it. Nothing is published if `f` or the commit fails.
    fn mutate<T>(
        &self,
        files: Files,
        f: impl FnOnce(&mut CatalogState) -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let _writer = self.writer.lock().map_err(|_| CatalogError::Poisoned)?;

        let mut next = CatalogState::clone(&*self.snapshot()?);
        let value = f(&mut next)?;
        Self::commit(self.storage.as_ref(), &self.model_id, &next, files)?;

        *self.state.write().map_err(|_| CatalogError::Poisoned)? = Arc::new(next);
        Ok(value)
    }

    fn read_meta(storage: &dyn StorageManager) -> Result<Option<CatalogMeta>, CatalogError> {
        if !storage.exists(META_FILE) {
            return Ok(None);
        }

        let bytes = storage.read(META_FILE)?;
        let text = String::from_utf8(bytes).map_err(|e| CatalogError::Meta(e.to_string()))?;
        let meta = serde_yml::from_str(&text).map_err(|e| CatalogError::Meta(e.to_string()))?;
        Ok(Some(meta))
    }

    fn read_csv<T: serde::de::DeserializeOwned>(
        storage: &dyn StorageManager,
        ident: &str,
    ) -> Result<Vec<T>, CatalogError> {
        if !storage.exists(ident) {
            return Ok(vec![]);
        }

        let bytes = storage.read(ident)?;
        let mut reader = csv::Reader::from_reader(bytes.as_slice());
        let rows = reader.deserialize().collect::<Result<Vec<T>, _>>()?;
        Ok(rows)
    }

    fn encode_csv<T: Serialize>(rows: impl Iterator<Item = T>) -> Result<Vec<u8>, CatalogError> {
        let mut writer = csv::Writer::from_writer(vec![]);
        for row in rows {
            writer.serialize(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| CatalogError::Write(e.to_string()))
    }

    fn commit(
        storage: &dyn StorageManager,
        model_id: &[u8; 32],
        state: &CatalogState,
        files: Files,
    ) -> Result<(), CatalogError> {
        let mut out: Vec<(&str, Vec<u8>)> = Vec::with_capacity(4);

        if files.meals {
            out.push((MEALS_FILE, Self::encode_csv(state.meals.values())?));

            let meta = CatalogMeta {
                next_id: state.next_id,
            };
            let meta = serde_yml::to_string(&meta).map_err(|e| CatalogError::Write(e.to_string()))?;
            out.push((META_FILE, meta.into_bytes()));
        }
        if files.prices {
            let rows = state
                .prices
                .iter()
                .map(|(meal_id, price)| PriceRow {
                    meal_id: *meal_id,
                    price: *price,
                });
            out.push((PRICES_FILE, Self::encode_csv(rows)?));
        }
        if files.vectors {
            out.push((VECTORS_FILE, encode_vectors(&state.vectors, model_id)?));
        }

        storage
            .commit(&out)
            .map_err(|e| CatalogError::Write(e.to_string()))
    }
}

impl CatalogStore for CatalogCsv {
    fn list_items(&self) -> Result<Vec<CatalogItem>, CatalogError> {
        let state = self.snapshot()?;
        Ok(state.meals.values().map(|row| state.item(row)).collect())
    }

    fn get_item(&self, id: u64) -> Result<CatalogItem, CatalogError> {
        let state = self.snapshot()?;
        let row = state.row(id)?;
        Ok(state.item(row))
    }

    fn get_price(&self, id: u64) -> Result<PriceRecord, CatalogError> {
        let state = self.snapshot()?;
        state
            .prices
            .get(&id)
            .map(|price| PriceRecord {
                meal_id: id,
                price: *price,
            })
            .ok_or(CatalogError::NotFound(id))
    }

    fn list_items_missing_embedding(&self) -> Result<Vec<CatalogItem>, CatalogError> {
        let state = self.snapshot()?;
        Ok(state
            .meals
            .values()
            .filter(|row| !state.vectors.contains(row.id))
            .map(|row| state.item(row))
            .collect())
    }

    fn write_item(
        &self,
        id: Option<u64>,
        meal: MealFields,
        embedding: Vec<f32>,
        price: f64,
    ) -> Result<CatalogItem, CatalogError> {
        validate_price(price)?;

        self.mutate(ALL_FILES, |state| {
            VectorIndex::validate(state.vectors.dimensions(), &embedding)?;

            let id = match id {
                Some(id) => state.row(id)?.id,
                None => state.next_id,
            };

            let previous_image = state.meals.get(&id).and_then(|row| row.image_url.clone());
            let row = MealRow::new(id, meal, previous_image);

            state.vectors.insert(id, row.content_hash(), embedding)?;
            state.prices.insert(id, price);
            state.next_id = state.next_id.max(id + 1);

            let item = state.item(&row);
            state.meals.insert(id, row);
            Ok(item)
        })
    }

    fn update_embedding_only(
        &self,
        id: u64,
        content_hash: u64,
        embedding: Vec<f32>,
    ) -> Result<(), CatalogError> {
        let files = Files {
            meals: false,
            prices: false,
            vectors: true,
        };
        self.mutate(files, |state| {
            if state.row(id)?.content_hash() != content_hash {
                return Err(CatalogError::Stale(id));
            }
            state.vectors.insert(id, content_hash, embedding)?;
            Ok(())
        })
    }

    fn update_price(&self, id: u64, price: f64) -> Result<PriceRecord, CatalogError> {
        validate_price(price)?;

        let files = Files {
            meals: false,
            prices: true,
            vectors: false,
        };
        self.mutate(files, |state| {
            state.row(id)?;
            state.prices.insert(id, price);
            Ok(PriceRecord { meal_id: id, price })
        })
    }

    fn delete_item(&self, id: u64) -> Result<(), CatalogError> {
        self.mutate(ALL_FILES, |state| {
            state.row(id)?;
            state.prices.remove(&id);
            state.vectors.remove(id);
            state.meals.remove(&id);
            Ok(())
        })
    }

    fn stats(&self) -> Result<CatalogStats, CatalogError> {
        let state = self.snapshot()?;
        let items = state.meals.len();
        let embedded = state.vectors.len();
        Ok(CatalogStats {
            items,
            embedded,
            missing: items.saturating_sub(embedded),
        })
    }
}
