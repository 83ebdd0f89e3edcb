use std::path::Path;
use std::sync::Arc;

use crate::catalog::{
    CatalogCsv, CatalogError, CatalogItem, CatalogStats, CatalogStore, MealFields, PriceRecord,
};
use crate::config::SemanticSearchConfig;
use crate::semantic::{BackfillJob, BackfillReport, EncoderService};
use crate::storage::BackendLocal;
use crate::tests::support::{meal, open_service, FlakyStorage, HashingEncoder, HASHING_DIMS};

const MEALS_CSV: &str = "id,name,ingredients,cuisine,calories,protein,carbs,fats,image_url
0,Spicy Grilled Chicken,\"chili, garlic\",Mexican,520,40,10,18,
1,Vegetable Curry,\"potato, peas, coconut milk\",Indian,430,9,55,16,
2,Chocolate Cake,\"cocoa, sugar, flour\",,610,7,80,28,cake.png
";

const PRICES_CSV: &str = "meal_id,price
0,12.5
1,9.0
2,6.25
";

/// A catalog directory with three meals and no embeddings.
fn seed_catalog(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("meals.csv"), MEALS_CSV).unwrap();
    std::fs::write(dir.join("meal_prices.csv"), PRICES_CSV).unwrap();
}

fn open_catalog(dir: &Path, encoder: &EncoderService) -> Arc<CatalogCsv> {
    let storage = Arc::new(BackendLocal::new(dir).unwrap());
    Arc::new(CatalogCsv::load(storage, encoder.model_id(), encoder.dimensions()).unwrap())
}

fn encoder_service(encoder: Arc<HashingEncoder>) -> Arc<EncoderService> {
    Arc::new(EncoderService::new(encoder, 1))
}

#[test]
fn test_backfill_embeds_missing_items_once() {
    let tmp = tempfile::tempdir().unwrap();
    seed_catalog(tmp.path());

    let encoder = encoder_service(Arc::new(HashingEncoder::new()));
    let catalog = open_catalog(tmp.path(), &encoder);
    assert_eq!(catalog.stats().unwrap().missing, 3);

    let job = BackfillJob::new(catalog.clone(), encoder.clone());

    let report = job.run().unwrap();
    assert_eq!(
        report,
        BackfillReport {
            succeeded: 3,
            failed: 0,
            skipped: 0
        }
    );
    assert!(catalog.list_items_missing_embedding().unwrap().is_empty());

    let report = job.run().unwrap();
    assert_eq!(report, BackfillReport::default());
}

#[test]
fn test_backfilled_embeddings_match_normalized_text() {
    let tmp = tempfile::tempdir().unwrap();
    seed_catalog(tmp.path());

    let encoder = encoder_service(Arc::new(HashingEncoder::new()));
    let catalog = open_catalog(tmp.path(), &encoder);
    BackfillJob::new(catalog.clone(), encoder.clone()).run().unwrap();

    for item in catalog.list_items().unwrap() {
        let expected = encoder.encode(&item.normalized_text()).unwrap();
        assert_eq!(item.embedding.as_ref(), Some(&expected));
        assert_eq!(expected.len(), HASHING_DIMS);
    }
}

#[test]
fn test_backfill_leaves_text_and_prices_alone() {
    let tmp = tempfile::tempdir().unwrap();
    seed_catalog(tmp.path());

    let encoder = encoder_service(Arc::new(HashingEncoder::new()));
    let catalog = open_catalog(tmp.path(), &encoder);
    let before: Vec<CatalogItem> = catalog.list_items().unwrap();

    BackfillJob::new(catalog.clone(), encoder.clone()).run().unwrap();

    let after = catalog.list_items().unwrap();
    for (old, new) in before.iter().zip(after.iter()) {
        assert_eq!(old.name, new.name);
        assert_eq!(old.ingredients, new.ingredients);
        assert_eq!(old.image_url, new.image_url);
    }
    assert_eq!(catalog.get_price(2).unwrap().price, 6.25);
}

#[test]
fn test_backfill_survives_reload() {
    let tmp = tempfile::tempdir().unwrap();
    seed_catalog(tmp.path());

    let encoder = encoder_service(Arc::new(HashingEncoder::new()));
    {
        let catalog = open_catalog(tmp.path(), &encoder);
        BackfillJob::new(catalog, encoder.clone()).run().unwrap();
    }

    let catalog = open_catalog(tmp.path(), &encoder);
    assert_eq!(catalog.stats().unwrap().missing, 0);
}

#[test]
fn test_backfill_counts_failures_and_keeps_going() {
    let tmp = tempfile::tempdir().unwrap();
    seed_catalog(tmp.path());

    let hashing = Arc::new(HashingEncoder::new());
    hashing.set_failing(true);
    let encoder = encoder_service(hashing.clone());
    let catalog = open_catalog(tmp.path(), &encoder);
    let job = BackfillJob::new(catalog.clone(), encoder.clone());

    let report = job.run().unwrap();
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.failed, 3);
    assert_eq!(catalog.stats().unwrap().missing, 3);

    hashing.set_failing(false);
    let report = job.run().unwrap();
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 0);
}

#[test]
fn test_backfill_counts_write_failures_and_keeps_going() {
    let tmp = tempfile::tempdir().unwrap();
    seed_catalog(tmp.path());

    let hashing = Arc::new(HashingEncoder::new());
    let encoder = encoder_service(hashing.clone());
    let storage = Arc::new(FlakyStorage::new(tmp.path()));
    let catalog = Arc::new(
        CatalogCsv::load(storage.clone(), encoder.model_id(), encoder.dimensions()).unwrap(),
    );
    let job = BackfillJob::new(catalog.clone(), encoder.clone());

    storage.fail_commits(true);
    let report = job.run().unwrap();
    assert_eq!(
        report,
        BackfillReport {
            succeeded: 0,
            failed: 3,
            skipped: 0
        }
    );
    assert_eq!(hashing.calls(), 3);
    assert_eq!(catalog.stats().unwrap().missing, 3);
    assert_eq!(open_catalog(tmp.path(), &encoder).stats().unwrap().missing, 3);

    storage.fail_commits(false);
    let report = job.run().unwrap();
    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(catalog.stats().unwrap().missing, 0);
}

/// Rewrites the first listed meal right after handing out the list, like a
/// concurrent update landing while backfill is encoding.
struct RacingStore {
    inner: Arc<CatalogCsv>,
    encoder: Arc<EncoderService>,
}

impl CatalogStore for RacingStore {
    fn list_items(&self) -> Result<Vec<CatalogItem>, CatalogError> {
        self.inner.list_items()
    }

    fn get_item(&self, id: u64) -> Result<CatalogItem, CatalogError> {
        self.inner.get_item(id)
    }

    fn get_price(&self, id: u64) -> Result<PriceRecord, CatalogError> {
        self.inner.get_price(id)
    }

    fn list_items_missing_embedding(&self) -> Result<Vec<CatalogItem>, CatalogError> {
        let items = self.inner.list_items_missing_embedding()?;
        if let Some(first) = items.first() {
            let fields = meal("Extra Spicy Grilled Chicken", &first.ingredients);
            let embedding = self.encoder.encode(&fields.normalized_text()).unwrap();
            self.inner
                .write_item(Some(first.id), fields, embedding, 13.0)
                .unwrap();
        }
        Ok(items)
    }

    fn write_item(
        &self,
        id: Option<u64>,
        meal: MealFields,
        embedding: Vec<f32>,
        price: f64,
    ) -> Result<CatalogItem, CatalogError> {
        self.inner.write_item(id, meal, embedding, price)
    }

    fn update_embedding_only(
        &self,
        id: u64,
        content_hash: u64,
        embedding: Vec<f32>,
    ) -> Result<(), CatalogError> {
        self.inner.update_embedding_only(id, content_hash, embedding)
    }

    fn update_price(&self, id: u64, price: f64) -> Result<PriceRecord, CatalogError> {
        self.inner.update_price(id, price)
    }

    fn delete_item(&self, id: u64) -> Result<(), CatalogError> {
        self.inner.delete_item(id)
    }

    fn stats(&self) -> Result<CatalogStats, CatalogError> {
        self.inner.stats()
    }
}

#[test]
fn test_backfill_skips_items_rewritten_during_run() {
    let tmp = tempfile::tempdir().unwrap();
    seed_catalog(tmp.path());

    let encoder = encoder_service(Arc::new(HashingEncoder::new()));
    let catalog = open_catalog(tmp.path(), &encoder);
    let store = Arc::new(RacingStore {
        inner: catalog.clone(),
        encoder: encoder.clone(),
    });

    let report = BackfillJob::new(store, encoder.clone()).run().unwrap();
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.skipped, 1);

    let item = catalog.get_item(0).unwrap();
    assert_eq!(item.name, "Extra Spicy Grilled Chicken");
    let expected = encoder.encode(&item.normalized_text()).unwrap();
    assert_eq!(item.embedding, Some(expected));
}

#[test]
fn test_service_backfill() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("catalog");
    seed_catalog(&dir);

    let service = open_service(
        &SemanticSearchConfig::default(),
        &dir,
        Arc::new(HashingEncoder::new()),
    );

    let report = service.backfill(false).unwrap();
    assert_eq!(report.succeeded, 3);

    let matches = service.search_meals("spicy chicken").unwrap();
    assert_eq!(matches[0].meal.item.id, 0);
    assert_eq!(matches[0].meal.price, Some(12.5));
}
