use std::sync::Arc;

use super::CatalogCsv;
use crate::semantic::{IndexError, NearestNeighborIndex, SearchResult};

/// Exact cosine search over the embeddings committed in a `CatalogCsv`.
///
/// Results below `threshold` are never returned.
pub struct CatalogIndex {
    catalog: Arc<CatalogCsv>,
    threshold: f32,
}

impl CatalogIndex {
    pub fn new(catalog: Arc<CatalogCsv>, threshold: f32) -> Self {
        Self { catalog, threshold }
    }
}

impl NearestNeighborIndex for CatalogIndex {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        self.catalog.nearest(query, self.threshold, k)
    }

    fn model_id(&self) -> Option<[u8; 32]> {
        Some(self.catalog.model_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogStore;
    use crate::storage::BackendLocal;
    use crate::tests::support::{meal, unit_vector};

    #[test]
    fn test_search_applies_threshold_and_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(BackendLocal::new(tmp.path()).unwrap());
        let catalog = Arc::new(CatalogCsv::load(storage, [1u8; 32], 3).unwrap());

        catalog
            .write_item(None, meal("A", "a"), vec![1.0, 0.0, 0.0], 1.0)
            .unwrap();
        catalog
            .write_item(None, meal("B", "b"), vec![1.0, 1.0, 0.0], 1.0)
            .unwrap();
        catalog
            .write_item(None, meal("C", "c"), unit_vector(3, 2), 1.0)
            .unwrap();

        let index = CatalogIndex::new(catalog.clone(), 0.5);
        let results = index.search(&[1.0, 0.0, 0.0], 10).unwrap();
        let ids: Vec<u64> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1]);

        let results = index.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, 0);

        assert_eq!(index.model_id(), Some([1u8; 32]));
    }

    #[test]
    fn test_search_rejects_wrong_dimension() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = Arc::new(BackendLocal::new(tmp.path()).unwrap());
        let catalog = Arc::new(CatalogCsv::load(storage, [1u8; 32], 3).unwrap());

        let index = CatalogIndex::new(catalog, 0.0);
        assert!(matches!(
            index.search(&[1.0, 0.0], 5),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }
}
