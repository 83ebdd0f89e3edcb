use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use homedir::my_home;

use crate::{
    app::service::CatalogService,
    catalog::{CatalogCsv, CatalogIndex},
    config::{Config, SemanticSearchConfig},
    semantic::{EncoderService, FastEmbedEncoder, SearchService},
    storage,
};

/// Application factory for creating and configuring application components
pub struct AppFactory;

impl AppFactory {
    /// Load config and the embedding model, then open the catalog.
    ///
    /// The model is loaded exactly once here and shared by every component.
    pub fn create_catalog_service(paths: &AppPaths) -> Result<CatalogService> {
        let config = Self::create_config(&paths.base_path)?;
        let encoder = Self::create_encoder(paths, &config.semantic_search)?;
        Self::build(&config.semantic_search, Path::new(&paths.catalog_path), encoder)
    }

    /// Wire a catalog service around an existing encoder.
    pub fn build(
        config: &SemanticSearchConfig,
        catalog_dir: &Path,
        encoder: Arc<EncoderService>,
    ) -> Result<CatalogService> {
        let storage_mgr = Arc::new(
            storage::BackendLocal::new(catalog_dir).context("Failed to create catalog directory")?,
        );

        let catalog = Arc::new(
            CatalogCsv::load(storage_mgr, encoder.model_id(), encoder.dimensions())
                .context("Failed to load catalog")?,
        );

        let index = Arc::new(CatalogIndex::new(catalog.clone(), config.match_threshold));
        let search = SearchService::new(
            encoder.clone(),
            index,
            config.match_count,
            Duration::from_millis(config.search_timeout_ms),
        );

        Ok(CatalogService::new(catalog, encoder, search))
    }

    pub fn create_encoder(
        paths: &AppPaths,
        config: &SemanticSearchConfig,
    ) -> Result<Arc<EncoderService>> {
        log::info!("loading embedding model '{}'", config.model);

        let encoder = FastEmbedEncoder::new(
            &config.model,
            paths.base_path.clone().into(),
            Some(Duration::from_secs(config.download_timeout_secs)),
        )
        .context("Failed to load embedding model")?;

        Ok(Arc::new(EncoderService::new(
            Arc::new(encoder),
            config.max_concurrent_encodes,
        )))
    }

    /// Get application paths with validation
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;
        let catalog_path = format!("{base_path}/catalog");

        // Ensure base directory exists
        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths {
            base_path,
            catalog_path,
        })
    }

    pub fn create_config(base_path: &str) -> Result<Config> {
        Config::load_with(base_path).context("Failed to load config")
    }

    /// Get the base path for the application
    fn get_base_path() -> Result<String> {
        if let Ok(base_path) = std::env::var("MEALDEX_BASE_PATH") {
            return Ok(base_path);
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(format!("{}/.local/share/mealdex", home.to_string_lossy()))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: String,
    pub catalog_path: String,
}
