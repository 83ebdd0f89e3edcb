use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::semantic::{DEFAULT_MATCH_COUNT, DEFAULT_MODEL, DEFAULT_THRESHOLD};
use crate::storage::{self, StorageManager};

const CONFIG_FILE: &str = "config.yaml";

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
/// Default upper bound on one search request in milliseconds
const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 5000;
const DEFAULT_MAX_CONCURRENT_ENCODES: usize = 1;

/// Configuration for embedding and search
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SemanticSearchConfig {
    /// Model name for embeddings (e.g., "all-mpnet-base-v2")
    #[serde(default = "default_model")]
    pub model: String,

    /// Minimum cosine similarity of a match [0.0, 1.0]
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,

    /// Number of results a search returns by default
    #[serde(default = "default_match_count")]
    pub match_count: usize,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,

    /// How many encode calls may run at the same time
    #[serde(default = "default_max_concurrent_encodes")]
    pub max_concurrent_encodes: usize,
}

impl Default for SemanticSearchConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            match_threshold: DEFAULT_THRESHOLD,
            match_count: DEFAULT_MATCH_COUNT,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            search_timeout_ms: DEFAULT_SEARCH_TIMEOUT_MS,
            max_concurrent_encodes: DEFAULT_MAX_CONCURRENT_ENCODES,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_match_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_match_count() -> usize {
    DEFAULT_MATCH_COUNT
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_search_timeout_ms() -> u64 {
    DEFAULT_SEARCH_TIMEOUT_MS
}

fn default_max_concurrent_encodes() -> usize {
    DEFAULT_MAX_CONCURRENT_ENCODES
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub semantic_search: SemanticSearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        let sem = &self.semantic_search;

        if sem.model.trim().is_empty() {
            bail!("semantic_search.model must not be empty");
        }

        if !(0.0..=1.0).contains(&sem.match_threshold) {
            bail!(
                "semantic_search.match_threshold must be between 0.0 and 1.0, got {}",
                sem.match_threshold
            );
        }

        if sem.match_count == 0 {
            bail!("semantic_search.match_count must be greater than 0");
        }

        if sem.download_timeout_secs == 0 {
            bail!("semantic_search.download_timeout_secs must be greater than 0");
        }

        if sem.search_timeout_ms == 0 {
            bail!("semantic_search.search_timeout_ms must be greater than 0");
        }

        if sem.max_concurrent_encodes == 0 {
            bail!("semantic_search.max_concurrent_encodes must be greater than 0");
        }

        Ok(())
    }

    pub fn load_with(base_path: &str) -> Result<Self> {
        let store = storage::BackendLocal::new(base_path)
            .with_context(|| format!("failed to create {base_path}"))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            log::info!("creating default config at {base_path}/{CONFIG_FILE}");
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str =
            String::from_utf8(store.read(CONFIG_FILE)?).context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_string();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }
}
