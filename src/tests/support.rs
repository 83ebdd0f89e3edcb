//! Test doubles shared by unit and cross-module tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::app::{AppFactory, CatalogService};
use crate::catalog::MealFields;
use crate::config::SemanticSearchConfig;
use crate::semantic::{Encoder, EncoderService, EncodingError};
use crate::storage::{BackendLocal, StorageManager};

pub const HASHING_DIMS: usize = 256;

/// Deterministic bag-of-words encoder.
///
/// Lowercases the text, splits it on anything that is not alphanumeric and
/// counts each token into a bucket picked by its SHA256. Texts sharing words
/// end up close in cosine terms.
pub struct HashingEncoder {
    fail: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicUsize,
}

impl HashingEncoder {
    pub fn new() -> Self {
        Self {
            fail: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Encoder for HashingEncoder {
    fn name(&self) -> &str {
        "hashing-bag-of-words"
    }

    fn dimensions(&self) -> usize {
        HASHING_DIMS
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EncodingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(EncodingError::Unavailable("encoder switched off".to_string()));
        }

        let mut vector = vec![0.0f32; HASHING_DIMS];
        let lowered = text.to_lowercase();
        let mut tokens = 0;

        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bytes) % HASHING_DIMS as u64) as usize;
            vector[bucket] += 1.0;
            tokens += 1;
        }

        if tokens == 0 {
            vector[0] = 1.0;
        }

        Ok(vector)
    }
}

/// Local storage whose commits can be switched to fail or held back.
pub struct FlakyStorage {
    inner: BackendLocal,
    fail: AtomicBool,
    held: Mutex<bool>,
    released: Condvar,
    waiting: AtomicBool,
}

impl FlakyStorage {
    pub fn new(dir: &Path) -> Self {
        Self {
            inner: BackendLocal::new(dir).unwrap(),
            fail: AtomicBool::new(false),
            held: Mutex::new(false),
            released: Condvar::new(),
            waiting: AtomicBool::new(false),
        }
    }

    pub fn fail_commits(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Park every commit until `release_commits` is called.
    pub fn hold_commits(&self) {
        *self.held.lock().unwrap() = true;
    }

    pub fn release_commits(&self) {
        *self.held.lock().unwrap() = false;
        self.released.notify_all();
    }

    /// Block until some commit is parked by `hold_commits`.
    pub fn wait_for_held_commit(&self) {
        while !self.waiting.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn check(&self) -> std::io::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(std::io::Error::other("injected commit failure"))
        } else {
            Ok(())
        }
    }
}

impl StorageManager for FlakyStorage {
    fn write(&self, ident: &str, data: &[u8]) -> std::io::Result<()> {
        self.check()?;
        self.inner.write(ident, data)
    }

    fn read(&self, ident: &str) -> std::io::Result<Vec<u8>> {
        self.inner.read(ident)
    }

    fn exists(&self, ident: &str) -> bool {
        self.inner.exists(ident)
    }

    fn commit(&self, files: &[(&str, Vec<u8>)]) -> std::io::Result<()> {
        self.check()?;

        let mut held = self.held.lock().unwrap();
        while *held {
            self.waiting.store(true, Ordering::SeqCst);
            held = self.released.wait(held).unwrap();
        }
        self.waiting.store(false, Ordering::SeqCst);
        drop(held);

        self.inner.commit(files)
    }
}

pub fn meal(name: &str, ingredients: &str) -> MealFields {
    MealFields {
        name: name.to_string(),
        ingredients: ingredients.to_string(),
        ..Default::default()
    }
}

pub fn cuisine_meal(name: &str, ingredients: &str, cuisine: &str) -> MealFields {
    MealFields {
        cuisine: Some(cuisine.to_string()),
        ..meal(name, ingredients)
    }
}

/// Standard basis vector `e_axis`.
pub fn unit_vector(dims: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dims];
    v[axis] = 1.0;
    v
}

/// A catalog service over a fresh temp directory and a hashing encoder.
pub fn create_service() -> (CatalogService, Arc<HashingEncoder>, tempfile::TempDir) {
    create_service_with(SemanticSearchConfig::default())
}

pub fn create_service_with(
    config: SemanticSearchConfig,
) -> (CatalogService, Arc<HashingEncoder>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("failed to create temp dir");
    let encoder = Arc::new(HashingEncoder::new());
    let service = open_service(&config, &tmp.path().join("catalog"), encoder.clone());
    (service, encoder, tmp)
}

/// Open (or reopen) the catalog in `dir`.
pub fn open_service(
    config: &SemanticSearchConfig,
    dir: &Path,
    encoder: Arc<HashingEncoder>,
) -> CatalogService {
    let encoder = Arc::new(EncoderService::new(encoder, config.max_concurrent_encodes));
    AppFactory::build(config, dir, encoder).expect("failed to build catalog service")
}
