//! Text normalization for embedding generation.
//!
//! Builds the single string a meal is indexed by:
//! `"{name}. Ingredients: {ingredients}. Cuisine: {cuisine}"`
//!
//! Fields are used verbatim. Search queries never go through here.

use sha2::{Digest, Sha256};

/// Build the canonical indexable text of a meal.
///
/// A missing cuisine is rendered as the empty string so that the output
/// shape never depends on which optional fields are present.
pub fn normalize_meal_text(name: &str, ingredients: &str, cuisine: Option<&str>) -> String {
    format!(
        "{}. Ingredients: {}. Cuisine: {}",
        name,
        ingredients,
        cuisine.unwrap_or_default()
    )
}

/// Hash of the normalized text, stored next to each embedding.
///
/// Used to detect embeddings computed from text that has since changed.
/// Persisted in `vectors.bin`, so it must not depend on the build.
pub fn content_hash(name: &str, ingredients: &str, cuisine: Option<&str>) -> u64 {
    text_hash(&normalize_meal_text(name, ingredients, cuisine))
}

/// Hash an already-normalized string.
pub fn text_hash(text: &str) -> u64 {
    let digest = Sha256::digest(text.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}
