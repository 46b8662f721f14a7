//! Deterministic hash embeddings used when no model is available.
//!
//! These vectors carry almost no semantic signal: two texts only score high
//! against each other when their bytes largely coincide. They keep the
//! pipeline functional without a model and make tests reproducible.

/// Cycle the UTF-8 bytes of `text` to `dims` entries, each mapped to `b / 255`.
///
/// Empty input yields an all-zero vector.
pub fn hash_embedding(text: &str, dims: usize) -> Vec<f32> {
    let bytes = text.as_bytes();
    if bytes.is_empty() {
        return vec![0.0; dims];
    }
    bytes
        .iter()
        .cycle()
        .take(dims)
        .map(|&b| b as f32 / 255.0)
        .collect()
}

/// Hash embedding of an image: the decimal byte sum fed through [`hash_embedding`].
pub fn image_hash_embedding(bytes: &[u8], dims: usize) -> Vec<f32> {
    let sum: u64 = bytes.iter().map(|&b| b as u64).sum();
    hash_embedding(&sum.to_string(), dims)
}
