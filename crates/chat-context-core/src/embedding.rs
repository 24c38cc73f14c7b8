//! Embedding provider trait, content addressing, and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] trait that all embedding backends
//! implement, plus pure helpers for cache keys, vector serialization, and
//! similarity computation.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) live in the
//! `chat-context` app crate.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// A source of embedding vectors.
///
/// `embed` must return exactly one vector per input, in input order.
/// Implementations own their transport, retries, and timeouts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier, e.g. `"text-embedding-3-small"`.
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Content-addressed cache key: hex SHA-256 of `text` followed by `image_url`.
///
/// Identical `(text, image_url)` pairs always hash the same. A missing image
/// URL hashes like an empty one.
///
/// ```rust
/// use chat_context_core::embedding::content_hash;
///
/// assert_eq!(content_hash("hello", None), content_hash("hello", Some("")));
/// assert_ne!(content_hash("hello", None), content_hash("hello", Some("https://x/a.png")));
/// assert_eq!(content_hash("hello", None).len(), 64);
/// ```
pub fn content_hash(text: &str, image_url: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update(image_url.unwrap_or("").as_bytes());
    hex::encode(hasher.finalize())
}

/// Little-endian f32 bytes, the `embedding` BLOB layout.
///
/// ```rust
/// use chat_context_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// assert_eq!(vec_to_blob(&v).len(), 12);
/// assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not fill an f32 are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Mismatched lengths, empty input, and zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, sq_a, sq_b) = a
        .iter()
        .zip(b)
        .fold((0.0f32, 0.0f32, 0.0f32), |(dot, sq_a, sq_b), (x, y)| {
            (dot + x * y, sq_a + x * x, sq_b + y * y)
        });

    let norm = (sq_a * sq_b).sqrt();
    if norm < f32::EPSILON {
        0.0
    } else {
        dot / norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = content_hash("deploy notes", Some("https://cdn/x.png"));
        let b = content_hash("deploy notes", Some("https://cdn/x.png"));
        assert_eq!(a, b);
        assert_ne!(a, content_hash("deploy notes", None));
    }

    #[test]
    fn test_content_hash_known_value() {
        // sha256("abc")
        assert_eq!(
            content_hash("abc", None),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_blob_ignores_partial_trailing_bytes() {
        let mut blob = vec_to_blob(&[0.5]);
        blob.push(0xff);
        assert_eq!(blob_to_vec(&blob), vec![0.5]);
    }
}
