//! Embedding abstraction, the offline hash embedder, and vector utilities.
//!
//! The [`Embedder`] trait is the seam a real embedding model plugs into.
//! [`HashEmbedder`] is the default: a deterministic SHA-256 based vector
//! that only captures exact-text identity, but needs no network or model
//! files.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Model label stored alongside hash embeddings.
pub const HASH_EMBED_MODEL: &str = "hash-embed";
/// Dimensionality of hash embeddings.
pub const HASH_EMBED_DIMS: usize = 8;

/// Trait for embedding backends.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier stored with each vector.
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
    }
}

/// Deterministic, offline-safe embedder. See [`hash_embedding`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HashEmbedder;

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        HASH_EMBED_MODEL
    }

    fn dims(&self) -> usize {
        HASH_EMBED_DIMS
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embedding(t)).collect())
    }
}

/// Hash the UTF-8 text with SHA-256 and fold the digest into an
/// L2-normalized 8-vector.
///
/// Each 4-byte big-endian group of the digest becomes
/// `(group mod 1000) / 1000`. A zero vector is returned unnormalized.
///
/// # Example
///
/// ```rust
/// use gdpr_harness_core::embedding::hash_embedding;
///
/// let a = hash_embedding("consent");
/// assert_eq!(a.len(), 8);
/// assert_eq!(a, hash_embedding("consent"));
/// ```
pub fn hash_embedding(text: &str) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let raw: Vec<f64> = digest
        .chunks_exact(4)
        .map(|g| (u32::from_be_bytes([g[0], g[1], g[2], g[3]]) % 1000) as f64 / 1000.0)
        .collect();
    let norm = raw.iter().map(|v| v * v).sum::<f64>().sqrt();
    let norm = if norm == 0.0 { 1.0 } else { norm };
    raw.iter().map(|v| (v / norm) as f32).collect()
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// ```rust
/// use gdpr_harness_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity: `dot(a, b) / (‖a‖ × ‖b‖)`.
///
/// When either norm is zero the denominator is taken as `1.0`, so the
/// result degrades to the raw dot product. Vectors of different lengths
/// score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    let denom = if denom == 0.0 { 1.0 } else { denom };
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_embedding_deterministic() {
        assert_eq!(hash_embedding("article 17"), hash_embedding("article 17"));
        assert_eq!(
            vec_to_blob(&hash_embedding("x")),
            vec_to_blob(&hash_embedding("x"))
        );
    }

    #[test]
    fn test_hash_embedding_distinguishes_texts() {
        assert_ne!(hash_embedding("apples"), hash_embedding("apples "));
        assert_ne!(hash_embedding("a"), hash_embedding("b"));
    }

    #[test]
    fn test_hash_embedding_unit_norm_non_negative() {
        let v = hash_embedding("lawful basis");
        assert_eq!(v.len(), HASH_EMBED_DIMS);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(v.iter().all(|x| *x >= 0.0));
    }

    #[test]
    fn test_hash_embedding_known_digest() {
        // sha256("abc") = ba7816bf 8f01cfea 414140de 5dae2223 b00361a3 96177a9c b410ff61 f20015ad
        let groups: [u32; 8] = [
            0xba7816bf, 0x8f01cfea, 0x414140de, 0x5dae2223, 0xb00361a3, 0x96177a9c, 0xb410ff61,
            0xf20015ad,
        ];
        let raw: Vec<f64> = groups.iter().map(|g| (g % 1000) as f64 / 1000.0).collect();
        let norm = raw.iter().map(|v| v * v).sum::<f64>().sqrt();
        let expected: Vec<f32> = raw.iter().map(|v| (v / norm) as f32).collect();
        assert_eq!(hash_embedding("abc"), expected);
    }

    #[test]
    fn test_cosine_identical() {
        let v = hash_embedding("same");
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_zero_norm_is_raw_dot() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[3.0, 4.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_cosine_different_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_hash_embedder_batch_matches_single() {
        let e = HashEmbedder;
        let batch = e
            .embed_batch(&["one".to_string(), "two".to_string()])
            .await
            .unwrap();
        assert_eq!(batch[1], e.embed("two").await.unwrap());
        assert_eq!(e.model_name(), "hash-embed");
    }
}
