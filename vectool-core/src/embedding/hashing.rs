use sha2::{Digest, Sha256};

use super::{EmbedError, Embedder};

/// Deterministic bag-of-words embedder.
///
/// Each lower-cased alphanumeric token is hashed into one of `dimensions`
/// buckets with a sign bit, and the resulting vector is L2-normalised.
/// Texts sharing words land close together, which is enough for tests and
/// for running without a model download.
pub struct HashingEmbedder {
    dimensions: usize,
    model_name: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Result<Self, EmbedError> {
        if dimensions == 0 {
            return Err(EmbedError::ModelLoad(
                "hashing embedder needs at least one dimension".into(),
            ));
        }
        Ok(Self {
            dimensions,
            model_name: format!("hashing-{dimensions}"),
        })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for token in tokens {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn provider_type(&self) -> &str {
        "hashing"
    }
}
