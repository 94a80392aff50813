pub mod hashing;
pub mod local;

use std::fmt;
use std::sync::Arc;

use crate::config::EmbeddingConfig;

/// Errors that can occur during embedding.
#[derive(Debug)]
pub enum EmbedError {
    /// Failed to load or initialize the embedding model.
    ModelLoad(String),
    /// Failed to encode input texts into vectors.
    EncodingFailed(String),
    /// The configured embedding function is not known.
    UnknownFunction(String),
}

impl fmt::Display for EmbedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ModelLoad(msg) => write!(f, "model load error: {msg}"),
            Self::EncodingFailed(msg) => write!(f, "encoding failed: {msg}"),
            Self::UnknownFunction(name) => write!(
                f,
                "unknown embedding function '{name}'. Valid functions: fastembed, hashing"
            ),
        }
    }
}

impl std::error::Error for EmbedError {}

/// Trait abstracting text-to-vector embedding.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts into vectors, one per input, in input order.
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Dimensionality of the output vectors.
    fn dimensions(&self) -> usize;

    /// Model identifier string.
    fn model_name(&self) -> &str;

    /// Provider type identifier (e.g., "fastembed", "hashing").
    fn provider_type(&self) -> &str;
}

/// Build the embedder selected by the `[embedding]` config section.
pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbedError> {
    match config.function.as_str() {
        "fastembed" | "sentence-transformers" => {
            Ok(Arc::new(local::LocalEmbedder::new(&config.model)?))
        }
        "hashing" => Ok(Arc::new(hashing::HashingEmbedder::new(config.dimensions)?)),
        other => Err(EmbedError::UnknownFunction(other.to_string())),
    }
}

/// Embed `texts` and check that exactly one vector came back per input.
pub fn embed_all(embedder: &dyn Embedder, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
    let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
    log::debug!("generating embeddings for {} texts", refs.len());
    let vectors = embedder.embed(&refs)?;
    if vectors.len() != texts.len() {
        return Err(EmbedError::EncodingFailed(format!(
            "expected {} vectors, embedder returned {}",
            texts.len(),
            vectors.len()
        )));
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_embedder_rejects_unknown_function() {
        let config = EmbeddingConfig {
            function: "word2vec".into(),
            ..EmbeddingConfig::default()
        };
        let err = build_embedder(&config).err().unwrap();
        assert!(matches!(err, EmbedError::UnknownFunction(_)));
        assert!(err.to_string().contains("fastembed, hashing"));
    }

    #[test]
    fn build_embedder_hashing_uses_configured_width() {
        let config = EmbeddingConfig {
            function: "hashing".into(),
            dimensions: 64,
            ..EmbeddingConfig::default()
        };
        let embedder = build_embedder(&config).unwrap();
        assert_eq!(embedder.dimensions(), 64);
        assert_eq!(embedder.provider_type(), "hashing");
    }

    #[test]
    fn embed_all_preserves_order_and_count() {
        let embedder = hashing::HashingEmbedder::new(16).unwrap();
        let texts = vec!["alpha".to_string(), "beta".to_string()];
        let vectors = embed_all(&embedder, &texts).unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], embedder.embed(&["alpha"]).unwrap()[0]);
    }
}
