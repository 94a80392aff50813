use std::sync::Mutex;

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{EmbedError, Embedder};

/// Models the local provider knows how to load, with their output widths.
const SUPPORTED_MODELS: &[(&str, usize)] = &[
    ("all-MiniLM-L6-v2", 384),
    ("all-MiniLM-L12-v2", 384),
    ("bge-small-en-v1.5", 384),
    ("bge-base-en-v1.5", 768),
    ("nomic-embed-text-v1.5", 768),
];

fn resolve_model(name: &str) -> Option<(EmbeddingModel, usize)> {
    let model = match name {
        "all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
        "all-MiniLM-L12-v2" => EmbeddingModel::AllMiniLML12V2,
        "bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "nomic-embed-text-v1.5" => EmbeddingModel::NomicEmbedTextV15,
        _ => return None,
    };
    SUPPORTED_MODELS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, dims)| (model, *dims))
}

/// Local embedding provider using fastembed with ONNX runtime.
pub struct LocalEmbedder {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl LocalEmbedder {
    pub fn new(model_name: &str) -> Result<Self, EmbedError> {
        let (model_id, dimensions) = resolve_model(model_name).ok_or_else(|| {
            let known: Vec<&str> = SUPPORTED_MODELS.iter().map(|(name, _)| *name).collect();
            EmbedError::ModelLoad(format!(
                "unsupported model '{model_name}'. Supported models: {}",
                known.join(", ")
            ))
        })?;
        let options = InitOptions::new(model_id).with_show_download_progress(false);
        let model = TextEmbedding::try_new(options)
            .map_err(|e| EmbedError::ModelLoad(e.to_string()))?;
        log::info!("loaded embedding model {model_name} ({dimensions}d)");
        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
        })
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut model = self.model.lock().unwrap_or_else(|e| e.into_inner());
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbedError::EncodingFailed(e.to_string()))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn provider_type(&self) -> &str {
        "fastembed"
    }
}
