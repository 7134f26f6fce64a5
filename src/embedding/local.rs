//! Local embedding backend running fastembed in-process.

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{EmbeddingBackend, EmbeddingError};

/// fastembed-based backend. Inference is synchronous, so calls run on the
/// blocking pool behind a mutex-guarded model instance.
pub struct FastEmbedBackend {
    model: Arc<Mutex<TextEmbedding>>,
    model_id: String,
    dimension: usize,
}

/// Map a configured model name to the fastembed enum. Unknown names fall
/// back to the default model.
fn parse_model(name: &str) -> EmbeddingModel {
    match name {
        "AllMiniLML6V2" | "sentence-transformers/all-MiniLM-L6-v2" => {
            EmbeddingModel::AllMiniLML6V2
        }
        "BGESmallENV15" | "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "BGEBaseENV15" | "BAAI/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "BGELargeENV15" | "BAAI/bge-large-en-v1.5" => EmbeddingModel::BGELargeENV15,
        other => {
            tracing::debug!(
                target: "embedding",
                "unknown model '{other}', using AllMiniLML6V2"
            );
            EmbeddingModel::AllMiniLML6V2
        }
    }
}

impl FastEmbedBackend {
    /// Load the model, downloading it into `cache_dir` on first use, and
    /// probe its dimension.
    pub async fn load(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let name = model_name.to_string();
        let (model, dimension) = tokio::task::spawn_blocking(
            move || -> Result<(TextEmbedding, usize), EmbeddingError> {
                let mut model = TextEmbedding::try_new(
                    InitOptions::new(parse_model(&name))
                        .with_cache_dir(cache_dir)
                        .with_show_download_progress(false),
                )
                .map_err(|e| EmbeddingError::Init(e.to_string()))?;

                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(|e| EmbeddingError::Init(e.to_string()))?;
                let dimension = probe
                    .into_iter()
                    .next()
                    .map(|v| v.len())
                    .ok_or_else(|| EmbeddingError::Init("empty probe embedding".to_string()))?;

                Ok((model, dimension))
            },
        )
        .await
        .map_err(|e| EmbeddingError::Init(format!("model load task failed: {e}")))??;

        tracing::info!(
            target: "embedding",
            "loaded local model {model_name} ({dimension} dimensions)"
        );

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_id: model_name.to_string(),
            dimension,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for FastEmbedBackend {
    fn id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.model.clone();
        let owned: Vec<String> = texts.to_vec();
        let backend = self.model_id.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = model.blocking_lock();
            guard.embed(owned, None)
        })
        .await
        .map_err(|e| EmbeddingError::Backend {
            backend: backend.clone(),
            message: format!("embedding task failed: {e}"),
        })?
        .map_err(|e| EmbeddingError::Backend {
            backend,
            message: e.to_string(),
        })
    }
}
