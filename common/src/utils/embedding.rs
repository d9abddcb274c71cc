use std::{str::FromStr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

/// Text → vector function used at ingestion and query time. Implementations
/// are deterministic for a fixed model and always return `dimension()`
/// values.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError>;

    fn dimension(&self) -> usize;
}

/// Selected with `embedding_backend` in the config; lowercase names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAI,
    #[default]
    FastEmbed,
    Hashed,
}

impl EmbeddingBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OpenAI => "openai",
            Self::FastEmbed => "fastembed",
            Self::Hashed => "hashed",
        }
    }
}

const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Clone)]
pub struct EmbeddingProvider {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimension: u32,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        dimension: usize,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    /// Builds the backend named in `config`. The OpenAI backend needs a
    /// client; the others ignore it.
    pub async fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self> {
        match config.embedding_backend {
            EmbeddingBackend::OpenAI => {
                let client = openai_client
                    .ok_or_else(|| anyhow!("the openai embedding backend needs an OpenAI client"))?;
                let model = config
                    .embedding_model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_EMBEDDING_MODEL.to_string());
                Ok(Self::openai(client, model, config.embedding_dimensions))
            }
            EmbeddingBackend::FastEmbed => Self::fastembed(config.embedding_model.as_deref()).await,
            EmbeddingBackend::Hashed => Ok(Self::hashed(config.embedding_dimensions as usize)),
        }
    }

    pub fn openai(client: Arc<Client<OpenAIConfig>>, model: String, dimension: u32) -> Self {
        Self {
            backend: Backend::OpenAI {
                client,
                model,
                dimension,
            },
        }
    }

    /// Loads a local FastEmbed model (the crate default when `model` is
    /// `None`). Model files are fetched on first use.
    pub async fn fastembed(model: Option<&str>) -> Result<Self> {
        let model_name = match model {
            Some(code) => EmbeddingModel::from_str(code).map_err(|err| anyhow!(err))?,
            None => EmbeddingModel::default(),
        };
        let dimension = EmbeddingModel::get_model_info(&model_name)
            .map(|info| info.dim)
            .ok_or_else(|| anyhow!("no FastEmbed metadata for model {model_name}"))?;

        let options = TextInitOptions::new(model_name).with_show_download_progress(true);
        let model = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options))
            .await
            .context("joining FastEmbed loader")?
            .context("loading FastEmbed model")?;

        Ok(Self {
            backend: Backend::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                dimension,
            },
        })
    }

    pub fn hashed(dimension: usize) -> Self {
        Self {
            backend: Backend::Hashed {
                dimension: dimension.max(1),
            },
        }
    }

    pub fn backend(&self) -> EmbeddingBackend {
        match self.backend {
            Backend::OpenAI { .. } => EmbeddingBackend::OpenAI,
            Backend::FastEmbed { .. } => EmbeddingBackend::FastEmbed,
            Backend::Hashed { .. } => EmbeddingBackend::Hashed,
        }
    }

    async fn embed_with_backend(&self, text: &str) -> Result<Vec<f32>> {
        let embedding = match &self.backend {
            Backend::Hashed { dimension } => hashed_embedding(text, *dimension),
            Backend::FastEmbed { model, .. } => model
                .lock()
                .await
                .embed(vec![text], None)
                .context("computing FastEmbed vector")?
                .pop()
                .ok_or_else(|| anyhow!("FastEmbed returned no vector"))?,
            Backend::OpenAI {
                client,
                model,
                dimension,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.as_str())
                    .input([text])
                    .dimensions(*dimension)
                    .build()?;

                client
                    .embeddings()
                    .create(request)
                    .await?
                    .data
                    .pop()
                    .map(|item| item.embedding)
                    .ok_or_else(|| anyhow!("OpenAI returned no embedding"))?
            }
        };

        debug!(
            backend = self.backend().as_str(),
            dimension = embedding.len(),
            "text embedded"
        );
        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let embedding = self.embed_with_backend(text).await?;
        let expected = self.dimension();
        if embedding.len() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        match &self.backend {
            Backend::Hashed { dimension } | Backend::FastEmbed { dimension, .. } => *dimension,
            Backend::OpenAI { dimension, .. } => *dimension as usize,
        }
    }
}

// Bag-of-words vector over hashed buckets, L2-normalised. Needs no model.
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];

    for token in tokens(text) {
        if let Some(slot) = vector.get_mut(bucket(&token, dim)) {
            *slot += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

// Must map a token to the same bucket in every build: stored vectors are
// compared against freshly computed query vectors.
fn bucket(token: &str, dimension: usize) -> usize {
    let digest = Sha256::digest(token.as_bytes());
    let prefix = digest
        .first_chunk::<8>()
        .copied()
        .map_or(0, u64::from_le_bytes);
    (prefix % dimension as u64) as usize
}
