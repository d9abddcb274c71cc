use std::{path::Path, sync::Arc, time::Instant};

use common::{error::AppError, utils::embedding::Embedder};
use retrieval_pipeline::index::EmbeddingIndex;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::{
    chunker::{split, ChunkingConfig},
    extraction::{extract_text_from_path, source_name},
};

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionReport {
    pub source: String,
    pub chunk_ids: Vec<String>,
}

/// Document → chunks → embeddings → index.
pub struct IngestionPipeline {
    index: Arc<EmbeddingIndex>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
}

impl IngestionPipeline {
    pub fn new(
        index: Arc<EmbeddingIndex>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
    ) -> Result<Self, AppError> {
        chunking.validate()?;
        Ok(Self {
            index,
            embedder,
            chunking,
        })
    }

    /// Chunks and indexes `text` under `source`.
    pub async fn ingest_text(&self, source: &str, text: &str) -> Result<IngestionReport, AppError> {
        self.ingest(source, text, false).await
    }

    /// Extracts, chunks and indexes a file. The source name is the file
    /// name. With `replace`, chunks previously stored for that source are
    /// swapped for the new ones.
    pub async fn ingest_file(&self, path: &Path, replace: bool) -> Result<IngestionReport, AppError> {
        let source = source_name(path);
        let text = extract_text_from_path(path).await?;

        self.ingest(&source, &text, replace).await
    }

    /// Every chunk is embedded before the index is touched, and the chunks
    /// (plus the removal of replaced ones) are written in one batch, so a
    /// failed document leaves the index as it was.
    #[instrument(skip_all, fields(source = %source, replace = replace))]
    async fn ingest(
        &self,
        source: &str,
        text: &str,
        replace: bool,
    ) -> Result<IngestionReport, AppError> {
        let started = Instant::now();
        let chunks = split(text, self.chunking.window, self.chunking.overlap)?;
        debug!(chunks = chunks.len(), "document split");

        let mut embedded = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let embedding = self.embedder.embed(&chunk).await?;
            embedded.push((chunk, embedding));
        }

        let chunk_ids = self.index.insert_batch(source, embedded, replace).await?;

        info!(
            chunks = chunk_ids.len(),
            elapsed_ms = started.elapsed().as_millis(),
            "document ingested"
        );
        Ok(IngestionReport {
            source: source.to_string(),
            chunk_ids,
        })
    }
}
