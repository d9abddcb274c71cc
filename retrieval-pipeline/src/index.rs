use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::text_chunk::TextChunk},
};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::{
    scoring::{by_score_desc, cosine_similarity},
    RetrievedChunk,
};

/// Ranked context lookup used by the answer pipeline. The brute-force
/// [`EmbeddingIndex`] is one implementation; a partitioned or indexed search
/// can replace it without the pipeline noticing.
#[async_trait]
pub trait ContextRetriever: Send + Sync {
    /// At most `k` chunks, best first.
    async fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, AppError>;
}

#[derive(Debug, Default)]
struct WriteState {
    dimension: Option<usize>,
    next_seq: u64,
}

/// Chunk store with exhaustive cosine-similarity search.
///
/// Every query scores every stored chunk once: `O(n * d)` for `n` chunks of
/// dimension `d`. Writes go through one async mutex so the dimension check
/// and the insertion sequence number are assigned atomically; queries never
/// take it and may or may not observe a concurrent insert.
pub struct EmbeddingIndex {
    db: Arc<SurrealDbClient>,
    state: Mutex<WriteState>,
}

impl EmbeddingIndex {
    /// Opens the index over whatever chunks `db` already holds. The
    /// established dimension and next sequence number come from the most
    /// recently inserted chunk.
    pub async fn open(db: Arc<SurrealDbClient>) -> Result<Self, AppError> {
        let state = match TextChunk::get_last_inserted(&db).await? {
            Some(last) => WriteState {
                dimension: Some(last.embedding.len()),
                next_seq: last.seq.saturating_add(1),
            },
            None => WriteState::default(),
        };

        debug!(
            dimension = ?state.dimension,
            next_seq = state.next_seq,
            "embedding index opened"
        );

        Ok(Self {
            db,
            state: Mutex::new(state),
        })
    }

    /// Dimension fixed by the first insert, if any.
    pub async fn dimension(&self) -> Option<usize> {
        self.state.lock().await.dimension
    }

    pub async fn len(&self) -> Result<usize, AppError> {
        TextChunk::count(&self.db).await
    }

    pub async fn is_empty(&self) -> Result<bool, AppError> {
        Ok(self.len().await? == 0)
    }

    /// Appends a new chunk and returns its id. Never overwrites.
    #[instrument(skip_all, fields(source = %source))]
    pub async fn insert(
        &self,
        source: &str,
        text: &str,
        embedding: Vec<f32>,
    ) -> Result<String, AppError> {
        let mut state = self.state.lock().await;

        let expected = state.dimension.unwrap_or(embedding.len());
        if embedding.is_empty() || embedding.len() != expected {
            return Err(AppError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }

        let dimension = embedding.len();
        let chunk = TextChunk::new(
            source.to_string(),
            text.to_string(),
            embedding,
            state.next_seq,
        );
        let id = chunk.id.clone();
        self.db.store_item(chunk).await?;

        state.dimension = Some(dimension);
        state.next_seq = state.next_seq.saturating_add(1);

        Ok(id)
    }

    /// Stores all `chunks` of `source` in one transaction and returns their
    /// ids in order. With `replace`, the source's previous chunks are deleted
    /// in the same transaction. Every embedding is checked against the index
    /// dimension first; on any failure nothing is written or deleted.
    #[instrument(skip_all, fields(source = %source, chunks = chunks.len(), replace = replace))]
    pub async fn insert_batch(
        &self,
        source: &str,
        chunks: Vec<(String, Vec<f32>)>,
        replace: bool,
    ) -> Result<Vec<String>, AppError> {
        let mut state = self.state.lock().await;

        let expected = state
            .dimension
            .or_else(|| chunks.first().map(|(_, embedding)| embedding.len()));
        for (_, embedding) in &chunks {
            let expected = expected.unwrap_or(embedding.len());
            if embedding.is_empty() || embedding.len() != expected {
                return Err(AppError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }

        let mut next_seq = state.next_seq;
        let records: Vec<TextChunk> = chunks
            .into_iter()
            .map(|(text, embedding)| {
                let chunk = TextChunk::new(source.to_string(), text, embedding, next_seq);
                next_seq = next_seq.saturating_add(1);
                chunk
            })
            .collect();
        let ids: Vec<String> = records.iter().map(|chunk| chunk.id.clone()).collect();

        TextChunk::store_batch(source, records, replace, &self.db).await?;

        if !ids.is_empty() {
            state.dimension = expected;
        }
        state.next_seq = next_seq;

        Ok(ids)
    }

    /// Drops every chunk of `source`. Only meant for offline re-ingestion;
    /// the query path never deletes.
    pub async fn remove_source(&self, source: &str) -> Result<(), AppError> {
        let _state = self.state.lock().await;
        TextChunk::delete_by_source(source, &self.db).await?;
        info!(source, "removed chunks for source");
        Ok(())
    }

    /// The `min(k, n)` chunks most similar to `query`, best first. Exact score
    /// ties keep insertion order.
    pub async fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, AppError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let chunks = TextChunk::get_all_in_insertion_order(&self.db).await?;

        let mut scored = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.embedding.len() != query.len() {
                return Err(AppError::DimensionMismatch {
                    expected: chunk.embedding.len(),
                    actual: query.len(),
                });
            }
            let score = cosine_similarity(query, &chunk.embedding)?;
            scored.push(RetrievedChunk {
                score,
                text: chunk.chunk,
                source: chunk.source,
            });
        }

        // Stable, so equal scores stay in insertion order
        scored.sort_by(|a, b| by_score_desc(a.score, b.score));
        scored.truncate(k);

        debug!(returned = scored.len(), "top-k scan complete");
        Ok(scored)
    }
}

#[async_trait]
impl ContextRetriever for EmbeddingIndex {
    async fn top_k(&self, query: &[f32], k: usize) -> Result<Vec<RetrievedChunk>, AppError> {
        EmbeddingIndex::top_k(self, query, k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn setup_db() -> Arc<SurrealDbClient> {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");
        Arc::new(db)
    }

    async fn setup_index() -> EmbeddingIndex {
        EmbeddingIndex::open(setup_db().await)
            .await
            .expect("Failed to open index")
    }

    fn texts(results: &[RetrievedChunk]) -> Vec<&str> {
        results.iter().map(|r| r.text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_empty_index_returns_nothing() {
        let index = setup_index().await;

        let results = index.top_k(&[1.0, 0.0], 3).await.expect("top_k");
        assert!(results.is_empty());
        assert!(index.is_empty().await.expect("len"));
        assert_eq!(index.dimension().await, None);
    }

    #[tokio::test]
    async fn test_k_zero_returns_nothing() {
        let index = setup_index().await;
        index
            .insert("doc", "text", vec![1.0, 0.0])
            .await
            .expect("insert");

        let results = index.top_k(&[1.0, 0.0], 0).await.expect("top_k");
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_insert_returns_fresh_ids() {
        let index = setup_index().await;

        let first = index
            .insert("doc", "same text", vec![1.0, 0.0])
            .await
            .expect("insert");
        let second = index
            .insert("doc", "same text", vec![1.0, 0.0])
            .await
            .expect("insert");

        assert_ne!(first, second);
        assert_eq!(index.len().await.expect("len"), 2);
    }

    #[tokio::test]
    async fn test_ranking_is_descending() {
        let index = setup_index().await;
        index
            .insert("doc1", "far", vec![0.0, 1.0])
            .await
            .expect("insert");
        index
            .insert("doc2", "close", vec![0.9, 0.1])
            .await
            .expect("insert");
        index
            .insert("doc3", "middle", vec![0.5, 0.5])
            .await
            .expect("insert");

        let results = index.top_k(&[1.0, 0.0], 10).await.expect("top_k");

        assert_eq!(texts(&results), vec!["close", "middle", "far"]);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(results[0].source, "doc2");
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let index = setup_index().await;
        for name in ["c1", "c2", "c3", "c4"] {
            index
                .insert("doc", name, vec![0.6, 0.8])
                .await
                .expect("insert");
        }
        index
            .insert("doc", "best", vec![1.0, 0.0])
            .await
            .expect("insert");
        // Same direction as c1..c4, different magnitude
        index
            .insert("doc", "c5", vec![1.2, 1.6])
            .await
            .expect("insert");

        let results = index.top_k(&[1.0, 0.0], 10).await.expect("top_k");
        assert_eq!(texts(&results), vec!["best", "c1", "c2", "c3", "c4", "c5"]);
    }

    #[tokio::test]
    async fn test_result_length_is_min_of_k_and_size() {
        let index = setup_index().await;
        for i in 0..5 {
            index
                .insert("doc", &format!("chunk {i}"), vec![1.0, i as f32])
                .await
                .expect("insert");
        }

        assert_eq!(index.top_k(&[1.0, 0.0], 3).await.expect("top_k").len(), 3);
        assert_eq!(index.top_k(&[1.0, 0.0], 5).await.expect("top_k").len(), 5);
        assert_eq!(index.top_k(&[1.0, 0.0], 50).await.expect("top_k").len(), 5);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_on_insert() {
        let index = setup_index().await;
        index
            .insert("doc", "first", vec![1.0, 0.0, 0.0])
            .await
            .expect("insert");

        let result = index.insert("doc", "second", vec![1.0, 0.0]).await;
        assert!(matches!(
            result,
            Err(AppError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
        // Rejected before any write
        assert_eq!(index.len().await.expect("len"), 1);

        let empty = index.insert("doc", "empty", Vec::new()).await;
        assert!(matches!(empty, Err(AppError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_on_query() {
        let index = setup_index().await;
        index
            .insert("doc", "first", vec![1.0, 0.0, 0.0])
            .await
            .expect("insert");

        let result = index.top_k(&[1.0, 0.0], 3).await;
        assert!(matches!(result, Err(AppError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_zero_query_scores_zero() {
        let index = setup_index().await;
        index
            .insert("doc", "a", vec![1.0, 0.0])
            .await
            .expect("insert");
        index
            .insert("doc", "b", vec![0.0, 1.0])
            .await
            .expect("insert");

        let results = index.top_k(&[0.0, 0.0], 2).await.expect("top_k");
        assert_eq!(texts(&results), vec!["a", "b"]);
        assert!(results.iter().all(|r| r.score == 0.0));
    }

    #[tokio::test]
    async fn test_reopen_restores_dimension_and_sequence() {
        let db = setup_db().await;
        {
            let index = EmbeddingIndex::open(Arc::clone(&db))
                .await
                .expect("open");
            index
                .insert("doc", "old", vec![0.6, 0.8])
                .await
                .expect("insert");
        }

        let reopened = EmbeddingIndex::open(db).await.expect("reopen");
        assert_eq!(reopened.dimension().await, Some(2));
        reopened
            .insert("doc", "new", vec![0.6, 0.8])
            .await
            .expect("insert");
        assert!(reopened
            .insert("doc", "wrong", vec![1.0, 0.0, 0.0])
            .await
            .is_err());

        let results = reopened.top_k(&[0.6, 0.8], 2).await.expect("top_k");
        assert_eq!(texts(&results), vec!["old", "new"]);
    }

    #[tokio::test]
    async fn test_insert_batch_assigns_consecutive_sequence_numbers() {
        let index = setup_index().await;
        index
            .insert("a.pdf", "single", vec![0.0, 1.0])
            .await
            .expect("insert");

        let ids = index
            .insert_batch(
                "b.pdf",
                vec![
                    ("b1".to_string(), vec![1.0, 0.0]),
                    ("b2".to_string(), vec![1.0, 0.0]),
                ],
                false,
            )
            .await
            .expect("batch");
        assert_eq!(ids.len(), 2);

        index
            .insert("c.pdf", "after", vec![1.0, 0.0])
            .await
            .expect("insert");

        let results = index.top_k(&[1.0, 0.0], 10).await.expect("top_k");
        assert_eq!(texts(&results), vec!["b1", "b2", "after", "single"]);
    }

    #[tokio::test]
    async fn test_insert_batch_rejects_mixed_dimensions_without_writing() {
        let index = setup_index().await;

        let result = index
            .insert_batch(
                "doc",
                vec![
                    ("ok".to_string(), vec![1.0, 0.0]),
                    ("bad".to_string(), vec![1.0, 0.0, 0.0]),
                ],
                false,
            )
            .await;

        assert!(matches!(
            result,
            Err(AppError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(index.is_empty().await.expect("len"));
        assert_eq!(index.dimension().await, None);
    }

    #[tokio::test]
    async fn test_insert_batch_with_replace_swaps_source_chunks() {
        let index = setup_index().await;
        index
            .insert("a.pdf", "old", vec![1.0, 0.0])
            .await
            .expect("insert");
        index
            .insert("b.pdf", "kept", vec![0.0, 1.0])
            .await
            .expect("insert");

        index
            .insert_batch("a.pdf", vec![("new".to_string(), vec![1.0, 0.0])], true)
            .await
            .expect("batch");

        let results = index.top_k(&[1.0, 0.0], 10).await.expect("top_k");
        assert_eq!(texts(&results), vec!["new", "kept"]);
    }

    #[tokio::test]
    async fn test_remove_source() {
        let index = setup_index().await;
        index
            .insert("a.pdf", "from a", vec![1.0, 0.0])
            .await
            .expect("insert");
        index
            .insert("b.pdf", "from b", vec![1.0, 0.0])
            .await
            .expect("insert");

        index.remove_source("a.pdf").await.expect("remove");

        let results = index.top_k(&[1.0, 0.0], 10).await.expect("top_k");
        assert_eq!(texts(&results), vec!["from b"]);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_get_distinct_sequence_numbers() {
        let index = Arc::new(setup_index().await);

        let mut handles = Vec::new();
        for i in 0..10 {
            let index = Arc::clone(&index);
            handles.push(tokio::spawn(async move {
                index
                    .insert("doc", &format!("chunk {i}"), vec![1.0, 1.0])
                    .await
                    .expect("insert");
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked");
        }

        let chunks = TextChunk::get_all_in_insertion_order(&index.db)
            .await
            .expect("query");
        let seqs: Vec<u64> = chunks.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, (0..10).collect::<Vec<u64>>());
    }
}
