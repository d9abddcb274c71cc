use std::{sync::Arc, time::Duration};

use common::{
    error::AppError,
    storage::{
        session_memory::SessionMemory,
        types::session::{Session, SessionProvider},
    },
    utils::{config::AppConfig, embedding::Embedder, generation::Generator},
};
use serde::Serialize;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::{index::ContextRetriever, prompt::build_prompt, RetrievedChunk};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnswerConfig {
    pub top_k: usize,
    pub max_output_tokens: u32,
    pub embedding_timeout: Duration,
    pub generation_timeout: Duration,
}

impl Default for AnswerConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            max_output_tokens: 512,
            embedding_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(120),
        }
    }
}

impl From<&AppConfig> for AnswerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            top_k: config.retrieval_top_k,
            max_output_tokens: config.max_output_tokens,
            embedding_timeout: Duration::from_secs(config.embedding_timeout_secs),
            generation_timeout: Duration::from_secs(config.generation_timeout_secs),
        }
    }
}

/// A chunk cited in an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReference {
    pub text: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub content: String,
    /// Chunks used as context, in retrieval rank order.
    pub sources: Vec<SourceReference>,
}

/// Answers questions inside a session: history + retrieved context +
/// question go to the generation backend, and the exchange is recorded.
///
/// Failure handling is asymmetric. Retrieval is best-effort and
/// degrades to an empty context. Generation failure is fatal and leaves the
/// history untouched. Recording the exchange is best-effort; the answer is
/// returned even if the append fails.
pub struct AnswerPipeline {
    memory: Arc<SessionMemory>,
    retriever: Arc<dyn ContextRetriever>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    sessions: Arc<dyn SessionProvider>,
    config: AnswerConfig,
}

impl AnswerPipeline {
    pub fn new(
        memory: Arc<SessionMemory>,
        retriever: Arc<dyn ContextRetriever>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        sessions: Arc<dyn SessionProvider>,
        config: AnswerConfig,
    ) -> Self {
        Self {
            memory,
            retriever,
            embedder,
            generator,
            sessions,
            config,
        }
    }

    /// Resolves `session_id` for `user_id` and answers within it. Unknown
    /// sessions fail with `NotFound`, sessions of other users with `Auth`.
    pub async fn answer_for(
        &self,
        session_id: &str,
        user_id: &str,
        question: &str,
    ) -> Result<Answer, AppError> {
        let session = Session::get_owned(session_id, user_id, self.sessions.as_ref()).await?;
        self.answer(&session, question).await
    }

    #[instrument(skip_all, fields(session_id = %session.id))]
    pub async fn answer(&self, session: &Session, question: &str) -> Result<Answer, AppError> {
        let history = self.memory.history(&session.id).await?;
        debug!(turns = history.len(), "loaded session history");

        let context = self.retrieve_context(question).await;

        let prompt = build_prompt(&session.system_context, &history, &context, question);

        let completion = match timeout(
            self.config.generation_timeout,
            self.generator
                .generate(&prompt, self.config.max_output_tokens),
        )
        .await
        {
            Ok(Ok(completion)) => completion,
            Ok(Err(AppError::Generation(message))) => return Err(AppError::Generation(message)),
            Ok(Err(err)) => return Err(AppError::Generation(err.to_string())),
            Err(_) => {
                return Err(AppError::Generation(format!(
                    "generation timed out after {:?}",
                    self.config.generation_timeout
                )))
            }
        };
        let content = completion.trim().to_string();

        if let Err(err) = self
            .memory
            .append_exchange(&session.id, question, &content)
            .await
        {
            warn!(error = %err, "failed to persist exchange; returning answer anyway");
        }

        let sources = context
            .into_iter()
            .map(|chunk| SourceReference {
                text: chunk.text,
                source: chunk.source,
            })
            .collect::<Vec<_>>();

        info!(sources = sources.len(), "answer generated");
        Ok(Answer { content, sources })
    }

    /// Embeds the question and fetches the top chunks. Any failure yields an
    /// empty context instead of an error.
    async fn retrieve_context(&self, question: &str) -> Vec<RetrievedChunk> {
        let embedding = match timeout(
            self.config.embedding_timeout,
            self.embedder.embed(question),
        )
        .await
        {
            Ok(Ok(embedding)) => embedding,
            Ok(Err(err)) => {
                warn!(error = %err, "retrieval degraded: embedding failed");
                return Vec::new();
            }
            Err(_) => {
                warn!(
                    timeout = ?self.config.embedding_timeout,
                    "retrieval degraded: embedding timed out"
                );
                return Vec::new();
            }
        };

        match self.retriever.top_k(&embedding, self.config.top_k).await {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(error = %err, "retrieval degraded: index lookup failed");
                Vec::new()
            }
        }
    }
}
