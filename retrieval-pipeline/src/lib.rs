pub mod answer;
pub mod index;
pub mod prompt;
pub mod scoring;

pub use answer::{Answer, AnswerConfig, AnswerPipeline, SourceReference};
pub use index::{ContextRetriever, EmbeddingIndex};

/// A stored chunk paired with its similarity to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub score: f32,
    pub text: String,
    pub source: String,
}
