pub mod chunker;
pub mod extraction;
pub mod pipeline;

pub use chunker::ChunkingConfig;
pub use pipeline::{IngestionPipeline, IngestionReport};
