use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::embedding::EmbeddingBackend;
use crate::storage::types::session::DEFAULT_SYSTEM_CONTEXT;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_surrealdb_address")]
    pub surrealdb_address: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_username: String,
    #[serde(default = "default_surrealdb_credential")]
    pub surrealdb_password: String,
    #[serde(default = "default_surrealdb_namespace")]
    pub surrealdb_namespace: String,
    #[serde(default = "default_surrealdb_database")]
    pub surrealdb_database: String,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default)]
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_chunk_window")]
    pub chunk_window: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_embedding_timeout_secs")]
    pub embedding_timeout_secs: u64,
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    #[serde(default = "default_system_context")]
    pub default_system_context: String,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_surrealdb_address() -> String {
    "surrealkv://docchat.db".to_string()
}

fn default_surrealdb_credential() -> String {
    "root".to_string()
}

fn default_surrealdb_namespace() -> String {
    "docchat".to_string()
}

fn default_surrealdb_database() -> String {
    "docchat".to_string()
}

fn default_embedding_dimensions() -> u32 {
    384
}

fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_output_tokens() -> u32 {
    512
}

fn default_retrieval_top_k() -> usize {
    3
}

fn default_chunk_window() -> usize {
    800
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_embedding_timeout_secs() -> u64 {
    30
}

fn default_generation_timeout_secs() -> u64 {
    120
}

fn default_system_context() -> String {
    DEFAULT_SYSTEM_CONTEXT.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            surrealdb_address: default_surrealdb_address(),
            surrealdb_username: default_surrealdb_credential(),
            surrealdb_password: default_surrealdb_credential(),
            surrealdb_namespace: default_surrealdb_namespace(),
            surrealdb_database: default_surrealdb_database(),
            embedding_backend: EmbeddingBackend::default(),
            embedding_model: None,
            embedding_dimensions: default_embedding_dimensions(),
            generation_model: default_generation_model(),
            max_output_tokens: default_max_output_tokens(),
            retrieval_top_k: default_retrieval_top_k(),
            chunk_window: default_chunk_window(),
            chunk_overlap: default_chunk_overlap(),
            embedding_timeout_secs: default_embedding_timeout_secs(),
            generation_timeout_secs: default_generation_timeout_secs(),
            default_system_context: default_system_context(),
        }
    }
}

/// Reads an optional `config` file (any format the config crate knows) and
/// then environment variables, which take precedence.
pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: AppConfig = Config::builder()
            .build()
            .expect("empty config")
            .try_deserialize()
            .expect("defaults should deserialize");

        assert_eq!(config.retrieval_top_k, 3);
        assert_eq!(config.max_output_tokens, 512);
        assert_eq!(config.chunk_window, 800);
        assert_eq!(config.chunk_overlap, 100);
        assert_eq!(config.embedding_backend, EmbeddingBackend::FastEmbed);
        assert_eq!(config.surrealdb_address, "surrealkv://docchat.db");
    }

    #[test]
    fn test_overrides_from_source() {
        let config: AppConfig = Config::builder()
            .add_source(File::from_str(
                r#"{"embedding_backend": "hashed", "retrieval_top_k": 5, "chunk_overlap": 0}"#,
                FileFormat::Json,
            ))
            .build()
            .expect("config")
            .try_deserialize()
            .expect("config should deserialize");

        assert_eq!(config.embedding_backend, EmbeddingBackend::Hashed);
        assert_eq!(config.retrieval_top_k, 5);
        assert_eq!(config.chunk_overlap, 0);
    }
}
