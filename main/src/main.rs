use std::{path::PathBuf, sync::Arc};

use async_openai::{config::OpenAIConfig, Client};
use clap::{Parser, Subcommand};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        session_memory::SessionMemory,
        types::{
            message::{Message, MessageRole},
            session::{Session, SessionProvider},
        },
    },
    utils::{
        config::{get_config, AppConfig},
        embedding::{Embedder, EmbeddingProvider},
        generation::OpenAiGenerator,
    },
};
use ingestion_pipeline::{ChunkingConfig, IngestionPipeline};
use retrieval_pipeline::{AnswerConfig, AnswerPipeline, EmbeddingIndex};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "docchat", about = "Ask questions about your documents")]
struct Cli {
    /// Identity the session commands act as.
    #[arg(long, global = true, default_value = "local")]
    user: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Chunk, embed and index documents (plain text or PDF).
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Drop chunks previously ingested from a file of the same name.
        #[arg(long)]
        replace: bool,
    },
    /// Session management.
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// List the user's sessions.
    Sessions,
    /// Ask a question within a session.
    Ask { session_id: String, question: String },
    /// Print a session's conversation history.
    History { session_id: String },
}

#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Start a new session.
    New {
        #[arg(long)]
        label: Option<String>,
        /// Persona preamble for every prompt in this session.
        #[arg(long)]
        system_context: Option<String>,
    },
}

#[derive(Serialize)]
struct HistoryEntry<'a> {
    role: MessageRole,
    content: &'a str,
    timestamp: String,
}

impl<'a> From<&'a Message> for HistoryEntry<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            role: message.role,
            content: &message.content,
            timestamp: message.timestamp.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct SessionEntry<'a> {
    id: &'a str,
    label: &'a str,
    system_context: &'a str,
    created_at: String,
}

impl<'a> From<&'a Session> for SessionEntry<'a> {
    fn from(session: &'a Session) -> Self {
        Self {
            id: &session.id,
            label: &session.label,
            system_context: &session.system_context,
            created_at: session.created_at.to_rfc3339(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let openai_client = Arc::new(Client::with_config(
        OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    match cli.command {
        Command::Ingest { paths, replace } => {
            let embedder = embedding_provider(&config, &openai_client).await?;
            let index = Arc::new(EmbeddingIndex::open(Arc::clone(&db)).await?);
            let pipeline = IngestionPipeline::new(
                index,
                embedder,
                ChunkingConfig::new(config.chunk_window, config.chunk_overlap)?,
            )?;

            for path in paths {
                let report = pipeline.ingest_file(&path, replace).await?;
                print_json(&report)?;
            }
        }
        Command::Session {
            command:
                SessionCommand::New {
                    label,
                    system_context,
                },
        } => {
            let session = Session::new(
                cli.user,
                label,
                Some(system_context.unwrap_or_else(|| config.default_system_context.clone())),
            );
            db.store_item(session.clone()).await?;
            info!(session_id = %session.id, "session created");
            print_json(&SessionEntry::from(&session))?;
        }
        Command::Sessions => {
            let sessions = Session::list_for_owner(&cli.user, &db).await?;
            let entries: Vec<SessionEntry<'_>> = sessions.iter().map(SessionEntry::from).collect();
            print_json(&entries)?;
        }
        Command::Ask {
            session_id,
            question,
        } => {
            let embedder = embedding_provider(&config, &openai_client).await?;
            let index = Arc::new(EmbeddingIndex::open(Arc::clone(&db)).await?);
            let generator = Arc::new(OpenAiGenerator::from_config(
                &config,
                Arc::clone(&openai_client),
            ));
            let pipeline = AnswerPipeline::new(
                Arc::new(SessionMemory::new(Arc::clone(&db))),
                index,
                embedder,
                generator,
                Arc::clone(&db) as Arc<dyn SessionProvider>,
                AnswerConfig::from(&config),
            );

            let answer = pipeline.answer_for(&session_id, &cli.user, &question).await?;
            print_json(&answer)?;
        }
        Command::History { session_id } => {
            Session::get_owned(&session_id, &cli.user, db.as_ref()).await?;
            let history = SessionMemory::new(Arc::clone(&db))
                .history(&session_id)
                .await?;
            let entries: Vec<HistoryEntry<'_>> = history.iter().map(HistoryEntry::from).collect();
            print_json(&entries)?;
        }
    }

    Ok(())
}

async fn embedding_provider(
    config: &AppConfig,
    openai_client: &Arc<Client<OpenAIConfig>>,
) -> Result<Arc<dyn Embedder>, AppError> {
    let provider = EmbeddingProvider::from_config(config, Some(Arc::clone(openai_client))).await?;
    info!(
        embedding_backend = provider.backend().as_str(),
        embedding_dimension = provider.dimension(),
        "Embedding provider initialized"
    );
    Ok(Arc::new(provider))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_ask_with_user() {
        let cli = Cli::try_parse_from([
            "docchat",
            "--user",
            "alice",
            "ask",
            "session-1",
            "When should I change the oil?",
        ])
        .expect("parse");

        assert_eq!(cli.user, "alice");
        assert!(matches!(
            cli.command,
            Command::Ask { ref session_id, ref question }
                if session_id == "session-1" && question == "When should I change the oil?"
        ));
    }

    #[test]
    fn test_parses_ingest_and_session_new() {
        let cli = Cli::try_parse_from(["docchat", "ingest", "a.pdf", "b.txt", "--replace"])
            .expect("parse");
        assert_eq!(cli.user, "local");
        match cli.command {
            Command::Ingest { paths, replace } => {
                assert_eq!(paths, vec![PathBuf::from("a.pdf"), PathBuf::from("b.txt")]);
                assert!(replace);
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from(["docchat", "session", "new", "--label", "Car care"])
            .expect("parse");
        assert!(matches!(
            cli.command,
            Command::Session {
                command: SessionCommand::New { label: Some(ref l), system_context: None }
            } if l == "Car care"
        ));
    }

    #[test]
    fn test_ingest_requires_a_path() {
        assert!(Cli::try_parse_from(["docchat", "ingest"]).is_err());
    }
}
