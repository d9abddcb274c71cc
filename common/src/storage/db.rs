use super::types::StoredObject;
use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};
use tracing::debug;

/// Storage handle injected into every component that persists state.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connects to `address` (e.g. `ws://localhost:8000`, `surrealkv://docchat.db`
    /// or `mem://`) and selects `namespace`/`database`.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        // Embedded engines have no root user to sign in with
        let embedded = ["mem://", "surrealkv://"]
            .iter()
            .any(|scheme| address.starts_with(scheme));
        if !embedded {
            db.signin(Root { username, password }).await?;
        }

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines the secondary indexes the query paths rely on. Idempotent.
    pub async fn ensure_initialized(&self) -> Result<(), Error> {
        debug!("Ensuring database indexes");
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_text_chunk_seq ON text_chunk FIELDS seq")
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_text_chunk_source ON text_chunk FIELDS source")
            .await?;
        self.client
            .query(
                "DEFINE INDEX IF NOT EXISTS idx_message_session ON message FIELDS session_id, timestamp",
            )
            .await?;
        self.client
            .query("DEFINE INDEX IF NOT EXISTS idx_session_owner ON session FIELDS owner")
            .await?;

        Ok(())
    }

    /// Creates `item` under its own id. Fails if the id is already taken.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}
