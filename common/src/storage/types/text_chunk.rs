use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};
use surrealdb::sql::Thing;
use uuid::Uuid;

stored_object!(TextChunk, "text_chunk", {
    source: String,
    chunk: String,
    embedding: Vec<f32>,
    seq: u64
});

impl TextChunk {
    pub fn new(source: String, chunk: String, embedding: Vec<f32>, seq: u64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            source,
            chunk,
            embedding,
            seq,
        }
    }

    /// All chunks in insertion order.
    pub async fn get_all_in_insertion_order(
        db_client: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let chunks: Vec<TextChunk> = db_client
            .client
            .query("SELECT * FROM type::table($table_name) ORDER BY seq ASC")
            .bind(("table_name", Self::table_name()))
            .await?
            .take(0)?;

        Ok(chunks)
    }

    /// The most recently inserted chunk, if any.
    pub async fn get_last_inserted(db_client: &SurrealDbClient) -> Result<Option<Self>, AppError> {
        let mut chunks: Vec<TextChunk> = db_client
            .client
            .query("SELECT * FROM type::table($table_name) ORDER BY seq DESC LIMIT 1")
            .bind(("table_name", Self::table_name()))
            .await?
            .take(0)?;

        Ok(chunks.pop())
    }

    pub async fn count(db_client: &SurrealDbClient) -> Result<usize, AppError> {
        #[derive(Deserialize)]
        struct CountRow {
            count: usize,
        }

        let rows: Vec<CountRow> = db_client
            .client
            .query("SELECT count() AS count FROM type::table($table_name) GROUP ALL")
            .bind(("table_name", Self::table_name()))
            .await?
            .take(0)?;

        Ok(rows.first().map_or(0, |row| row.count))
    }

    pub async fn delete_by_source(
        source: &str,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db_client
            .client
            .query(format!(
                "DELETE {} WHERE source = $source",
                Self::table_name()
            ))
            .bind(("source", source.to_string()))
            .await?;

        Ok(())
    }

    /// Creates `chunks` in one transaction, first deleting the existing
    /// chunks of `source` when `replace` is set.
    pub async fn store_batch(
        source: &str,
        chunks: Vec<Self>,
        replace: bool,
        db_client: &SurrealDbClient,
    ) -> Result<(), AppError> {
        let mut transaction_query = String::from("BEGIN TRANSACTION;");
        if replace {
            transaction_query.push_str(&format!(
                "DELETE {} WHERE source = $source;",
                Self::table_name()
            ));
        }
        for index in 0..chunks.len() {
            transaction_query.push_str(&format!("CREATE $record_{index} CONTENT $chunk_{index};"));
        }
        transaction_query.push_str("COMMIT TRANSACTION;");

        let mut query = db_client
            .client
            .query(transaction_query)
            .bind(("source", source.to_string()));
        for (index, chunk) in chunks.into_iter().enumerate() {
            query = query
                .bind((
                    format!("record_{index}"),
                    Thing::from((Self::table_name(), chunk.id.as_str())),
                ))
                .bind((format!("chunk_{index}"), chunk));
        }
        query.await?.check()?;

        Ok(())
    }
}
