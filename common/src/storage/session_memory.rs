use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex},
};

use chrono::{DateTime, Duration, Utc};
use surrealdb::sql::Thing;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            message::{Message, MessageRole},
            StoredObject,
        },
    },
};

/// Source of wall-clock time for turn timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Append-only, time-ordered log of conversation turns keyed by session id.
///
/// Appends to one session are serialized in-process, and every new turn gets
/// a timestamp strictly after the session's previous one. A clock that jumps
/// backwards is clamped forward so the stored order always matches call
/// order.
pub struct SessionMemory {
    db: Arc<SurrealDbClient>,
    clock: Arc<dyn Clock>,
    session_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionMemory {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self::with_clock(db, Arc::new(SystemClock))
    }

    pub fn with_clock(db: Arc<SurrealDbClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            clock,
            session_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Turns of `session_id` in timestamp order. Unknown sessions have no
    /// history yet and yield an empty list.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        let messages: Vec<Message> = self
            .db
            .client
            .query(
                "SELECT * FROM type::table($table_name) WHERE session_id = $session_id ORDER BY timestamp ASC",
            )
            .bind(("table_name", Message::table_name()))
            .bind(("session_id", session_id.to_string()))
            .await?
            .take(0)?;

        Ok(messages)
    }

    pub async fn append(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
    ) -> Result<Message, AppError> {
        let lock = self.session_lock(session_id)?;
        let result = async {
            let _guard = lock.lock().await;
            let last = self.last_timestamp(session_id).await?;
            let message = self.next_message(session_id, role, content, last);
            self.store_turns(std::slice::from_ref(&message)).await?;
            Ok::<_, AppError>(message)
        }
        .await;
        self.release_session_lock(session_id, lock);
        result
    }

    /// Appends the user question followed by the assistant answer in one
    /// transaction. Either both turns are stored or neither is, and no other
    /// append to the same session can land in between.
    pub async fn append_exchange(
        &self,
        session_id: &str,
        question: &str,
        answer: &str,
    ) -> Result<(Message, Message), AppError> {
        let lock = self.session_lock(session_id)?;
        let result = async {
            let _guard = lock.lock().await;
            let last = self.last_timestamp(session_id).await?;
            let user = self.next_message(session_id, MessageRole::User, question, last);
            let assistant = self.next_message(
                session_id,
                MessageRole::Assistant,
                answer,
                Some(user.timestamp),
            );
            self.store_turns(&[user.clone(), assistant.clone()]).await?;
            Ok::<_, AppError>((user, assistant))
        }
        .await;
        self.release_session_lock(session_id, lock);
        result
    }

    fn next_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        last: Option<DateTime<Utc>>,
    ) -> Message {
        let timestamp = next_timestamp(self.clock.now(), last);
        debug!(session_id, %role, %timestamp, "appending turn");
        Message::new(
            session_id.to_string(),
            role,
            content.to_string(),
            timestamp,
        )
    }

    /// Writes `turns` inside a single transaction.
    async fn store_turns(&self, turns: &[Message]) -> Result<(), AppError> {
        let mut transaction_query = String::from("BEGIN TRANSACTION;");
        for index in 0..turns.len() {
            transaction_query.push_str(&format!("CREATE $record_{index} CONTENT $turn_{index};"));
        }
        transaction_query.push_str("COMMIT TRANSACTION;");

        let mut query = self.db.client.query(transaction_query);
        for (index, turn) in turns.iter().enumerate() {
            query = query
                .bind((
                    format!("record_{index}"),
                    Thing::from((Message::table_name(), turn.id.as_str())),
                ))
                .bind((format!("turn_{index}"), turn.clone()));
        }
        query.await?.check()?;

        Ok(())
    }

    async fn last_timestamp(&self, session_id: &str) -> Result<Option<DateTime<Utc>>, AppError> {
        let mut latest: Vec<Message> = self
            .db
            .client
            .query(
                "SELECT * FROM type::table($table_name) WHERE session_id = $session_id ORDER BY timestamp DESC LIMIT 1",
            )
            .bind(("table_name", Message::table_name()))
            .bind(("session_id", session_id.to_string()))
            .await?
            .take(0)?;

        Ok(latest.pop().map(|message| message.timestamp))
    }

    fn session_lock(&self, session_id: &str) -> Result<Arc<Mutex<()>>, AppError> {
        let mut locks = self
            .session_locks
            .lock()
            .map_err(|_| AppError::InternalError("session lock map poisoned".into()))?;

        Ok(Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        ))
    }

    /// Drops the map entry once no other caller holds or waits on the lock.
    /// Clones are only taken under the map lock, so the count is stable here.
    fn release_session_lock(&self, session_id: &str, lock: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.session_locks.lock() else {
            return;
        };
        let unshared = locks
            .get(session_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &lock) && Arc::strong_count(&lock) == 2);
        if unshared {
            locks.remove(session_id);
        }
    }
}

/// Never earlier than the previous turn, and one microsecond past it when the
/// clock has not moved on.
pub fn next_timestamp(now: DateTime<Utc>, last: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last {
        Some(last) => {
            let floor = last
                .checked_add_signed(Duration::microseconds(1))
                .unwrap_or(last);
            now.max(floor)
        }
        None => now,
    }
}
