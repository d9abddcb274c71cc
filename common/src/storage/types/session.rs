use async_trait::async_trait;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const DEFAULT_SESSION_LABEL: &str = "New conversation";
pub const DEFAULT_SYSTEM_CONTEXT: &str = "You are an expert and helpful automotive assistant.";

stored_object!(Session, "session", {
    owner: String,
    label: String,
    system_context: String
});

impl Session {
    pub fn new(owner: String, label: Option<String>, system_context: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner,
            label: label.unwrap_or_else(|| DEFAULT_SESSION_LABEL.to_string()),
            system_context: system_context.unwrap_or_else(|| DEFAULT_SYSTEM_CONTEXT.to_string()),
        }
    }

    /// Sessions belonging to `owner`, oldest first.
    pub async fn list_for_owner(owner: &str, db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let sessions: Vec<Session> = db
            .client
            .query("SELECT * FROM type::table($table_name) WHERE owner = $owner ORDER BY created_at")
            .bind(("table_name", Self::table_name()))
            .bind(("owner", owner.to_string()))
            .await?
            .take(0)?;

        Ok(sessions)
    }

    /// Resolves a session and checks it belongs to `user_id`.
    pub async fn get_owned(
        id: &str,
        user_id: &str,
        provider: &dyn SessionProvider,
    ) -> Result<Self, AppError> {
        let session = provider
            .get_session(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))?;

        if session.owner != user_id {
            return Err(AppError::Auth(
                "You don't have access to this session".to_string(),
            ));
        }

        Ok(session)
    }
}

/// Resolves session ids for the answer pipeline. `Ok(None)` means the
/// session does not exist.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, AppError>;
}

#[async_trait]
impl SessionProvider for SurrealDbClient {
    async fn get_session(&self, id: &str) -> Result<Option<Session>, AppError> {
        Ok(self.get_item::<Session>(id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[test]
    fn test_new_session_defaults() {
        let session = Session::new("user_1".into(), None, None);

        assert_eq!(session.owner, "user_1");
        assert_eq!(session.label, DEFAULT_SESSION_LABEL);
        assert_eq!(session.system_context, DEFAULT_SYSTEM_CONTEXT);
        assert!(!session.id.is_empty());
    }

    #[tokio::test]
    async fn test_get_session_through_provider() {
        let db = setup_db().await;
        let session = Session::new(
            "user_1".into(),
            Some("Maintenance".into()),
            Some("You are a mechanic.".into()),
        );
        db.store_item(session.clone())
            .await
            .expect("Failed to store session");

        let found = db
            .get_session(&session.id)
            .await
            .expect("lookup failed")
            .expect("session missing");
        assert_eq!(found.label, "Maintenance");
        assert_eq!(found.system_context, "You are a mechanic.");

        let missing = db.get_session("nonexistent").await.expect("lookup failed");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_get_owned_checks_owner() {
        let db = setup_db().await;
        let session = Session::new("owner".into(), None, None);
        db.store_item(session.clone())
            .await
            .expect("Failed to store session");

        let owned = Session::get_owned(&session.id, "owner", &db).await;
        assert!(owned.is_ok());

        match Session::get_owned(&session.id, "intruder", &db).await {
            Err(AppError::Auth(_)) => {}
            other => panic!("Expected Auth error, got {other:?}"),
        }

        match Session::get_owned("nonexistent", "owner", &db).await {
            Err(AppError::NotFound(_)) => {}
            other => panic!("Expected NotFound error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_for_owner() {
        let db = setup_db().await;
        for label in ["first", "second"] {
            db.store_item(Session::new("alice".into(), Some(label.into()), None))
                .await
                .expect("Failed to store session");
        }
        db.store_item(Session::new("bob".into(), None, None))
            .await
            .expect("Failed to store session");

        let sessions = Session::list_for_owner("alice", &db)
            .await
            .expect("Failed to list sessions");
        assert_eq!(sessions.len(), 2);
        assert!(sessions.iter().all(|s| s.owner == "alice"));

        let none = Session::list_for_owner("carol", &db)
            .await
            .expect("Failed to list sessions");
        assert!(none.is_empty());
    }
}
