//! libSQL store backend — async implementations of the store contracts over a
//! local database file (or `:memory:` for tests).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::survey::state::ConversationPhase;

use super::traits::{
    Conversation, ConversationStore, NewUser, Preference, PreferenceStore, User, UserStore,
};

/// libSQL database backend.
///
/// Stores a single connection reused for all operations; `libsql::Connection`
/// is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Connection(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Connection(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id TEXT PRIMARY KEY,
                    phone_number TEXT NOT NULL UNIQUE,
                    first_name TEXT,
                    last_name TEXT,
                    email TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    digest_paused INTEGER NOT NULL DEFAULT 0,
                    survey_started_at TEXT,
                    survey_completed_at TEXT,
                    last_activity_at TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_users_phone ON users(phone_number);
                CREATE INDEX IF NOT EXISTS idx_users_survey
                    ON users(survey_completed_at, survey_started_at, digest_paused);

                CREATE TABLE IF NOT EXISTS conversations (
                    id TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL UNIQUE,
                    phase TEXT NOT NULL,
                    last_activity_at TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_conversations_user ON conversations(user_id);

                CREATE TABLE IF NOT EXISTS preferences (
                    user_id TEXT NOT NULL,
                    question_key TEXT NOT NULL,
                    answer TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, question_key)
                );",
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("init_schema: {e}")))?;

        debug!("Schema initialized");
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 datetime string (our canonical write format).
fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Map a libsql row to a User.
///
/// Column order: 0:id, 1:phone_number, 2:first_name, 3:last_name, 4:email,
/// 5:is_active, 6:digest_paused, 7:survey_started_at, 8:survey_completed_at,
/// 9:last_activity_at, 10:created_at
const USER_COLUMNS: &str = "id, phone_number, first_name, last_name, email, is_active, \
     digest_paused, survey_started_at, survey_completed_at, last_activity_at, created_at";

fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("user id: {e}")))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("user id {id_str}: {e}")))?;

    let get_str = |i: i32| -> Result<String, DatabaseError> {
        row.get(i)
            .map_err(|e| DatabaseError::Query(format!("user column {i}: {e}")))
    };
    let get_opt = |i: i32| -> Option<String> { row.get(i).ok().flatten() };

    let is_active: i64 = row
        .get(5)
        .map_err(|e| DatabaseError::Query(format!("user is_active: {e}")))?;
    let digest_paused: i64 = row
        .get(6)
        .map_err(|e| DatabaseError::Query(format!("user digest_paused: {e}")))?;

    Ok(User {
        id,
        phone_number: get_str(1)?,
        first_name: get_opt(2),
        last_name: get_opt(3),
        email: get_opt(4),
        is_active: is_active != 0,
        digest_paused: digest_paused != 0,
        survey_started_at: parse_optional_datetime(&get_opt(7)),
        survey_completed_at: parse_optional_datetime(&get_opt(8)),
        last_activity_at: parse_datetime(&get_str(9)?),
        created_at: parse_datetime(&get_str(10)?),
    })
}

fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, DatabaseError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("conversation id: {e}")))?;
    let user_id_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("conversation user_id: {e}")))?;
    let phase_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("conversation phase: {e}")))?;
    let last_activity: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("conversation last_activity_at: {e}")))?;
    let created: String = row
        .get(4)
        .map_err(|e| DatabaseError::Query(format!("conversation created_at: {e}")))?;

    Ok(Conversation {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| DatabaseError::Serialization(format!("conversation id: {e}")))?,
        user_id: Uuid::parse_str(&user_id_str)
            .map_err(|e| DatabaseError::Serialization(format!("conversation user_id: {e}")))?,
        phase: ConversationPhase::from_storage_str(&phase_str).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown conversation phase: {phase_str}"))
        })?,
        last_activity_at: parse_datetime(&last_activity),
        created_at: parse_datetime(&created),
    })
}

#[async_trait]
impl UserStore for LibSqlBackend {
    async fn create(&self, new_user: NewUser) -> Result<User, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now();
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO users (id, phone_number, first_name, last_name, email, is_active, \
             digest_paused, last_activity_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 1, 0, ?6, ?6, ?6)",
            params![
                id.to_string(),
                new_user.phone_number.clone(),
                new_user.first_name.clone(),
                new_user.last_name.clone(),
                new_user.email.clone(),
                now.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| match e {
            libsql::Error::SqliteFailure(_, ref msg) if msg.contains("UNIQUE") => {
                DatabaseError::Constraint(format!(
                    "user with phone {} already exists",
                    new_user.phone_number
                ))
            }
            other => DatabaseError::Query(format!("create user: {other}")),
        })?;

        debug!(user_id = %id, "User created");
        Ok(User {
            id,
            phone_number: new_user.phone_number,
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            email: new_user.email,
            is_active: true,
            digest_paused: false,
            survey_started_at: None,
            survey_completed_at: None,
            last_activity_at: now,
            created_at: now,
        })
    }

    async fn get_by_phone(&self, phone_number: &str) -> Result<Option<User>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE phone_number = ?1"),
                params![phone_number],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_by_phone: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_by_phone: {e}"))),
        }
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_by_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_user(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_by_id: {e}"))),
        }
    }

    async fn touch_activity(&self, id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE users SET last_activity_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("touch_activity: {e}")))?;
        Ok(())
    }

    async fn mark_survey_started(&self, id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        // Set-once: the WHERE clause keeps the first timestamp
        self.conn()
            .execute(
                "UPDATE users SET survey_started_at = ?1, updated_at = ?1 \
                 WHERE id = ?2 AND survey_started_at IS NULL",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_survey_started: {e}")))?;
        Ok(())
    }

    async fn mark_survey_completed(&self, id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE users SET survey_completed_at = ?1, updated_at = ?1 \
                 WHERE id = ?2 AND survey_completed_at IS NULL",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_survey_completed: {e}")))?;
        Ok(())
    }

    async fn pause_digest(&self, id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE users SET digest_paused = 1, updated_at = ?1 WHERE id = ?2",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("pause_digest: {e}")))?;
        Ok(())
    }

    async fn resume_digest(&self, id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE users SET digest_paused = 0, updated_at = ?1 WHERE id = ?2",
                params![now, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("resume_digest: {e}")))?;
        Ok(())
    }

    async fn find_dormant(&self, threshold_days: i64) -> Result<Vec<User>, DatabaseError> {
        let cutoff = (Utc::now() - Duration::days(threshold_days)).to_rfc3339();
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users \
                     WHERE survey_completed_at IS NULL \
                       AND survey_started_at IS NOT NULL \
                       AND survey_started_at < ?1 \
                       AND digest_paused = 0 \
                       AND is_active = 1"
                ),
                params![cutoff],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_dormant: {e}")))?;

        let mut users = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_user(&row) {
                Ok(user) => users.push(user),
                Err(e) => {
                    tracing::warn!("Skipping user row: {e}");
                }
            }
        }
        Ok(users)
    }
}

#[async_trait]
impl ConversationStore for LibSqlBackend {
    async fn create(
        &self,
        user_id: Uuid,
        initial_phase: ConversationPhase,
    ) -> Result<Conversation, DatabaseError> {
        let conn = self.conn();
        let now = Utc::now();
        let id = Uuid::new_v4();
        conn.execute(
            "INSERT INTO conversations (id, user_id, phase, last_activity_at, created_at, \
             updated_at) VALUES (?1, ?2, ?3, ?4, ?4, ?4)",
            params![
                id.to_string(),
                user_id.to_string(),
                initial_phase.as_storage_str(),
                now.to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| match e {
            libsql::Error::SqliteFailure(_, ref msg) if msg.contains("UNIQUE") => {
                DatabaseError::Constraint(format!("user {user_id} already has a conversation"))
            }
            other => DatabaseError::Query(format!("create conversation: {other}")),
        })?;

        debug!(conversation_id = %id, user_id = %user_id, "Conversation created");
        Ok(Conversation {
            id,
            user_id,
            phase: initial_phase,
            last_activity_at: now,
            created_at: now,
        })
    }

    async fn get_by_user(&self, user_id: Uuid) -> Result<Option<Conversation>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT id, user_id, phase, last_activity_at, created_at FROM conversations \
                 WHERE user_id = ?1",
                params![user_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_by_user: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_conversation(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_by_user: {e}"))),
        }
    }

    async fn update_phase(
        &self,
        conversation_id: Uuid,
        phase: ConversationPhase,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE conversations SET phase = ?1, last_activity_at = ?2, updated_at = ?2 \
                 WHERE id = ?3",
                params![phase.as_storage_str(), now, conversation_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_phase: {e}")))?;
        Ok(())
    }

    async fn touch_activity(&self, conversation_id: Uuid) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE conversations SET last_activity_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![now, conversation_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("touch_activity: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for LibSqlBackend {
    async fn upsert(
        &self,
        user_id: Uuid,
        question_key: &str,
        answer: &str,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO preferences (user_id, question_key, answer, updated_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT (user_id, question_key) \
                 DO UPDATE SET answer = excluded.answer, updated_at = excluded.updated_at",
                params![user_id.to_string(), question_key, answer, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert preference: {e}")))?;

        debug!(user_id = %user_id, question_key, "Preference saved");
        Ok(())
    }

    async fn get_all(&self, user_id: Uuid) -> Result<Vec<Preference>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT user_id, question_key, answer, updated_at FROM preferences \
                 WHERE user_id = ?1 ORDER BY question_key ASC",
                params![user_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_all preferences: {e}")))?;

        let mut preferences = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_preference(&row) {
                Ok(p) => preferences.push(p),
                Err(e) => {
                    tracing::warn!("Skipping preference row: {e}");
                }
            }
        }
        Ok(preferences)
    }

    async fn get_by_key(
        &self,
        user_id: Uuid,
        question_key: &str,
    ) -> Result<Option<Preference>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT user_id, question_key, answer, updated_at FROM preferences \
                 WHERE user_id = ?1 AND question_key = ?2",
                params![user_id.to_string(), question_key],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_by_key preference: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_preference(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_by_key preference: {e}"))),
        }
    }
}

fn row_to_preference(row: &libsql::Row) -> Result<Preference, DatabaseError> {
    let user_id_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("preference user_id: {e}")))?;
    let question_key: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("preference question_key: {e}")))?;
    let answer: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("preference answer: {e}")))?;
    let updated: String = row
        .get(3)
        .map_err(|e| DatabaseError::Query(format!("preference updated_at: {e}")))?;

    Ok(Preference {
        user_id: Uuid::parse_str(&user_id_str)
            .map_err(|e| DatabaseError::Serialization(format!("preference user_id: {e}")))?,
        question_key,
        answer,
        updated_at: parse_datetime(&updated),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let backend = LibSqlBackend::new_memory().await.unwrap();
        backend.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn new_local_creates_parent_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("weekender.db");
        let backend = LibSqlBackend::new_local(&db_path).await.unwrap();
        assert!(db_path.exists());
        drop(backend);
    }

    #[tokio::test]
    async fn user_round_trip() {
        let backend = LibSqlBackend::new_memory().await.unwrap();
        let created = UserStore::create(
            &backend,
            NewUser {
                phone_number: "+15551234567".to_string(),
                first_name: Some("Dana".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let by_phone = backend
            .get_by_phone("+15551234567")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_phone.id, created.id);
        assert_eq!(by_phone.first_name.as_deref(), Some("Dana"));
        assert!(by_phone.is_active);
        assert!(!by_phone.digest_paused);
        assert!(by_phone.survey_started_at.is_none());

        assert!(backend.get_by_phone("+15550000000").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn survey_started_is_set_once() {
        let backend = LibSqlBackend::new_memory().await.unwrap();
        let user = UserStore::create(
            &backend,
            NewUser {
                phone_number: "+15551112222".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        backend.mark_survey_started(user.id).await.unwrap();
        let first = backend
            .get_by_id(user.id)
            .await
            .unwrap()
            .unwrap()
            .survey_started_at
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        backend.mark_survey_started(user.id).await.unwrap();
        let second = backend
            .get_by_id(user.id)
            .await
            .unwrap()
            .unwrap()
            .survey_started_at
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn preference_upsert_keeps_single_row() {
        let backend = LibSqlBackend::new_memory().await.unwrap();
        let user_id = Uuid::new_v4();

        backend.upsert(user_id, "budget", "X").await.unwrap();
        backend.upsert(user_id, "budget", "Y").await.unwrap();

        let all = backend.get_all(user_id).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].answer, "Y");
    }

    #[tokio::test]
    async fn conversation_phase_round_trip() {
        let backend = LibSqlBackend::new_memory().await.unwrap();
        let user_id = Uuid::new_v4();

        let conversation =
            ConversationStore::create(&backend, user_id, ConversationPhase::Welcome)
                .await
                .unwrap();

        backend
            .update_phase(conversation.id, ConversationPhase::Question(3))
            .await
            .unwrap();

        let loaded = backend.get_by_user(user_id).await.unwrap().unwrap();
        assert_eq!(loaded.phase, ConversationPhase::Question(3));
    }

    #[tokio::test]
    async fn find_dormant_applies_all_filters() {
        let backend = LibSqlBackend::new_memory().await.unwrap();

        // A: started long ago, incomplete, active, not paused — selected
        let a = UserStore::create(
            &backend,
            NewUser {
                phone_number: "+15550000001".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let old = (Utc::now() - Duration::days(4)).to_rfc3339();
        backend
            .conn()
            .execute(
                "UPDATE users SET survey_started_at = ?1 WHERE id = ?2",
                params![old.clone(), a.id.to_string()],
            )
            .await
            .unwrap();

        // B: started recently
        let b = UserStore::create(
            &backend,
            NewUser {
                phone_number: "+15550000002".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        backend.mark_survey_started(b.id).await.unwrap();

        // C: started long ago but completed
        let c = UserStore::create(
            &backend,
            NewUser {
                phone_number: "+15550000003".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        backend
            .conn()
            .execute(
                "UPDATE users SET survey_started_at = ?1 WHERE id = ?2",
                params![old.clone(), c.id.to_string()],
            )
            .await
            .unwrap();
        backend.mark_survey_completed(c.id).await.unwrap();

        // D: started long ago but already paused
        let d = UserStore::create(
            &backend,
            NewUser {
                phone_number: "+15550000004".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        backend
            .conn()
            .execute(
                "UPDATE users SET survey_started_at = ?1 WHERE id = ?2",
                params![old, d.id.to_string()],
            )
            .await
            .unwrap();
        backend.pause_digest(d.id).await.unwrap();

        let dormant = backend.find_dormant(3).await.unwrap();
        let ids: Vec<Uuid> = dormant.iter().map(|u| u.id).collect();
        assert_eq!(ids, vec![a.id]);
    }
}
