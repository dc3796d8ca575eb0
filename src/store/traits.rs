//! Store contracts — async persistence interfaces for users, conversations,
//! and preferences.
//!
//! The engine and sweeper only see these traits; the concrete backend (libSQL
//! in production, in-memory in tests) is injected at construction. No ambient
//! singletons.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::survey::state::ConversationPhase;

/// An account on the platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Channel address, E.164 for SMS users.
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub is_active: bool,
    pub digest_paused: bool,
    /// Set exactly once, on the first substantive answer.
    pub survey_started_at: Option<DateTime<Utc>>,
    /// Set exactly once, on reaching the completed phase.
    pub survey_completed_at: Option<DateTime<Utc>>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when creating a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub phone_number: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

/// A user's live survey conversation. One per user; never deleted.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub phase: ConversationPhase,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// A persisted answer to one survey question. At most one per (user, key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preference {
    pub user_id: Uuid,
    pub question_key: String,
    pub answer: String,
    pub updated_at: DateTime<Utc>,
}

/// Account and activity persistence.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, new_user: NewUser) -> Result<User, DatabaseError>;

    async fn get_by_phone(&self, phone_number: &str) -> Result<Option<User>, DatabaseError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError>;

    async fn touch_activity(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Record the survey start timestamp. Idempotent: only the first call
    /// sets it.
    async fn mark_survey_started(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Record the survey completion timestamp. Idempotent like
    /// `mark_survey_started`.
    async fn mark_survey_completed(&self, id: Uuid) -> Result<(), DatabaseError>;

    async fn pause_digest(&self, id: Uuid) -> Result<(), DatabaseError>;

    async fn resume_digest(&self, id: Uuid) -> Result<(), DatabaseError>;

    /// Users who started the survey more than `threshold_days` ago, never
    /// completed it, are active, and are not already paused.
    async fn find_dormant(&self, threshold_days: i64) -> Result<Vec<User>, DatabaseError>;
}

/// Conversation state persistence.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(
        &self,
        user_id: Uuid,
        initial_phase: ConversationPhase,
    ) -> Result<Conversation, DatabaseError>;

    /// The user's live conversation, if one exists.
    async fn get_by_user(&self, user_id: Uuid) -> Result<Option<Conversation>, DatabaseError>;

    async fn update_phase(
        &self,
        conversation_id: Uuid,
        phase: ConversationPhase,
    ) -> Result<(), DatabaseError>;

    async fn touch_activity(&self, conversation_id: Uuid) -> Result<(), DatabaseError>;
}

/// Answer persistence, upsert-by-key.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Insert or replace the answer for `(user_id, question_key)`.
    async fn upsert(
        &self,
        user_id: Uuid,
        question_key: &str,
        answer: &str,
    ) -> Result<(), DatabaseError>;

    async fn get_all(&self, user_id: Uuid) -> Result<Vec<Preference>, DatabaseError>;

    async fn get_by_key(
        &self,
        user_id: Uuid,
        question_key: &str,
    ) -> Result<Option<Preference>, DatabaseError>;
}
