//! In-memory store backend — `RwLock<HashMap>` tables for tests and local
//! development without a database file.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::survey::state::ConversationPhase;

use super::traits::{
    Conversation, ConversationStore, NewUser, Preference, PreferenceStore, User, UserStore,
};

/// All three store contracts over shared in-memory tables.
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    conversations: RwLock<HashMap<Uuid, Conversation>>,
    preferences: RwLock<HashMap<(Uuid, String), Preference>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create(&self, new_user: NewUser) -> Result<User, DatabaseError> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.phone_number == new_user.phone_number)
        {
            return Err(DatabaseError::Constraint(format!(
                "user with phone {} already exists",
                new_user.phone_number
            )));
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
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
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_by_phone(&self, phone_number: &str) -> Result<Option<User>, DatabaseError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.phone_number == phone_number)
            .cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>, DatabaseError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn touch_activity(&self, id: Uuid) -> Result<(), DatabaseError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or_else(|| DatabaseError::NotFound {
            entity: "user".to_string(),
            id: id.to_string(),
        })?;
        user.last_activity_at = Utc::now();
        Ok(())
    }

    async fn mark_survey_started(&self, id: Uuid) -> Result<(), DatabaseError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or_else(|| DatabaseError::NotFound {
            entity: "user".to_string(),
            id: id.to_string(),
        })?;
        if user.survey_started_at.is_none() {
            user.survey_started_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_survey_completed(&self, id: Uuid) -> Result<(), DatabaseError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or_else(|| DatabaseError::NotFound {
            entity: "user".to_string(),
            id: id.to_string(),
        })?;
        if user.survey_completed_at.is_none() {
            user.survey_completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn pause_digest(&self, id: Uuid) -> Result<(), DatabaseError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or_else(|| DatabaseError::NotFound {
            entity: "user".to_string(),
            id: id.to_string(),
        })?;
        user.digest_paused = true;
        Ok(())
    }

    async fn resume_digest(&self, id: Uuid) -> Result<(), DatabaseError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or_else(|| DatabaseError::NotFound {
            entity: "user".to_string(),
            id: id.to_string(),
        })?;
        user.digest_paused = false;
        Ok(())
    }

    async fn find_dormant(&self, threshold_days: i64) -> Result<Vec<User>, DatabaseError> {
        let cutoff = Utc::now() - Duration::days(threshold_days);
        let users = self.users.read().await;
        Ok(users
            .values()
            .filter(|u| {
                u.is_active
                    && !u.digest_paused
                    && u.survey_completed_at.is_none()
                    && u.survey_started_at.is_some_and(|t| t < cutoff)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create(
        &self,
        user_id: Uuid,
        initial_phase: ConversationPhase,
    ) -> Result<Conversation, DatabaseError> {
        let mut conversations = self.conversations.write().await;
        if conversations.values().any(|c| c.user_id == user_id) {
            return Err(DatabaseError::Constraint(format!(
                "user {user_id} already has a conversation"
            )));
        }
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            user_id,
            phase: initial_phase,
            last_activity_at: now,
            created_at: now,
        };
        conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get_by_user(&self, user_id: Uuid) -> Result<Option<Conversation>, DatabaseError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .values()
            .find(|c| c.user_id == user_id)
            .cloned())
    }

    async fn update_phase(
        &self,
        conversation_id: Uuid,
        phase: ConversationPhase,
    ) -> Result<(), DatabaseError> {
        let mut conversations = self.conversations.write().await;
        let conversation =
            conversations
                .get_mut(&conversation_id)
                .ok_or_else(|| DatabaseError::NotFound {
                    entity: "conversation".to_string(),
                    id: conversation_id.to_string(),
                })?;
        conversation.phase = phase;
        conversation.last_activity_at = Utc::now();
        Ok(())
    }

    async fn touch_activity(&self, conversation_id: Uuid) -> Result<(), DatabaseError> {
        let mut conversations = self.conversations.write().await;
        let conversation =
            conversations
                .get_mut(&conversation_id)
                .ok_or_else(|| DatabaseError::NotFound {
                    entity: "conversation".to_string(),
                    id: conversation_id.to_string(),
                })?;
        conversation.last_activity_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn upsert(
        &self,
        user_id: Uuid,
        question_key: &str,
        answer: &str,
    ) -> Result<(), DatabaseError> {
        let mut preferences = self.preferences.write().await;
        preferences.insert(
            (user_id, question_key.to_string()),
            Preference {
                user_id,
                question_key: question_key.to_string(),
                answer: answer.to_string(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_all(&self, user_id: Uuid) -> Result<Vec<Preference>, DatabaseError> {
        let preferences = self.preferences.read().await;
        let mut out: Vec<Preference> = preferences
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.question_key.cmp(&b.question_key));
        Ok(out)
    }

    async fn get_by_key(
        &self,
        user_id: Uuid,
        question_key: &str,
    ) -> Result<Option<Preference>, DatabaseError> {
        let preferences = self.preferences.read().await;
        Ok(preferences
            .get(&(user_id, question_key.to_string()))
            .cloned())
    }
}
