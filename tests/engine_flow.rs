//! End-to-end conversation engine scenarios against the in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use weekender::config::{EngineConfig, RestartTarget, WriteFailurePolicy};
use weekender::error::{DatabaseError, Error};
use weekender::notify::{DeliveryOutcome, Notifier};
use weekender::store::{
    ConversationStore, MemoryStore, NewUser, PreferenceStore, UserStore,
};
use weekender::survey::messages::templates;
use weekender::survey::questions::{is_valid_location, Question, QuestionCatalog};
use weekender::survey::{
    ConversationEngine, ConversationPhase, EngineStores, InboundMessage, INIT_SENTINEL,
};

/// Notifier that records every send.
#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, to: &str, body: &str) -> DeliveryOutcome {
        self.sent.lock().await.push((to.to_string(), body.to_string()));
        DeliveryOutcome::ok()
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    engine: ConversationEngine,
    user_id: Uuid,
    conversation_id: Uuid,
}

impl Harness {
    async fn new(catalog: QuestionCatalog, config: EngineConfig) -> Self {
        let store = MemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::default());

        let user = UserStore::create(
            store.as_ref(),
            NewUser {
                phone_number: "+15551230000".to_string(),
                first_name: Some("Dana".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let conversation =
            ConversationStore::create(store.as_ref(), user.id, ConversationPhase::Welcome)
                .await
                .unwrap();

        let stores = EngineStores {
            users: store.clone(),
            conversations: store.clone(),
            preferences: store.clone(),
        };
        let engine = ConversationEngine::new(
            stores,
            Some(notifier.clone() as Arc<dyn Notifier>),
            Arc::new(catalog),
            config,
        );

        Self {
            store,
            notifier,
            engine,
            user_id: user.id,
            conversation_id: conversation.id,
        }
    }

    async fn default_harness() -> Self {
        Self::new(QuestionCatalog::default(), EngineConfig::default()).await
    }

    async fn send(&self, phase: ConversationPhase, text: &str) -> weekender::survey::EngineReply {
        self.engine
            .handle_message(InboundMessage {
                user_id: self.user_id,
                conversation_id: self.conversation_id,
                phase,
                message: text.to_string(),
                channel_address: "+15551230000".to_string(),
                display_name: Some("Dana".to_string()),
            })
            .await
            .unwrap()
    }

    async fn answer(&self, key: &str) -> Option<String> {
        self.store
            .get_by_key(self.user_id, key)
            .await
            .unwrap()
            .map(|p| p.answer)
    }
}

#[tokio::test]
async fn full_survey_walkthrough() {
    let h = Harness::default_harness().await;

    // Welcome reply answers question 1 and advances to question 2
    let reply = h.send(ConversationPhase::Welcome, "music, food").await;
    assert_eq!(reply.new_phase, ConversationPhase::Question(2));
    assert_eq!(reply.new_question_index, 2);
    assert!(reply.response_text().contains("city or area"));
    assert_eq!(h.answer("interests").await.as_deref(), Some("music, food"));

    let user = h.store.get_by_id(h.user_id).await.unwrap().unwrap();
    assert!(user.survey_started_at.is_some());
    assert!(user.survey_completed_at.is_none());

    // Question 2 (location, validated)
    let reply = h.send(ConversationPhase::Question(2), "94110").await;
    assert_eq!(reply.new_phase, ConversationPhase::Question(3));
    assert_eq!(h.answer("location").await.as_deref(), Some("94110"));

    // Question 3 normalizes the multiple choice
    let reply = h.send(ConversationPhase::Question(3), "A").await;
    assert_eq!(reply.new_phase, ConversationPhase::Question(4));
    assert_eq!(h.answer("activity_type").await.as_deref(), Some("in_person"));

    // Question 4 flags the last question
    let reply = h.send(ConversationPhase::Question(4), "weekends").await;
    assert_eq!(reply.new_phase, ConversationPhase::Question(5));
    assert!(reply.response_text().starts_with("Got it! Last question:"));

    // Final answer completes the survey and notifies out-of-band
    let reply = h.send(ConversationPhase::Question(5), "free").await;
    assert_eq!(reply.new_phase, ConversationPhase::Completed);
    assert_eq!(reply.new_question_index, 5);
    assert!(reply.completed());
    assert_eq!(reply.response_text(), templates::SURVEY_COMPLETE);

    let user = h.store.get_by_id(h.user_id).await.unwrap().unwrap();
    assert!(user.survey_completed_at.is_some());

    let sent = h.notifier.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, templates::SURVEY_COMPLETE);

    // Conversation row reflects completion
    let conversation = h
        .store
        .get_by_user(h.user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.phase, ConversationPhase::Completed);
}

#[tokio::test]
async fn invalid_location_reprompts_without_advancing() {
    // Variant catalog with location validation on the very first question.
    let catalog = QuestionCatalog::new(vec![
        Question {
            key: "location",
            prompt: "What city or zip?",
            order: 1,
            normalizer: None,
            validator: Some(is_valid_location),
            invalid_prompt: Some(templates::INVALID_LOCATION),
        },
        Question {
            key: "budget",
            prompt: "What budget?",
            order: 2,
            normalizer: None,
            validator: None,
            invalid_prompt: None,
        },
    ]);
    let h = Harness::new(catalog, EngineConfig::default()).await;

    let reply = h.send(ConversationPhase::Welcome, "1234").await;
    assert_eq!(reply.response_text(), templates::INVALID_LOCATION);
    assert_eq!(reply.new_phase, ConversationPhase::Welcome);
    assert_eq!(reply.new_question_index, 0);
    assert_eq!(h.answer("location").await, None);

    // Survey not started either — the invalid answer never counted
    let user = h.store.get_by_id(h.user_id).await.unwrap().unwrap();
    assert!(user.survey_started_at.is_none());

    // A valid answer then proceeds normally
    let reply = h.send(ConversationPhase::Welcome, "Brooklyn").await;
    assert_eq!(reply.new_phase, ConversationPhase::Question(2));
    assert_eq!(h.answer("location").await.as_deref(), Some("Brooklyn"));
}

#[tokio::test]
async fn init_sentinel_greets_without_consuming_an_answer() {
    let h = Harness::default_harness().await;

    let reply = h.send(ConversationPhase::Welcome, INIT_SENTINEL).await;
    assert_eq!(reply.new_phase, ConversationPhase::Welcome);
    assert_eq!(reply.new_question_index, 0);
    assert!(reply.messages.len() > 1, "welcome should be a sequence");
    assert!(reply.messages[0].contains("Dana"));
    assert!(reply
        .messages
        .last()
        .unwrap()
        .contains("main interests"));

    // No preference row was created
    assert!(h.store.get_all(h.user_id).await.unwrap().is_empty());

    // Mid-survey, the sentinel re-sends the current prompt
    let reply = h.send(ConversationPhase::Question(3), INIT_SENTINEL).await;
    assert_eq!(reply.new_phase, ConversationPhase::Question(3));
    assert!(reply.response_text().contains("activities"));
    assert!(h.store.get_all(h.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn restart_from_completed_resets_to_first_question() {
    let h = Harness::default_harness().await;

    for text in ["START", "  start please ", "I want to start over"] {
        // Put the conversation in the completed phase
        h.store
            .update_phase(h.conversation_id, ConversationPhase::Completed)
            .await
            .unwrap();

        let reply = h.send(ConversationPhase::Completed, text).await;
        assert_eq!(reply.new_phase, ConversationPhase::Question(1), "for {text:?}");
        assert_eq!(reply.new_question_index, 1);
        let response = reply.response_text();
        assert!(response.starts_with(templates::RESTART_CONFIRMATION));
        assert!(response.contains("main interests"));

        let conversation = h.store.get_by_user(h.user_id).await.unwrap().unwrap();
        assert_eq!(conversation.phase, ConversationPhase::Question(1));
    }
}

#[tokio::test]
async fn restart_mid_survey_reemits_current_prompt() {
    let h = Harness::default_harness().await;

    let reply = h.send(ConversationPhase::Question(3), "restart").await;
    assert_eq!(reply.new_phase, ConversationPhase::Question(3));
    assert!(reply.response_text().contains("activities"));
    // No answer was recorded for the keyword message
    assert_eq!(h.answer("activity_type").await, None);
}

#[tokio::test]
async fn completed_state_nudges_on_other_text() {
    let h = Harness::default_harness().await;

    let reply = h.send(ConversationPhase::Completed, "thanks!").await;
    assert_eq!(reply.new_phase, ConversationPhase::Completed);
    assert_eq!(reply.response_text(), templates::COMPLETED_NUDGE);
    assert!(h.store.get_all(h.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn reanswering_after_restart_overwrites_preferences() {
    let h = Harness::default_harness().await;

    h.send(ConversationPhase::Welcome, "music").await;
    assert_eq!(h.answer("interests").await.as_deref(), Some("music"));

    h.store
        .update_phase(h.conversation_id, ConversationPhase::Completed)
        .await
        .unwrap();
    h.send(ConversationPhase::Completed, "START").await;

    h.send(ConversationPhase::Question(1), "hiking").await;
    assert_eq!(h.answer("interests").await.as_deref(), Some("hiking"));
    assert_eq!(
        h.store.get_all(h.user_id).await.unwrap().len(),
        1,
        "upsert must keep one row per key"
    );
}

#[tokio::test]
async fn survey_started_timestamp_survives_restart() {
    let h = Harness::default_harness().await;

    h.send(ConversationPhase::Welcome, "music").await;
    let first = h
        .store
        .get_by_id(h.user_id)
        .await
        .unwrap()
        .unwrap()
        .survey_started_at
        .unwrap();

    h.store
        .update_phase(h.conversation_id, ConversationPhase::Completed)
        .await
        .unwrap();
    h.send(ConversationPhase::Completed, "START").await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    // Re-answer question 1 via the welcome path equivalent
    h.send(ConversationPhase::Question(1), "hiking").await;

    let after = h
        .store
        .get_by_id(h.user_id)
        .await
        .unwrap()
        .unwrap()
        .survey_started_at
        .unwrap();
    assert_eq!(first, after);
}

#[tokio::test]
async fn unknown_question_index_falls_back_without_mutation() {
    let h = Harness::default_harness().await;

    let reply = h.send(ConversationPhase::Question(9), "hello").await;
    assert_eq!(reply.new_phase, ConversationPhase::Question(9));
    assert_eq!(reply.response_text(), templates::ERROR);
    assert!(h.store.get_all(h.user_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn restart_to_welcome_variant_resends_welcome_sequence() {
    let config = EngineConfig {
        restart_target: RestartTarget::Welcome,
        ..EngineConfig::default()
    };
    let h = Harness::new(QuestionCatalog::default(), config).await;

    let reply = h.send(ConversationPhase::Completed, "START").await;
    assert_eq!(reply.new_phase, ConversationPhase::Welcome);
    assert_eq!(reply.new_question_index, 0);
    assert_eq!(reply.messages[0], templates::RESTART_CONFIRMATION);
    assert!(reply.messages.last().unwrap().contains("main interests"));
}

/// Preference store that always fails, for write-policy tests.
struct FailingPreferences;

#[async_trait]
impl PreferenceStore for FailingPreferences {
    async fn upsert(&self, _: Uuid, _: &str, _: &str) -> Result<(), DatabaseError> {
        Err(DatabaseError::Query("disk full".to_string()))
    }
    async fn get_all(
        &self,
        _: Uuid,
    ) -> Result<Vec<weekender::store::Preference>, DatabaseError> {
        Ok(Vec::new())
    }
    async fn get_by_key(
        &self,
        _: Uuid,
        _: &str,
    ) -> Result<Option<weekender::store::Preference>, DatabaseError> {
        Ok(None)
    }
}

async fn engine_with_failing_preferences(policy: WriteFailurePolicy) -> (ConversationEngine, Uuid, Uuid) {
    let store = MemoryStore::new();
    let user = UserStore::create(
        store.as_ref(),
        NewUser {
            phone_number: "+15559990000".to_string(),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    let conversation =
        ConversationStore::create(store.as_ref(), user.id, ConversationPhase::Welcome)
            .await
            .unwrap();

    let stores = EngineStores {
        users: store.clone(),
        conversations: store.clone(),
        preferences: Arc::new(FailingPreferences),
    };
    let engine = ConversationEngine::new(
        stores,
        None,
        Arc::new(QuestionCatalog::default()),
        EngineConfig {
            write_failure_policy: policy,
            ..EngineConfig::default()
        },
    );
    (engine, user.id, conversation.id)
}

#[tokio::test]
async fn lenient_policy_swallows_write_failures() {
    let (engine, user_id, conversation_id) =
        engine_with_failing_preferences(WriteFailurePolicy::Lenient).await;

    let reply = engine
        .handle_message(InboundMessage {
            user_id,
            conversation_id,
            phase: ConversationPhase::Welcome,
            message: "music".to_string(),
            channel_address: "+15559990000".to_string(),
            display_name: None,
        })
        .await
        .unwrap();
    // The turn still answers and advances despite the failed save
    assert_eq!(reply.new_phase, ConversationPhase::Question(2));
}

#[tokio::test]
async fn strict_policy_fails_the_turn() {
    let (engine, user_id, conversation_id) =
        engine_with_failing_preferences(WriteFailurePolicy::Strict).await;

    let result = engine
        .handle_message(InboundMessage {
            user_id,
            conversation_id,
            phase: ConversationPhase::Welcome,
            message: "music".to_string(),
            channel_address: "+15559990000".to_string(),
            display_name: None,
        })
        .await;
    assert!(matches!(result, Err(Error::Database(_))));
}
