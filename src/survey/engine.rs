//! Conversation engine — drives a user through the onboarding survey.
//!
//! One inbound message in, one decision out: persist the answer (when the
//! current phase is a question), move the state machine, and produce the
//! reply text. Collaborators (stores, notifier) are injected at construction.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::{EngineConfig, RestartTarget, WriteFailurePolicy};
use crate::error::{DatabaseError, Error};
use crate::notify::Notifier;
use crate::store::{ConversationStore, PreferenceStore, UserStore};

use super::messages::{self, templates};
use super::questions::QuestionCatalog;
use super::state::ConversationPhase;

/// Control sentinel: return the greeting for the current phase without
/// treating the input as an answer. Sent by UI-initiated flows to fetch the
/// opening prompt.
pub const INIT_SENTINEL: &str = "__INIT__";

/// Keywords that mean "restart / update my preferences". Single words match
/// whole words of the normalized input; phrases match as substrings. Whole-word
/// matching is a deliberate tightening of the historical contains() check,
/// which fired on things like "I want to start a business".
const RESTART_KEYWORDS: &[&str] = &[
    "start",
    "restart",
    "change",
    "change preferences",
    "update preferences",
];

/// True if the message asks to restart or update preferences.
pub fn is_restart_request(message: &str) -> bool {
    let normalized = message.trim().to_lowercase();
    RESTART_KEYWORDS.iter().any(|keyword| {
        if keyword.contains(' ') {
            normalized.contains(keyword)
        } else {
            normalized
                .split(|c: char| !c.is_alphanumeric())
                .any(|word| word == *keyword)
        }
    })
}

/// One conversational turn's input.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub user_id: Uuid,
    pub conversation_id: Uuid,
    pub phase: ConversationPhase,
    pub message: String,
    /// Where out-of-band notifications go (E.164 phone number).
    pub channel_address: String,
    /// First name for welcome personalization, when known.
    pub display_name: Option<String>,
}

/// The engine's decision for one turn.
#[derive(Debug, Clone)]
pub struct EngineReply {
    /// Reply text, in delivery order. Usually one entry; the welcome
    /// sequence produces several for channels that send separate bubbles.
    pub messages: Vec<String>,
    pub new_phase: ConversationPhase,
    pub new_question_index: u32,
}

impl EngineReply {
    /// The reply as a single block (SMS delivery mode).
    pub fn response_text(&self) -> String {
        self.messages.join("\n\n")
    }

    pub fn completed(&self) -> bool {
        self.new_phase.is_terminal()
    }
}

/// Store handles the engine operates over.
#[derive(Clone)]
pub struct EngineStores {
    pub users: Arc<dyn UserStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub preferences: Arc<dyn PreferenceStore>,
}

/// The survey state machine.
pub struct ConversationEngine {
    stores: EngineStores,
    /// Out-of-band channel for the completion message. `None` means no
    /// side-channel is configured and the in-band reply is the only copy.
    notifier: Option<Arc<dyn Notifier>>,
    catalog: Arc<QuestionCatalog>,
    config: EngineConfig,
    /// Per-conversation locks serializing `handle_message`, so duplicate
    /// webhook deliveries cannot race read-decide-write and double-advance.
    locks: RwLock<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl ConversationEngine {
    pub fn new(
        stores: EngineStores,
        notifier: Option<Arc<dyn Notifier>>,
        catalog: Arc<QuestionCatalog>,
        config: EngineConfig,
    ) -> Self {
        Self {
            stores,
            notifier,
            catalog,
            config,
            locks: RwLock::new(HashMap::new()),
        }
    }

    pub fn catalog(&self) -> &QuestionCatalog {
        &self.catalog
    }

    /// The welcome payload for a brand-new conversation, as a message
    /// sequence. Adapters send this on first contact without calling
    /// `handle_message`.
    pub fn welcome_messages(&self, display_name: Option<&str>) -> Vec<String> {
        let first_prompt = self
            .catalog
            .by_order(1)
            .map(|q| q.prompt)
            .unwrap_or(templates::ERROR);
        messages::welcome_sequence(display_name, first_prompt)
    }

    /// Same payload as one SMS-sized block.
    pub fn welcome_text(&self, display_name: Option<&str>) -> String {
        let first_prompt = self
            .catalog
            .by_order(1)
            .map(|q| q.prompt)
            .unwrap_or(templates::ERROR);
        messages::welcome_single(display_name, first_prompt)
    }

    /// Process one inbound message. Serialized per conversation.
    pub async fn handle_message(&self, input: InboundMessage) -> Result<EngineReply, Error> {
        let lock = self.conversation_lock(input.conversation_id).await;
        let _guard = lock.lock().await;

        let total = self.catalog.len();

        // Activity stamp comes first, independent of the outcome.
        self.persist(
            self.stores
                .conversations
                .touch_activity(input.conversation_id)
                .await,
            "touch conversation activity",
        )?;

        let text = input.message.trim();

        if text == INIT_SENTINEL {
            return Ok(self.greeting_for(&input));
        }

        if is_restart_request(text) {
            return self.handle_restart(&input).await;
        }

        match input.phase {
            ConversationPhase::Welcome => self.handle_answer(&input, 1).await,
            ConversationPhase::Question(k) if self.catalog.by_order(k).is_some() => {
                self.handle_answer(&input, k).await
            }
            ConversationPhase::Completed => Ok(EngineReply {
                messages: vec![templates::COMPLETED_NUDGE.to_string()],
                new_phase: ConversationPhase::Completed,
                new_question_index: total,
            }),
            // Question index outside the catalog: a defective stored state.
            // Reply without mutating anything.
            phase => {
                tracing::warn!(
                    conversation_id = %input.conversation_id,
                    %phase,
                    "Conversation in unknown phase, returning generic error"
                );
                Ok(EngineReply {
                    messages: vec![templates::ERROR.to_string()],
                    new_phase: phase,
                    new_question_index: phase.question_index(total),
                })
            }
        }
    }

    /// Restart/update-preferences command handling. Short-circuits the rest
    /// of the turn.
    async fn handle_restart(&self, input: &InboundMessage) -> Result<EngineReply, Error> {
        let total = self.catalog.len();

        if input.phase != ConversationPhase::Completed {
            // Mid-survey: acknowledge by re-sending the current prompt.
            let prompt = match input.phase {
                ConversationPhase::Welcome => self.catalog.by_order(1),
                ConversationPhase::Question(k) => self.catalog.by_order(k),
                ConversationPhase::Completed => unreachable!(),
            }
            .map(|q| q.prompt.to_string())
            .unwrap_or_else(|| templates::ERROR.to_string());

            return Ok(EngineReply {
                messages: vec![prompt],
                new_phase: input.phase,
                new_question_index: input.phase.question_index(total),
            });
        }

        let (new_phase, reply_messages) = match self.config.restart_target {
            RestartTarget::FirstQuestion => {
                let first_prompt = self
                    .catalog
                    .by_order(1)
                    .map(|q| q.prompt)
                    .unwrap_or(templates::ERROR);
                (
                    ConversationPhase::Question(1),
                    vec![format!(
                        "{}\n\n{}",
                        templates::RESTART_CONFIRMATION,
                        first_prompt
                    )],
                )
            }
            RestartTarget::Welcome => {
                let mut msgs = vec![templates::RESTART_CONFIRMATION.to_string()];
                msgs.extend(self.welcome_messages(input.display_name.as_deref()));
                (ConversationPhase::Welcome, msgs)
            }
        };

        self.persist(
            self.stores
                .conversations
                .update_phase(input.conversation_id, new_phase)
                .await,
            "restart conversation",
        )?;

        Ok(EngineReply {
            messages: reply_messages,
            new_phase,
            new_question_index: new_phase.question_index(self.catalog.len()),
        })
    }

    /// Record the answer to question `k` and advance (or complete).
    async fn handle_answer(
        &self,
        input: &InboundMessage,
        k: u32,
    ) -> Result<EngineReply, Error> {
        let total = self.catalog.len();
        let question = match self.catalog.by_order(k) {
            Some(q) => q,
            None => {
                return Ok(EngineReply {
                    messages: vec![templates::ERROR.to_string()],
                    new_phase: input.phase,
                    new_question_index: input.phase.question_index(total),
                });
            }
        };

        // Format check: stay put and re-prompt, no persistence.
        if self.config.validate_answers && !question.accepts(&input.message) {
            let reply = question.invalid_prompt.unwrap_or(templates::ERROR);
            return Ok(EngineReply {
                messages: vec![reply.to_string()],
                new_phase: input.phase,
                new_question_index: input.phase.question_index(total),
            });
        }

        let answer = question.normalize_answer(&input.message);
        self.persist(
            self.stores
                .preferences
                .upsert(input.user_id, question.key, &answer)
                .await,
            "save answer",
        )?;

        // Leaving the welcome phase is the survey's start. Idempotent in the
        // store, so restarted surveys keep the original timestamp.
        if input.phase == ConversationPhase::Welcome {
            self.persist(
                self.stores.users.mark_survey_started(input.user_id).await,
                "mark survey started",
            )?;
        }

        if k >= total {
            return self.complete_survey(input).await;
        }

        let next = k + 1;
        let next_question = match self.catalog.by_order(next) {
            Some(q) => q,
            None => {
                return Ok(EngineReply {
                    messages: vec![templates::ERROR.to_string()],
                    new_phase: input.phase,
                    new_question_index: input.phase.question_index(total),
                });
            }
        };

        let new_phase = ConversationPhase::Question(next);
        self.persist(
            self.stores
                .conversations
                .update_phase(input.conversation_id, new_phase)
                .await,
            "advance conversation",
        )?;

        Ok(EngineReply {
            messages: vec![messages::prompt_with_acknowledgement(
                next_question.prompt,
                k,
                total,
            )],
            new_phase,
            new_question_index: next,
        })
    }

    /// Final-question path: mark completion and send the completion message
    /// out-of-band as well as in-band.
    async fn complete_survey(&self, input: &InboundMessage) -> Result<EngineReply, Error> {
        let total = self.catalog.len();

        self.persist(
            self.stores.users.mark_survey_completed(input.user_id).await,
            "mark survey completed",
        )?;
        self.persist(
            self.stores
                .conversations
                .update_phase(input.conversation_id, ConversationPhase::Completed)
                .await,
            "complete conversation",
        )?;

        // The completion reply still goes back in-band even if this fails.
        if let Some(ref notifier) = self.notifier {
            let outcome = notifier
                .send(&input.channel_address, templates::SURVEY_COMPLETE)
                .await;
            if !outcome.success {
                tracing::warn!(
                    user_id = %input.user_id,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Completion notification failed"
                );
            }
        }

        Ok(EngineReply {
            messages: vec![templates::SURVEY_COMPLETE.to_string()],
            new_phase: ConversationPhase::Completed,
            new_question_index: total,
        })
    }

    /// Greeting for the current phase, used by the `__INIT__` sentinel.
    fn greeting_for(&self, input: &InboundMessage) -> EngineReply {
        let total = self.catalog.len();
        let messages = match input.phase {
            ConversationPhase::Welcome => {
                self.welcome_messages(input.display_name.as_deref())
            }
            ConversationPhase::Question(k) => vec![
                self.catalog
                    .by_order(k)
                    .map(|q| q.prompt.to_string())
                    .unwrap_or_else(|| templates::ERROR.to_string()),
            ],
            ConversationPhase::Completed => vec![templates::COMPLETED_NUDGE.to_string()],
        };
        EngineReply {
            messages,
            new_phase: input.phase,
            new_question_index: input.phase.question_index(total),
        }
    }

    /// Store-write failure handling per the configured policy.
    fn persist(&self, result: Result<(), DatabaseError>, what: &str) -> Result<(), Error> {
        match result {
            Ok(()) => Ok(()),
            Err(e) => match self.config.write_failure_policy {
                WriteFailurePolicy::Lenient => {
                    tracing::warn!("Failed to {what}: {e}");
                    Ok(())
                }
                WriteFailurePolicy::Strict => Err(Error::Database(e)),
            },
        }
    }

    async fn conversation_lock(&self, conversation_id: Uuid) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(&conversation_id) {
            return Arc::clone(lock);
        }
        let mut locks = self.locks.write().await;
        Arc::clone(
            locks
                .entry(conversation_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restart_matcher_accepts_commands() {
        assert!(is_restart_request("START"));
        assert!(is_restart_request("  start please "));
        assert!(is_restart_request("I want to start over"));
        assert!(is_restart_request("change preferences"));
        assert!(is_restart_request("Update Preferences now"));
        assert!(is_restart_request("restart!"));
    }

    #[test]
    fn restart_matcher_rejects_embedded_words() {
        assert!(!is_restart_request("artstart"));
        assert!(!is_restart_request("restarted"));
        assert!(!is_restart_request("unchanged"));
        assert!(!is_restart_request("music and food"));
        assert!(!is_restart_request(""));
    }

    #[test]
    fn restart_matcher_is_idempotent() {
        for msg in ["START", "no keywords here"] {
            assert_eq!(is_restart_request(msg), is_restart_request(msg));
        }
    }
}
