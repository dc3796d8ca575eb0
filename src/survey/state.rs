//! Conversation state machine — tracks where the user is in the survey.

use serde::{Deserialize, Serialize};

/// The phases of the onboarding survey conversation.
///
/// Progresses linearly: Welcome → Question(1) → … → Question(n) → Completed.
/// `Completed` is terminal for forward progress but re-enters at Question(1)
/// on a restart command. The question index is carried as data rather than
/// encoded into a state string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPhase {
    Welcome,
    Question(u32),
    Completed,
}

impl ConversationPhase {
    /// The question index this phase corresponds to: 0 for welcome, k while
    /// answering question k, and the total question count at completion.
    pub fn question_index(&self, total_questions: u32) -> u32 {
        match self {
            Self::Welcome => 0,
            Self::Question(k) => *k,
            Self::Completed => total_questions,
        }
    }

    /// The phase after answering the current question.
    pub fn next(&self, total_questions: u32) -> Option<ConversationPhase> {
        match self {
            Self::Welcome => Some(Self::Question(2).clamp_to(total_questions)),
            Self::Question(k) if *k >= total_questions => Some(Self::Completed),
            Self::Question(k) => Some(Self::Question(k + 1)),
            Self::Completed => None,
        }
    }

    fn clamp_to(self, total_questions: u32) -> ConversationPhase {
        match self {
            Self::Question(k) if k > total_questions => Self::Completed,
            other => other,
        }
    }

    /// Whether the survey is done.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Encode to the storage/API string: `welcome`, `question_k`, `completed`.
    pub fn as_storage_str(&self) -> String {
        match self {
            Self::Welcome => "welcome".to_string(),
            Self::Question(k) => format!("question_{k}"),
            Self::Completed => "completed".to_string(),
        }
    }

    /// Decode a storage/API string. Unknown strings return `None`; callers
    /// treat that as a defective row and fall back to an error reply rather
    /// than panicking.
    pub fn from_storage_str(s: &str) -> Option<ConversationPhase> {
        match s {
            "welcome" => Some(Self::Welcome),
            "completed" => Some(Self::Completed),
            _ => {
                let k = s.strip_prefix("question_")?.parse::<u32>().ok()?;
                (k >= 1).then_some(Self::Question(k))
            }
        }
    }
}

impl Default for ConversationPhase {
    fn default() -> Self {
        Self::Welcome
    }
}

impl std::fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_storage_str())
    }
}

impl Serialize for ConversationPhase {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_storage_str())
    }
}

impl<'de> Deserialize<'de> for ConversationPhase {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_storage_str(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown conversation phase: {s}")))
    }
}
