//! Onboarding survey: state machine, question catalog, templates, engine,
//! and the dormancy sweeper.

pub mod engine;
pub mod messages;
pub mod questions;
pub mod state;
pub mod sweeper;

pub use engine::{ConversationEngine, EngineReply, EngineStores, InboundMessage, INIT_SENTINEL};
pub use questions::{Question, QuestionCatalog};
pub use state::ConversationPhase;
pub use sweeper::{SweepOutcome, TimeoutSweeper};
