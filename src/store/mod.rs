//! Persistence layer: store contracts and backends.

pub mod libsql_backend;
pub mod memory;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::MemoryStore;
pub use traits::{
    Conversation, ConversationStore, NewUser, Preference, PreferenceStore, User, UserStore,
};
