//! Session lifecycle: aggregate types, the status machine, and persistence.

pub mod machine;
pub mod schema;
pub mod store;
pub mod types;

pub use machine::{apply_transition, can_transition, Transition};
pub use store::{SessionStore, SqliteSessionStore, StartupRecovery};
pub use types::{
    LogLevel, Priority, Session, SessionLogEntry, SessionStatus, TechnologyContext,
};
