//! Recollect - conversational fact memory
//!
//! Extracts atomic facts about a user from conversation turns, reconciles
//! them against what is already remembered (ADD / UPDATE / DELETE / NOOP),
//! and retrieves them by semantic similarity. Memory is partitioned by
//! (user, agent) scope.

pub mod embedding;
pub mod error;
pub mod intelligence;
pub mod llm;
pub mod storage;
pub mod system;
pub mod types;

pub use error::{RecollectError, Result};
pub use storage::{MemoryStore, Storage};
pub use system::MemorySystem;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
