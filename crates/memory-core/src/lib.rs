//! ============================================================================
//! MEMORY-CORE: Persona memory engine
//! ============================================================================
//! This crate handles all backend logic for persona memory:
//! - Lexical vectorization and cosine scoring
//! - Per-persona and public memory scopes with capacity limits
//! - Reinforced retrieval, scheduled decay, and similarity merging
//! - Embedded redb persistence behind the `MemoryPersistence` trait
//! ============================================================================

pub mod config;
pub mod db;
pub mod memory;
pub mod types;

// Re-export main types for convenience
pub use config::MemoryConfig;
pub use db::{MemoryDb, MemoryPersistence};
pub use memory::{MemoryManager, MemoryStore, ScoredMemory};
pub use types::*;
