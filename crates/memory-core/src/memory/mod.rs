//! ============================================================================
//! Memory Module - Per-persona conversational memory
//! ============================================================================
//! Lexical memory for chat personas: every memory is turned into a sparse
//! term-frequency vector, recalled by cosine similarity weighted by an
//! access-driven relevance weight, and aged out by periodic decay.
//!
//! ## Features
//! - Private memories per persona plus a shared public pool
//! - Reinforcement on recall, capped at a maximum weight
//! - Scheduled decay with pruning, on-demand merging of near-duplicates
//! - Write-through persistence with a cache-only fallback
//!
//! ## Architecture
//! ```text
//! User Message → Vectorize → Score (cosine × weight) → Relevant Memories
//!                                                          ↓
//!                                         [Persona Prompt] + [Memories]
//!                                                          ↓
//!                                                 Reinforce (weight + 0.1)
//!
//! Scheduler (hourly) → Decay (weight × 0.95) → Prune (< 0.1)
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! use memory_core::{MemoryConfig, MemoryManager, Scope};
//!
//! let manager = MemoryManager::open_default(MemoryConfig::from_env()).await?;
//! manager.start_maintenance().await;
//!
//! let persona = Scope::persona("helper")?;
//! manager.add_memory(&persona, "User prefers concise responses", false).await?;
//!
//! let relevant = manager.retrieve_memories(&persona, "how should I respond", 3).await?;
//! ```
//! ============================================================================

mod maintenance;
mod manager;
mod retrieval;
mod similarity;
mod store;
mod types;
mod vectorizer;

// Re-export public types
pub use maintenance::MaintenanceScheduler;
pub use manager::{format_memories_for_prompt, MemoryManager};
pub use retrieval::Retriever;
pub use similarity::cosine;
pub use store::MemoryStore;
pub use types::{DecayReport, Memory, MergeReport, ScoredMemory, StoreStats, TermVector};
pub use vectorizer::{tokenize, vectorize};
