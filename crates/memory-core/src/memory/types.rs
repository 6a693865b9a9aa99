//! ============================================================================
//! Memory Types - Data structures for persona memory
//! ============================================================================
//! Defines cached memory entries, scored retrieval results, and the reports
//! returned by maintenance passes.
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::types::{Origin, Scope};

/// Sparse term-frequency vector: token -> occurrence count
pub type TermVector = BTreeMap<String, u32>;

/// A single memory entry held in the store's cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier for this memory
    pub id: Uuid,
    /// Owning persona, or the public pool
    pub scope: Scope,
    /// The memory text
    pub content: String,
    /// Term-frequency vector of `content`
    pub vector: TermVector,
    /// Relevance weight, reinforced on access and decayed over time
    pub weight: f64,
    /// Unix millis when the memory was created
    pub created_at: i64,
    /// Number of times this memory was returned by retrieval
    pub access_count: u32,
    /// False when the memory only lives in the cache
    #[serde(default = "default_persisted")]
    pub persisted: bool,
}

fn default_persisted() -> bool {
    true
}

impl Memory {
    /// Origin tag for listings
    pub fn origin(&self) -> Origin {
        self.scope.origin()
    }
}

/// A memory returned by retrieval together with its relevance score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub memory: Memory,
    /// cosine(query, memory) * weight at query time
    pub score: f64,
    /// Whether the memory came from the querying persona or the public pool
    pub origin: Origin,
}

/// Outcome of a decay pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayReport {
    /// Memories whose weight was scaled
    pub decayed: usize,
    /// Memories removed for falling below the floor
    pub pruned: usize,
}

/// Outcome of a merge pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Memories absorbed into a similar survivor
    pub merged: usize,
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: usize,
    pub public: usize,
    pub per_persona: HashMap<String, usize>,
    /// Memories not backed by the persistence layer
    pub cache_only: usize,
}
