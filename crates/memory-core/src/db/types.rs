//! ============================================================================
//! Database Types - Serializable records for redb storage
//! ============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Memory row as stored by the persistence layer.
/// `persona_id = None` with `is_public = false` is a legacy row and is read
/// back into the public pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    /// Insertion sequence, assigned on create
    pub seq: u64,
    pub persona_id: Option<String>,
    pub content: String,
    /// JSON-encoded term vector
    pub vector: Option<String>,
    pub weight: f64,
    pub is_public: bool,
    pub access_count: u32,
    /// Unix millis
    pub created_at: i64,
    /// Unix millis
    pub updated_at: i64,
}

/// Fields supplied by the store when creating a row
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemoryRecord {
    pub persona_id: Option<String>,
    pub content: String,
    pub vector: Option<String>,
    pub weight: f64,
    pub is_public: bool,
    pub created_at: i64,
}

/// Partial update of a memory row; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub vector: Option<String>,
    pub weight: Option<f64>,
    pub is_public: Option<bool>,
    pub access_count: Option<u32>,
}

impl MemoryPatch {
    pub fn weight(weight: f64) -> Self {
        Self {
            weight: Some(weight),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.vector.is_none()
            && self.weight.is_none()
            && self.is_public.is_none()
            && self.access_count.is_none()
    }
}

/// Persona registered with the memory engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Full backup of the persisted state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSnapshot {
    /// RFC 3339
    pub exported_at: String,
    pub personas: Vec<PersonaRecord>,
    pub memories: Vec<MemoryRecord>,
}

/// Database statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub total_memories: usize,
    pub public_memories: usize,
    pub per_persona: HashMap<String, usize>,
    pub total_personas: usize,
}
