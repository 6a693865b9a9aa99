//! ============================================================================
//! Memory Manager - Orchestrates memory storage and retrieval
//! ============================================================================
//! High-level API for storing, recalling, and maintaining persona memory.
//! One manager owns one store, its retriever, and its maintenance scheduler.
//! ============================================================================

use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::maintenance::MaintenanceScheduler;
use super::retrieval::Retriever;
use super::store::MemoryStore;
use super::types::{DecayReport, Memory, MergeReport, ScoredMemory, StoreStats};
use crate::config::MemoryConfig;
use crate::db::{ExportSnapshot, MemoryDb, MemoryPersistence, PersonaRecord};
use crate::types::{MemoryError, Origin, Result, Scope};

/// Memory manager combining store, retrieval, and maintenance
pub struct MemoryManager {
    store: Arc<MemoryStore>,
    retriever: Retriever,
    maintenance: MaintenanceScheduler,
}

impl MemoryManager {
    /// Create a manager over `persistence` and hydrate its cache.
    ///
    /// If the initial load fails the manager still opens with an empty
    /// cache; later writes keep going to persistence.
    pub async fn open(config: MemoryConfig, persistence: Arc<dyn MemoryPersistence>) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(MemoryStore::new(persistence, config));
        if let Err(e) = store.load_from_persistence().await {
            warn!("Starting with an empty memory cache: {}", e);
        }

        Ok(Self {
            retriever: Retriever::new(store.clone()),
            maintenance: MaintenanceScheduler::new(store.clone()),
            store,
        })
    }

    /// Open the embedded database named by `config.db_path` (or its default
    /// location) and build a manager on top of it
    pub async fn open_default(config: MemoryConfig) -> Result<Self> {
        let db = MemoryDb::open(config.db_path.as_deref()).map_err(MemoryError::persistence)?;
        Self::open(config, Arc::new(db)).await
    }

    pub fn config(&self) -> &MemoryConfig {
        self.store.config()
    }

    /// Get reference to the store (for advanced operations)
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    // ========================================================================
    // Memory Operations
    // ========================================================================

    pub async fn add_memory(&self, scope: &Scope, content: &str, is_public: bool) -> Result<Memory> {
        debug!("Adding memory for scope {} (public: {})", scope, is_public);
        self.store.add(scope, content, is_public).await
    }

    /// Most relevant memories for `query`, reinforcing each one returned
    pub async fn retrieve_memories(&self, scope: &Scope, query: &str, limit: usize) -> Result<Vec<ScoredMemory>> {
        self.retriever.retrieve(scope, query, limit).await
    }

    /// Memories visible to `scope`, newest first
    pub async fn get_all_memories(&self, scope: &Scope, include_public: bool) -> Vec<Memory> {
        self.store.list(scope, include_public).await
    }

    pub async fn get_memory(&self, id: Uuid) -> Option<Memory> {
        self.store.get(id).await
    }

    /// Returns false if no memory has this id
    pub async fn update_memory(&self, id: Uuid, content: &str) -> Result<bool> {
        match self.store.update(id, content).await {
            Ok(_) => Ok(true),
            Err(MemoryError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Returns false if no memory has this id
    pub async fn delete_memory(&self, id: Uuid) -> Result<bool> {
        match self.store.delete(id).await {
            Ok(()) => Ok(true),
            Err(MemoryError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Retrieve memories for `query` and render them for a system prompt.
    /// Empty when nothing is relevant.
    pub async fn memory_context(&self, scope: &Scope, query: &str, limit: usize) -> Result<String> {
        let memories = self.retrieve_memories(scope, query, limit).await?;
        Ok(format_memories_for_prompt(&memories))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    pub async fn apply_decay(&self) -> DecayReport {
        self.maintenance.apply_decay().await
    }

    /// Merge near-duplicates; `threshold` defaults to the configured one
    pub async fn merge_similar(&self, scope: Option<&Scope>, threshold: Option<f64>) -> Result<MergeReport> {
        let threshold = threshold.unwrap_or(self.config().merge_threshold);
        self.maintenance.merge_similar(scope, threshold).await
    }

    /// Start periodic decay. Returns false if it was already running.
    pub async fn start_maintenance(&self) -> bool {
        self.maintenance.start().await
    }

    pub async fn maintenance_running(&self) -> bool {
        self.maintenance.is_running().await
    }

    // ========================================================================
    // Personas, Backup, Stats
    // ========================================================================

    pub async fn register_persona(&self, id: &str, name: &str, description: &str) -> Result<PersonaRecord> {
        self.store.register_persona(id, name, description).await
    }

    pub async fn export(&self) -> Result<ExportSnapshot> {
        self.store.export().await
    }

    pub async fn import(&self, snapshot: &ExportSnapshot) -> Result<usize> {
        let imported = self.store.import(snapshot).await?;
        info!("Imported {} memories", imported);
        Ok(imported)
    }

    pub async fn stats(&self) -> StoreStats {
        self.store.stats().await
    }

    /// Stop the scheduler (letting a pass in flight finish) and flush persistence
    pub async fn shutdown(&self) -> Result<()> {
        self.maintenance.stop().await;
        self.store.flush().await?;
        info!("Memory manager shut down");
        Ok(())
    }
}

/// Render retrieved memories as a prompt block
pub fn format_memories_for_prompt(memories: &[ScoredMemory]) -> String {
    if memories.is_empty() {
        return String::new();
    }

    let mut formatted = String::from("Relevant memories:\n");
    for scored in memories {
        let label = match scored.origin {
            Origin::Persona => "persona memory",
            Origin::Public => "public memory",
        };
        formatted.push_str(&format!("- {} ({})\n", scored.memory.content, label));
    }
    formatted
}
