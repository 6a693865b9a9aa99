//! ============================================================================
//! Persistence Contract - Durable storage consumed by the memory store
//! ============================================================================
//! The store keeps its own cache and only talks to durable storage through
//! this trait, so any backend (embedded redb, SQL, remote service) can sit
//! behind it.
//! ============================================================================

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use super::types::{ExportSnapshot, MemoryPatch, MemoryRecord, NewMemoryRecord, PersonaRecord};

#[async_trait]
pub trait MemoryPersistence: Send + Sync {
    /// Insert a new row and return its id
    async fn create_memory(&self, record: NewMemoryRecord) -> Result<Uuid>;

    async fn read_memory(&self, id: Uuid) -> Result<Option<MemoryRecord>>;

    /// Rows for one persona (plus public rows when `include_public`), or
    /// every row when `persona_id` is None
    async fn list_memories(
        &self,
        persona_id: Option<&str>,
        include_public: bool,
    ) -> Result<Vec<MemoryRecord>>;

    /// Fails if the row does not exist
    async fn update_memory(&self, id: Uuid, patch: MemoryPatch) -> Result<()>;

    /// Apply a batch of patches, skipping rows that no longer exist.
    /// Returns how many rows were written. Backends with transactions
    /// should override this to write the batch at once.
    async fn update_memories(&self, patches: Vec<(Uuid, MemoryPatch)>) -> Result<usize> {
        let mut written = 0;
        for (id, patch) in patches {
            if self.read_memory(id).await?.is_none() {
                continue;
            }
            self.update_memory(id, patch).await?;
            written += 1;
        }
        Ok(written)
    }

    /// Returns whether a row was removed
    async fn delete_memory(&self, id: Uuid) -> Result<bool>;

    async fn export_all(&self) -> Result<ExportSnapshot>;

    /// Insert-or-replace every persona and memory in the snapshot
    async fn import_snapshot(&self, snapshot: &ExportSnapshot) -> Result<usize>;

    async fn upsert_persona(&self, persona: &PersonaRecord) -> Result<()>;

    async fn list_personas(&self) -> Result<Vec<PersonaRecord>>;

    /// Make all acknowledged writes durable
    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}
