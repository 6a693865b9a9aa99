// ============================================================================
// MemoryDb - Embedded Database (redb)
// ============================================================================
// Durable storage for memory rows and personas.
// Default path: ~/.persona-memory/memories.redb (override via MEMORY_DB_PATH)
// ============================================================================

pub mod persistence;
pub mod types;

pub use persistence::MemoryPersistence;
pub use types::{
    DbStats, ExportSnapshot, MemoryPatch, MemoryRecord, NewMemoryRecord, PersonaRecord,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

// Table definitions
const MEMORIES: TableDefinition<&str, &[u8]> = TableDefinition::new("memories");
const PERSONAS: TableDefinition<&str, &[u8]> = TableDefinition::new("personas");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_SEQ_KEY: &str = "memories:next_seq";

/// Embedded database holding persona memories
pub struct MemoryDb {
    db: Database,
    path: Option<PathBuf>,
}

impl MemoryDb {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses MEMORY_DB_PATH env var or ~/.persona-memory/memories.redb
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("MEMORY_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            let data_dir = home.join(".persona-memory");
            std::fs::create_dir_all(&data_dir)
                .map_err(|e| anyhow!("Failed to create .persona-memory directory: {}", e))?;
            data_dir.join("memories.redb")
        };

        info!("Opening memory database at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        Self::init(db, Some(db_path))
    }

    /// Open a database that lives only in memory
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| anyhow!("Failed to create in-memory database: {}", e))?;

        Self::init(db, None)
    }

    fn init(db: Database, path: Option<PathBuf>) -> Result<Self> {
        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn.open_table(MEMORIES).map_err(|e| anyhow!("Failed to create memories table: {}", e))?;
            let _ = write_txn.open_table(PERSONAS).map_err(|e| anyhow!("Failed to create personas table: {}", e))?;
            let _ = write_txn.open_table(META).map_err(|e| anyhow!("Failed to create meta table: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        debug!("Memory database ready");

        Ok(Self { db, path })
    }

    /// Database file path (None for in-memory databases)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    // ========================================================================
    // Memory Operations
    // ========================================================================

    pub fn insert_memory(&self, new: NewMemoryRecord) -> Result<MemoryRecord> {
        let id = Uuid::new_v4();
        let key = memory_key(&id);

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let record;
        {
            let mut meta = write_txn.open_table(META)
                .map_err(|e| anyhow!("Failed to open meta table: {}", e))?;
            let seq = meta.get(NEXT_SEQ_KEY)
                .map_err(|e| anyhow!("Failed to read sequence: {}", e))?
                .map(|v| v.value())
                .unwrap_or(0);
            meta.insert(NEXT_SEQ_KEY, seq + 1)
                .map_err(|e| anyhow!("Failed to bump sequence: {}", e))?;

            record = MemoryRecord {
                id,
                seq,
                persona_id: new.persona_id,
                content: new.content,
                vector: new.vector,
                weight: new.weight,
                is_public: new.is_public,
                access_count: 0,
                created_at: new.created_at,
                updated_at: new.created_at,
            };
            let value = encode(&record)?;

            let mut table = write_txn.open_table(MEMORIES)
                .map_err(|e| anyhow!("Failed to open memories table: {}", e))?;
            table.insert(key.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert memory: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored memory: {} (seq {})", record.id, record.seq);
        Ok(record)
    }

    pub fn get_memory(&self, id: &Uuid) -> Result<Option<MemoryRecord>> {
        let key = memory_key(id);

        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(MEMORIES)
            .map_err(|e| anyhow!("Failed to open memories table: {}", e))?;

        match table.get(key.as_str()).map_err(|e| anyhow!("Failed to get memory: {}", e))? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }

    /// All rows ordered by insertion sequence, filtered by persona visibility
    pub fn memories(&self, persona_id: Option<&str>, include_public: bool) -> Result<Vec<MemoryRecord>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(MEMORIES)
            .map_err(|e| anyhow!("Failed to open memories table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate memories: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let record: MemoryRecord = decode(value.value())?;

            let visible = match persona_id {
                None => true,
                Some(pid) => {
                    let owned = !record.is_public && record.persona_id.as_deref() == Some(pid);
                    owned || (include_public && is_public_row(&record))
                }
            };
            if visible {
                results.push(record);
            }
        }
        results.sort_by_key(|r| r.seq);
        Ok(results)
    }

    pub fn patch_memory(&self, id: &Uuid, patch: &MemoryPatch) -> Result<MemoryRecord> {
        let key = memory_key(id);

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let record;
        {
            let mut table = write_txn.open_table(MEMORIES)
                .map_err(|e| anyhow!("Failed to open memories table: {}", e))?;
            let existing = table.get(key.as_str())
                .map_err(|e| anyhow!("Failed to get memory: {}", e))?
                .map(|v| v.value().to_vec())
                .ok_or_else(|| anyhow!("Memory not found: {}", id))?;

            let mut updated: MemoryRecord = decode(&existing)?;
            apply_patch(&mut updated, patch);

            let value = encode(&updated)?;
            table.insert(key.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to update memory: {}", e))?;
            record = updated;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Updated memory: {}", id);
        Ok(record)
    }

    /// Apply several patches in one write transaction. Rows that no longer
    /// exist are skipped; returns how many rows were written.
    pub fn patch_many(&self, patches: &[(Uuid, MemoryPatch)]) -> Result<usize> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let mut written = 0;
        {
            let mut table = write_txn.open_table(MEMORIES)
                .map_err(|e| anyhow!("Failed to open memories table: {}", e))?;
            for (id, patch) in patches {
                if patch.is_empty() {
                    continue;
                }
                let key = memory_key(id);
                let existing = table.get(key.as_str())
                    .map_err(|e| anyhow!("Failed to get memory: {}", e))?
                    .map(|v| v.value().to_vec());
                let Some(existing) = existing else {
                    debug!("Skipping patch for missing memory: {}", id);
                    continue;
                };

                let mut updated: MemoryRecord = decode(&existing)?;
                apply_patch(&mut updated, patch);
                let value = encode(&updated)?;
                table.insert(key.as_str(), value.as_slice())
                    .map_err(|e| anyhow!("Failed to update memory: {}", e))?;
                written += 1;
            }
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit batch: {}", e))?;

        debug!("Patched {} of {} memories", written, patches.len());
        Ok(written)
    }

    pub fn remove_memory(&self, id: &Uuid) -> Result<bool> {
        let key = memory_key(id);

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        let removed;
        {
            let mut table = write_txn.open_table(MEMORIES)
                .map_err(|e| anyhow!("Failed to open memories table: {}", e))?;
            removed = table.remove(key.as_str())
                .map_err(|e| anyhow!("Failed to remove memory: {}", e))?
                .is_some();
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit delete: {}", e))?;

        if removed {
            debug!("Deleted memory: {}", id);
        }
        Ok(removed)
    }

    // ========================================================================
    // Persona Operations
    // ========================================================================

    pub fn put_persona(&self, persona: &PersonaRecord) -> Result<()> {
        let key = format!("personas:{}", persona.id);
        let value = encode(persona)?;

        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn.open_table(PERSONAS)
                .map_err(|e| anyhow!("Failed to open personas table: {}", e))?;
            table.insert(key.as_str(), value.as_slice())
                .map_err(|e| anyhow!("Failed to insert persona: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit: {}", e))?;

        debug!("Stored persona: {}", persona.id);
        Ok(())
    }

    pub fn personas(&self) -> Result<Vec<PersonaRecord>> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn.open_table(PERSONAS)
            .map_err(|e| anyhow!("Failed to open personas table: {}", e))?;

        let mut results = Vec::new();
        let iter = table.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate personas: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            results.push(decode(value.value())?);
        }
        Ok(results)
    }

    // ========================================================================
    // Export / Import
    // ========================================================================

    pub fn snapshot(&self) -> Result<ExportSnapshot> {
        Ok(ExportSnapshot {
            exported_at: chrono::Utc::now().to_rfc3339(),
            personas: self.personas()?,
            memories: self.memories(None, true)?,
        })
    }

    /// Insert-or-replace the snapshot contents in one transaction.
    /// Returns the number of memory rows written.
    pub fn restore(&self, snapshot: &ExportSnapshot) -> Result<usize> {
        let write_txn = self.db.begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut personas = write_txn.open_table(PERSONAS)
                .map_err(|e| anyhow!("Failed to open personas table: {}", e))?;
            for persona in &snapshot.personas {
                let key = format!("personas:{}", persona.id);
                let value = encode(persona)?;
                personas.insert(key.as_str(), value.as_slice())
                    .map_err(|e| anyhow!("Failed to import persona: {}", e))?;
            }

            let mut meta = write_txn.open_table(META)
                .map_err(|e| anyhow!("Failed to open meta table: {}", e))?;
            let mut next_seq = meta.get(NEXT_SEQ_KEY)
                .map_err(|e| anyhow!("Failed to read sequence: {}", e))?
                .map(|v| v.value())
                .unwrap_or(0);

            let mut memories = write_txn.open_table(MEMORIES)
                .map_err(|e| anyhow!("Failed to open memories table: {}", e))?;
            for record in &snapshot.memories {
                let key = memory_key(&record.id);
                let value = encode(record)?;
                memories.insert(key.as_str(), value.as_slice())
                    .map_err(|e| anyhow!("Failed to import memory: {}", e))?;
                next_seq = next_seq.max(record.seq + 1);
            }

            meta.insert(NEXT_SEQ_KEY, next_seq)
                .map_err(|e| anyhow!("Failed to bump sequence: {}", e))?;
        }
        write_txn.commit().map_err(|e| anyhow!("Failed to commit import: {}", e))?;

        info!(
            "Imported {} personas and {} memories",
            snapshot.personas.len(),
            snapshot.memories.len()
        );
        Ok(snapshot.memories.len())
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    pub fn stats(&self) -> Result<DbStats> {
        let read_txn = self.db.begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let memories = read_txn.open_table(MEMORIES)
            .map_err(|e| anyhow!("Failed to open memories table: {}", e))?;

        let mut total_memories = 0;
        let mut public_memories = 0;
        let mut per_persona: HashMap<String, usize> = HashMap::new();
        for entry in memories.iter().map_err(|e| anyhow!("Failed to iterate memories: {}", e))? {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let record: MemoryRecord = decode(value.value())?;
            total_memories += 1;
            if is_public_row(&record) {
                public_memories += 1;
            } else if let Some(pid) = record.persona_id {
                *per_persona.entry(pid).or_insert(0) += 1;
            }
        }

        let personas = read_txn.open_table(PERSONAS)
            .map_err(|e| anyhow!("Failed to open personas table: {}", e))?;
        let total_personas = personas.range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate personas: {}", e))?
            .count();

        Ok(DbStats {
            total_memories,
            public_memories,
            per_persona,
            total_personas,
        })
    }
}

#[async_trait]
impl MemoryPersistence for MemoryDb {
    async fn create_memory(&self, record: NewMemoryRecord) -> Result<Uuid> {
        self.insert_memory(record).map(|r| r.id)
    }

    async fn read_memory(&self, id: Uuid) -> Result<Option<MemoryRecord>> {
        self.get_memory(&id)
    }

    async fn list_memories(
        &self,
        persona_id: Option<&str>,
        include_public: bool,
    ) -> Result<Vec<MemoryRecord>> {
        self.memories(persona_id, include_public)
    }

    async fn update_memory(&self, id: Uuid, patch: MemoryPatch) -> Result<()> {
        if patch.is_empty() {
            return Ok(());
        }
        self.patch_memory(&id, &patch).map(|_| ())
    }

    async fn update_memories(&self, patches: Vec<(Uuid, MemoryPatch)>) -> Result<usize> {
        if patches.is_empty() {
            return Ok(0);
        }
        self.patch_many(&patches)
    }

    async fn delete_memory(&self, id: Uuid) -> Result<bool> {
        self.remove_memory(&id)
    }

    async fn export_all(&self) -> Result<ExportSnapshot> {
        self.snapshot()
    }

    async fn import_snapshot(&self, snapshot: &ExportSnapshot) -> Result<usize> {
        self.restore(snapshot)
    }

    async fn upsert_persona(&self, persona: &PersonaRecord) -> Result<()> {
        self.put_persona(persona)
    }

    async fn list_personas(&self) -> Result<Vec<PersonaRecord>> {
        self.personas()
    }
}

fn apply_patch(record: &mut MemoryRecord, patch: &MemoryPatch) {
    if let Some(content) = &patch.content {
        record.content = content.clone();
    }
    if let Some(vector) = &patch.vector {
        record.vector = Some(vector.clone());
    }
    if let Some(weight) = patch.weight {
        record.weight = weight;
    }
    if let Some(is_public) = patch.is_public {
        record.is_public = is_public;
    }
    if let Some(access_count) = patch.access_count {
        record.access_count = access_count;
    }
    record.updated_at = chrono::Utc::now().timestamp_millis();
}

fn memory_key(id: &Uuid) -> String {
    format!("memories:{}", id)
}

/// Public flag wins; rows without an owner are legacy public rows
fn is_public_row(record: &MemoryRecord) -> bool {
    record.is_public || record.persona_id.is_none()
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| anyhow!("Failed to serialize row: {}", e))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| anyhow!("Failed to deserialize row: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_record(persona: Option<&str>, content: &str, is_public: bool) -> NewMemoryRecord {
        NewMemoryRecord {
            persona_id: persona.map(str::to_string),
            content: content.to_string(),
            vector: Some(r#"{"apple":1}"#.to_string()),
            weight: 1.0,
            is_public,
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = MemoryDb::open_in_memory().unwrap();
        let stored = db.insert_memory(new_record(Some("p1"), "apple lover", false)).unwrap();

        let loaded = db.get_memory(&stored.id).unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(loaded.access_count, 0);
        assert!(db.path().is_none());
    }

    #[test]
    fn test_sequence_orders_listing() {
        let db = MemoryDb::open_in_memory().unwrap();
        for i in 0..5 {
            db.insert_memory(new_record(Some("p1"), &format!("memory {}", i), false)).unwrap();
        }

        let rows = db.memories(None, true).unwrap();
        let seqs: Vec<u64> = rows.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert_eq!(rows[0].content, "memory 0");
    }

    #[test]
    fn test_listing_visibility() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.insert_memory(new_record(Some("a"), "private a", false)).unwrap();
        db.insert_memory(new_record(Some("b"), "private b", false)).unwrap();
        db.insert_memory(new_record(Some("b"), "shared by b", true)).unwrap();
        db.insert_memory(new_record(None, "legacy row", false)).unwrap();

        let a_only = db.memories(Some("a"), false).unwrap();
        assert_eq!(a_only.len(), 1);
        assert_eq!(a_only[0].content, "private a");

        let a_with_public = db.memories(Some("a"), true).unwrap();
        let contents: Vec<&str> = a_with_public.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["private a", "shared by b", "legacy row"]);

        assert_eq!(db.memories(None, false).unwrap().len(), 4);
    }

    #[test]
    fn test_patch_and_remove() {
        let db = MemoryDb::open_in_memory().unwrap();
        let stored = db.insert_memory(new_record(Some("p1"), "old", false)).unwrap();

        let patched = db
            .patch_memory(
                &stored.id,
                &MemoryPatch {
                    content: Some("new".to_string()),
                    weight: Some(1.5),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(patched.content, "new");
        assert_eq!(patched.weight, 1.5);
        assert_eq!(patched.vector, stored.vector);

        assert!(db.remove_memory(&stored.id).unwrap());
        assert!(!db.remove_memory(&stored.id).unwrap());
        assert!(db.get_memory(&stored.id).unwrap().is_none());
    }

    #[test]
    fn test_patch_missing_row_fails() {
        let db = MemoryDb::open_in_memory().unwrap();
        assert!(db.patch_memory(&Uuid::new_v4(), &MemoryPatch::weight(0.5)).is_err());
    }

    #[test]
    fn test_patch_many_skips_missing_rows() {
        let db = MemoryDb::open_in_memory().unwrap();
        let a = db.insert_memory(new_record(Some("p1"), "apple", false)).unwrap();
        let b = db.insert_memory(new_record(Some("p1"), "pear", false)).unwrap();

        let written = db
            .patch_many(&[
                (a.id, MemoryPatch::weight(1.2)),
                (Uuid::new_v4(), MemoryPatch::weight(0.5)),
                (b.id, MemoryPatch { access_count: Some(3), ..Default::default() }),
                (b.id, MemoryPatch::default()),
            ])
            .unwrap();
        assert_eq!(written, 2);

        assert_eq!(db.get_memory(&a.id).unwrap().unwrap().weight, 1.2);
        let pear = db.get_memory(&b.id).unwrap().unwrap();
        assert_eq!(pear.access_count, 3);
        assert_eq!(pear.weight, 1.0);
        assert_eq!(db.stats().unwrap().total_memories, 2);
    }

    #[test]
    fn test_snapshot_restore() {
        let source = MemoryDb::open_in_memory().unwrap();
        source
            .put_persona(&PersonaRecord {
                id: "p1".to_string(),
                name: "Helper".to_string(),
                description: String::new(),
                created_at: 0,
                updated_at: 0,
            })
            .unwrap();
        let a = source.insert_memory(new_record(Some("p1"), "one", false)).unwrap();
        let b = source.insert_memory(new_record(Some("p1"), "two", true)).unwrap();

        let snapshot = source.snapshot().unwrap();
        assert_eq!(snapshot.personas.len(), 1);
        assert_eq!(snapshot.memories.len(), 2);

        let target = MemoryDb::open_in_memory().unwrap();
        assert_eq!(target.restore(&snapshot).unwrap(), 2);
        assert_eq!(target.get_memory(&a.id).unwrap().unwrap().content, "one");
        assert_eq!(target.get_memory(&b.id).unwrap().unwrap().content, "two");

        // New rows continue after the imported sequence
        let c = target.insert_memory(new_record(Some("p1"), "three", false)).unwrap();
        assert!(c.seq > b.seq);
    }

    #[test]
    fn test_stats() {
        let db = MemoryDb::open_in_memory().unwrap();
        db.insert_memory(new_record(Some("a"), "x", false)).unwrap();
        db.insert_memory(new_record(Some("a"), "y", false)).unwrap();
        db.insert_memory(new_record(Some("b"), "z", true)).unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total_memories, 3);
        assert_eq!(stats.public_memories, 1);
        assert_eq!(stats.per_persona.get("a"), Some(&2));
        assert_eq!(stats.total_personas, 0);
    }
}
