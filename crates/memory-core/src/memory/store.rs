//! ============================================================================
//! Memory Store - Authoritative per-scope cache backed by persistence
//! ============================================================================
//! Every scope keeps its memories in insertion order. All cache mutations go
//! through one store-wide lock, and persistence calls for a mutation happen
//! while that lock is held so the cache and the durable rows never diverge
//! silently.
//! ============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{Memory, StoreStats, TermVector};
use super::vectorizer::vectorize;
use crate::config::MemoryConfig;
use crate::db::{ExportSnapshot, MemoryPatch, MemoryPersistence, MemoryRecord, NewMemoryRecord, PersonaRecord};
use crate::types::{MemoryError, Result, Scope};

/// Cached memories keyed by scope, each bucket oldest first
pub(crate) type ScopeCache = HashMap<Scope, Vec<Memory>>;

/// Memory store combining the in-process cache and the persistence layer
pub struct MemoryStore {
    cache: RwLock<ScopeCache>,
    personas: RwLock<HashSet<String>>,
    persistence: Arc<dyn MemoryPersistence>,
    config: MemoryConfig,
}

impl MemoryStore {
    /// Create an empty store; call `load_from_persistence` to hydrate it
    pub fn new(persistence: Arc<dyn MemoryPersistence>, config: MemoryConfig) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            personas: RwLock::new(HashSet::new()),
            persistence,
            config,
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Exclusive access to the cache for retrieval and maintenance passes
    pub(crate) async fn cache_mut(&self) -> RwLockWriteGuard<'_, ScopeCache> {
        self.cache.write().await
    }

    /// Replace the cache with every persisted row, grouped by scope.
    /// Cache-only memories survive the reload. Scopes holding more than the
    /// configured capacity are trimmed to their newest memories.
    pub async fn load_from_persistence(&self) -> Result<usize> {
        let mut records = self
            .persistence
            .list_memories(None, true)
            .await
            .map_err(MemoryError::persistence)?;
        records.sort_by_key(|r| r.seq);

        match self.persistence.list_personas().await {
            Ok(personas) => {
                let mut known = self.personas.write().await;
                known.extend(personas.into_iter().map(|p| p.id));
            }
            Err(e) => warn!("Failed to load personas: {:#}", e),
        }

        let mut grouped: ScopeCache = HashMap::new();
        let loaded = records.len();
        for record in records {
            let memory = memory_from_record(record);
            grouped.entry(memory.scope.clone()).or_default().push(memory);
        }

        let mut cache = self.cache.write().await;
        for (scope, bucket) in cache.drain() {
            let unsaved: Vec<Memory> = bucket.into_iter().filter(|m| !m.persisted).collect();
            if !unsaved.is_empty() {
                grouped.entry(scope).or_default().extend(unsaved);
            }
        }

        let capacity = self.config.capacity_per_scope;
        let mut evicted = Vec::new();
        for (scope, bucket) in grouped.iter_mut() {
            let excess = bucket.len().saturating_sub(capacity);
            if excess > 0 {
                warn!(
                    "Scope {} held {} memories over capacity {}; evicting the oldest",
                    scope, excess, capacity
                );
                evicted.extend(bucket.drain(..excess));
            }
        }
        *cache = grouped;

        for old in &evicted {
            self.remove_persisted(old, "capacity eviction on load").await;
        }

        info!("Loaded {} memories across {} scopes", loaded, cache.len());
        Ok(loaded)
    }

    /// Record a new memory. A persistence failure keeps the memory cache-only
    /// under a locally generated id instead of failing the call.
    pub async fn add(&self, scope: &Scope, content: &str, is_public: bool) -> Result<Memory> {
        scope.validate()?;
        if content.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "memory content must not be empty".to_string(),
            ));
        }
        if self.config.require_known_persona {
            if let Scope::Persona(pid) = scope {
                if !self.personas.read().await.contains(pid) {
                    return Err(MemoryError::InvalidInput(format!("unknown persona: {}", pid)));
                }
            }
        }

        let target = if is_public { Scope::Public } else { scope.clone() };
        let vector = vectorize(content);
        let created_at = chrono::Utc::now().timestamp_millis();

        let mut cache = self.cache.write().await;

        let new = NewMemoryRecord {
            persona_id: scope.persona_id().map(str::to_string),
            content: content.to_string(),
            vector: encode_vector(&vector),
            weight: 1.0,
            is_public: target.is_public(),
            created_at,
        };
        let (id, persisted) = match self.persistence.create_memory(new).await {
            Ok(id) => (id, true),
            Err(e) => {
                warn!(
                    "Failed to persist memory for scope {}: {:#} - keeping it cache-only",
                    target, e
                );
                (Uuid::new_v4(), false)
            }
        };

        let memory = Memory {
            id,
            scope: target.clone(),
            content: content.to_string(),
            vector,
            weight: 1.0,
            created_at,
            access_count: 0,
            persisted,
        };

        let bucket = cache.entry(target.clone()).or_default();
        bucket.push(memory.clone());
        let excess = bucket.len().saturating_sub(self.config.capacity_per_scope);
        let evicted: Vec<Memory> = bucket.drain(..excess).collect();

        for old in &evicted {
            debug!("Evicting memory {} from scope {} (capacity {})", old.id, target, self.config.capacity_per_scope);
            self.remove_persisted(old, "capacity eviction").await;
        }

        info!("Stored memory {} in scope {}", memory.id, target);
        Ok(memory)
    }

    /// Replace a memory's content and vector
    pub async fn update(&self, id: Uuid, content: &str) -> Result<Memory> {
        if content.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "memory content must not be empty".to_string(),
            ));
        }

        let mut cache = self.cache.write().await;
        let memory = cache
            .values_mut()
            .flat_map(|bucket| bucket.iter_mut())
            .find(|m| m.id == id)
            .ok_or(MemoryError::NotFound(id))?;

        let vector = vectorize(content);
        if memory.persisted {
            let patch = MemoryPatch {
                content: Some(content.to_string()),
                vector: Some(encode_vector(&vector).unwrap_or_else(|| "{}".to_string())),
                ..Default::default()
            };
            self.persistence
                .update_memory(id, patch)
                .await
                .map_err(MemoryError::persistence)?;
        }

        memory.content = content.to_string();
        memory.vector = vector;

        debug!("Updated memory {}", id);
        Ok(memory.clone())
    }

    /// Remove a memory from persistence, then from the cache
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut cache = self.cache.write().await;
        let (scope, index) = locate(&cache, id).ok_or(MemoryError::NotFound(id))?;

        if cache[&scope][index].persisted {
            let removed = self
                .persistence
                .delete_memory(id)
                .await
                .map_err(MemoryError::persistence)?;
            if !removed {
                debug!("Memory {} had no persisted row", id);
            }
        }

        if let Some(bucket) = cache.get_mut(&scope) {
            bucket.remove(index);
            if bucket.is_empty() {
                cache.remove(&scope);
            }
        }

        info!("Deleted memory {}", id);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Option<Memory> {
        let cache = self.cache.read().await;
        cache
            .values()
            .flat_map(|bucket| bucket.iter())
            .find(|m| m.id == id)
            .cloned()
    }

    /// Memories visible to `scope`, newest first
    pub async fn list(&self, scope: &Scope, include_public: bool) -> Vec<Memory> {
        let cache = self.cache.read().await;
        let public = Scope::Public;

        let mut buckets = vec![scope];
        if include_public && !scope.is_public() {
            buckets.push(&public);
        }

        let mut memories: Vec<Memory> = buckets
            .into_iter()
            .filter_map(|s| cache.get(s))
            .flat_map(|bucket| bucket.iter().rev().cloned())
            .collect();
        memories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        memories
    }

    /// Snapshot of the persisted state (cache-only memories are not included)
    pub async fn export(&self) -> Result<ExportSnapshot> {
        self.persistence
            .export_all()
            .await
            .map_err(MemoryError::persistence)
    }

    /// Write a snapshot through to persistence and rehydrate the cache
    pub async fn import(&self, snapshot: &ExportSnapshot) -> Result<usize> {
        let imported = self
            .persistence
            .import_snapshot(snapshot)
            .await
            .map_err(MemoryError::persistence)?;
        self.load_from_persistence().await?;
        Ok(imported)
    }

    pub async fn register_persona(&self, id: &str, name: &str, description: &str) -> Result<PersonaRecord> {
        let pid = match Scope::persona(id)? {
            Scope::Persona(pid) => pid,
            Scope::Public => {
                return Err(MemoryError::InvalidInput(
                    "\"public\" is reserved and cannot be a persona".to_string(),
                ))
            }
        };

        let now = chrono::Utc::now().timestamp_millis();
        let persona = PersonaRecord {
            id: pid.clone(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.persistence
            .upsert_persona(&persona)
            .await
            .map_err(MemoryError::persistence)?;
        self.personas.write().await.insert(pid);

        Ok(persona)
    }

    pub async fn stats(&self) -> StoreStats {
        let cache = self.cache.read().await;
        let mut stats = StoreStats::default();
        for (scope, bucket) in cache.iter() {
            stats.total += bucket.len();
            stats.cache_only += bucket.iter().filter(|m| !m.persisted).count();
            match scope {
                Scope::Public => stats.public += bucket.len(),
                Scope::Persona(pid) => {
                    stats.per_persona.insert(pid.clone(), bucket.len());
                }
            }
        }
        stats
    }

    pub async fn flush(&self) -> Result<()> {
        self.persistence.flush().await.map_err(MemoryError::persistence)
    }

    /// Best-effort write of many patches in one persistence call; failures
    /// are logged, not surfaced
    pub(crate) async fn write_through_batch(&self, patches: Vec<(Uuid, MemoryPatch)>, reason: &str) {
        if patches.is_empty() {
            return;
        }
        let requested = patches.len();
        match self.persistence.update_memories(patches).await {
            Ok(written) if written < requested => {
                debug!("Persisted {} of {} {} updates", written, requested, reason);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to persist {} for {} memories: {:#}", reason, requested, e),
        }
    }

    /// Best-effort removal of a memory's row; failures are logged, not surfaced
    pub(crate) async fn remove_persisted(&self, memory: &Memory, reason: &str) {
        if !memory.persisted {
            return;
        }
        if let Err(e) = self.persistence.delete_memory(memory.id).await {
            warn!("Failed to delete memory {} during {}: {:#}", memory.id, reason, e);
        }
    }
}

fn locate(cache: &ScopeCache, id: Uuid) -> Option<(Scope, usize)> {
    cache.iter().find_map(|(scope, bucket)| {
        bucket
            .iter()
            .position(|m| m.id == id)
            .map(|index| (scope.clone(), index))
    })
}

/// JSON text for the vector column; empty vectors are stored as NULL
pub(crate) fn encode_vector(vector: &TermVector) -> Option<String> {
    if vector.is_empty() {
        return None;
    }
    serde_json::to_string(vector).ok()
}

/// Parse a stored vector, degrading to an empty vector when it is missing or malformed
pub(crate) fn decode_vector(raw: Option<&str>, id: &Uuid) -> TermVector {
    let Some(raw) = raw else {
        return TermVector::new();
    };
    match serde_json::from_str::<TermVector>(raw) {
        Ok(vector) => vector,
        Err(e) => {
            warn!("Malformed vector for memory {}: {} - using empty vector", id, e);
            TermVector::new()
        }
    }
}

fn memory_from_record(record: MemoryRecord) -> Memory {
    let scope = match record.persona_id {
        Some(pid) if !record.is_public => Scope::Persona(pid),
        _ => Scope::Public,
    };
    let vector = decode_vector(record.vector.as_deref(), &record.id);

    Memory {
        id: record.id,
        scope,
        content: record.content,
        vector,
        weight: record.weight,
        created_at: record.created_at,
        access_count: record.access_count,
        persisted: true,
    }
}
