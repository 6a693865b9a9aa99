//! ============================================================================
//! Retriever - Ranked recall with reinforcement
//! ============================================================================
//! Scores every memory visible to the querying scope by
//! `cosine(query, memory) * weight`, returns the best matches above the
//! relevance threshold and reinforces each returned memory.
//! ============================================================================

use std::sync::Arc;
use tracing::debug;

use super::similarity::cosine;
use super::store::MemoryStore;
use super::types::ScoredMemory;
use super::vectorizer::vectorize;
use crate::db::MemoryPatch;
use crate::types::{Origin, Result, Scope};

struct Candidate {
    scope: Scope,
    index: usize,
    score: f64,
    origin: Origin,
}

pub struct Retriever {
    store: Arc<MemoryStore>,
}

impl Retriever {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Up to `limit` memories relevant to `query`, best first.
    ///
    /// Returned entries carry the state and score from before this call's
    /// reinforcement. Ties keep the persona's own memories ahead of public
    /// ones, then insertion order. The reinforced rows are written back in
    /// one batch.
    pub async fn retrieve(&self, scope: &Scope, query: &str, limit: usize) -> Result<Vec<ScoredMemory>> {
        scope.validate()?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_vector = vectorize(query);
        if query_vector.is_empty() {
            debug!("Query has no tokens, nothing to retrieve");
            return Ok(Vec::new());
        }

        let config = self.store.config();
        let mut cache = self.store.cache_mut().await;

        let mut candidates = Vec::new();
        for bucket_scope in visible_scopes(scope) {
            let Some(bucket) = cache.get(&bucket_scope) else {
                continue;
            };
            let origin = bucket_scope.origin();
            for (index, memory) in bucket.iter().enumerate() {
                let score = cosine(&query_vector, &memory.vector) * memory.weight;
                if score > config.relevance_threshold {
                    candidates.push(Candidate {
                        scope: bucket_scope.clone(),
                        index,
                        score,
                        origin,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
        candidates.truncate(limit);

        let mut results = Vec::with_capacity(candidates.len());
        let mut reinforced = Vec::new();
        for candidate in candidates {
            let Some(memory) = cache
                .get_mut(&candidate.scope)
                .and_then(|bucket| bucket.get_mut(candidate.index))
            else {
                continue;
            };

            let snapshot = memory.clone();
            memory.weight = (memory.weight + config.reinforcement_step).min(config.weight_cap);
            memory.access_count = memory.access_count.saturating_add(1);
            if memory.persisted {
                reinforced.push((
                    memory.id,
                    MemoryPatch {
                        weight: Some(memory.weight),
                        access_count: Some(memory.access_count),
                        ..Default::default()
                    },
                ));
            }

            results.push(ScoredMemory {
                memory: snapshot,
                score: candidate.score,
                origin: candidate.origin,
            });
        }

        self.store.write_through_batch(reinforced, "reinforcement").await;

        debug!("Retrieved {} memories for scope {}", results.len(), scope);
        Ok(results)
    }
}

/// The scope's own bucket first, then the public pool
fn visible_scopes(scope: &Scope) -> Vec<Scope> {
    match scope {
        Scope::Persona(_) => vec![scope.clone(), Scope::Public],
        Scope::Public => vec![Scope::Public],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryConfig;
    use crate::db::MemoryDb;
    use crate::memory::store::tests::FlakyPersistence;
    use crate::types::MemoryError;
    use std::sync::atomic::Ordering;

    fn persona(id: &str) -> Scope {
        Scope::Persona(id.to_string())
    }

    fn setup() -> (Arc<MemoryDb>, Arc<MemoryStore>, Retriever) {
        let db = Arc::new(MemoryDb::open_in_memory().unwrap());
        let store = Arc::new(MemoryStore::new(db.clone(), MemoryConfig::default()));
        let retriever = Retriever::new(store.clone());
        (db, store, retriever)
    }

    #[tokio::test]
    async fn test_retrieves_relevant_memory() {
        let (_db, store, retriever) = setup();
        let memory = store.add(&persona("p1"), "apple lover", false).await.unwrap();
        store.add(&persona("p1"), "enjoys hiking", false).await.unwrap();

        let results = retriever.retrieve(&persona("p1"), "apple", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, memory.id);
        assert_eq!(results[0].origin, Origin::Persona);
        assert!((results[0].score - 1.0 / 2f64.sqrt()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_private_memories_stay_private() {
        let (_db, store, retriever) = setup();
        store.add(&persona("p2"), "secret apple recipe", false).await.unwrap();
        let shared = store.add(&persona("p2"), "apple harvest festival", true).await.unwrap();

        let results = retriever.retrieve(&persona("p1"), "apple", 10).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].memory.id, shared.id);
        assert_eq!(results[0].origin, Origin::Public);
    }

    #[tokio::test]
    async fn test_ranking_and_limit() {
        let (_db, store, retriever) = setup();
        let strong = store.add(&persona("p1"), "apple", false).await.unwrap();
        store.add(&persona("p1"), "apple pie crust", false).await.unwrap();
        store.add(&persona("p1"), "apple tart", false).await.unwrap();

        let results = retriever.retrieve(&persona("p1"), "apple", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory.id, strong.id);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_reinforcement_is_capped_and_persisted() {
        let (db, store, retriever) = setup();
        let memory = store.add(&persona("p1"), "apple", false).await.unwrap();

        let mut last_weight = memory.weight;
        for round in 1..=15u32 {
            let results = retriever.retrieve(&persona("p1"), "apple", 1).await.unwrap();
            // Reported weight is the state before this round's boost
            assert_eq!(results[0].memory.weight, last_weight);
            let current = store.get(memory.id).await.unwrap();
            assert!(current.weight >= last_weight);
            assert!(current.weight <= 2.0);
            assert_eq!(current.access_count, round);
            last_weight = current.weight;
        }
        assert_eq!(last_weight, 2.0);

        let row = db.get_memory(&memory.id).unwrap().unwrap();
        assert_eq!(row.weight, 2.0);
        assert_eq!(row.access_count, 15);
    }

    #[tokio::test]
    async fn test_threshold_filters_weak_matches() {
        let (_db, store, retriever) = setup();
        // cosine = 1/sqrt(200) ~ 0.07, below the 0.1 threshold
        let noisy: Vec<String> = ('a'..='z')
            .flat_map(|x| ('a'..='z').map(move |y| format!("z{}{}", x, y)))
            .take(199)
            .collect();
        store.add(&persona("p1"), &format!("apple {}", noisy.join(" ")), false).await.unwrap();
        let results = retriever.retrieve(&persona("p1"), "apple", 5).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_empty_query_and_zero_limit() {
        let (_db, store, retriever) = setup();
        store.add(&persona("p1"), "apple", false).await.unwrap();
        assert!(retriever.retrieve(&persona("p1"), "!!! 123", 5).await.unwrap().is_empty());
        assert!(retriever.retrieve(&persona("p1"), "apple", 0).await.unwrap().is_empty());
        // Nothing was reinforced
        assert_eq!(store.list(&persona("p1"), false).await[0].access_count, 0);
    }

    #[tokio::test]
    async fn test_reinforcement_is_written_in_one_batch() {
        let flaky = Arc::new(FlakyPersistence::new());
        let store = Arc::new(MemoryStore::new(flaky.clone(), MemoryConfig::default()));
        let retriever = Retriever::new(store.clone());
        let mut ids = Vec::new();
        for text in ["apple", "apple pie", "apple tart"] {
            ids.push(store.add(&persona("p1"), text, false).await.unwrap().id);
        }

        let results = retriever.retrieve(&persona("p1"), "apple", 5).await.unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(flaky.batch_writes.load(Ordering::SeqCst), 1);
        assert_eq!(flaky.single_writes.load(Ordering::SeqCst), 0);

        for id in ids {
            let row = flaky.inner.get_memory(&id).unwrap().unwrap();
            assert_eq!(row.access_count, 1);
            assert!((row.weight - 1.1).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn test_rejects_hand_built_invalid_scopes() {
        let (_db, store, retriever) = setup();
        store.add(&Scope::Public, "apple", false).await.unwrap();

        for bad in [persona(""), persona("public")] {
            assert!(matches!(
                retriever.retrieve(&bad, "apple", 5).await,
                Err(MemoryError::InvalidInput(_))
            ));
        }
        assert_eq!(store.list(&Scope::Public, false).await[0].access_count, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_retrievals_count_every_hit() {
        let (db, store, _) = setup();
        let memory = store.add(&persona("p1"), "apple", false).await.unwrap();

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let retriever = Retriever::new(store.clone());
                tokio::spawn(async move { retriever.retrieve(&persona("p1"), "apple", 1).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().len(), 1);
        }

        let cached = store.get(memory.id).await.unwrap();
        assert_eq!(cached.access_count, 20);
        assert_eq!(cached.weight, 2.0);
        let row = db.get_memory(&memory.id).unwrap().unwrap();
        assert_eq!(row.access_count, 20);
        assert_eq!(row.weight, 2.0);
    }

    #[tokio::test]
    async fn test_reinforcement_survives_persistence_outage() {
        let flaky = Arc::new(FlakyPersistence::new());
        let store = Arc::new(MemoryStore::new(flaky.clone(), MemoryConfig::default()));
        let retriever = Retriever::new(store.clone());
        let memory = store.add(&persona("p1"), "apple", false).await.unwrap();

        flaky.set_down(true);
        let results = retriever.retrieve(&persona("p1"), "apple", 1).await.unwrap();
        assert_eq!(results.len(), 1);
        let cached = store.get(memory.id).await.unwrap();
        assert!((cached.weight - 1.1).abs() < 1e-12);
        assert_eq!(cached.access_count, 1);
    }
}
