//! End-to-end behaviour of the memory engine through its public API.

use std::sync::Arc;

use memory_core::db::MemoryDb;
use memory_core::memory::{cosine, vectorize};
use memory_core::{MemoryConfig, MemoryManager, Origin, Scope};

fn persona(id: &str) -> Scope {
    Scope::persona(id).unwrap()
}

async fn in_memory_manager(config: MemoryConfig) -> MemoryManager {
    let db = Arc::new(MemoryDb::open_in_memory().unwrap());
    MemoryManager::open(config, db).await.unwrap()
}

#[test]
fn vectorizer_is_deterministic() {
    let text = "User likes 苹果 and apple pie; APPLE!";
    assert_eq!(vectorize(text), vectorize(text));
    assert_eq!(vectorize(text).get("apple"), Some(&2));
    assert_eq!(vectorize(text).get("苹果"), Some(&1));
}

#[test]
fn cosine_bounds() {
    let v = vectorize("green apple pie");
    assert_eq!(cosine(&v, &v), 1.0);
    assert_eq!(cosine(&v, &vectorize("")), 0.0);
    let partial = cosine(&v, &vectorize("apple"));
    assert!(partial > 0.0 && partial < 1.0);
}

#[tokio::test]
async fn added_memory_is_retrievable() {
    let manager = in_memory_manager(MemoryConfig::default()).await;
    let p1 = persona("p1");
    manager.add_memory(&p1, "apple lover", false).await.unwrap();

    let results = manager.retrieve_memories(&p1, "apple", 5).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].memory.content, "apple lover");
    assert_eq!(results[0].origin, Origin::Persona);
}

#[tokio::test]
async fn private_memories_are_isolated_and_public_ones_shared() {
    let manager = in_memory_manager(MemoryConfig::default()).await;
    let (p1, p2) = (persona("p1"), persona("p2"));

    manager.add_memory(&p1, "secret apple recipe", false).await.unwrap();
    manager.add_memory(&p1, "apple season starts in autumn", true).await.unwrap();

    let for_p2 = manager.retrieve_memories(&p2, "apple", 10).await.unwrap();
    assert_eq!(for_p2.len(), 1);
    assert_eq!(for_p2[0].origin, Origin::Public);
    assert_eq!(for_p2[0].memory.content, "apple season starts in autumn");

    let for_p1 = manager.retrieve_memories(&p1, "apple", 10).await.unwrap();
    assert_eq!(for_p1.len(), 2);

    let listing = manager.get_all_memories(&p2, true).await;
    assert_eq!(listing.len(), 1);
    assert!(manager.get_all_memories(&p2, false).await.is_empty());
}

#[tokio::test]
async fn public_scope_memories_reach_every_persona() {
    let manager = in_memory_manager(MemoryConfig::default()).await;
    let public = Scope::persona("public").unwrap();
    assert_eq!(public, Scope::Public);
    manager.add_memory(&public, "the cafe opens at nine", false).await.unwrap();

    for id in ["p1", "p2", "p3"] {
        let results = manager.retrieve_memories(&persona(id), "cafe", 3).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].origin, Origin::Public);
    }
}

#[tokio::test]
async fn reinforcement_is_monotonic_and_capped() {
    let manager = in_memory_manager(MemoryConfig::default()).await;
    let p1 = persona("p1");
    let memory = manager.add_memory(&p1, "apple", false).await.unwrap();

    let mut previous = manager.get_memory(memory.id).await.unwrap();
    for _ in 0..20 {
        manager.retrieve_memories(&p1, "apple", 1).await.unwrap();
        let current = manager.get_memory(memory.id).await.unwrap();
        assert!(current.weight >= previous.weight);
        assert!(current.weight <= 2.0);
        assert_eq!(current.access_count, previous.access_count + 1);
        previous = current;
    }
    assert_eq!(previous.weight, 2.0);
}

#[tokio::test]
async fn decay_follows_factor_and_prunes() {
    let manager = in_memory_manager(MemoryConfig::default()).await;
    let p1 = persona("p1");
    let memory = manager.add_memory(&p1, "apple", false).await.unwrap();

    for _ in 0..10 {
        manager.apply_decay().await;
    }
    let weight = manager.get_memory(memory.id).await.unwrap().weight;
    assert!((weight - 0.95f64.powi(10)).abs() < 1e-9);

    let mut total_pruned = 0;
    for _ in 0..40 {
        total_pruned += manager.apply_decay().await.pruned;
    }
    assert_eq!(total_pruned, 1);
    assert!(manager.get_memory(memory.id).await.is_none());
}

#[tokio::test]
async fn similar_memories_merge() {
    let manager = in_memory_manager(MemoryConfig::default()).await;
    let p1 = persona("p1");
    let keep = manager.add_memory(&p1, "user likes green apples", false).await.unwrap();
    manager.add_memory(&p1, "User likes green apples.", false).await.unwrap();

    let report = manager.merge_similar(Some(&p1), Some(0.8)).await.unwrap();
    assert_eq!(report.merged, 1);

    let remaining = manager.get_all_memories(&p1, false).await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, keep.id);
    assert!((remaining[0].weight - 1.5).abs() < 1e-12);
}

#[tokio::test]
async fn capacity_evicts_the_oldest() {
    let manager = in_memory_manager(MemoryConfig::default()).await;
    let p1 = persona("p1");

    let first = manager.add_memory(&p1, "memory number zero", false).await.unwrap();
    for i in 1..=100 {
        manager
            .add_memory(&p1, &format!("memory number {}", i), false)
            .await
            .unwrap();
    }

    let all = manager.get_all_memories(&p1, false).await;
    assert_eq!(all.len(), 100);
    assert!(all.iter().all(|m| m.id != first.id));
    assert_eq!(manager.stats().await.per_persona.get("p1"), Some(&100));
}

#[tokio::test]
async fn memories_survive_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memories.redb");
    let config = MemoryConfig {
        db_path: Some(path.to_string_lossy().into_owned()),
        ..Default::default()
    };
    let p1 = persona("p1");

    let id = {
        let manager = MemoryManager::open_default(config.clone()).await.unwrap();
        let memory = manager.add_memory(&p1, "apple lover", false).await.unwrap();
        manager.retrieve_memories(&p1, "apple", 1).await.unwrap();
        manager.shutdown().await.unwrap();
        memory.id
    };

    let reopened = MemoryManager::open_default(config).await.unwrap();
    let memory = reopened.get_memory(id).await.unwrap();
    assert_eq!(memory.content, "apple lover");
    assert_eq!(memory.access_count, 1);
    assert!((memory.weight - 1.1).abs() < 1e-12);
    assert_eq!(memory.scope, p1);
}

#[tokio::test]
async fn export_then_import_restores_ids() {
    let source = in_memory_manager(MemoryConfig::default()).await;
    source.register_persona("p1", "Helper", "A friendly helper").await.unwrap();
    let a = source.add_memory(&persona("p1"), "apple lover", false).await.unwrap();
    let b = source.add_memory(&persona("p1"), "shared fact", true).await.unwrap();

    let snapshot = source.export().await.unwrap();
    let json = serde_json::to_string(&snapshot).unwrap();

    let target = in_memory_manager(MemoryConfig::default()).await;
    let restored = serde_json::from_str(&json).unwrap();
    assert_eq!(target.import(&restored).await.unwrap(), 2);

    assert!(target.get_memory(a.id).await.is_some());
    assert_eq!(target.get_memory(b.id).await.unwrap().scope, Scope::Public);
    assert_eq!(target.export().await.unwrap().personas.len(), 1);
}
