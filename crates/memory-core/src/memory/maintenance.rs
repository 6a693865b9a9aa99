//! ============================================================================
//! Maintenance Scheduler - Decay and merge passes
//! ============================================================================
//! Decay scales every weight by the decay factor and prunes memories that
//! fall below the floor. Merge folds near-duplicate memories inside a scope
//! into one survivor. A background task runs decay on a fixed interval until
//! a shutdown signal arrives.
//! ============================================================================

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::similarity::cosine;
use super::store::MemoryStore;
use super::types::{DecayReport, Memory, MergeReport};
use crate::db::MemoryPatch;
use crate::types::{MemoryError, Result, Scope};

pub struct MaintenanceScheduler {
    store: Arc<MemoryStore>,
    /// Held for the duration of a pass so passes never overlap
    pass_lock: Arc<Mutex<()>>,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MaintenanceScheduler {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            store,
            pass_lock: Arc::new(Mutex::new(())),
            shutdown_tx,
            task: Mutex::new(None),
        }
    }

    /// Run one decay pass now, waiting for any pass in flight
    pub async fn apply_decay(&self) -> DecayReport {
        let _pass = self.pass_lock.lock().await;
        run_decay(&self.store).await
    }

    /// Merge near-duplicates in one scope, or in every scope when `scope` is None
    pub async fn merge_similar(&self, scope: Option<&Scope>, threshold: f64) -> Result<MergeReport> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(MemoryError::InvalidInput(format!(
                "merge threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if let Some(scope) = scope {
            scope.validate()?;
        }
        let _pass = self.pass_lock.lock().await;
        Ok(run_merge(&self.store, scope, threshold).await)
    }

    /// Start the periodic decay task. Returns false if it is already running.
    pub async fn start(&self) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let period = self.store.config().decay_interval();
        let store = self.store.clone();
        let pass_lock = self.pass_lock.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        *task = Some(tokio::spawn(decay_loop(store, pass_lock, shutdown_rx, period)));
        info!("Maintenance scheduler started (every {:?})", period);
        true
    }

    /// Signal the periodic task to exit and wait for it. A pass already in
    /// flight finishes first.
    pub async fn stop(&self) {
        let handle = self.task.lock().await.take();
        let Some(handle) = handle else {
            return;
        };

        let _ = self.shutdown_tx.send(());
        if let Err(e) = handle.await {
            warn!("Maintenance task ended abnormally: {}", e);
        }
        info!("Maintenance scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

async fn decay_loop(
    store: Arc<MemoryStore>,
    pass_lock: Arc<Mutex<()>>,
    mut shutdown_rx: broadcast::Receiver<()>,
    period: Duration,
) {
    // First pass one full period after start
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Maintenance loop received shutdown");
                break;
            }
            _ = interval.tick() => {
                match pass_lock.try_lock() {
                    Ok(_pass) => {
                        run_decay(&store).await;
                    }
                    Err(_) => debug!("Maintenance pass already running, skipping tick"),
                }
            }
        }
    }
}

async fn run_decay(store: &MemoryStore) -> DecayReport {
    let config = store.config().clone();
    let mut cache = store.cache_mut().await;
    let mut report = DecayReport::default();
    let mut pruned: Vec<Memory> = Vec::new();
    let mut weights: Vec<(Uuid, MemoryPatch)> = Vec::new();

    for bucket in cache.values_mut() {
        for memory in bucket.iter_mut() {
            memory.weight *= config.decay_factor;
            report.decayed += 1;
        }
        bucket.retain(|memory| {
            if memory.weight < config.decay_floor {
                pruned.push(memory.clone());
                false
            } else {
                if memory.persisted {
                    weights.push((memory.id, MemoryPatch::weight(memory.weight)));
                }
                true
            }
        });
    }
    cache.retain(|_, bucket| !bucket.is_empty());
    report.pruned = pruned.len();

    store.write_through_batch(weights, "decay").await;
    for memory in &pruned {
        debug!("Pruning memory {} (weight {:.4})", memory.id, memory.weight);
        store.remove_persisted(memory, "decay pruning").await;
    }

    info!("Decay pass: {} decayed, {} pruned", report.decayed, report.pruned);
    report
}

async fn run_merge(store: &MemoryStore, scope: Option<&Scope>, threshold: f64) -> MergeReport {
    let config = store.config().clone();
    let mut cache = store.cache_mut().await;

    let scopes: Vec<Scope> = match scope {
        Some(s) => vec![s.clone()],
        None => cache.keys().cloned().collect(),
    };

    let mut absorbed: Vec<Memory> = Vec::new();
    let mut survivors: Vec<(Uuid, MemoryPatch)> = Vec::new();

    for scope in scopes {
        let Some(bucket) = cache.get_mut(&scope) else {
            continue;
        };

        // Each memory takes part in at most one merge per pass
        let mut paired = vec![false; bucket.len()];
        let mut gone = vec![false; bucket.len()];
        for i in 0..bucket.len() {
            if paired[i] || bucket[i].vector.is_empty() {
                continue;
            }
            for j in (i + 1)..bucket.len() {
                if paired[j] || cosine(&bucket[i].vector, &bucket[j].vector) < threshold {
                    continue;
                }
                let absorbed_weight = bucket[j].weight;
                let survivor = &mut bucket[i];
                survivor.weight =
                    (survivor.weight + absorbed_weight * config.merge_weight_share).min(config.weight_cap);
                if survivor.persisted {
                    survivors.push((survivor.id, MemoryPatch::weight(survivor.weight)));
                }
                debug!("Merging memory {} into {} in scope {}", bucket[j].id, bucket[i].id, scope);
                paired[i] = true;
                paired[j] = true;
                gone[j] = true;
                break;
            }
        }

        let mut index = 0;
        bucket.retain(|memory| {
            let keep = !gone[index];
            index += 1;
            if !keep {
                absorbed.push(memory.clone());
            }
            keep
        });
    }

    store.write_through_batch(survivors, "merge").await;
    for memory in &absorbed {
        store.remove_persisted(memory, "merge").await;
    }

    info!("Merge pass: {} memories absorbed", absorbed.len());
    MergeReport {
        merged: absorbed.len(),
    }
}
