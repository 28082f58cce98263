use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use anyhow::Result;

use common::protocol::WorkerId;
use common::{config, FunctionRegistry, PartitionCache};

#[derive(Clone)]
pub struct WorkerState {
    pub id: WorkerId,
    pub endpoint: String,
    pub driver_url: String,
    pub cache: PartitionCache,
    pub registry: Arc<FunctionRegistry>,
    pub active_tasks: Arc<AtomicI64>,
    pub http: reqwest::Client,
}

impl WorkerState {
    pub fn new(id: WorkerId, endpoint: String, driver_url: String, cache_dir: &str) -> Result<Self> {
        let cache = PartitionCache::new(cache_dir, config::max_memory_bytes())?;
        Ok(Self {
            id,
            endpoint,
            driver_url,
            cache,
            registry: Arc::new(FunctionRegistry::with_builtins()),
            active_tasks: Arc::new(AtomicI64::new(0)),
            http: reqwest::Client::new(),
        })
    }
}

/// Mantiene el contador de tareas activas: incrementa al crearse y
/// decrementa al soltarse, cubriendo todas las salidas del handler.
pub struct TaskGuard {
    counter: Arc<AtomicI64>,
}

impl TaskGuard {
    pub fn new(counter: &Arc<AtomicI64>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
