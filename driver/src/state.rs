use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use common::job::{Job, JobId, RddId};
use common::protocol::{WorkerId, WorkerInfo, WORKER_FAILED, WORKER_OK};
use common::task::PartitionId;
use common::{config, FunctionRegistry, Heartbeat, PartitionCache};

use crate::rdd::RddNode;

/// Estado compartido del driver. Los dos mapas autoritativos (workers y
/// particiones), los jobs y el registro de RDDs van bajo un único lock
/// lectura/escritura; las consultas de estado pueden paralelizarse y
/// los cambios de asignación se serializan.
#[derive(Clone)]
pub struct DriverState {
    pub inner: Arc<RwLock<DriverInner>>,
    pub cache: PartitionCache,
    pub registry: Arc<FunctionRegistry>,
    pub http: reqwest::Client,
    pub state_dir: PathBuf,
    pub port: u16,
}

impl DriverState {
    pub fn new(port: u16, state_dir: &str, cache_dir: &str) -> Result<Self> {
        let cache = PartitionCache::new(cache_dir, config::max_memory_bytes())?;
        // las llamadas driver → worker llevan deadline explícito,
        // como mínimo el timeout de workers
        let http = reqwest::Client::builder()
            .timeout(config::worker_timeout())
            .build()?;

        Ok(Self {
            inner: Arc::new(RwLock::new(DriverInner::new())),
            cache,
            registry: Arc::new(FunctionRegistry::with_builtins()),
            http,
            state_dir: PathBuf::from(state_dir),
            port,
        })
    }
}

pub struct DriverInner {
    pub workers: HashMap<WorkerId, WorkerInfo>,
    pub jobs: HashMap<JobId, Job>,
    pub partition_map: HashMap<PartitionId, WorkerId>,
    pub rdds: HashMap<RddId, RddNode>,
    next_rdd_id: RddId,
    next_partition_id: PartitionId,
}

impl DriverInner {
    pub fn new() -> Self {
        Self {
            workers: HashMap::new(),
            jobs: HashMap::new(),
            partition_map: HashMap::new(),
            rdds: HashMap::new(),
            next_rdd_id: 0,
            next_partition_id: 0,
        }
    }

    pub fn next_rdd_id(&mut self) -> RddId {
        self.next_rdd_id += 1;
        self.next_rdd_id
    }

    pub fn next_partition_id(&mut self) -> PartitionId {
        let id = self.next_partition_id;
        self.next_partition_id += 1;
        id
    }

    pub fn register_worker(&mut self, id: WorkerId, endpoint: String) {
        info!("worker {id} registrado en {endpoint}");
        self.workers.insert(
            id,
            WorkerInfo {
                id,
                endpoint,
                status: WORKER_OK,
                last_seen: Utc::now(),
            },
        );
    }

    /// Registra el latido de un worker. Un worker desconocido se
    /// re-adopta: pasa tras un reinicio del driver.
    pub fn record_heartbeat(&mut self, heartbeat: &Heartbeat) {
        match self.workers.get_mut(&heartbeat.worker_id) {
            Some(worker) => {
                worker.last_seen = Utc::now();
                worker.status = heartbeat.status;
            }
            None => {
                info!(
                    "heartbeat de worker desconocido {}, re-adoptándolo",
                    heartbeat.worker_id
                );
                self.workers.insert(
                    heartbeat.worker_id,
                    WorkerInfo {
                        id: heartbeat.worker_id,
                        endpoint: heartbeat.endpoint.clone(),
                        status: WORKER_OK,
                        last_seen: Utc::now(),
                    },
                );
            }
        }
    }

    pub fn is_worker_alive(&self, worker_id: WorkerId, timeout: Duration) -> bool {
        match self.workers.get(&worker_id) {
            Some(worker) if worker.status != WORKER_FAILED => {
                let elapsed = Utc::now().signed_duration_since(worker.last_seen);
                elapsed.num_milliseconds() < timeout.as_millis() as i64
            }
            _ => false,
        }
    }

    /// Workers vivos en orden estable, para que el round-robin de
    /// asignación sea determinista.
    pub fn alive_workers(&self, timeout: Duration) -> Vec<WorkerId> {
        let mut alive: Vec<WorkerId> = self
            .workers
            .keys()
            .copied()
            .filter(|id| self.is_worker_alive(*id, timeout))
            .collect();
        alive.sort_unstable();
        alive
    }

    pub fn worker_endpoint(&self, worker_id: WorkerId) -> Option<String> {
        self.workers.get(&worker_id).map(|w| w.endpoint.clone())
    }

    /// Una pasada del monitor: marca como caídos los workers sin
    /// heartbeat dentro del timeout y reasigna sus particiones.
    /// Devuelve los workers recién marcados.
    pub fn sweep_failures(&mut self, timeout: Duration) -> Vec<WorkerId> {
        let mut newly_dead: Vec<WorkerId> = self
            .workers
            .values()
            .filter(|w| w.status != WORKER_FAILED)
            .filter(|w| !self.is_worker_alive(w.id, timeout))
            .map(|w| w.id)
            .collect();
        newly_dead.sort_unstable();

        for worker_id in &newly_dead {
            self.handle_worker_failure(*worker_id, timeout);
        }

        newly_dead
    }

    pub fn handle_worker_failure(&mut self, worker_id: WorkerId, timeout: Duration) {
        warn!("gestionando la caída del worker {worker_id}");
        if let Some(worker) = self.workers.get_mut(&worker_id) {
            worker.status = WORKER_FAILED;
        }

        let mut to_reassign: Vec<PartitionId> = self
            .partition_map
            .iter()
            .filter(|(_, owner)| **owner == worker_id)
            .map(|(partition_id, _)| *partition_id)
            .collect();
        to_reassign.sort_unstable();

        if !to_reassign.is_empty() {
            info!(
                "reasignando {} particiones del worker caído {worker_id}",
                to_reassign.len()
            );
            self.reassign_partitions(&to_reassign, timeout);
        }
    }

    pub fn reassign_partitions(&mut self, partition_ids: &[PartitionId], timeout: Duration) {
        let alive = self.alive_workers(timeout);
        if alive.is_empty() {
            warn!("no hay workers vivos para reasignar particiones");
            return;
        }

        for (i, partition_id) in partition_ids.iter().enumerate() {
            let new_owner = alive[i % alive.len()];
            let old_owner = self.partition_map.insert(*partition_id, new_owner);
            info!(
                "partición {partition_id} reasignada de {:?} a {new_owner}",
                old_owner
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn inner_with_workers(n: u64) -> DriverInner {
        let mut inner = DriverInner::new();
        for id in 1..=n {
            inner.register_worker(id, format!("http://worker-{id}:9001"));
        }
        inner
    }

    #[test]
    fn register_worker_queda_vivo() {
        let inner = inner_with_workers(2);
        assert!(inner.is_worker_alive(1, TIMEOUT));
        assert!(inner.is_worker_alive(2, TIMEOUT));
        assert!(!inner.is_worker_alive(99, TIMEOUT));
        assert_eq!(inner.alive_workers(TIMEOUT), vec![1, 2]);
    }

    #[test]
    fn worker_sin_heartbeat_se_marca_caido() {
        let mut inner = inner_with_workers(2);
        // simular silencio: last_seen más viejo que el timeout
        inner.workers.get_mut(&1).unwrap().last_seen =
            Utc::now() - ChronoDuration::seconds(30);

        let dead = inner.sweep_failures(TIMEOUT);
        assert_eq!(dead, vec![1]);
        assert_eq!(inner.workers[&1].status, WORKER_FAILED);
        assert_eq!(inner.alive_workers(TIMEOUT), vec![2]);

        // una segunda pasada no lo vuelve a reportar
        assert!(inner.sweep_failures(TIMEOUT).is_empty());
    }

    #[test]
    fn caida_reasigna_sus_particiones_round_robin() {
        let mut inner = inner_with_workers(3);
        for partition_id in 0..6u64 {
            inner
                .partition_map
                .insert(partition_id, 1 + (partition_id % 3));
        }

        inner.workers.get_mut(&2).unwrap().last_seen =
            Utc::now() - ChronoDuration::seconds(60);
        inner.sweep_failures(TIMEOUT);

        // toda partición tiene exactamente un dueño vivo
        for (partition_id, owner) in &inner.partition_map {
            assert!(
                inner.is_worker_alive(*owner, TIMEOUT),
                "partición {partition_id} quedó en el worker caído {owner}"
            );
        }
        // las particiones del worker 2 (1 y 4) se repartieron entre 1 y 3
        assert_eq!(inner.partition_map[&1], 1);
        assert_eq!(inner.partition_map[&4], 3);
    }

    #[test]
    fn heartbeat_de_desconocido_lo_readopta() {
        let mut inner = DriverInner::new();
        inner.record_heartbeat(&Heartbeat {
            worker_id: 42,
            status: WORKER_OK,
            active_tasks: 0,
            endpoint: "http://worker-42:9001".to_string(),
            timestamp: Utc::now(),
        });
        assert!(inner.is_worker_alive(42, TIMEOUT));
    }

    #[test]
    fn ids_de_rdd_y_particion_son_crecientes() {
        let mut inner = DriverInner::new();
        assert_eq!(inner.next_partition_id(), 0);
        assert_eq!(inner.next_partition_id(), 1);
        let a = inner.next_rdd_id();
        let b = inner.next_rdd_id();
        assert!(b > a);
    }
}
