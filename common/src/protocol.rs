use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobStatus, RddId, TaskRecord};
use crate::row::Row;
use crate::task::PartitionId;

pub type WorkerId = u64;

/// Estado HTTP-style de un worker: 200 vivo, 500 caído.
pub const WORKER_OK: u16 = 200;
pub const WORKER_FAILED: u16 = 500;

/// Registro de un worker en el driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub endpoint: String,
    pub status: u16,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub id: WorkerId,
    pub endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerResponse {
    pub ok: bool,
}

/// Latido periódico worker → driver con métricas de carga.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub worker_id: WorkerId,
    pub status: u16,
    pub active_tasks: i64,
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ok: bool,
}

/* ---------------- superficie RPC del worker ---------------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPartitionRequest {
    pub partition_id: PartitionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorePartitionRequest {
    pub partition_id: PartitionId,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionAck {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatusResponse {
    pub status: u16,
    pub active_tasks: i64,
}

/* ---------------- superficie RPC del driver ---------------- */

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadTextFileRequest {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_partitions: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadCsvRequest {
    pub path: String,
    pub key_column: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_partitions: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RddReply {
    pub rdd_id: RddId,
}

/// Cuerpo de map / filter / flat_map. Sin `func_name` se usa la función
/// por defecto de cada operación (ToUpper / IsLong / SplitWords).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransformRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func_name: Option<String>,
}

/// Respuesta de una acción. En fallo `rows` va vacío y `error` trae
/// la primera causa fatal; nunca se devuelven resultados parciales.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReply {
    pub status: String,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

impl ActionReply {
    pub fn completed(job_id: JobId, rows: Vec<Row>) -> Self {
        Self {
            status: "completed".to_string(),
            rows,
            error: None,
            job_id: Some(job_id),
        }
    }

    pub fn failed(job_id: Option<JobId>, error: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            rows: Vec::new(),
            error: Some(error.into()),
            job_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRequest {
    pub rdd_id1: RddId,
    pub rdd_id2: RddId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinReply {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rdd_id: Option<RddId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
}

/// Lectura de gossip: estado serializable del driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverInfo {
    pub workers: HashMap<WorkerId, WorkerInfo>,
    pub partition_map: HashMap<PartitionId, WorkerId>,
    pub port: u16,
}

/// Resumen de un job para el cliente (status / results / watch).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    pub job_id: JobId,
    pub status: JobStatus,
    pub tasks: Vec<TaskRecord>,
}
