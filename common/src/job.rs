use serde::{Deserialize, Serialize};

use crate::task::{PartitionId, TaskId};

pub type JobId = u64;
pub type RddId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Queued,
    Dispatched,
    Succeeded,
    Failed,
}

/// Registro liviano de una tarea dentro de un job, para el journal.
/// Las filas en sí nunca se persisten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub partition_id: PartitionId,
    pub attempts: u32,
    pub state: TaskState,
}

impl TaskRecord {
    pub fn queued(id: TaskId, partition_id: PartitionId) -> Self {
        Self {
            id,
            partition_id,
            attempts: 0,
            state: TaskState::Queued,
        }
    }
}

/// Un job se crea en cada acción (collect / reduce / join) y se
/// persiste al journal en cada transición de estado, con los nombres
/// de campo históricos del formato `job_<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "ID")]
    pub id: JobId,
    #[serde(rename = "RDD")]
    pub rdd: RddId,
    #[serde(rename = "Tasks")]
    pub tasks: Vec<TaskRecord>,
    #[serde(rename = "Status")]
    pub status: JobStatus,
}

impl Job {
    pub fn new(id: JobId, rdd: RddId, tasks: Vec<TaskRecord>) -> Self {
        Self {
            id,
            rdd,
            tasks,
            status: JobStatus::Pending,
        }
    }
}
