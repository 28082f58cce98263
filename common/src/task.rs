use serde::{Deserialize, Serialize};

use crate::row::Row;
use crate::transform::Transformation;

pub type TaskId = u64;
pub type PartitionId = u64;

/// Códigos de estado de una respuesta de tarea.
/// El worker reporta el error en la respuesta y el driver decide
/// si reintenta o da el job por fallido.
pub const STATUS_OK: u16 = 200;
pub const STATUS_UNKNOWN_FUNCTION: u16 = 404;
pub const STATUS_PARTITION_NOT_FOUND: u16 = 410;
pub const STATUS_FAILED: u16 = 500;

/// Unidad de ejecución autocontenida sobre una partición.
/// Si `rows` viene, el worker opera sobre esas filas; si no,
/// usa el contenido actual de la partición en su cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub partition_id: PartitionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    pub pipeline: Vec<Transformation>,
}

/// Tarea de join local: el driver ya shuffleó los dos lados y empareja
/// los buckets de la misma partición destino.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinTask {
    pub id: TaskId,
    pub partition_id: PartitionId,
    pub left_rows: Vec<Row>,
    pub right_rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReply {
    pub id: TaskId,
    pub status: u16,
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskReply {
    pub fn ok(id: TaskId, rows: Vec<Row>) -> Self {
        Self {
            id,
            status: STATUS_OK,
            rows,
            error: None,
        }
    }

    pub fn failed(id: TaskId, status: u16, error: impl Into<String>) -> Self {
        Self {
            id,
            status,
            rows: Vec::new(),
            error: Some(error.into()),
        }
    }
}
