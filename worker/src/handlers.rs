use std::sync::{atomic::Ordering, Arc};

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, warn};

use common::error::EngineError;
use common::protocol::{
    PartitionAck, RegisterPartitionRequest, StorePartitionRequest, WorkerStatusResponse, WORKER_OK,
};
use common::task::{
    JoinTask, Task, TaskReply, STATUS_FAILED, STATUS_PARTITION_NOT_FOUND, STATUS_UNKNOWN_FUNCTION,
};

use crate::exec;
use crate::state::{TaskGuard, WorkerState};

pub fn build_router(state: WorkerState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(get_status))
        .route("/api/v1/partitions/register", post(register_partition))
        .route("/api/v1/partitions/store", post(store_partition))
        .route("/api/v1/tasks/execute", post(execute_task))
        .route("/api/v1/tasks/join", post(execute_join))
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn get_status(State(state): State<WorkerState>) -> Json<WorkerStatusResponse> {
    Json(WorkerStatusResponse {
        status: WORKER_OK,
        active_tasks: state.active_tasks.load(Ordering::SeqCst),
    })
}

async fn register_partition(
    State(state): State<WorkerState>,
    Json(req): Json<RegisterPartitionRequest>,
) -> Json<PartitionAck> {
    state.cache.register(req.partition_id);
    info!("partición {} registrada", req.partition_id);
    Json(PartitionAck { ok: true })
}

async fn store_partition(
    State(state): State<WorkerState>,
    Json(req): Json<StorePartitionRequest>,
) -> Json<PartitionAck> {
    info!(
        "guardando partición {} ({} filas)",
        req.partition_id,
        req.rows.len()
    );
    state.cache.put(req.partition_id, req.rows);
    Json(PartitionAck { ok: true })
}

/// Ejecuta el pipeline de la tarea sobre las filas que trae, o sobre el
/// contenido actual de la partición en la cache.
async fn execute_task(State(state): State<WorkerState>, Json(task): Json<Task>) -> Json<TaskReply> {
    let _guard = TaskGuard::new(&state.active_tasks);
    info!(
        "ejecutando tarea {} sobre la partición {} ({} descriptores)",
        task.id,
        task.partition_id,
        task.pipeline.len()
    );

    let rows = match task.rows {
        Some(rows) => rows,
        None => match state.cache.get(task.partition_id) {
            Some(rows) => rows,
            None => {
                warn!("partición {} no encontrada en la cache", task.partition_id);
                return Json(TaskReply::failed(
                    task.id,
                    STATUS_PARTITION_NOT_FOUND,
                    format!("partición {} no encontrada", task.partition_id),
                ));
            }
        },
    };

    // el pipeline es CPU puro: a un hilo de bloqueo
    let registry = Arc::clone(&state.registry);
    let task_id = task.id;
    let pipeline = task.pipeline;
    let handle =
        tokio::task::spawn_blocking(move || exec::execute_pipeline(&registry, &pipeline, rows));

    match handle.await {
        Ok(Ok(rows)) => Json(TaskReply::ok(task_id, rows)),
        Ok(Err(e @ EngineError::UnknownFunction(_))) => {
            warn!("tarea {task_id}: {e}");
            Json(TaskReply::failed(
                task_id,
                STATUS_UNKNOWN_FUNCTION,
                e.to_string(),
            ))
        }
        Ok(Err(e)) => {
            warn!("tarea {task_id}: {e}");
            Json(TaskReply::failed(task_id, STATUS_FAILED, e.to_string()))
        }
        Err(e) => {
            warn!("panic o join error en la tarea {task_id}: {e}");
            Json(TaskReply::failed(
                task_id,
                STATUS_FAILED,
                format!("la tarea abortó: {e}"),
            ))
        }
    }
}

/// Join local de los buckets ya emparejados por el driver.
async fn execute_join(
    State(state): State<WorkerState>,
    Json(task): Json<JoinTask>,
) -> Json<TaskReply> {
    let _guard = TaskGuard::new(&state.active_tasks);
    info!(
        "ejecutando join {} sobre la partición {} ({}×{} filas)",
        task.id,
        task.partition_id,
        task.left_rows.len(),
        task.right_rows.len()
    );

    let task_id = task.id;
    let handle =
        tokio::task::spawn_blocking(move || exec::hash_join(task.left_rows, task.right_rows));

    match handle.await {
        Ok(rows) => Json(TaskReply::ok(task_id, rows)),
        Err(e) => {
            warn!("panic o join error en el join {task_id}: {e}");
            Json(TaskReply::failed(
                task_id,
                STATUS_FAILED,
                format!("el join abortó: {e}"),
            ))
        }
    }
}
