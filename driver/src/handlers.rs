use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use common::error::EngineError;
use common::job::{Job, RddId};
use common::protocol::{
    ActionReply, DriverInfo, Heartbeat, HeartbeatResponse, JobResults, JoinReply, JoinRequest,
    RddReply, ReadCsvRequest, ReadTextFileRequest, RegisterWorkerRequest, RegisterWorkerResponse,
    TransformRequest,
};
use common::registry::RowFunction;
use common::transform::{TransformOp, Transformation};

use crate::state::DriverState;
use crate::{actions, shuffle, source};

pub fn build_router(state: DriverState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/workers/register", post(register_worker))
        .route("/api/v1/workers/heartbeat", post(worker_heartbeat))
        .route("/api/v1/rdd/text", post(read_text_file))
        .route("/api/v1/rdd/csv", post(read_csv))
        .route("/api/v1/rdd/:id/map", post(map_rdd))
        .route("/api/v1/rdd/:id/filter", post(filter_rdd))
        .route("/api/v1/rdd/:id/flat_map", post(flat_map_rdd))
        .route("/api/v1/rdd/:id/collect", post(collect))
        .route("/api/v1/rdd/:id/reduce", post(reduce))
        .route("/api/v1/join", post(join))
        .route("/api/v1/driver", get(get_driver))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/jobs/:id/results", get(get_job_results))
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

async fn register_worker(
    State(state): State<DriverState>,
    Json(req): Json<RegisterWorkerRequest>,
) -> Json<RegisterWorkerResponse> {
    let mut inner = state.inner.write().unwrap();
    inner.register_worker(req.id, req.endpoint);
    Json(RegisterWorkerResponse { ok: true })
}

async fn worker_heartbeat(
    State(state): State<DriverState>,
    Json(heartbeat): Json<Heartbeat>,
) -> Json<HeartbeatResponse> {
    let mut inner = state.inner.write().unwrap();
    inner.record_heartbeat(&heartbeat);
    Json(HeartbeatResponse { ok: true })
}

async fn read_text_file(
    State(state): State<DriverState>,
    Json(req): Json<ReadTextFileRequest>,
) -> Result<Json<RddReply>, (StatusCode, String)> {
    match source::read_text_file(&state, &req).await {
        Ok(rdd_id) => Ok(Json(RddReply { rdd_id })),
        Err(e) => Err(error_response(e)),
    }
}

async fn read_csv(
    State(state): State<DriverState>,
    Json(req): Json<ReadCsvRequest>,
) -> Result<Json<RddReply>, (StatusCode, String)> {
    match source::read_csv(&state, &req).await {
        Ok(rdd_id) => Ok(Json(RddReply { rdd_id })),
        Err(e) => Err(error_response(e)),
    }
}

async fn map_rdd(
    State(state): State<DriverState>,
    Path(id): Path<RddId>,
    req: Option<Json<TransformRequest>>,
) -> Result<Json<RddReply>, (StatusCode, String)> {
    derive(&state, id, TransformOp::Map, "ToUpper", req)
}

async fn filter_rdd(
    State(state): State<DriverState>,
    Path(id): Path<RddId>,
    req: Option<Json<TransformRequest>>,
) -> Result<Json<RddReply>, (StatusCode, String)> {
    derive(&state, id, TransformOp::Filter, "IsLong", req)
}

async fn flat_map_rdd(
    State(state): State<DriverState>,
    Path(id): Path<RddId>,
    req: Option<Json<TransformRequest>>,
) -> Result<Json<RddReply>, (StatusCode, String)> {
    derive(&state, id, TransformOp::FlatMap, "SplitWords", req)
}

/// Registra el RDD derivado: puro metadato, sin mover datos.
/// La función pedida tiene que existir y ser del tipo de la operación.
fn derive(
    state: &DriverState,
    parent: RddId,
    op: TransformOp,
    default_func: &str,
    req: Option<Json<TransformRequest>>,
) -> Result<Json<RddReply>, (StatusCode, String)> {
    let func = req
        .and_then(|Json(r)| r.func_name)
        .unwrap_or_else(|| default_func.to_string());

    let kind_matches = matches!(
        (op, state.registry.get(&func)),
        (TransformOp::Map, Some(RowFunction::Map(_)))
            | (TransformOp::Filter, Some(RowFunction::Filter(_)))
            | (TransformOp::FlatMap, Some(RowFunction::FlatMap(_)))
    );
    if !kind_matches {
        return Err(error_response(EngineError::UnknownFunction(func)));
    }

    let mut inner = state.inner.write().unwrap();
    match inner.derive_rdd(parent, Transformation::new(op, func)) {
        Some(rdd_id) => {
            info!("rdd {rdd_id} derivado de {parent}");
            Ok(Json(RddReply { rdd_id }))
        }
        None => Err((
            StatusCode::NOT_FOUND,
            format!("ConfigError: rdd {parent} no registrado"),
        )),
    }
}

async fn collect(
    State(state): State<DriverState>,
    Path(id): Path<RddId>,
) -> Json<ActionReply> {
    match actions::run_collect(&state, id).await {
        Ok((job_id, rows)) => Json(ActionReply::completed(job_id, rows)),
        Err(e) => Json(ActionReply::failed(None, format!("{}: {e}", e.code()))),
    }
}

async fn reduce(
    State(state): State<DriverState>,
    Path(id): Path<RddId>,
    req: Option<Json<TransformRequest>>,
) -> Json<ActionReply> {
    let func_name = req.and_then(|Json(r)| r.func_name);
    match actions::run_reduce(&state, id, func_name).await {
        Ok((job_id, row)) => Json(ActionReply::completed(job_id, vec![row])),
        Err(e) => Json(ActionReply::failed(None, format!("{}: {e}", e.code()))),
    }
}

async fn join(
    State(state): State<DriverState>,
    Json(req): Json<JoinRequest>,
) -> Json<JoinReply> {
    match shuffle::run_join(&state, &req).await {
        Ok((job_id, rdd_id)) => Json(JoinReply {
            status: "completed".to_string(),
            rdd_id: Some(rdd_id),
            error: None,
            job_id: Some(job_id),
        }),
        Err(e) => Json(JoinReply {
            status: "failed".to_string(),
            rdd_id: None,
            error: Some(format!("{}: {e}", e.code())),
            job_id: None,
        }),
    }
}

async fn get_driver(State(state): State<DriverState>) -> Json<DriverInfo> {
    let inner = state.inner.read().unwrap();
    Json(DriverInfo {
        workers: inner.workers.clone(),
        partition_map: inner.partition_map.clone(),
        port: state.port,
    })
}

async fn get_job(
    State(state): State<DriverState>,
    Path(id): Path<u64>,
) -> Result<Json<Job>, StatusCode> {
    let inner = state.inner.read().unwrap();
    match inner.jobs.get(&id) {
        Some(job) => Ok(Json(job.clone())),
        None => Err(StatusCode::NOT_FOUND),
    }
}

async fn get_job_results(
    State(state): State<DriverState>,
    Path(id): Path<u64>,
) -> Result<Json<JobResults>, StatusCode> {
    let inner = state.inner.read().unwrap();
    match inner.jobs.get(&id) {
        Some(job) => Ok(Json(JobResults {
            job_id: job.id,
            status: job.status,
            tasks: job.tasks.clone(),
        })),
        None => Err(StatusCode::NOT_FOUND),
    }
}

fn error_response(e: EngineError) -> (StatusCode, String) {
    let status = match &e {
        EngineError::UnknownFunction(_) => StatusCode::BAD_REQUEST,
        EngineError::Config(_) => StatusCode::BAD_REQUEST,
        EngineError::PartitionNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, format!("{}: {e}", e.code()))
}
