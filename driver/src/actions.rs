use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

use common::config;
use common::error::EngineError;
use common::job::{Job, JobId, JobStatus, RddId, TaskRecord, TaskState};
use common::protocol::{PartitionAck, RegisterPartitionRequest, StorePartitionRequest};
use common::registry::RowFunction;
use common::row::Row;
use common::task::{
    PartitionId, Task, TaskReply, STATUS_OK, STATUS_PARTITION_NOT_FOUND, STATUS_UNKNOWN_FUNCTION,
};
use common::transform::{TransformOp, Transformation};

use crate::journal;
use crate::state::DriverState;

/// Resultado de despachar una tarea, con sus intentos consumidos.
pub(crate) struct TaskOutcome {
    pub attempts: u32,
    pub result: Result<Vec<Row>, EngineError>,
}

/* ---------------- acciones ---------------- */

/// Collect: compila el lineage, una tarea por partición en paralelo,
/// y concatena los parciales en orden de tarea.
pub async fn run_collect(state: &DriverState, rdd_id: RddId) -> Result<(JobId, Vec<Row>), EngineError> {
    let (pipeline, partitions) = compile_for_action(state, rdd_id)?;

    let job = register_running_job(state, rdd_id, &partitions);
    let outcomes = dispatch_all(state, make_tasks(&partitions, &pipeline)).await;
    finish_job(state, job.id, &outcomes);

    let slots = into_slots(outcomes)?;
    Ok((job.id, slots.into_iter().flatten().collect()))
}

/// Reduce: reducción por partición en los workers más un plegado final
/// en el driver. Entrada vacía → fila cero.
pub async fn run_reduce(
    state: &DriverState,
    rdd_id: RddId,
    func_name: Option<String>,
) -> Result<(JobId, Row), EngineError> {
    let func = func_name.unwrap_or_else(|| "Max".to_string());
    let reduce_fn = match state.registry.get(&func) {
        Some(RowFunction::Reduce(f)) => f,
        _ => return Err(EngineError::UnknownFunction(func)),
    };

    let (mut pipeline, partitions) = compile_for_action(state, rdd_id)?;
    pipeline.push(Transformation::new(TransformOp::Reduce, func));

    let job = register_running_job(state, rdd_id, &partitions);
    let outcomes = dispatch_all(state, make_tasks(&partitions, &pipeline)).await;
    finish_job(state, job.id, &outcomes);

    let slots = into_slots(outcomes)?;
    let mut acc: Option<Row> = None;
    for row in slots.into_iter().flatten() {
        if row == Row::empty() {
            // parcial de una partición vacía
            continue;
        }
        acc = Some(match acc {
            None => row,
            Some(prev) => reduce_fn(&prev, &row),
        });
    }

    Ok((job.id, acc.unwrap_or_else(Row::empty)))
}

/* ---------------- maquinaria de despacho ---------------- */

pub(crate) fn compile_for_action(
    state: &DriverState,
    rdd_id: RddId,
) -> Result<(Vec<Transformation>, Vec<PartitionId>), EngineError> {
    let inner = state.inner.read().unwrap();
    let node = inner
        .rdds
        .get(&rdd_id)
        .ok_or_else(|| EngineError::Config(format!("rdd {rdd_id} no registrado")))?;
    let partitions = node.partitions.clone();
    let pipeline = inner
        .compile_pipeline(rdd_id)
        .ok_or_else(|| EngineError::Config(format!("lineage del rdd {rdd_id} incompleto")))?;
    Ok((pipeline, partitions))
}

pub(crate) fn make_tasks(partitions: &[PartitionId], pipeline: &[Transformation]) -> Vec<Task> {
    partitions
        .iter()
        .enumerate()
        .map(|(i, partition_id)| Task {
            id: i as u64,
            partition_id: *partition_id,
            rows: None,
            pipeline: pipeline.to_vec(),
        })
        .collect()
}

pub(crate) fn new_job_id() -> JobId {
    rand::thread_rng().gen_range(1..1_000_000)
}

/// Crea y persiste el job en estado Running, con una tarea despachada
/// por partición.
pub(crate) fn register_running_job(
    state: &DriverState,
    rdd_id: RddId,
    partitions: &[PartitionId],
) -> Job {
    let tasks = partitions
        .iter()
        .enumerate()
        .map(|(i, partition_id)| {
            let mut record = TaskRecord::queued(i as u64, *partition_id);
            record.state = TaskState::Dispatched;
            record
        })
        .collect();

    let mut job = Job::new(new_job_id(), rdd_id, tasks);
    job.status = JobStatus::Running;

    state.inner.write().unwrap().jobs.insert(job.id, job.clone());
    journal::persist_job(state, &job);
    job
}

/// Vuelca los resultados por tarea al registro del job y lo persiste
/// con su estado final.
pub(crate) fn finish_job(
    state: &DriverState,
    job_id: JobId,
    outcomes: &[TaskOutcome],
) -> JobStatus {
    let snapshot = {
        let mut inner = state.inner.write().unwrap();
        let Some(job) = inner.jobs.get_mut(&job_id) else {
            warn!("job {job_id} desapareció antes de cerrarse");
            return JobStatus::Failed;
        };

        let mut any_failed = false;
        for (record, outcome) in job.tasks.iter_mut().zip(outcomes) {
            record.attempts = outcome.attempts;
            if outcome.result.is_ok() {
                record.state = TaskState::Succeeded;
            } else {
                record.state = TaskState::Failed;
                any_failed = true;
            }
        }

        job.status = if any_failed {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        job.clone()
    };

    journal::persist_job(state, &snapshot);
    snapshot.status
}

/// Despacha todas las tareas en paralelo y junta los resultados
/// preservando el slot de cada una: la concatenación final queda en
/// orden de tarea.
pub(crate) async fn dispatch_all(state: &DriverState, tasks: Vec<Task>) -> Vec<TaskOutcome> {
    let mut handles = Vec::with_capacity(tasks.len());
    for task in tasks {
        let st = state.clone();
        handles.push(tokio::spawn(async move {
            dispatch_with_retries(st, task).await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        match handle.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => outcomes.push(TaskOutcome {
                attempts: 0,
                result: Err(EngineError::Transport(format!("join de la tarea: {e}"))),
            }),
        }
    }
    outcomes
}

/// Primer error fatal o los resultados por slot.
/// En fallo no se devuelven parciales.
pub(crate) fn into_slots(outcomes: Vec<TaskOutcome>) -> Result<Vec<Vec<Row>>, EngineError> {
    let mut slots = Vec::with_capacity(outcomes.len());
    let mut first_error = None;
    for outcome in outcomes {
        match outcome.result {
            Ok(rows) => slots.push(rows),
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(e);
                }
                slots.push(Vec::new());
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(slots),
    }
}

async fn dispatch_with_retries(state: DriverState, task: Task) -> TaskOutcome {
    let max_retries = config::max_retries().max(1);
    let mut attempts = 0;
    let mut last_error = EngineError::Config("tarea sin intentos".to_string());

    while attempts < max_retries {
        attempts += 1;
        match dispatch_once(&state, &task).await {
            Ok(rows) => {
                return TaskOutcome {
                    attempts,
                    result: Ok(rows),
                }
            }
            // fatales: no se reintentan
            Err(e @ (EngineError::UnknownFunction(_) | EngineError::PartitionLost(_))) => {
                return TaskOutcome {
                    attempts,
                    result: Err(e),
                }
            }
            Err(e) => {
                warn!(
                    "tarea {} (partición {}) intento {attempts}: {e}",
                    task.id, task.partition_id
                );
                last_error = e;
            }
        }

        if attempts < max_retries {
            tokio::time::sleep(retry_backoff(attempts)).await;
        }
    }

    TaskOutcome {
        attempts,
        result: Err(last_error),
    }
}

/// Backoff exponencial con jitter uniforme en [500, 1500) ms.
pub(crate) fn retry_backoff(attempt: u32) -> Duration {
    let jitter: u64 = rand::thread_rng().gen_range(500..1500);
    Duration::from_millis(jitter << (attempt.saturating_sub(1)))
}

async fn dispatch_once(state: &DriverState, task: &Task) -> Result<Vec<Row>, EngineError> {
    let endpoint = resolve_owner(state, task.partition_id)?;
    let reply = post_execute(state, &endpoint, task).await?;

    match reply.status {
        STATUS_OK => Ok(reply.rows),
        STATUS_UNKNOWN_FUNCTION => Err(EngineError::UnknownFunction(
            reply.error.unwrap_or_else(|| "sin detalle".to_string()),
        )),
        STATUS_PARTITION_NOT_FOUND => {
            // el dueño (quizás recién reasignado) no tiene los datos:
            // re-sembrar desde la réplica en la cache del driver
            reseed_partition(state, task.partition_id, &endpoint).await?;
            let retry = post_execute(state, &endpoint, task).await?;
            if retry.status == STATUS_OK {
                Ok(retry.rows)
            } else {
                Err(EngineError::Transport(format!(
                    "tarea {} tras re-sembrar la partición {}: status {}",
                    task.id, task.partition_id, retry.status
                )))
            }
        }
        other => Err(EngineError::Transport(
            reply
                .error
                .unwrap_or_else(|| format!("tarea {} devolvió status {other}", task.id)),
        )),
    }
}

/// Endpoint del worker dueño de la partición. Cada intento re-resuelve
/// el dueño, así las reasignaciones del monitor surten efecto.
pub(crate) fn resolve_owner(
    state: &DriverState,
    partition_id: PartitionId,
) -> Result<String, EngineError> {
    let inner = state.inner.read().unwrap();
    let worker_id = inner
        .partition_map
        .get(&partition_id)
        .copied()
        .ok_or(EngineError::PartitionNotFound(partition_id))?;
    let worker = inner.workers.get(&worker_id).ok_or_else(|| {
        EngineError::Transport(format!("worker {worker_id} no registrado"))
    })?;
    if worker.status == common::protocol::WORKER_FAILED {
        return Err(EngineError::Transport(format!(
            "worker {worker_id} marcado como caído"
        )));
    }
    Ok(worker.endpoint.clone())
}

async fn reseed_partition(
    state: &DriverState,
    partition_id: PartitionId,
    endpoint: &str,
) -> Result<(), EngineError> {
    let Some(rows) = state.cache.get(partition_id) else {
        return Err(EngineError::PartitionLost(partition_id));
    };
    info!("re-sembrando la partición {partition_id} en {endpoint}");
    register_partition_on_worker(state, endpoint, partition_id).await?;
    store_partition_on_worker(state, endpoint, partition_id, rows).await
}

/* ---------------- llamadas al worker ---------------- */

async fn post_execute(
    state: &DriverState,
    endpoint: &str,
    task: &Task,
) -> Result<TaskReply, EngineError> {
    let url = format!("{endpoint}/api/v1/tasks/execute");
    let resp = state
        .http
        .post(&url)
        .json(task)
        .send()
        .await
        .map_err(|e| EngineError::Transport(format!("llamando a {url}: {e}")))?;
    resp.json::<TaskReply>()
        .await
        .map_err(|e| EngineError::Transport(format!("decodificando respuesta de {url}: {e}")))
}

pub(crate) async fn register_partition_on_worker(
    state: &DriverState,
    endpoint: &str,
    partition_id: PartitionId,
) -> Result<(), EngineError> {
    let url = format!("{endpoint}/api/v1/partitions/register");
    let resp = state
        .http
        .post(&url)
        .json(&RegisterPartitionRequest { partition_id })
        .send()
        .await
        .map_err(|e| EngineError::Transport(format!("llamando a {url}: {e}")))?;
    let ack: PartitionAck = resp
        .json()
        .await
        .map_err(|e| EngineError::Transport(format!("decodificando respuesta de {url}: {e}")))?;
    if !ack.ok {
        return Err(EngineError::Transport(format!(
            "el worker rechazó el registro de la partición {partition_id}"
        )));
    }
    Ok(())
}

pub(crate) async fn store_partition_on_worker(
    state: &DriverState,
    endpoint: &str,
    partition_id: PartitionId,
    rows: Vec<Row>,
) -> Result<(), EngineError> {
    let url = format!("{endpoint}/api/v1/partitions/store");
    let resp = state
        .http
        .post(&url)
        .json(&StorePartitionRequest { partition_id, rows })
        .send()
        .await
        .map_err(|e| EngineError::Transport(format!("llamando a {url}: {e}")))?;
    let ack: PartitionAck = resp
        .json()
        .await
        .map_err(|e| EngineError::Transport(format!("decodificando respuesta de {url}: {e}")))?;
    if !ack.ok {
        return Err(EngineError::Transport(format!(
            "el worker rechazó el contenido de la partición {partition_id}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn temp_state(sub: &str) -> DriverState {
        let base = env::temp_dir().join("actions_tests").join(sub);
        let _ = std::fs::remove_dir_all(&base);
        DriverState::new(
            9000,
            base.join("state").to_str().unwrap(),
            base.join("cache").to_str().unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn make_tasks_preserva_el_orden_de_particiones() {
        let pipeline = vec![Transformation::new(TransformOp::Map, "ToUpper")];
        let tasks = make_tasks(&[30, 10, 20], &pipeline);
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].id, 0);
        assert_eq!(tasks[0].partition_id, 30);
        assert_eq!(tasks[2].partition_id, 20);
        assert!(tasks.iter().all(|t| t.rows.is_none()));
    }

    #[test]
    fn into_slots_devuelve_el_primer_error_fatal() {
        let outcomes = vec![
            TaskOutcome {
                attempts: 1,
                result: Ok(vec![Row::new(0, "a")]),
            },
            TaskOutcome {
                attempts: 3,
                result: Err(EngineError::PartitionLost(7)),
            },
            TaskOutcome {
                attempts: 2,
                result: Err(EngineError::Transport("x".to_string())),
            },
        ];
        let err = into_slots(outcomes).unwrap_err();
        assert_eq!(err.code(), "PartitionLost");
    }

    #[test]
    fn into_slots_conserva_el_orden_de_slots() {
        let outcomes = vec![
            TaskOutcome {
                attempts: 1,
                result: Ok(vec![Row::new(0, "b")]),
            },
            TaskOutcome {
                attempts: 1,
                result: Ok(vec![Row::new(0, "a")]),
            },
        ];
        let slots = into_slots(outcomes).unwrap();
        assert_eq!(slots[0][0].value, serde_json::json!("b"));
        assert_eq!(slots[1][0].value, serde_json::json!("a"));
    }

    #[test]
    fn job_pasa_de_running_a_completed_y_queda_en_el_journal() {
        let state = temp_state("job_ok");
        let job = register_running_job(&state, 1, &[10, 11]);
        assert_eq!(job.status, JobStatus::Running);

        let outcomes = vec![
            TaskOutcome {
                attempts: 1,
                result: Ok(vec![]),
            },
            TaskOutcome {
                attempts: 2,
                result: Ok(vec![]),
            },
        ];
        let status = finish_job(&state, job.id, &outcomes);
        assert_eq!(status, JobStatus::Completed);

        let persisted = crate::journal::load_job_state(&state.state_dir, job.id).unwrap();
        assert_eq!(persisted.status, JobStatus::Completed);
        assert_eq!(persisted.tasks[1].attempts, 2);
        assert_eq!(persisted.tasks[0].state, TaskState::Succeeded);
    }

    #[test]
    fn una_tarea_agotada_marca_el_job_como_failed() {
        let state = temp_state("job_fail");
        let job = register_running_job(&state, 1, &[10, 11]);

        let outcomes = vec![
            TaskOutcome {
                attempts: 1,
                result: Ok(vec![]),
            },
            TaskOutcome {
                attempts: 3,
                result: Err(EngineError::Transport("worker caído".to_string())),
            },
        ];
        assert_eq!(finish_job(&state, job.id, &outcomes), JobStatus::Failed);

        let inner = state.inner.read().unwrap();
        assert_eq!(inner.jobs[&job.id].tasks[1].state, TaskState::Failed);
    }

    #[test]
    fn retry_backoff_crece_con_los_intentos() {
        let first = retry_backoff(1);
        assert!(first >= Duration::from_millis(500) && first < Duration::from_millis(1500));
        let third = retry_backoff(3);
        assert!(third >= Duration::from_millis(2000) && third < Duration::from_millis(6000));
    }

    #[test]
    fn resolve_owner_sin_particion_es_partition_not_found() {
        let state = temp_state("resolve");
        let err = resolve_owner(&state, 99).unwrap_err();
        assert_eq!(err.code(), "PartitionNotFound");
    }
}
