use tracing::{info, warn};

use common::codec;
use common::config;
use common::error::EngineError;
use common::job::{JobId, RddId};
use common::partitioner::hash_partition;
use common::protocol::{JoinRequest, WorkerId};
use common::row::Row;
use common::task::{JoinTask, TaskReply, STATUS_OK};

use crate::actions::{self, TaskOutcome};
use crate::state::DriverState;

/// Re-bucketea filas por `hash(clave) % num_partitions`. Determinista:
/// el destino de una clave depende solo del hash y de P, no del orden
/// de llegada.
pub fn bucket_rows(rows: Vec<Row>, num_partitions: u32) -> Vec<Vec<Row>> {
    let mut buckets: Vec<Vec<Row>> = (0..num_partitions).map(|_| Vec::new()).collect();
    for row in rows {
        let bucket = hash_partition(&row.key, num_partitions) as usize;
        buckets[bucket].push(row);
    }
    buckets
}

/// Join ancho: materializa los dos lados, los shufflea por clave sobre
/// max(N1, N2) particiones destino, empareja los buckets en JoinTasks
/// hacia el worker dueño de cada destino y materializa el resultado
/// como un RDD nuevo.
pub async fn run_join(
    state: &DriverState,
    req: &JoinRequest,
) -> Result<(JobId, RddId), EngineError> {
    // 1) materializar ambos lados con la misma maquinaria de tareas
    let (pipeline1, partitions1) = actions::compile_for_action(state, req.rdd_id1)?;
    let (pipeline2, partitions2) = actions::compile_for_action(state, req.rdd_id2)?;

    let left_slots = actions::into_slots(
        actions::dispatch_all(state, actions::make_tasks(&partitions1, &pipeline1)).await,
    )?;
    let right_slots = actions::into_slots(
        actions::dispatch_all(state, actions::make_tasks(&partitions2, &pipeline2)).await,
    )?;

    // 2) shuffle de los dos lados con el mismo particionador
    let target_count = partitions1.len().max(partitions2.len()).max(1) as u32;
    let left_buckets = bucket_rows(left_slots.into_iter().flatten().collect(), target_count);
    let right_buckets = bucket_rows(right_slots.into_iter().flatten().collect(), target_count);

    // 3) particiones destino asignadas round-robin y RDD resultado
    let timeout = config::worker_timeout();
    let (rdd_id, placements) = {
        let mut inner = state.inner.write().unwrap();
        let alive: Vec<(WorkerId, String)> = inner
            .alive_workers(timeout)
            .iter()
            .filter_map(|id| inner.workers.get(id).map(|w| (w.id, w.endpoint.clone())))
            .collect();
        if alive.is_empty() {
            return Err(EngineError::Config(
                "no hay workers vivos para el join".to_string(),
            ));
        }

        let mut partition_ids = Vec::with_capacity(target_count as usize);
        let mut placements = Vec::with_capacity(target_count as usize);
        for i in 0..target_count as usize {
            let partition_id = inner.next_partition_id();
            let (worker_id, endpoint) = alive[i % alive.len()].clone();
            inner.partition_map.insert(partition_id, worker_id);
            partition_ids.push(partition_id);
            placements.push((partition_id, endpoint));
        }

        (inner.register_source_rdd(partition_ids), placements)
    };

    // 4) un JoinTask por partición destino, en paralelo y con reintentos
    let target_partitions: Vec<u64> = placements.iter().map(|(p, _)| *p).collect();
    let job = actions::register_running_job(state, rdd_id, &target_partitions);

    let mut handles = Vec::with_capacity(target_partitions.len());
    let pairs = left_buckets.into_iter().zip(right_buckets);
    for (i, ((partition_id, _), (left_rows, right_rows))) in
        placements.iter().cloned().zip(pairs).enumerate()
    {
        let task = JoinTask {
            id: i as u64,
            partition_id,
            left_rows,
            right_rows,
        };
        let st = state.clone();
        handles.push(tokio::spawn(async move {
            dispatch_join_with_retries(st, task).await
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

    actions::finish_job(state, job.id, &outcomes);
    let joined_slots = actions::into_slots(outcomes)?;

    // 5) materializar el resultado: partición en el worker dueño más
    // réplica en la cache del driver
    for ((partition_id, endpoint), rows) in placements.iter().zip(&joined_slots) {
        actions::register_partition_on_worker(state, endpoint, *partition_id).await?;
        actions::store_partition_on_worker(state, endpoint, *partition_id, rows.clone()).await?;
        state.cache.put(*partition_id, rows.clone());
    }

    // 6) salida opcional del resultado: JSONL o CSV según la extensión
    if let Some(path) = &req.output_path {
        let all_rows: Vec<Row> = joined_slots.iter().flatten().cloned().collect();
        let written = if path.ends_with(".jsonl") {
            codec::write_jsonl_rows(path, &all_rows)
        } else {
            codec::write_csv_rows(path, &all_rows)
        };
        written.map_err(|e| EngineError::Persistence(format!("escribiendo {path}: {e}")))?;
        info!("resultado del join escrito en {path}");
    }

    Ok((job.id, rdd_id))
}

async fn dispatch_join_with_retries(state: DriverState, task: JoinTask) -> TaskOutcome {
    let max_retries = config::max_retries().max(1);
    let mut attempts = 0;
    let mut last_error = EngineError::Config("tarea sin intentos".to_string());

    while attempts < max_retries {
        attempts += 1;
        // re-resolver el dueño en cada intento, por si el monitor
        // reasignó la partición destino
        let result = match actions::resolve_owner(&state, task.partition_id) {
            Ok(endpoint) => post_join(&state, &endpoint, &task).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) if reply.status == STATUS_OK => {
                return TaskOutcome {
                    attempts,
                    result: Ok(reply.rows),
                }
            }
            Ok(reply) => {
                warn!(
                    "join {} intento {attempts}: status {} ({})",
                    task.id,
                    reply.status,
                    reply.error.as_deref().unwrap_or("sin detalle")
                );
                last_error = EngineError::Transport(format!(
                    "join {} devolvió status {}",
                    task.id, reply.status
                ));
            }
            Err(e) => {
                warn!("join {} intento {attempts}: {e}", task.id);
                last_error = e;
            }
        }

        if attempts < max_retries {
            tokio::time::sleep(actions::retry_backoff(attempts)).await;
        }
    }

    TaskOutcome {
        attempts,
        result: Err(last_error),
    }
}

async fn post_join(
    state: &DriverState,
    endpoint: &str,
    task: &JoinTask,
) -> Result<TaskReply, EngineError> {
    let url = format!("{endpoint}/api/v1/tasks/join");
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
