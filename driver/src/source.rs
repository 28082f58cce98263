use tracing::info;

use common::codec;
use common::config;
use common::error::EngineError;
use common::job::RddId;
use common::protocol::{ReadCsvRequest, ReadTextFileRequest, WorkerId};
use common::row::Row;

use crate::actions;
use crate::rdd::split_into_chunks;
use crate::state::DriverState;

/// Particionado por defecto de los RDD fuente.
const DEFAULT_NUM_PARTITIONS: usize = 4;

/// ReadTextFile: trocea las líneas en N particiones y las ubica en los
/// workers vivos. Cada fila lleva como clave su índice dentro de la
/// partición y como valor la línea.
pub async fn read_text_file(
    state: &DriverState,
    req: &ReadTextFileRequest,
) -> Result<RddId, EngineError> {
    let lines = codec::read_text_lines(&req.path)
        .map_err(|e| EngineError::Config(format!("no se pudo leer {}: {e}", req.path)))?;

    let num_partitions = req.num_partitions.unwrap_or(DEFAULT_NUM_PARTITIONS);
    let partitions_rows: Vec<Vec<Row>> = split_into_chunks(&lines, num_partitions)
        .iter()
        .map(|chunk| codec::rows_from_lines(chunk))
        .collect();

    create_source_rdd(state, partitions_rows).await
}

/// ReadCSV: igual que el texto, pero cada fila de datos se vuelve
/// `{ clave: fila[key_column], valor: mapa columna→string }`.
pub async fn read_csv(state: &DriverState, req: &ReadCsvRequest) -> Result<RddId, EngineError> {
    let rows = codec::read_csv_rows(&req.path, &req.key_column)
        .map_err(|e| EngineError::Config(format!("no se pudo leer {}: {e}", req.path)))?;

    let num_partitions = req.num_partitions.unwrap_or(DEFAULT_NUM_PARTITIONS);
    let partitions_rows = split_into_chunks(&rows, num_partitions);

    create_source_rdd(state, partitions_rows).await
}

/// Asigna particiones round-robin sobre los workers vivos, registra el
/// RDD fuente y coloca los datos: registro + store en el worker dueño,
/// y réplica en la cache del driver para poder re-sembrar tras una caída.
async fn create_source_rdd(
    state: &DriverState,
    partitions_rows: Vec<Vec<Row>>,
) -> Result<RddId, EngineError> {
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
                "no hay workers vivos para ubicar particiones".to_string(),
            ));
        }

        let mut partition_ids = Vec::with_capacity(partitions_rows.len());
        let mut placements = Vec::with_capacity(partitions_rows.len());
        for i in 0..partitions_rows.len() {
            let partition_id = inner.next_partition_id();
            let (worker_id, endpoint) = alive[i % alive.len()].clone();
            inner.partition_map.insert(partition_id, worker_id);
            partition_ids.push(partition_id);
            placements.push((partition_id, endpoint));
        }

        (inner.register_source_rdd(partition_ids), placements)
    };

    for ((partition_id, endpoint), rows) in placements.into_iter().zip(partitions_rows) {
        actions::register_partition_on_worker(state, &endpoint, partition_id).await?;
        actions::store_partition_on_worker(state, &endpoint, partition_id, rows.clone()).await?;
        state.cache.put(partition_id, rows);
    }

    info!("rdd fuente {rdd_id} creado y ubicado");
    Ok(rdd_id)
}
