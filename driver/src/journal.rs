use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::warn;

use common::error::EngineError;
use common::job::{Job, JobId};

use crate::state::DriverState;

/// Persiste un job a `<state_dir>/job_<id>.json` de forma atómica:
/// escribe un temporal y lo renombra encima del definitivo.
pub fn save_job_state(state_dir: &Path, job: &Job) -> Result<(), EngineError> {
    fs::create_dir_all(state_dir).map_err(|e| {
        EngineError::Persistence(format!(
            "no se pudo crear el directorio de estado {}: {e}",
            state_dir.display()
        ))
    })?;

    let data = serde_json::to_vec_pretty(job)
        .map_err(|e| EngineError::Persistence(format!("serializando job {}: {e}", job.id)))?;

    let final_path = state_dir.join(format!("job_{}.json", job.id));
    let tmp_path = state_dir.join(format!("job_{}.json.tmp", job.id));

    fs::write(&tmp_path, data).map_err(|e| {
        EngineError::Persistence(format!("escribiendo {}: {e}", tmp_path.display()))
    })?;
    fs::rename(&tmp_path, &final_path).map_err(|e| {
        EngineError::Persistence(format!("renombrando a {}: {e}", final_path.display()))
    })?;

    Ok(())
}

pub fn load_job_state(state_dir: &Path, job_id: JobId) -> Result<Job, EngineError> {
    let path = state_dir.join(format!("job_{job_id}.json"));
    let data = fs::read(&path)
        .map_err(|e| EngineError::Persistence(format!("leyendo {}: {e}", path.display())))?;
    serde_json::from_slice(&data)
        .map_err(|e| EngineError::Persistence(format!("parseando {}: {e}", path.display())))
}

/// Escanea el directorio de estado y rehidrata la tabla de jobs.
/// Un directorio inexistente es normal en la primera corrida.
pub fn load_all_job_states(state_dir: &Path) -> Result<HashMap<JobId, Job>, EngineError> {
    let mut jobs = HashMap::new();

    let entries = match fs::read_dir(state_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(jobs),
        Err(e) => {
            return Err(EngineError::Persistence(format!(
                "leyendo el directorio de estado {}: {e}",
                state_dir.display()
            )))
        }
    };

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(job_id) = name
            .strip_prefix("job_")
            .and_then(|rest| rest.strip_suffix(".json"))
            .and_then(|id| id.parse::<JobId>().ok())
        else {
            continue;
        };

        match load_job_state(state_dir, job_id) {
            Ok(job) => {
                jobs.insert(job_id, job);
            }
            Err(e) => warn!("no se pudo cargar el job {job_id}: {e}"),
        }
    }

    Ok(jobs)
}

/// Persistencia best-effort: un fallo del journal se loguea y la
/// operación sigue; la próxima escritura exitosa pisa el estado previo.
pub fn persist_job(state: &DriverState, job: &Job) {
    if let Err(e) = save_job_state(&state.state_dir, job) {
        warn!("no se pudo persistir el job {}: {e}", job.id);
    }
}
