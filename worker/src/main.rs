mod exec;
mod handlers;
mod heartbeat;
mod state;

use anyhow::{bail, Result};
use clap::Parser;
use rand::Rng;
use tokio::net::TcpListener;
use tracing::info;

use common::protocol::{RegisterWorkerRequest, RegisterWorkerResponse};

use crate::state::WorkerState;

#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "Worker del motor de cómputo distribuido")]
struct Args {
    /// URL base del driver
    #[arg(long, default_value = "http://localhost:9000")]
    driver_url: String,

    /// Puerto donde escucha el worker
    #[arg(long, default_value_t = 9001)]
    port: u16,

    /// Endpoint anunciado al driver; por defecto http://<hostname>:<puerto>
    #[arg(long)]
    endpoint: Option<String>,

    /// Directorio de spill de la cache de particiones
    #[arg(long, default_value = "partition_cache")]
    cache_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("worker=debug,axum=info")
        .init();

    let args = Args::parse();

    let hostname = hostname::get()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let endpoint = args
        .endpoint
        .unwrap_or_else(|| format!("http://{hostname}:{}", args.port));

    let id: u64 = rand::thread_rng().gen_range(1..1_000_000);
    // subdirectorio por worker: varios procesos en el mismo host no se
    // pisan los archivos de spill
    let cache_dir = format!("{}/worker_{id}", args.cache_dir);
    let state = WorkerState::new(id, endpoint.clone(), args.driver_url.clone(), &cache_dir)?;

    // registro en el driver
    let register_url = format!("{}/api/v1/workers/register", args.driver_url);
    let resp = state
        .http
        .post(&register_url)
        .json(&RegisterWorkerRequest {
            id,
            endpoint: endpoint.clone(),
        })
        .send()
        .await?;
    let RegisterWorkerResponse { ok } = resp.json().await?;
    if !ok {
        bail!("el driver rechazó el registro del worker {id}");
    }
    info!("worker {id} registrado contra {} como {endpoint}", args.driver_url);

    // heartbeats en segundo plano
    let heartbeat_state = state.clone();
    tokio::spawn(async move {
        heartbeat::run_heartbeat_loop(heartbeat_state).await;
    });

    let app = handlers::build_router(state);
    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!("worker {id} escuchando tareas en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
