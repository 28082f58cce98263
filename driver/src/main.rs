mod actions;
mod handlers;
mod journal;
mod monitor;
mod rdd;
mod shuffle;
mod source;
mod state;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::state::DriverState;

#[derive(Parser)]
#[command(name = "driver")]
#[command(about = "Driver del motor de cómputo distribuido")]
struct Args {
    /// Puerto donde escucha el driver
    #[arg(long, default_value_t = 9000)]
    port: u16,

    /// Directorio del journal de jobs
    #[arg(long, default_value = "driver_state")]
    state_dir: String,

    /// Directorio de spill de la cache de particiones
    #[arg(long, default_value = "partition_cache")]
    cache_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("driver=debug,axum=info")
        .init();

    let args = Args::parse();
    let state = DriverState::new(args.port, &args.state_dir, &args.cache_dir)?;

    // rehidratar los jobs persistidos de corridas anteriores
    match journal::load_all_job_states(Path::new(&args.state_dir)) {
        Ok(jobs) => {
            if !jobs.is_empty() {
                info!("{} jobs rehidratados del journal", jobs.len());
            }
            state.inner.write().unwrap().jobs = jobs;
        }
        Err(e) => warn!("no se pudo rehidratar el journal: {e}"),
    }

    // monitor de heartbeats en segundo plano
    let monitor_state = state.clone();
    tokio::spawn(async move {
        monitor::run_monitor(monitor_state).await;
    });

    let app = handlers::build_router(state);
    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!("driver escuchando en {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
