use std::sync::atomic::Ordering;

use chrono::Utc;
use tokio::time::sleep;
use tracing::warn;

use common::config;
use common::protocol::{Heartbeat, WORKER_OK};

use crate::state::WorkerState;

/// Loop de heartbeats worker → driver. Un envío fallido se loguea y se
/// sigue intentando: el driver decide cuándo darnos por caídos.
pub async fn run_heartbeat_loop(state: WorkerState) {
    let interval = config::heartbeat_interval();
    let url = format!("{}/api/v1/workers/heartbeat", state.driver_url);

    loop {
        sleep(interval).await;

        let heartbeat = Heartbeat {
            worker_id: state.id,
            status: WORKER_OK,
            active_tasks: state.active_tasks.load(Ordering::SeqCst),
            endpoint: state.endpoint.clone(),
            timestamp: Utc::now(),
        };

        if let Err(e) = state.http.post(&url).json(&heartbeat).send().await {
            warn!("no se pudo enviar el heartbeat al driver: {e}");
        }
    }
}
