use tracing::warn;

use common::config;

use crate::state::DriverState;

/// Monitor de workers: cada tick marca como caídos a los que llevan
/// más del timeout sin heartbeat y reasigna sus particiones a los
/// vivos. Las tareas en vuelo hacia un caído las re-emite el propio
/// despacho al reintentar contra el nuevo dueño.
pub async fn run_monitor(state: DriverState) {
    let timeout = config::worker_timeout();

    loop {
        tokio::time::sleep(timeout).await;

        let newly_dead = {
            let mut inner = state.inner.write().unwrap();
            inner.sweep_failures(timeout)
        };

        for worker_id in newly_dead {
            warn!("worker {worker_id} marcado como caído por el monitor");
        }
    }
}
