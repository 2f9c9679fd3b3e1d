/// Server reachability check
use crate::backend::Backend;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Online,
    Offline,
}

/// The only call with a client-side deadline; exceeding it counts as offline
pub async fn check_server_status(backend: &dyn Backend, limit: Duration) -> ServerStatus {
    match timeout(limit, backend.health()).await {
        Ok(Ok(true)) => ServerStatus::Online,
        Ok(Ok(false)) => {
            debug!("Health endpoint did not report ok");
            ServerStatus::Offline
        }
        Ok(Err(e)) => {
            warn!("Health check failed: {}", e);
            ServerStatus::Offline
        }
        Err(_) => {
            warn!("Health check timed out after {:?}", limit);
            ServerStatus::Offline
        }
    }
}
