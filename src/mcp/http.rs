//! HTTP serving shared by the SSE and streamable HTTP transports.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::errors::{Error, Result};

/// Bind the listener for a transport
pub async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .map_err(|e| Error::transport(format!("Failed to bind {}: {}", address, e)))
}

/// Serve `router` on `listener` in the background.
///
/// `shutdown` starts a graceful shutdown; `done` is cancelled once the server
/// has stopped, whichever way it ended.
pub fn spawn_server(
    listener: TcpListener,
    router: Router,
    name: &'static str,
    shutdown: CancellationToken,
    done: CancellationToken,
) {
    let address = listener.local_addr().ok();
    let router = router.layer(TraceLayer::new_for_http());

    tokio::spawn(async move {
        info!(transport = name, address = ?address, "Starting HTTP transport");
        let result = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

        if let Err(e) = result {
            error!(transport = name, error = %e, "HTTP transport server error");
        }
        info!(transport = name, "HTTP transport shutdown completed");
        done.cancel();
    });
}
