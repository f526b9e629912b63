//! REST adapter over the memory service.

pub mod handlers;
pub mod openapi;
pub mod router;

pub use router::build_router;

use std::net::SocketAddr;

use crate::memory::MemoryService;

/// Serve the REST API until Ctrl-C
pub async fn serve(service: MemoryService, port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}
