//! MCP surface for the Waggle coordination server.
//!
//! Exposes [`WaggleService`] over the stdio transport (one agent process
//! per connection) or a streamable-HTTP endpoint mounted in axum.

use anyhow::Result;
use rmcp::ServiceExt;
use tokio::io::{stdin, stdout};
use waggle_common::WaggleConfig;

pub mod errors;
pub mod helpers;
pub mod params;
pub mod resources;
pub mod tools;

pub use tools::WaggleService;

/// Serve MCP over stdio. Logs must go to stderr; the protocol owns stdout.
pub async fn run_stdio(config: WaggleConfig) -> Result<()> {
    tracing::info!("starting waggle server (stdio mode)");

    let service = WaggleService::new_with_config(config).await?;

    let transport = (stdin(), stdout());
    let server = service.serve(transport).await?;

    tracing::info!("MCP server initialized, waiting for requests");

    let quit_reason = server.waiting().await?;
    tracing::info!(reason = ?quit_reason, "server shutting down");

    Ok(())
}

/// Serve MCP over streamable HTTP at the configured host/port/path.
pub async fn run_http(config: WaggleConfig) -> Result<()> {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager,
        tower::{StreamableHttpServerConfig, StreamableHttpService},
    };
    use std::net::SocketAddr;
    use std::sync::Arc;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let http_path = config.server.http_path.clone();
    tracing::info!(%addr, path = %http_path, "starting waggle server (HTTP mode)");

    let session_manager = Arc::new(LocalSessionManager::default());
    let server_config = StreamableHttpServerConfig::default();

    let service_factory = move || {
        let rt = tokio::runtime::Handle::current();
        let config = config.clone();
        rt.block_on(async {
            WaggleService::new_with_config(config)
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))
        })
    };

    let mcp_service = StreamableHttpService::new(service_factory, session_manager, server_config);

    let app = axum::Router::new()
        .route(&http_path, axum::routing::any_service(mcp_service))
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[allow(clippy::expect_used)] // signal handler setup is infallible in practice
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
