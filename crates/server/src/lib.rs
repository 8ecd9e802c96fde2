//! Gateway server library.
//!
//! Provides a reusable serve function for the binary crate and for integration tests.

#![deny(missing_docs)]

mod auth;
mod error;
mod health;
pub mod logger;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::anyhow;
use auth::AuthLayer;
use axum::Router;
use axum::routing::get;
use bridge::GatewayState;
use config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

pub use error::Error;

/// Configuration for serving the gateway.
pub struct ServeConfig {
    /// The socket address the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized gateway TOML configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string, e.g. `info` or `gateway=debug,bridge=trace`.
    pub log_filter: String,
    /// The version string logged on startup.
    pub version: String,
    /// Optional oneshot sender used by tests to receive the bound address when port 0 is used.
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the gateway with the provided configuration, returning once the server has
/// shut down (either gracefully via `shutdown_signal` or because the listener failed).
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    logger::init(&log_filter);
    log::info!("gateway {version}");

    let state = GatewayState::new(config.upstream.clone(), config.credentials.clone())
        .map_err(|err| anyhow!("failed to initialize credential pool: {err}"))?;
    let state = Arc::new(state);

    let auth = AuthLayer::new(config.server.client_secret.clone());

    let protected = bridge::router(state.clone()).layer(auth).layer(CorsLayer::permissive());

    let app = Router::new()
        .route("/health", get(health::health))
        .merge(protected);

    let listener = TcpListener::bind(listen_address).await.map_err(Error::Bind)?;

    if let Some(sender) = bound_addr_sender {
        sender
            .send(listener.local_addr()?)
            .expect("failed to send back bound address");
    }

    log::info!("gateway listening on http://{listen_address}");

    tokio::select! {
        result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result.map_err(Error::Server)?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("received shutdown signal, shutting down gracefully");
            state.shutdown().await;
        }
    }

    Ok(())
}
