//! # Osprey Relay
//!
//! Service layer of the relay: credential registries, the WebSocket SFTP
//! relay, the reconnect lookup endpoint, and the router that ties them to a
//! listener. The interactive SSH session itself (authentication, terminal)
//! is a separate concern; this crate only consumes the credentials it cached.

pub mod message;
pub mod reconnect;
pub mod registry;
pub mod relay;

use axum::routing::get;
use axum::Router;
use osprey_core::{OspreyError, Result, ServerConfig};
use registry::{ReconnectRegistry, SessionRegistry};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionRegistry>,
    pub reconnect: Arc<ReconnectRegistry>,
}

pub struct HttpServer {
    state: AppState,
    config: ServerConfig,
}

impl HttpServer {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        reconnect: Arc<ReconnectRegistry>,
        config: ServerConfig,
    ) -> Self {
        Self {
            state: AppState { sessions, reconnect },
            config,
        }
    }

    pub async fn run(&self) -> Result<()> {
        let app = self.create_router();
        let addr = SocketAddr::new(self.config.bind_address, self.config.port);
        info!("Relay listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| OspreyError::Http(e.to_string()))?;

        Ok(())
    }

    fn create_router(&self) -> Router {
        Router::new()
            .route("/sftp", get(relay::sftp_ws))
            .route(
                "/reconnect",
                get(reconnect::lookup).options(reconnect::preflight),
            )
            // Bounds the upgrade handshake and reconnect lookups; established
            // relay channels are not affected
            .layer(TimeoutLayer::new(Duration::from_secs(
                self.config.handshake_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }
}
