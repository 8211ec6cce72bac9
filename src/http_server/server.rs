//! # HTTP Server
//!
//! Combines the health check and the authenticated maintenance routes.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::auth::{require_admin, AdminAuth};
use super::backup_routes::{backup_routes, BackupState};
use super::config::HttpServerConfig;
use super::health_routes::health_routes;
use crate::config::AppConfig;
use crate::service::VaultService;

pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(config: &AppConfig, service: Arc<VaultService>) -> Self {
        let router = Self::build_router(config, service);
        Self {
            config: config.server.clone(),
            router,
        }
    }

    fn build_router(config: &AppConfig, service: Arc<VaultService>) -> Router {
        let auth = Arc::new(AdminAuth::new(config.admin_token.clone()));
        let backup_state = Arc::new(BackupState::new(
            Arc::clone(&service),
            config.max_upload_bytes,
        ));

        Router::new()
            .merge(health_routes(service))
            .nest(
                "/backup",
                backup_routes(backup_state)
                    .route_layer(middleware::from_fn_with_state(auth, require_admin)),
            )
            .layer(TraceLayer::new_for_http())
    }

    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Serve until Ctrl-C.
    pub async fn start(self) -> Result<(), io::Error> {
        let addr: SocketAddr = self
            .config
            .socket_addr()
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, "invoice vault listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        tracing::info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
