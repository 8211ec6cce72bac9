//! # Invoice Vault HTTP Server
//!
//! Thin axum adapter over [`crate::service::VaultService`].
//!
//! # Endpoints
//!
//! - `GET /health` - store ping, no credentials
//! - `GET /backup/download/{database,uploads,full}` - streamed artifact
//! - `POST /backup/restore/{database,uploads,full}` - multipart field `backup`
//! - `POST /backup/reset` - destructive reset
//!
//! Everything under `/backup` needs `Authorization: Bearer <admin_token>`.

pub mod auth;
pub mod backup_routes;
pub mod config;
pub mod health_routes;
pub mod response;
pub mod server;

pub use config::HttpServerConfig;
pub use server::HttpServer;
