//! Administrative bearer-token check
//!
//! Every maintenance route sits behind [`require_admin`]. With no token
//! configured the routes stay closed.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use super::response::error_reply;
use crate::service::ServiceError;

#[derive(Clone)]
pub struct AdminAuth {
    token: Option<String>,
}

impl AdminAuth {
    pub fn new(token: Option<String>) -> Self {
        if token.is_none() {
            tracing::warn!("no admin token configured; maintenance routes are disabled");
        }
        Self { token }
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    /// Constant-time comparison of the presented bearer token.
    pub fn verify(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = self.token.as_deref() else {
            return false;
        };
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "));

        match presented {
            Some(token) => token.as_bytes().ct_eq(expected.as_bytes()).into(),
            None => false,
        }
    }
}

impl std::fmt::Debug for AdminAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuth")
            .field("configured", &self.is_configured())
            .finish()
    }
}

pub async fn require_admin(
    State(auth): State<Arc<AdminAuth>>,
    request: Request,
    next: Next,
) -> Response {
    if auth.verify(request.headers()) {
        next.run(request).await
    } else {
        tracing::warn!(path = %request.uri().path(), "unauthorized maintenance request");
        error_reply(ServiceError::unauthorized()).into_response()
    }
}
