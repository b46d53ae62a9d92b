//! HTTP surface
//!
//! Authentication happens upstream; the gateway in front of this service
//! forwards the caller's user id in the `X-User-Id` header.

pub mod response;

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use sqlx::PgPool;

use crate::config::Config;
use crate::error::AppError;
use crate::features::{self, FeatureState};
use crate::middleware;

/// Header carrying the authenticated caller id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller, read from [`USER_ID_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerId(pub i64);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| AppError::Unauthorized("missing X-User-Id header".to_string()))?;

        value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(CallerId)
            .ok_or_else(|| AppError::Unauthorized("invalid X-User-Id header".to_string()))
    }
}

/// Build the application router with all routes and middleware.
pub fn create_router(state: FeatureState, config: &Config) -> Router {
    let health = Router::new()
        .route("/health", get(health_check))
        .with_state(state.db.clone());

    health
        .nest("/api/v1", features::router(state))
        .layer(DefaultBodyLimit::disable())
        .layer(middleware::body_limit_layer(config.server.max_upload_bytes))
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(&config.cors))
}

async fn health_check(State(db): State<PgPool>) -> Result<Response, StatusCode> {
    match crate::db::health_check(&db).await {
        Ok(()) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected"
            })),
        )
            .into_response()),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        },
    }
}
