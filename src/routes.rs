//! Application routing configuration.
//!
//! # Stack
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────────┐
//! │ RequestPipelineLayer │ ← ids, limiter, logging, reporting, headers
//! └──────────┬───────────┘
//!            │
//!            ▼
//! ┌──────────────────────┐
//! │  /health  │ ServeDir │ ← static site from SITE_ROOT
//! └──────────────────────┘
//! ```
//!
//! The pipeline is applied after the fallback is registered so static files
//! and 404s go through it too.

use std::convert::Infallible;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode, header};
use axum::routing::get;
use tower_http::services::ServeDir;
use tracing::info;

use crate::config::Config;
use crate::error::AppResult;
use crate::handlers;
use crate::middleware::{
    CspSources, RateLimitPolicy, RequestPipelineLayer, SecurityHeaders, TrustedProxyConfig,
};
use crate::state::AppState;

/// Build the application router with the pipeline installed.
///
/// # Errors
///
/// Returns `AppError::ConfigError` if the configured CSP origins do not form a
/// valid header value.
pub fn build_router(state: AppState) -> AppResult<Router> {
    let pipeline = pipeline_layer(&state)?;

    info!(site_root = %state.config.site_root.display(), "Serving static site");
    let site = ServeDir::new(&state.config.site_root)
        .append_index_html_on_directories(true)
        .not_found_service(tower::service_fn(not_found));

    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .fallback_service(site)
        .layer(pipeline)
        .with_state(state);

    Ok(router)
}

/// Plain-text 404 for paths the static site does not have.
async fn not_found(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let mut response = Response::new(Body::from("Not Found"));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    Ok(response)
}

/// The request pipeline configured from application state.
///
/// # Errors
///
/// Returns `AppError::ConfigError` if the security headers cannot be built.
pub fn pipeline_layer(state: &AppState) -> AppResult<RequestPipelineLayer> {
    let config: &Config = &state.config;

    let security = SecurityHeaders::new(&CspSources {
        feedback_origin: config.csp_feedback_origin.clone(),
        embed_origin: config.csp_embed_origin.clone(),
    })?;

    let trusted_proxies = TrustedProxyConfig::new(&config.trusted_proxies);
    if config.proxy_validation_enabled() {
        info!(
            count = config.trusted_proxies.len(),
            "Forwarding headers only trusted from configured proxies"
        );
    }

    info!(
        max_requests = config.rate_limit_max_requests,
        window_ms = config.rate_limit_window.as_millis(),
        "Rate-limit observation configured"
    );

    Ok(
        RequestPipelineLayer::new(state.limiter.clone(), state.reporter.clone(), security)
            .rate_limit(RateLimitPolicy {
                max_requests: config.rate_limit_max_requests,
                window: config.rate_limit_window,
            })
            .trusted_proxies(trusted_proxies),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_router_with_defaults() {
        let state = AppState::new(Config::default());
        assert!(build_router(state.clone()).is_ok());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_csp_origin_rejected() {
        let config = Config {
            csp_feedback_origin: "https://a\r\nb".to_string(),
            ..Config::default()
        };
        let state = AppState::new(config);
        assert!(build_router(state.clone()).is_err());
        state.shutdown().await;
    }
}
