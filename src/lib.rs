//! # Site Gate
//!
//! Request pipeline and host server for a content website, built on Axum:
//!
//! - **Correlation**: request ids and W3C trace ids on every response
//! - **Privacy**: client IPs are hashed before anything sees them
//! - **Noise control**: rate-limited crawler traffic is kept out of the logs
//! - **Hardening**: CSP, HSTS, and friends on every response
//! - **Failure containment**: handler errors and panics become plain 500s, reported once
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RequestPipelineLayer (context → limit → handler → headers) │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (/health) + static site (ServeDir)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RequestLog (tracing)        ErrorSink (Sentry / tracing)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use site_gate::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::new(config);
//!     let app = build_router(state)?;
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Prerendering
//!
//! ```bash
//! site_gate prerender --out dist / /about /blog
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod prerender;
pub mod reporting;
pub mod routes;
pub mod state;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use logging::{LogFields, LogLevel, RequestLog};
pub use middleware::{RequestContext, RequestPipelineLayer, RequestScope};
pub use prerender::{PrerenderSummary, prerender};
pub use reporting::{ErrorReporter, ErrorSink};
pub use routes::build_router;
pub use state::AppState;
