//! HTTP middleware for request identity, classification, and hardening.
//!
//! Everything here is driven by one tower layer, [`RequestPipelineLayer`]:
//!
//! - **Identity**: request and trace ids, reused from inbound headers when present
//! - **Client IP**: forwarding-header resolution with trusted-proxy validation, hashed before use
//! - **User Agent**: coarse bot / mobile / tablet / desktop classification
//! - **Rate Limiting**: fixed-window observation per (ip hash, route), used to quiet bot logging
//! - **Security Headers**: CSP and friends stamped on every response
//!
//! # Architecture
//!
//! ```text
//! Request → Context → Rate Limit → RequestScope → Handler → Headers → Log/Report → Response
//!                         ↓                          ↓
//!                  quiet bot logs          error/panic → 500
//! ```
//!
//! # Privacy
//!
//! The raw client IP never leaves [`ip`]: the context only carries a
//! truncated SHA-256 hash.

pub mod context;
pub mod identity;
pub mod ip;
pub mod pipeline;
pub mod rate_limit;
pub mod security_headers;
pub mod user_agent;

pub use context::{BUILD_SENTINEL, Prerender, RequestContext, RequestScope};
pub use identity::{REQUEST_ID_HEADER, TRACE_ID_HEADER, TRACEPARENT_HEADER};
pub use ip::{TrustedProxyConfig, UNKNOWN_IP, hash_ip};
pub use pipeline::{
    HandlerFailure, HandlerOutcome, INTERNAL_ERROR_BODY, RateLimitPolicy, RequestPipelineLayer,
    RequestPipelineService,
};
pub use rate_limit::{RateLimitEntry, RateLimiter, rate_limit_key};
pub use security_headers::{CspSources, SecurityHeaders};
pub use user_agent::{UserAgentCategory, categorize_user_agent};
