//! Request and trace identifiers.
//!
//! # Features
//!
//! - Generates UUIDv4 request IDs for incoming requests without one
//! - Propagates an existing `X-Request-Id` header when it is usable
//! - Generates 32-hex-digit trace IDs (W3C trace-context shape)
//! - Continues an existing trace from a `traceparent` header
//!
//! # Client Usage
//!
//! Clients and upstream proxies can provide their own identifiers:
//!
//! ```bash
//! curl -H "X-Request-Id: my-correlation-id" \
//!      -H "traceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01" \
//!      http://localhost:4321/
//! ```
//!
//! The same IDs come back as `x-request-id` / `x-trace-id` response headers.

use axum::http::HeaderMap;
use uuid::Uuid;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Header name the trace ID is echoed on.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Inbound W3C trace-context header.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Longest inbound request ID that is reused verbatim.
pub const MAX_INBOUND_REQUEST_ID_LEN: usize = 128;

/// Generate a fresh request ID (UUIDv4, hyphenated).
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a fresh trace ID: 32 lowercase hex digits, no separators.
pub fn generate_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Return the second hyphen-delimited field of a `traceparent`-style header.
///
/// Lengths and hex-ness are not checked: any value with at least two fields
/// yields its second field. `None` and `""` yield `None`, as does a value
/// without a hyphen.
pub fn parse_traceparent(header: Option<&str>) -> Option<String> {
    let header = header.filter(|h| !h.is_empty())?;
    header.split('-').nth(1).map(str::to_string)
}

/// Reuse the inbound `x-request-id` when usable, otherwise generate one.
///
/// Inbound values must be non-empty, at most [`MAX_INBOUND_REQUEST_ID_LEN`]
/// bytes and visible ASCII, since they are echoed into logs and headers.
pub fn extract_or_generate_request_id(headers: &HeaderMap) -> String {
    if let Some(header_value) = headers.get(REQUEST_ID_HEADER)
        && let Ok(value) = header_value.to_str()
        && is_usable_request_id(value)
    {
        return value.to_string();
    }

    generate_request_id()
}

/// Continue the inbound trace when `traceparent` carries one, otherwise start a new trace.
pub fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    let header = headers
        .get(TRACEPARENT_HEADER)
        .and_then(|v| v.to_str().ok());

    parse_traceparent(header)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_trace_id)
}

fn is_usable_request_id(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_INBOUND_REQUEST_ID_LEN
        && value.bytes().all(|b| b.is_ascii_graphic())
}
