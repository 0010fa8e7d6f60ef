//! Process logging setup and the per-request structured logger.
//!
//! # Process Logging
//!
//! [`init_tracing`] installs a `tracing-subscriber` registry with an
//! `EnvFilter` (`RUST_LOG`, falling back to the configured level) and either a
//! pretty or a JSON formatter.
//!
//! # Request Logging
//!
//! [`RequestLog`] is the leveled logging interface handed to downstream
//! handlers. The production implementation, [`TracingRequestLogger`], attaches
//! the request's identity fields to every record so call sites never repeat
//! them, and redacts sensitive field names before anything is emitted.
//!
//! ```rust,ignore
//! let logger = TracingLoggerFactory.make_logger(&ctx);
//! logger.info("Contact form accepted", LogFields::new().with("email", form.email));
//! // -> email="[REDACTED]" request_id=... trace_id=... route=/contact ...
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{Level, Span};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LogFormat};
use crate::middleware::context::RequestContext;

/// Replacement value for redacted fields.
pub const REDACTED: &str = "[REDACTED]";

/// Field names that are always redacted (compared lowercase).
const SENSITIVE_EXACT: [&str; 4] = ["authorization", "cookie", "set-cookie", "key"];

/// Substrings that mark a field name as sensitive (compared lowercase).
const SENSITIVE_FRAGMENTS: [&str; 6] = ["password", "email", "phone", "token", "secret", "apikey"];

/// Configure and initialize process logging.
///
/// Safe to call once per process; a second call is ignored.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,site_gate={}", config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.log_format {
        LogFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("Logging already initialized: {e}");
    }
}

// =============================================================================
// Levels and Fields
// =============================================================================

/// Severity of a request log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered structured fields attached to one log record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogFields(Map<String, Value>);

impl LogFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field, replacing any earlier value under the same key.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy of these fields with sensitive values replaced by [`REDACTED`].
    pub fn redacted(&self) -> Self {
        Self(redact_map(&self.0))
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl fmt::Display for LogFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => f.write_str("{}"),
        }
    }
}

/// Whether a field name must never leave the process in clear text.
pub fn is_sensitive_field(name: &str) -> bool {
    let name = name.to_ascii_lowercase();

    SENSITIVE_EXACT.contains(&name.as_str())
        || SENSITIVE_FRAGMENTS.iter().any(|f| name.contains(f))
        || name.ends_with("_key")
        || name.ends_with("-key")
}

fn redact_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| {
            let value = if is_sensitive_field(key) {
                Value::String(REDACTED.to_string())
            } else {
                redact_value(value)
            };
            (key.clone(), value)
        })
        .collect()
}

fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact_map(map)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

// =============================================================================
// Request Logger Interface
// =============================================================================

/// Leveled structured logging bound to one request.
///
/// Implementations must not panic or surface errors: a request never fails
/// because telemetry failed.
pub trait RequestLog: Send + Sync {
    fn log(&self, level: LogLevel, message: &str, fields: LogFields);

    /// Span the downstream handler runs in, so its own `tracing` events
    /// inherit the request fields.
    fn span(&self) -> Span {
        Span::none()
    }

    fn debug(&self, message: &str, fields: LogFields) {
        self.log(LogLevel::Debug, message, fields);
    }

    fn info(&self, message: &str, fields: LogFields) {
        self.log(LogLevel::Info, message, fields);
    }

    fn warn(&self, message: &str, fields: LogFields) {
        self.log(LogLevel::Warn, message, fields);
    }

    fn error(&self, message: &str, fields: LogFields) {
        self.log(LogLevel::Error, message, fields);
    }

    fn fatal(&self, message: &str, fields: LogFields) {
        self.log(LogLevel::Fatal, message, fields);
    }
}

/// Builds the logger a request's pipeline run and handler will use.
pub trait MakeRequestLogger: Send + Sync {
    fn make_logger(&self, ctx: &RequestContext) -> Arc<dyn RequestLog>;
}

/// Discards every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRequestLogger;

impl RequestLog for NoopRequestLogger {
    fn log(&self, _level: LogLevel, _message: &str, _fields: LogFields) {}
}

/// `tracing`-backed logger carrying the request's identity fields.
#[derive(Debug, Clone)]
pub struct TracingRequestLogger {
    request_id: String,
    trace_id: String,
    route: String,
    method: String,
    ip_hash: String,
    user_agent: &'static str,
    span: Span,
}

impl TracingRequestLogger {
    pub fn new(ctx: &RequestContext) -> Self {
        let span = tracing::info_span!(
            "request",
            request_id = %ctx.request_id(),
            trace_id = %ctx.trace_id(),
            route = %ctx.route(),
            method = %ctx.method(),
            ip_hash = %ctx.ip_hash(),
            ua = %ctx.user_agent_category(),
        );

        Self {
            request_id: ctx.request_id().to_string(),
            trace_id: ctx.trace_id().to_string(),
            route: ctx.route().to_string(),
            method: ctx.method().to_string(),
            ip_hash: ctx.ip_hash().to_string(),
            user_agent: ctx.user_agent_category().as_str(),
            span,
        }
    }
}

macro_rules! emit {
    ($level:expr, $logger:expr, $fields:expr, $fatal:expr, $message:expr) => {
        tracing::event!(
            target: "site_gate::request",
            $level,
            request_id = %$logger.request_id,
            trace_id = %$logger.trace_id,
            route = %$logger.route,
            method = %$logger.method,
            ip_hash = %$logger.ip_hash,
            ua = $logger.user_agent,
            fatal = $fatal,
            fields = %$fields,
            "{}",
            $message
        )
    };
}

impl RequestLog for TracingRequestLogger {
    fn span(&self) -> Span {
        self.span.clone()
    }

    fn log(&self, level: LogLevel, message: &str, fields: LogFields) {
        let fields = fields.redacted();

        match level {
            LogLevel::Debug => emit!(Level::DEBUG, self, fields, false, message),
            LogLevel::Info => emit!(Level::INFO, self, fields, false, message),
            LogLevel::Warn => emit!(Level::WARN, self, fields, false, message),
            LogLevel::Error => emit!(Level::ERROR, self, fields, false, message),
            LogLevel::Fatal => emit!(Level::ERROR, self, fields, true, message),
        }
    }
}

/// Production factory: one [`TracingRequestLogger`] per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLoggerFactory;

impl MakeRequestLogger for TracingLoggerFactory {
    fn make_logger(&self, ctx: &RequestContext) -> Arc<dyn RequestLog> {
        Arc::new(TracingRequestLogger::new(ctx))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::middleware::user_agent::UserAgentCategory;

    #[test]
    fn test_sensitive_field_names() {
        for name in [
            "authorization",
            "Cookie",
            "set-cookie",
            "password",
            "new_password",
            "email",
            "phone_number",
            "refresh_token",
            "client_secret",
            "key",
            "api_key",
            "x-api-key",
            "apiKey",
        ] {
            assert!(is_sensitive_field(name), "{name} should be redacted");
        }

        for name in ["status", "duration_ms", "route", "keyboard", "monkey"] {
            assert!(!is_sensitive_field(name), "{name} should be kept");
        }
    }

    #[test]
    fn test_redaction_is_recursive() {
        let fields = LogFields::new()
            .with("status", 200)
            .with("password", "hunter2")
            .with(
                "headers",
                json!({ "authorization": "Bearer abc", "accept": "text/html" }),
            )
            .with("contacts", json!([{ "email": "a@b.c", "name": "A" }]));

        let redacted = fields.redacted();

        assert_eq!(redacted.get("status"), Some(&json!(200)));
        assert_eq!(redacted.get("password"), Some(&json!(REDACTED)));
        assert_eq!(
            redacted.get("headers"),
            Some(&json!({ "authorization": REDACTED, "accept": "text/html" }))
        );
        assert_eq!(
            redacted.get("contacts"),
            Some(&json!([{ "email": REDACTED, "name": "A" }]))
        );
    }

    #[test]
    fn test_fields_display_as_json() {
        let fields = LogFields::new().with("status", 404).with("route", "/x");
        assert_eq!(fields.to_string(), r#"{"status":404,"route":"/x"}"#);

        // Replacing a value keeps the field where it was first added.
        let fields = fields.with("status", 500).with("duration_ms", 3);
        assert_eq!(
            fields.to_string(),
            r#"{"status":500,"route":"/x","duration_ms":3}"#
        );
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Fatal > LogLevel::Error);
        assert!(LogLevel::Warn > LogLevel::Info);
        assert_eq!(LogLevel::Warn.to_string(), "warn");
    }

    #[test]
    fn test_tracing_logger_binds_context() {
        let ctx = RequestContext::builder()
            .request_id("req-1")
            .trace_id("trace-1")
            .route("/blog")
            .method("GET")
            .ip_hash("abcdef0123456789")
            .user_agent_category(UserAgentCategory::Mobile)
            .build();

        let logger = TracingRequestLogger::new(&ctx);
        assert_eq!(logger.request_id, "req-1");
        assert_eq!(logger.user_agent, "mobile");

        // No subscriber installed: every level must be a silent no-op.
        logger.debug("d", LogFields::new());
        logger.info("i", LogFields::new().with("token", "t"));
        logger.warn("w", LogFields::new());
        logger.error("e", LogFields::new());
        logger.fatal("f", LogFields::new());
    }
}
