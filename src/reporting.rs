//! Error reporting to an external tracking service.
//!
//! # Policy
//!
//! [`ErrorReporter`] decides what is worth a report before anything reaches
//! a sink:
//!
//! - Exceptions that are plain network faults (peer reset, broken pipe) are
//!   dropped; they are not actionable.
//! - 5xx responses are always reported.
//! - 4xx responses from bot traffic are dropped, except 401 and 403, which may
//!   indicate probing.
//! - 4xx responses from any other traffic are reported.
//!
//! # Sinks
//!
//! | Sink | When |
//! |------|------|
//! | [`SentrySink`] | `SENTRY_DSN` is set |
//! | [`TracingSink`] | otherwise; reports become structured `error` events |
//!
//! Sink calls are fire-and-forget from the request's point of view: a
//! panicking sink is contained, and flushing only happens at shutdown with a
//! bounded timeout.

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::metrics;
use crate::middleware::context::RequestContext;
use crate::middleware::user_agent::UserAgentCategory;

/// Identifier assigned to a captured report.
pub type ReportId = Uuid;

/// Messages that identify a network fault when no typed `io::Error` is available.
const NETWORK_FAULT_MARKERS: [&str; 4] = ["econnreset", "epipe", "connection reset", "broken pipe"];

/// What produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// The downstream handler failed (error or panic).
    Exception,
    /// The downstream handler returned an error status.
    HttpStatus,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exception => "exception",
            Self::HttpStatus => "http_status",
        }
    }
}

/// One report handed to a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ReportKind,
    pub message: String,
    pub status: u16,
    pub tags: BTreeMap<String, String>,
}

impl ErrorReport {
    /// Report tagged with the request's identity fields and `status`.
    pub fn new(
        kind: ReportKind,
        message: impl Into<String>,
        status: u16,
        ctx: &RequestContext,
    ) -> Self {
        let mut tags: BTreeMap<String, String> = ctx
            .tags()
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        tags.insert("status".to_string(), status.to_string());

        Self {
            kind,
            message: message.into(),
            status,
            tags,
        }
    }

    /// Synthetic report for an error status returned by the handler.
    pub fn from_status(status: u16, ctx: &RequestContext) -> Self {
        let message = format!("HTTP {status} {} {}", ctx.method(), ctx.route());
        Self::new(ReportKind::HttpStatus, message, status, ctx)
    }
}

/// Destination for error reports.
pub trait ErrorSink: Send + Sync {
    /// Queue a report. Returns its id when the sink accepted it.
    fn capture(&self, report: &ErrorReport) -> Option<ReportId>;

    /// Wait up to `timeout` for queued reports to be delivered.
    fn flush(&self, timeout: Duration) -> bool;
}

/// Writes reports to the process log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn capture(&self, report: &ErrorReport) -> Option<ReportId> {
        let id = Uuid::new_v4();
        let tags = serde_json::to_string(&report.tags).unwrap_or_default();
        error!(
            target: "site_gate::error_report",
            report_id = %id,
            kind = report.kind.as_str(),
            status = report.status,
            tags = %tags,
            "{}",
            report.message
        );
        Some(id)
    }

    fn flush(&self, _timeout: Duration) -> bool {
        true
    }
}

/// Sends reports to Sentry.
pub struct SentrySink {
    _guard: sentry::ClientInitGuard,
}

impl SentrySink {
    /// Initialize the Sentry client. Returns `None` if the DSN is unusable.
    pub fn init(dsn: &str, environment: &str) -> Option<Self> {
        let guard = sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(environment.to_string().into()),
                ..Default::default()
            },
        ));

        if guard.is_enabled() {
            info!(environment, "Sentry error reporting enabled");
            Some(Self { _guard: guard })
        } else {
            warn!("SENTRY_DSN did not produce an enabled client");
            None
        }
    }
}

impl ErrorSink for SentrySink {
    fn capture(&self, report: &ErrorReport) -> Option<ReportId> {
        let id = sentry::with_scope(
            |scope| {
                for (key, value) in &report.tags {
                    scope.set_tag(key, value);
                }
                scope.set_tag("kind", report.kind.as_str());
            },
            || sentry::capture_message(&report.message, sentry::Level::Error),
        );
        (!id.is_nil()).then_some(id)
    }

    fn flush(&self, timeout: Duration) -> bool {
        sentry::Hub::current()
            .client()
            .is_none_or(|client| client.flush(Some(timeout)))
    }
}

/// Whether an error is a peer reset / broken pipe rather than an application fault.
pub fn is_network_fault(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);

    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>()
            && matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionAborted
            )
        {
            return true;
        }
        current = e.source();
    }

    is_network_fault_message(&err.to_string())
}

/// Message-only variant of [`is_network_fault`] for panics and opaque errors.
pub fn is_network_fault_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    NETWORK_FAULT_MARKERS.iter().any(|m| message.contains(m))
}

/// Whether an error status returned by the handler should be reported.
pub fn should_report_status(status: u16, category: UserAgentCategory) -> bool {
    match status {
        500.. => true,
        401 | 403 => true,
        400..=499 => !category.is_bot(),
        _ => false,
    }
}

/// Applies the reporting policy and forwards to a sink.
#[derive(Clone)]
pub struct ErrorReporter {
    sink: Arc<dyn ErrorSink>,
    flush_timeout: Duration,
}

impl ErrorReporter {
    pub fn new(sink: Arc<dyn ErrorSink>, flush_timeout: Duration) -> Self {
        Self {
            sink,
            flush_timeout,
        }
    }

    /// Report a handler failure. Network faults are suppressed.
    pub fn capture_exception(
        &self,
        message: &str,
        network_fault: bool,
        ctx: &RequestContext,
    ) -> Option<ReportId> {
        if network_fault {
            debug!(request_id = ctx.request_id(), "Network fault not reported");
            return None;
        }

        self.capture(&ErrorReport::new(ReportKind::Exception, message, 500, ctx))
    }

    /// Report an error status if the policy asks for it.
    pub fn capture_status(&self, status: u16, ctx: &RequestContext) -> Option<ReportId> {
        if !should_report_status(status, ctx.user_agent_category()) {
            return None;
        }

        self.capture(&ErrorReport::from_status(status, ctx))
    }

    /// Forward a report to the sink, containing any sink failure.
    pub fn capture(&self, report: &ErrorReport) -> Option<ReportId> {
        match catch_unwind(AssertUnwindSafe(|| self.sink.capture(report))) {
            Ok(id) => {
                metrics::record_error_report(report.kind.as_str());
                id
            }
            Err(_) => {
                warn!("Error sink panicked; report dropped");
                None
            }
        }
    }

    /// Flush queued reports, bounded by the configured timeout.
    pub fn flush(&self) -> bool {
        catch_unwind(AssertUnwindSafe(|| self.sink.flush(self.flush_timeout))).unwrap_or(false)
    }
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("flush_timeout", &self.flush_timeout)
            .finish_non_exhaustive()
    }
}
