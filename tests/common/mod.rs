#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use site_gate::logging::{LogFields, LogLevel, MakeRequestLogger, RequestLog};
use site_gate::middleware::{
    CspSources, RateLimitPolicy, RateLimiter, RequestContext, RequestPipelineLayer,
    SecurityHeaders,
};
use site_gate::reporting::{ErrorReport, ErrorReporter, ErrorSink, ReportId};

/// One captured log record.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub fields: LogFields,
    pub request_id: String,
}

/// Log records from every request, in emission order.
#[derive(Debug, Clone, Default)]
pub struct RecordingLoggerFactory {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl RecordingLoggerFactory {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn count(&self, level: LogLevel) -> usize {
        self.records().iter().filter(|r| r.level == level).count()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }
}

struct RecordingLogger {
    request_id: String,
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl RequestLog for RecordingLogger {
    fn log(&self, level: LogLevel, message: &str, fields: LogFields) {
        self.records.lock().unwrap().push(LogRecord {
            level,
            message: message.to_string(),
            fields: fields.redacted(),
            request_id: self.request_id.clone(),
        });
    }
}

impl MakeRequestLogger for RecordingLoggerFactory {
    fn make_logger(&self, ctx: &RequestContext) -> Arc<dyn RequestLog> {
        Arc::new(RecordingLogger {
            request_id: ctx.request_id().to_string(),
            records: self.records.clone(),
        })
    }
}

/// Error sink that keeps every report.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    reports: Arc<Mutex<Vec<ErrorReport>>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<ErrorReport> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorSink for RecordingSink {
    fn capture(&self, report: &ErrorReport) -> Option<ReportId> {
        self.reports.lock().unwrap().push(report.clone());
        Some(uuid::Uuid::new_v4())
    }

    fn flush(&self, _timeout: Duration) -> bool {
        true
    }
}

pub fn csp_sources() -> CspSources {
    CspSources {
        feedback_origin: "https://vercel.live".to_string(),
        embed_origin: "https://www.youtube-nocookie.com".to_string(),
    }
}

pub fn security_headers() -> SecurityHeaders {
    SecurityHeaders::new(&csp_sources()).unwrap()
}

/// Pipeline wired to recording doubles.
pub fn recording_pipeline(
    loggers: &RecordingLoggerFactory,
    sink: &RecordingSink,
    policy: RateLimitPolicy,
) -> RequestPipelineLayer {
    let reporter = ErrorReporter::new(Arc::new(sink.clone()), Duration::from_millis(10));

    RequestPipelineLayer::new(Arc::new(RateLimiter::new()), reporter, security_headers())
        .rate_limit(policy)
        .logger_factory(Arc::new(loggers.clone()))
}
