//! The request pipeline: one tower layer that wraps every response.
//!
//! # Stages
//!
//! ```text
//! Request
//!    │
//!    ▼
//! context (ids, route, ip hash, ua category)
//!    │
//!    ▼
//! rate-limit observation ── bot + limited + GET ──► request log suppressed
//!    │
//!    ▼
//! RequestScope inserted into extensions
//!    │
//!    ▼
//! downstream handler ── error / panic ──► log, report, 500
//!    │
//!    ▼
//! correlation + security headers
//!    │
//!    ▼
//! completion log, status report, metrics
//!    │
//!    ▼
//! Response
//! ```
//!
//! The rate limiter never rejects: its verdict only quiets logging for
//! noisy crawlers. Error responses are always logged.
//!
//! The service's error type is `Infallible`. Downstream errors and panics
//! never escape; the client sees a plain `500 Internal Server Error` with no
//! internal detail.

use std::any::Any;
use std::convert::Infallible;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, Request, Response, StatusCode};
use futures::FutureExt;
use tower::{BoxError, Layer, Service};
use tracing::Instrument;

use super::context::{RequestContext, RequestScope};
use super::identity::{REQUEST_ID_HEADER, TRACE_ID_HEADER};
use super::ip::TrustedProxyConfig;
use super::rate_limit::{RateLimiter, rate_limit_key};
use super::security_headers::SecurityHeaders;
use super::user_agent::UserAgentCategory;
use crate::logging::{LogFields, MakeRequestLogger, RequestLog, TracingLoggerFactory};
use crate::metrics;
use crate::reporting::{ErrorReporter, is_network_fault, is_network_fault_message};

/// Body of the synthesized response for failed handlers.
pub const INTERNAL_ERROR_BODY: &str = "Internal Server Error";

/// Fallback header value when an identifier is not a valid header value.
static UNKNOWN_ID: HeaderValue = HeaderValue::from_static("unknown");

static TEXT_PLAIN: HeaderValue = HeaderValue::from_static("text/plain; charset=utf-8");

/// Fixed-window budget applied per `(ip hash, route)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_millis(60_000),
        }
    }
}

// =============================================================================
// Handler Outcome
// =============================================================================

/// How the downstream handler finished.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The handler produced a response (any status).
    Returned(Response<Body>),
    /// The handler returned an error or panicked.
    Failed(HandlerFailure),
}

/// A downstream failure, reduced to what logging and reporting need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    message: String,
    panicked: bool,
    network_fault: bool,
}

impl HandlerFailure {
    pub fn from_error(err: &BoxError) -> Self {
        Self {
            message: err.to_string(),
            panicked: false,
            network_fault: is_network_fault(&**err),
        }
    }

    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };

        Self {
            network_fault: is_network_fault_message(&message),
            message,
            panicked: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn panicked(&self) -> bool {
        self.panicked
    }

    pub fn is_network_fault(&self) -> bool {
        self.network_fault
    }
}

/// Run the downstream service, converting errors and panics into an outcome.
pub async fn run_handler<S>(mut inner: S, req: Request<Body>) -> HandlerOutcome
where
    S: Service<Request<Body>, Response = Response<Body>>,
    S::Error: Into<BoxError>,
{
    // `call` itself runs inside the guarded future, so a panic while
    // constructing the handler future is contained too.
    let result = AssertUnwindSafe(async move { inner.call(req).await })
        .catch_unwind()
        .await;

    match result {
        Ok(Ok(response)) => HandlerOutcome::Returned(response),
        Ok(Err(err)) => HandlerOutcome::Failed(HandlerFailure::from_error(&err.into())),
        Err(payload) => HandlerOutcome::Failed(HandlerFailure::from_panic(payload.as_ref())),
    }
}

// =============================================================================
// Policy Helpers
// =============================================================================

/// Whether the request-start record is emitted.
///
/// Only rate-limited bot `GET`s are quiet.
pub fn should_log_request(
    category: UserAgentCategory,
    rate_limited: bool,
    method: &Method,
) -> bool {
    !(category.is_bot() && rate_limited && method == Method::GET)
}

/// Whether the completion record is emitted. Error statuses always are.
pub fn should_log_completion(request_logged: bool, status: u16) -> bool {
    request_logged || status >= 400
}

/// The response sent when the downstream handler failed.
pub fn internal_error_response() -> Response<Body> {
    let mut response = Response::new(Body::from(INTERNAL_ERROR_BODY));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, TEXT_PLAIN.clone());
    response
}

fn stamp_correlation_headers(headers: &mut HeaderMap, ctx: &RequestContext) {
    headers.insert(
        REQUEST_ID_HEADER,
        HeaderValue::from_str(ctx.request_id()).unwrap_or_else(|_| UNKNOWN_ID.clone()),
    );
    headers.insert(
        TRACE_ID_HEADER,
        HeaderValue::from_str(ctx.trace_id()).unwrap_or_else(|_| UNKNOWN_ID.clone()),
    );
}

// =============================================================================
// Layer
// =============================================================================

/// Collaborators shared by every request.
struct PipelineShared {
    limiter: Arc<RateLimiter>,
    policy: RateLimitPolicy,
    reporter: ErrorReporter,
    loggers: Arc<dyn MakeRequestLogger>,
    security: SecurityHeaders,
    trusted_proxies: TrustedProxyConfig,
}

/// Tower layer installing the request pipeline.
///
/// ```rust,ignore
/// let layer = RequestPipelineLayer::new(limiter, reporter, security)
///     .rate_limit(RateLimitPolicy { max_requests: 100, window: Duration::from_secs(60) })
///     .trusted_proxies(TrustedProxyConfig::new(&config.trusted_proxies));
/// let app = router.layer(layer);
/// ```
#[derive(Clone)]
pub struct RequestPipelineLayer {
    shared: Arc<PipelineShared>,
}

impl RequestPipelineLayer {
    /// Pipeline with the default rate-limit policy, no trusted proxies, and
    /// `tracing`-backed request loggers.
    pub fn new(
        limiter: Arc<RateLimiter>,
        reporter: ErrorReporter,
        security: SecurityHeaders,
    ) -> Self {
        Self {
            shared: Arc::new(PipelineShared {
                limiter,
                policy: RateLimitPolicy::default(),
                reporter,
                loggers: Arc::new(TracingLoggerFactory),
                security,
                trusted_proxies: TrustedProxyConfig::default(),
            }),
        }
    }

    pub fn rate_limit(self, policy: RateLimitPolicy) -> Self {
        self.map_shared(|shared| shared.policy = policy)
    }

    pub fn trusted_proxies(self, trusted_proxies: TrustedProxyConfig) -> Self {
        self.map_shared(|shared| shared.trusted_proxies = trusted_proxies)
    }

    /// Replace the logger factory (tests install a recording one).
    pub fn logger_factory(self, loggers: Arc<dyn MakeRequestLogger>) -> Self {
        self.map_shared(|shared| shared.loggers = loggers)
    }

    fn map_shared(self, f: impl FnOnce(&mut PipelineShared)) -> Self {
        let mut shared = match Arc::try_unwrap(self.shared) {
            Ok(shared) => shared,
            Err(arc) => PipelineShared {
                limiter: arc.limiter.clone(),
                policy: arc.policy,
                reporter: arc.reporter.clone(),
                loggers: arc.loggers.clone(),
                security: arc.security.clone(),
                trusted_proxies: arc.trusted_proxies.clone(),
            },
        };
        f(&mut shared);
        Self {
            shared: Arc::new(shared),
        }
    }
}

impl<S> Layer<S> for RequestPipelineLayer {
    type Service = RequestPipelineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestPipelineService {
            inner,
            shared: self.shared.clone(),
            not_ready: None,
        }
    }
}

// =============================================================================
// Service
// =============================================================================

/// Service produced by [`RequestPipelineLayer`].
#[derive(Clone)]
pub struct RequestPipelineService<S> {
    inner: S,
    shared: Arc<PipelineShared>,
    /// Readiness error from the inner service, answered on the next call.
    not_ready: Option<HandlerFailure>,
}

impl<S> Service<Request<Body>> for RequestPipelineService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Into<BoxError> + Send,
{
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // A failed inner service still gets a response: the next call
        // answers with a 500 instead of invoking it.
        match self.inner.poll_ready(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(err)) => {
                self.not_ready = Some(HandlerFailure::from_error(&err.into()));
                Poll::Ready(Ok(()))
            }
        }
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let shared = self.shared.clone();
        let not_ready = self.not_ready.take();
        // Call the instance that was polled ready; keep a fresh clone.
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);

        let ctx = RequestContext::from_request(&req, &shared.trusted_proxies);
        let path = req.uri().path().to_string();

        let key = rate_limit_key(ctx.ip_hash(), ctx.route());
        let rate_limited =
            shared
                .limiter
                .is_rate_limited(&key, shared.policy.max_requests, shared.policy.window);
        if rate_limited {
            metrics::record_rate_limited();
        }

        let logger = shared.loggers.make_logger(&ctx);
        let request_logged =
            should_log_request(ctx.user_agent_category(), rate_limited, req.method());
        if request_logged {
            logger.info(
                "Request started",
                LogFields::new()
                    .with("method", ctx.method())
                    .with("route", ctx.route())
                    .with("rate_limited", rate_limited),
            );
        }

        req.extensions_mut()
            .insert(RequestScope::new(ctx.clone(), logger.clone()));
        let span = logger.span();

        Box::pin(async move {
            let outcome = match not_ready {
                Some(failure) => HandlerOutcome::Failed(failure),
                None => run_handler(inner, req).instrument(span).await,
            };

            let (mut response, exception_caught) = match outcome {
                HandlerOutcome::Returned(response) => (response, false),
                HandlerOutcome::Failed(failure) => {
                    logger.error(
                        "Unhandled error in request handler",
                        LogFields::new()
                            .with("error", failure.message())
                            .with("panicked", failure.panicked())
                            .with("network_fault", failure.is_network_fault())
                            .with("duration_ms", ctx.elapsed_ms()),
                    );
                    shared
                        .reporter
                        .capture_exception(failure.message(), failure.is_network_fault(), &ctx);
                    (internal_error_response(), true)
                }
            };

            stamp_correlation_headers(response.headers_mut(), &ctx);
            shared.security.apply(response.headers_mut(), &path);

            let status = response.status().as_u16();
            let duration = ctx.start_time().elapsed();

            if should_log_completion(request_logged, status) {
                log_completion(logger.as_ref(), &ctx, status, duration);
            }

            if status >= 400 && !exception_caught {
                shared.reporter.capture_status(status, &ctx);
            }

            metrics::record_request(ctx.method(), status, duration.as_secs_f64());

            Ok(response)
        })
    }
}

fn log_completion(logger: &dyn RequestLog, ctx: &RequestContext, status: u16, duration: Duration) {
    let fields = LogFields::new()
        .with("method", ctx.method())
        .with("route", ctx.route())
        .with("status", status)
        .with(
            "duration_ms",
            u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        );

    match status {
        500.. => logger.error("Request completed", fields),
        400..=499 => logger.warn("Request completed", fields),
        _ => logger.info("Request completed", fields),
    }
}
