//! Per-request context and the scope handed to downstream handlers.
//!
//! [`RequestContext`] is built once at pipeline entry and never changes. The
//! pipeline wraps it, together with the request's logger, in a
//! [`RequestScope`] stored in the request extensions; handlers receive it as
//! an extractor:
//!
//! ```rust,ignore
//! async fn contact(scope: RequestScope, Form(form): Form<ContactForm>) -> impl IntoResponse {
//!     scope.logger().info("Contact form received", LogFields::new());
//!     // ...
//! }
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{Request, StatusCode, header};

use super::identity::{extract_or_generate_request_id, extract_or_generate_trace_id};
use super::ip::{TrustedProxyConfig, hash_ip, resolve_client_ip};
use super::user_agent::{UserAgentCategory, categorize_user_agent};
use crate::logging::RequestLog;

/// Value substituted for the client IP and user agent during prerendering.
pub const BUILD_SENTINEL: &str = "build";

/// Marker extension: the request comes from a build-time prerender, not a live client.
#[derive(Debug, Clone, Copy, Default)]
pub struct Prerender;

/// Immutable identity and classification of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: String,
    trace_id: String,
    route: String,
    method: String,
    ip_hash: String,
    user_agent_category: UserAgentCategory,
    start_time: Instant,
}

impl RequestContext {
    /// Build the context for an inbound request.
    ///
    /// The raw client IP is hashed here and not retained.
    pub fn from_request<B>(req: &Request<B>, trusted_proxies: &TrustedProxyConfig) -> Self {
        let start_time = Instant::now();
        let headers = req.headers();
        let prerender = req.extensions().get::<Prerender>().is_some();

        let (ip_hash, user_agent) = if prerender {
            (hash_ip(BUILD_SENTINEL), BUILD_SENTINEL)
        } else {
            let ip = resolve_client_ip(req, trusted_proxies);
            let ua = headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            (hash_ip(&ip), ua)
        };

        let route = match req.uri().path() {
            "" => "/",
            path => path,
        };

        Self {
            request_id: extract_or_generate_request_id(headers),
            trace_id: extract_or_generate_trace_id(headers),
            route: route.to_string(),
            method: req.method().as_str().to_string(),
            ip_hash,
            user_agent_category: categorize_user_agent(user_agent),
            start_time,
        }
    }

    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::default()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn ip_hash(&self) -> &str {
        &self.ip_hash
    }

    pub fn user_agent_category(&self) -> UserAgentCategory {
        self.user_agent_category
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    /// Milliseconds since the request entered the pipeline.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Identity fields as `(name, value)` pairs, used for report tags.
    pub fn tags(&self) -> [(&'static str, &str); 6] {
        [
            ("request_id", self.request_id.as_str()),
            ("trace_id", self.trace_id.as_str()),
            ("route", self.route.as_str()),
            ("method", self.method.as_str()),
            ("ip_hash", self.ip_hash.as_str()),
            ("user_agent_category", self.user_agent_category.as_str()),
        ]
    }
}

/// Builder for contexts constructed outside the pipeline (tests, tooling).
#[derive(Debug, Default)]
pub struct RequestContextBuilder {
    request_id: Option<String>,
    trace_id: Option<String>,
    route: Option<String>,
    method: Option<String>,
    ip_hash: Option<String>,
    user_agent_category: Option<UserAgentCategory>,
}

impl RequestContextBuilder {
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn trace_id(mut self, id: impl Into<String>) -> Self {
        self.trace_id = Some(id.into());
        self
    }

    pub fn route(mut self, route: impl Into<String>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn ip_hash(mut self, hash: impl Into<String>) -> Self {
        self.ip_hash = Some(hash.into());
        self
    }

    pub fn user_agent_category(mut self, category: UserAgentCategory) -> Self {
        self.user_agent_category = Some(category);
        self
    }

    /// Missing identifiers are generated; other missing fields get neutral defaults.
    pub fn build(self) -> RequestContext {
        RequestContext {
            request_id: self
                .request_id
                .unwrap_or_else(super::identity::generate_request_id),
            trace_id: self
                .trace_id
                .unwrap_or_else(super::identity::generate_trace_id),
            route: self.route.unwrap_or_else(|| "/".to_string()),
            method: self.method.unwrap_or_else(|| "GET".to_string()),
            ip_hash: self
                .ip_hash
                .unwrap_or_else(|| hash_ip(super::ip::UNKNOWN_IP)),
            user_agent_category: self
                .user_agent_category
                .unwrap_or(UserAgentCategory::Desktop),
            start_time: Instant::now(),
        }
    }
}

/// What the pipeline exposes to downstream handlers.
#[derive(Clone)]
pub struct RequestScope {
    context: RequestContext,
    logger: Arc<dyn RequestLog>,
}

impl RequestScope {
    pub fn new(context: RequestContext, logger: Arc<dyn RequestLog>) -> Self {
        Self { context, logger }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn logger(&self) -> &dyn RequestLog {
        self.logger.as_ref()
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for RequestScope {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestScope>()
            .cloned()
            .ok_or((StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::body::Body;

    use super::*;
    use crate::logging::NoopRequestLogger;

    #[test]
    fn test_context_from_live_request() {
        let req = Request::builder()
            .method("POST")
            .uri("/contact?ref=home")
            .header("user-agent", "Mozilla/5.0 (iPhone) Mobile Safari")
            .header("x-forwarded-for", "1.2.3.4")
            .header("x-request-id", "req-abc")
            .header(
                "traceparent",
                "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
            )
            .body(Body::empty())
            .unwrap();

        let ctx = RequestContext::from_request(&req, &TrustedProxyConfig::default());

        assert_eq!(ctx.request_id(), "req-abc");
        assert_eq!(ctx.trace_id(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ctx.route(), "/contact");
        assert_eq!(ctx.method(), "POST");
        assert_eq!(ctx.ip_hash(), hash_ip("1.2.3.4"));
        assert_eq!(ctx.user_agent_category(), UserAgentCategory::Mobile);
    }

    #[test]
    fn test_context_never_holds_raw_ip() {
        let req = Request::builder()
            .uri("/")
            .header("x-real-ip", "10.20.30.40")
            .body(Body::empty())
            .unwrap();

        let ctx = RequestContext::from_request(&req, &TrustedProxyConfig::default());
        assert!(!format!("{ctx:?}").contains("10.20.30.40"));
    }

    #[test]
    fn test_prerender_uses_build_sentinels() {
        let mut req = Request::builder()
            .uri("/about")
            .header("user-agent", "Googlebot")
            .header("x-forwarded-for", "1.2.3.4")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(Prerender);

        let ctx = RequestContext::from_request(&req, &TrustedProxyConfig::default());

        assert_eq!(ctx.ip_hash(), hash_ip(BUILD_SENTINEL));
        assert_eq!(ctx.user_agent_category(), UserAgentCategory::Desktop);
    }

    #[test]
    fn test_missing_headers_get_generated_identifiers() {
        let req = Request::builder().uri("/").body(Body::empty()).unwrap();
        let ctx = RequestContext::from_request(&req, &TrustedProxyConfig::default());

        assert_eq!(ctx.trace_id().len(), 32);
        assert!(uuid::Uuid::parse_str(ctx.request_id()).is_ok());
        assert_eq!(ctx.ip_hash(), hash_ip("unknown"));
        assert_eq!(ctx.user_agent_category(), UserAgentCategory::Desktop);
    }

    #[test]
    fn test_tags_cover_identity_fields() {
        let ctx = RequestContext::builder()
            .request_id("r")
            .trace_id("t")
            .route("/blog")
            .user_agent_category(UserAgentCategory::Bot)
            .build();

        let tags = ctx.tags();
        assert!(tags.contains(&("request_id", "r")));
        assert!(tags.contains(&("route", "/blog")));
        assert!(tags.contains(&("user_agent_category", "bot")));
    }

    #[tokio::test]
    async fn test_scope_extractor() {
        let scope = RequestScope::new(
            RequestContext::builder().request_id("r-1").build(),
            Arc::new(NoopRequestLogger),
        );
        let mut req = Request::builder().body(()).unwrap();
        req.extensions_mut().insert(scope);
        let (mut parts, _) = req.into_parts();

        let extracted = RequestScope::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(extracted.context().request_id(), "r-1");
    }

    #[tokio::test]
    async fn test_scope_extractor_rejects_without_pipeline() {
        let (mut parts, _) = Request::builder().body(()).unwrap().into_parts();

        let rejection = RequestScope::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(rejection.0, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
