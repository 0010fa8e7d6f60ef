//! Security headers stamped onto every response.
//!
//! Values are built once at startup; stamping a response only clones
//! pre-validated `HeaderValue`s. Downstream values for the same headers are
//! overwritten.

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

use crate::error::{AppError, AppResult};

static XFO: HeaderValue = HeaderValue::from_static("DENY");
static XCTO: HeaderValue = HeaderValue::from_static("nosniff");
static REFERRER: HeaderValue = HeaderValue::from_static("strict-origin-when-cross-origin");
static HSTS: HeaderValue = HeaderValue::from_static("max-age=63072000; includeSubDomains; preload");
static PERMISSIONS: HeaderValue =
    HeaderValue::from_static("geolocation=(), microphone=(), camera=(), interest-cohort=()");
static COOP: HeaderValue = HeaderValue::from_static("same-origin-allow-popups");
static COEP: HeaderValue = HeaderValue::from_static("unsafe-none");
static CORP: HeaderValue = HeaderValue::from_static("cross-origin");
static HTML_CACHE_CONTROL: HeaderValue =
    HeaderValue::from_static("public, max-age=0, s-maxage=600, stale-while-revalidate=86400");

static PERMISSIONS_POLICY: HeaderName = HeaderName::from_static("permissions-policy");
static COOP_NAME: HeaderName = HeaderName::from_static("cross-origin-opener-policy");
static COEP_NAME: HeaderName = HeaderName::from_static("cross-origin-embedder-policy");
static CORP_NAME: HeaderName = HeaderName::from_static("cross-origin-resource-policy");

/// External origins the content security policy admits.
#[derive(Debug, Clone)]
pub struct CspSources {
    /// Live-feedback / preview toolbar origin (scripts, connections, frames).
    pub feedback_origin: String,
    /// Embedded media origin (frames only).
    pub embed_origin: String,
}

impl CspSources {
    /// Join the directive list into a single policy string.
    pub fn policy(&self) -> String {
        let feedback = &self.feedback_origin;
        let embed = &self.embed_origin;

        [
            "default-src 'self'".to_string(),
            format!("script-src 'self' {feedback}"),
            "style-src 'self' 'unsafe-inline'".to_string(),
            "img-src 'self' data: https:".to_string(),
            "font-src 'self'".to_string(),
            format!("connect-src 'self' {feedback}"),
            format!("frame-src {embed} {feedback}"),
            "frame-ancestors 'none'".to_string(),
            "object-src 'none'".to_string(),
            "base-uri 'self'".to_string(),
            "form-action 'self'".to_string(),
            "upgrade-insecure-requests".to_string(),
        ]
        .join("; ")
    }
}

/// Precomputed header set.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    csp: HeaderValue,
}

impl SecurityHeaders {
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the assembled CSP is not a valid header value.
    pub fn new(sources: &CspSources) -> AppResult<Self> {
        let csp = HeaderValue::from_str(&sources.policy())
            .map_err(|e| AppError::ConfigError(format!("Invalid Content-Security-Policy: {e}")))?;
        Ok(Self { csp })
    }

    /// Insert the fixed security headers, plus HTML cache control for `path`.
    pub fn apply(&self, headers: &mut HeaderMap, path: &str) {
        headers.insert(header::CONTENT_SECURITY_POLICY, self.csp.clone());
        headers.insert(header::X_FRAME_OPTIONS, XFO.clone());
        headers.insert(header::X_CONTENT_TYPE_OPTIONS, XCTO.clone());
        headers.insert(header::REFERRER_POLICY, REFERRER.clone());
        headers.insert(header::STRICT_TRANSPORT_SECURITY, HSTS.clone());
        headers.insert(PERMISSIONS_POLICY.clone(), PERMISSIONS.clone());
        headers.insert(COOP_NAME.clone(), COOP.clone());
        headers.insert(COEP_NAME.clone(), COEP.clone());
        headers.insert(CORP_NAME.clone(), CORP.clone());

        if is_html_path(path) {
            headers.insert(header::CACHE_CONTROL, HTML_CACHE_CONTROL.clone());
        }
    }
}

/// Paths whose responses get the edge-cache policy: the root and `*.html`.
pub fn is_html_path(path: &str) -> bool {
    path == "/" || path.ends_with(".html")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn sources() -> CspSources {
        CspSources {
            feedback_origin: "https://vercel.live".to_string(),
            embed_origin: "https://www.youtube-nocookie.com".to_string(),
        }
    }

    #[test]
    fn test_policy_contains_required_directives() {
        let policy = sources().policy();

        assert!(policy.starts_with("default-src 'self'"));
        assert!(policy.contains("script-src 'self' https://vercel.live"));
        assert!(policy.contains("frame-src https://www.youtube-nocookie.com https://vercel.live"));
        assert!(policy.contains("frame-ancestors 'none'"));
        assert!(policy.contains("object-src 'none'"));
        assert!(policy.ends_with("upgrade-insecure-requests"));
    }

    #[test]
    fn test_apply_sets_fixed_headers() {
        let headers_set = SecurityHeaders::new(&sources()).unwrap();
        let mut headers = HeaderMap::new();
        headers_set.apply(&mut headers, "/favicon.svg");

        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(
            headers["referrer-policy"],
            "strict-origin-when-cross-origin"
        );
        assert_eq!(
            headers["strict-transport-security"],
            "max-age=63072000; includeSubDomains; preload"
        );
        assert_eq!(
            headers["permissions-policy"],
            "geolocation=(), microphone=(), camera=(), interest-cohort=()"
        );
        assert_eq!(
            headers["cross-origin-opener-policy"],
            "same-origin-allow-popups"
        );
        assert_eq!(headers["cross-origin-embedder-policy"], "unsafe-none");
        assert_eq!(headers["cross-origin-resource-policy"], "cross-origin");
        assert!(headers.contains_key("content-security-policy"));
        assert!(!headers.contains_key("cache-control"));
    }

    #[test]
    fn test_apply_overwrites_downstream_values() {
        let headers_set = SecurityHeaders::new(&sources()).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-frame-options", HeaderValue::from_static("SAMEORIGIN"));

        headers_set.apply(&mut headers, "/");

        assert_eq!(headers.get_all("x-frame-options").iter().count(), 1);
        assert_eq!(headers["x-frame-options"], "DENY");
    }

    #[test]
    fn test_cache_control_only_for_html_paths() {
        assert!(is_html_path("/"));
        assert!(is_html_path("/blog/post.html"));
        assert!(!is_html_path("/blog"));
        assert!(!is_html_path("/styles.css"));

        let headers_set = SecurityHeaders::new(&sources()).unwrap();
        let mut headers = HeaderMap::new();
        headers_set.apply(&mut headers, "/index.html");
        assert_eq!(
            headers["cache-control"],
            "public, max-age=0, s-maxage=600, stale-while-revalidate=86400"
        );
    }

    #[test]
    fn test_invalid_origin_rejected() {
        let bad = CspSources {
            feedback_origin: "https://a\nb".to_string(),
            embed_origin: "https://b".to_string(),
        };
        assert!(SecurityHeaders::new(&bad).is_err());
    }
}
