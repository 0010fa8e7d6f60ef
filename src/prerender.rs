//! Build-time prerendering through the live router.
//!
//! Each path is sent through the full router, pipeline included, as a `GET`
//! carrying the [`Prerender`] marker, so request contexts use the `"build"`
//! sentinels instead of client data. Successful bodies are written under the
//! output directory:
//!
//! | Path | File |
//! |------|------|
//! | `/` | `index.html` |
//! | `/about` | `about/index.html` |
//! | `/blog/` | `blog/index.html` |
//! | `/feed.xml` | `feed.xml` |

use std::path::{Path, PathBuf};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request};
use tower::ServiceExt;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::middleware::Prerender;

/// One page written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub path: String,
    pub file: PathBuf,
    pub bytes: usize,
}

/// A path that did not produce a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPage {
    pub path: String,
    pub reason: String,
}

/// Outcome of a prerender run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrerenderSummary {
    pub rendered: Vec<RenderedPage>,
    pub failed: Vec<FailedPage>,
}

impl PrerenderSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Render `paths` through `router` into `out_dir`.
///
/// Per-path failures (non-2xx status, unreadable body) are collected in the
/// summary; the run continues with the next path.
///
/// # Errors
///
/// Returns `AppError::Prerender` for a path that is not absolute or contains
/// a `..` segment (checked for every path before anything is rendered), and
/// `AppError::Io` if the output cannot be written.
pub async fn prerender(
    router: Router,
    paths: &[String],
    out_dir: &Path,
) -> AppResult<PrerenderSummary> {
    let targets = paths
        .iter()
        .map(|path| output_file(out_dir, path).map(|file| (path.as_str(), file)))
        .collect::<AppResult<Vec<_>>>()?;

    let mut summary = PrerenderSummary::default();

    for (path, file) in targets {
        let mut req = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .map_err(|e| AppError::Prerender(format!("Invalid path {path}: {e}")))?;
        req.extensions_mut().insert(Prerender);

        let response = match router.clone().oneshot(req).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        let status = response.status();
        if !status.is_success() {
            warn!(path, status = status.as_u16(), "Prerender skipped page");
            summary.failed.push(FailedPage {
                path: path.to_string(),
                reason: format!("status {}", status.as_u16()),
            });
            continue;
        }

        let body = match axum::body::to_bytes(response.into_body(), usize::MAX).await {
            Ok(body) => body,
            Err(e) => {
                warn!(path, error = %e, "Prerender could not read body");
                summary.failed.push(FailedPage {
                    path: path.to_string(),
                    reason: e.to_string(),
                });
                continue;
            }
        };

        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&file, &body).await?;

        info!(path, file = %file.display(), bytes = body.len(), "Prerendered page");
        summary.rendered.push(RenderedPage {
            path: path.to_string(),
            file,
            bytes: body.len(),
        });
    }

    Ok(summary)
}

/// File a path renders to, relative to `out_dir`.
///
/// # Errors
///
/// Returns `AppError::Prerender` for relative paths and `..` segments.
pub fn output_file(out_dir: &Path, path: &str) -> AppResult<PathBuf> {
    let Some(relative) = path.strip_prefix('/') else {
        return Err(AppError::Prerender(format!(
            "Path must start with '/': {path}"
        )));
    };

    let relative = relative.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();

    if segments.iter().any(|s| *s == ".." || *s == ".") {
        return Err(AppError::Prerender(format!(
            "Path escapes output directory: {path}"
        )));
    }

    let mut file = out_dir.to_path_buf();
    file.extend(&segments);

    let has_extension = !relative.ends_with('/')
        && segments
            .last()
            .is_some_and(|last| Path::new(last).extension().is_some());

    if !has_extension {
        file.push("index.html");
    }

    Ok(file)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use axum::extract::Request as AxumRequest;
    use axum::http::StatusCode;
    use axum::routing::get;

    use super::*;

    #[test]
    fn test_output_file_mapping() {
        let out = Path::new("dist");

        assert_eq!(output_file(out, "/").unwrap(), out.join("index.html"));
        assert_eq!(
            output_file(out, "/about").unwrap(),
            out.join("about").join("index.html")
        );
        assert_eq!(
            output_file(out, "/blog/").unwrap(),
            out.join("blog").join("index.html")
        );
        assert_eq!(output_file(out, "/feed.xml").unwrap(), out.join("feed.xml"));
        assert_eq!(
            output_file(out, "/blog/post?draft=1").unwrap(),
            out.join("blog").join("post").join("index.html")
        );
    }

    #[test]
    fn test_output_file_rejects_traversal() {
        let out = Path::new("dist");

        assert!(output_file(out, "/../etc/passwd").is_err());
        assert!(output_file(out, "/blog/../../x").is_err());
        assert!(output_file(out, "about").is_err());
    }

    #[tokio::test]
    async fn test_prerender_writes_pages_and_marks_requests() {
        let router = Router::new()
            .route(
                "/",
                get(|req: AxumRequest| async move {
                    if req.extensions().get::<Prerender>().is_some() {
                        "<h1>home</h1>"
                    } else {
                        "live"
                    }
                }),
            )
            .route("/gone", get(|| async { StatusCode::GONE }));
        let out = tempfile::tempdir().unwrap();

        let summary = prerender(router, &["/".to_string(), "/gone".to_string()], out.path())
            .await
            .unwrap();

        assert_eq!(summary.rendered.len(), 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].reason, "status 410");
        assert!(!summary.is_success());

        let html = std::fs::read_to_string(out.path().join("index.html")).unwrap();
        assert_eq!(html, "<h1>home</h1>");
    }

    #[tokio::test]
    async fn test_prerender_validates_before_rendering() {
        let out = tempfile::tempdir().unwrap();
        let result = prerender(
            Router::new(),
            &["/ok".to_string(), "/../x".to_string()],
            out.path(),
        )
        .await;

        assert!(matches!(result, Err(AppError::Prerender(_))));
        assert!(!out.path().join("ok").exists());
    }
}
