use thiserror::Error;

/// Application-wide error types.
///
/// Request-path failures never surface through this type: the request
/// pipeline converts handler failures into a generic 500 itself. `AppError`
/// covers startup, configuration and prerender tooling.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Prerender failed: {0}")]
    Prerender(String),
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
