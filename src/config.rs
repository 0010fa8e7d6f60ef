//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Request Pipeline
//!
//! - `RATE_LIMIT_MAX_REQUESTS`: Requests per window before a key counts as limited (default: 100)
//! - `RATE_LIMIT_WINDOW_MS`: Fixed window length in milliseconds (default: 60000)
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: Expired-entry sweep interval (default: 300, 0 = off)
//! - `TRUSTED_PROXIES`: CIDR ranges whose forwarding headers are believed
//!
//! # Security Headers
//!
//! - `CSP_FEEDBACK_ORIGIN`: Origin of the live-feedback toolbar allowed by the CSP
//! - `CSP_EMBED_ORIGIN`: Origin allowed to be framed (video embeds)
//!
//! # Error Reporting
//!
//! - `SENTRY_DSN`: When set, reports go to Sentry; otherwise they are logged
//! - `ERROR_REPORT_FLUSH_TIMEOUT_MS`: Upper bound for flushing reports on shutdown

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Output format for process logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable, one line per event.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown log format '{other}' (expected pretty or json)"
            )),
        }
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 4321)
    pub port: u16,

    /// Directory holding the built site served behind the pipeline (default: "dist")
    pub site_root: PathBuf,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests a single (ip hash, route) key may make per window before it
    /// counts as rate limited (default: 100)
    pub rate_limit_max_requests: u32,

    /// Fixed window length (default: 60 seconds)
    pub rate_limit_window: Duration,

    /// How often expired rate-limit entries are swept (default: 5 minutes).
    /// Zero disables the sweep task.
    pub rate_limit_sweep_interval: Duration,

    /// Trusted proxy CIDR ranges. Forwarding headers are only believed when
    /// the socket peer falls inside one of these networks.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (trust all forwarding headers)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Security Header Configuration
    // =========================================================================
    /// Origin of the live-feedback/preview toolbar permitted by the CSP
    pub csp_feedback_origin: String,

    /// Origin permitted inside frames (embedded video)
    pub csp_embed_origin: String,

    // =========================================================================
    // Error Reporting Configuration
    // =========================================================================
    /// Sentry DSN (optional - when unset, reports are written to the log)
    pub sentry_dsn: Option<String>,

    /// Deployment environment name attached to reports (default: "development")
    pub environment: String,

    /// Upper bound on how long shutdown waits for queued reports
    pub error_report_flush_timeout: Duration,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Log output format (default: pretty)
    pub log_format: LogFormat,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or the
    /// resulting configuration is inconsistent.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let defaults = Self::default();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or(defaults.host),
            port: Self::parse_env("PORT", defaults.port)?,
            site_root: env::var("SITE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.site_root),

            // Rate limiting
            rate_limit_max_requests: Self::parse_env(
                "RATE_LIMIT_MAX_REQUESTS",
                defaults.rate_limit_max_requests,
            )?,
            rate_limit_window: Duration::from_millis(Self::parse_env(
                "RATE_LIMIT_WINDOW_MS",
                60_000,
            )?),
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                300,
            )?),
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES"),

            // Security headers
            csp_feedback_origin: env::var("CSP_FEEDBACK_ORIGIN")
                .unwrap_or(defaults.csp_feedback_origin),
            csp_embed_origin: env::var("CSP_EMBED_ORIGIN").unwrap_or(defaults.csp_embed_origin),

            // Error reporting
            sentry_dsn: env::var("SENTRY_DSN").ok().filter(|d| !d.trim().is_empty()),
            environment: env::var("APP_ENV").unwrap_or(defaults.environment),
            error_report_flush_timeout: Duration::from_millis(Self::parse_env(
                "ERROR_REPORT_FLUSH_TIMEOUT_MS",
                2_000,
            )?),

            // Observability
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format: Self::parse_env("LOG_FORMAT", defaults.log_format)?,
            metrics_port: Self::parse_env("METRICS_PORT", defaults.metrics_port)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limit_max_requests == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_MAX_REQUESTS must be greater than 0".to_string(),
            ));
        }

        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_MS must be greater than 0".to_string(),
            ));
        }

        // Origins are spliced into the CSP verbatim.
        for (name, origin) in [
            ("CSP_FEEDBACK_ORIGIN", &self.csp_feedback_origin),
            ("CSP_EMBED_ORIGIN", &self.csp_embed_origin),
        ] {
            if origin.is_empty()
                || origin
                    .chars()
                    .any(|c| c.is_whitespace() || c == ';' || c == ',' || c.is_control())
            {
                return Err(AppError::ConfigError(format!(
                    "{name} must be a single origin without whitespace, ';' or ',' (got {origin:?})"
                )));
            }
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if the periodic rate-limit sweep is enabled.
    pub fn sweep_enabled(&self) -> bool {
        !self.rate_limit_sweep_interval.is_zero()
    }

    /// Check if trusted proxy validation is enabled.
    pub fn proxy_validation_enabled(&self) -> bool {
        !self.trusted_proxies.is_empty()
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping empty entries.
    fn parse_list(name: &str) -> Vec<String> {
        env::var(name)
            .ok()
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 4321,
            site_root: PathBuf::from("dist"),
            // Rate limiting
            rate_limit_max_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_sweep_interval: Duration::from_secs(300),
            trusted_proxies: vec![],
            // Security headers
            csp_feedback_origin: "https://vercel.live".to_string(),
            csp_embed_origin: "https://www.youtube-nocookie.com".to_string(),
            // Error reporting
            sentry_dsn: None,
            environment: "development".to_string(),
            error_report_flush_timeout: Duration::from_secs(2),
            // Observability
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 4321);
        assert_eq!(config.rate_limit_max_requests, 100);
        assert_eq!(config.rate_limit_window, Duration::from_millis(60_000));
        assert!(config.sentry_dsn.is_none());
        assert!(config.sweep_enabled());
        assert!(!config.proxy_validation_enabled());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_metrics_addr_disabled_on_zero_port() {
        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());

        let config = Config::default();
        assert_eq!(config.metrics_addr().unwrap().port(), 9090);
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_max_requests() {
        let config = Config {
            rate_limit_max_requests: 0,
            ..Config::default()
        };

        let result = config.validate();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("RATE_LIMIT_MAX_REQUESTS")
        );
    }

    #[test]
    fn test_validate_zero_window() {
        let config = Config {
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("RATE_LIMIT_WINDOW_MS")
        );
    }

    #[test]
    fn test_validate_rejects_origin_that_would_break_csp() {
        let config = Config {
            csp_embed_origin: "https://a.example; script-src *".to_string(),
            ..Config::default()
        };

        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("CSP_EMBED_ORIGIN")
        );
    }

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" Pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
