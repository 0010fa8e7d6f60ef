//! Shared application state for Axum handlers and the request pipeline.
//!
//! This module provides thread-safe, clonable state that is shared across
//! all request handlers. It includes:
//!
//! - **Configuration**: Runtime configuration access
//! - **Rate Limiter**: The process-wide fixed-window table
//! - **Error Reporter**: Policy plus the configured sink
//!
//! # Structured Concurrency
//!
//! Background tasks are managed using `tokio_util::task::TaskTracker` and
//! `CancellationToken` for proper lifecycle management. Call `shutdown()`
//! to gracefully stop all background tasks before application exit.

use std::sync::Arc;
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::metrics;
use crate::middleware::RateLimiter;
use crate::reporting::{ErrorReporter, ErrorSink, SentrySink, TracingSink};

/// Shared application state.
///
/// Cloned for each handler; all internal data is behind `Arc`.
///
/// # Lifecycle
///
/// The rate-limit sweep task is spawned when the state is created. Call
/// `shutdown()` before dropping to stop it and flush queued error reports:
///
/// ```rust,ignore
/// let state = AppState::new(config);
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Fixed-window limiter shared by every pipeline instance
    pub limiter: Arc<RateLimiter>,
    /// Error reporter (Sentry when configured, log otherwise)
    pub reporter: ErrorReporter,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create state with the sink selected by `SENTRY_DSN`.
    ///
    /// Must be called inside a Tokio runtime when the sweep is enabled.
    pub fn new(config: Config) -> Self {
        let sink = select_sink(&config);
        Self::with_sink(config, sink)
    }

    /// Create state with an explicit error sink.
    pub fn with_sink(config: Config, sink: Arc<dyn ErrorSink>) -> Self {
        let reporter = ErrorReporter::new(sink, config.error_report_flush_timeout);

        let state = Self {
            config: Arc::new(config),
            limiter: Arc::new(RateLimiter::new()),
            reporter,
            started_at: Instant::now(),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        if state.config.sweep_enabled() {
            state.spawn_rate_limit_sweep_task();
        } else {
            info!("Rate-limit sweep disabled (RATE_LIMIT_SWEEP_INTERVAL_SECS=0)");
        }

        state
    }

    /// Spawn the background task that drops expired rate-limit entries.
    ///
    /// Only the limiter handle is moved into the task, not the whole state.
    fn spawn_rate_limit_sweep_task(&self) {
        let limiter = self.limiter.clone();
        let period = self.config.rate_limit_sweep_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased; // Check cancellation first

                    _ = cancel.cancelled() => {
                        debug!("Rate-limit sweep task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = limiter.sweep_expired(Instant::now());
                        let remaining = limiter.len();
                        metrics::set_rate_limit_keys(remaining);
                        trace!(removed, remaining, "Rate-limit sweep completed");
                    }
                }
            }

            debug!("Rate-limit sweep task shutting down");
        });
    }

    /// Gracefully shutdown background tasks and flush error reports.
    ///
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    /// 4. Flushes the error reporter, bounded by its timeout
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");

        let reporter = self.reporter.clone();
        match tokio::task::spawn_blocking(move || reporter.flush()).await {
            Ok(true) => debug!("Error reports flushed"),
            Ok(false) => warn!("Error report flush timed out; queued reports may be lost"),
            Err(e) => warn!(error = %e, "Error report flush task failed"),
        }
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

fn select_sink(config: &Config) -> Arc<dyn ErrorSink> {
    if let Some(dsn) = config.sentry_dsn.as_deref() {
        if let Some(sink) = SentrySink::init(dsn, &config.environment) {
            info!(environment = %config.environment, "Error reports go to Sentry");
            return Arc::new(sink);
        }
        warn!("SENTRY_DSN could not be used; error reports go to the log");
    } else {
        info!("SENTRY_DSN not set; error reports go to the log");
    }
    Arc::new(TracingSink)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_state_without_sentry_uses_log_sink() {
        let state = AppState::new(Config::default());
        assert!(state.limiter.is_empty());
        assert_eq!(state.uptime_seconds(), 0);
        state.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_drops_expired_entries() {
        let config = Config {
            rate_limit_sweep_interval: Duration::from_secs(1),
            ..Config::default()
        };
        let state = AppState::with_sink(config, Arc::new(TracingSink));

        let past = Instant::now()
            .checked_sub(Duration::from_secs(120))
            .expect("clock has enough history");
        state
            .limiter
            .is_rate_limited_at("hash:/", 100, Duration::from_secs(60), past);
        assert_eq!(state.limiter.len(), 1);

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(state.limiter.is_empty());

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_disabled_with_zero_interval() {
        let config = Config {
            rate_limit_sweep_interval: Duration::ZERO,
            ..Config::default()
        };
        let state = AppState::with_sink(config, Arc::new(TracingSink));
        state.shutdown().await;
    }
}
