//! Worker configuration.

use std::time::Duration;

use vguard_notify::MAX_SUBSCRIBER_BUFFER;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Simulated duration of each checkpoint stage
    pub stage_delay: Duration,
    /// A runner with no stage completion for this long is considered stalled
    pub watchdog_interval: Duration,
    /// How often the watchdog sweeps
    pub watchdog_tick: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Undelivered events buffered per subscriber before the oldest is dropped
    pub subscriber_buffer: usize,
    /// Simulated classifier flags media when its sample exceeds this value
    pub flag_threshold: f64,
    /// Run the stale job watchdog
    pub stale_detection_enabled: bool,
    /// Expose Prometheus metrics
    pub metrics_enabled: bool,
    pub metrics_port: u16,
    /// Simulated uploads submitted at startup (0 disables the demo)
    pub demo_jobs: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stage_delay: Duration::from_millis(1000),
            watchdog_interval: Duration::from_secs(300), // 5 minutes
            watchdog_tick: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
            subscriber_buffer: 32,
            flag_threshold: 0.7,
            stale_detection_enabled: true,
            metrics_enabled: true,
            metrics_port: 9100,
            demo_jobs: 0,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            stage_delay: Duration::from_millis(
                std::env::var("VGUARD_STAGE_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            watchdog_interval: Duration::from_secs(
                std::env::var("VGUARD_WATCHDOG_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
            watchdog_tick: Duration::from_secs(
                std::env::var("VGUARD_WATCHDOG_TICK_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(30),
            ),
            shutdown_timeout: Duration::from_secs(
                std::env::var("VGUARD_SHUTDOWN_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            subscriber_buffer: std::env::var("VGUARD_SUBSCRIBER_BUFFER")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|n: usize| n.clamp(1, MAX_SUBSCRIBER_BUFFER))
                .unwrap_or(defaults.subscriber_buffer),
            flag_threshold: std::env::var("VGUARD_FLAG_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|t: &f64| (0.0..=1.0).contains(t))
                .unwrap_or(defaults.flag_threshold),
            stale_detection_enabled: std::env::var("ENABLE_STALE_DETECTION")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.metrics_port),
            demo_jobs: std::env::var("VGUARD_DEMO_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_pipeline() {
        let config = WorkerConfig::default();
        assert_eq!(config.stage_delay, Duration::from_secs(1));
        assert_eq!(config.watchdog_interval, Duration::from_secs(300));
        assert_eq!(config.subscriber_buffer, 32);
        assert!((config.flag_threshold - 0.7).abs() < f64::EPSILON);
        assert!(config.stale_detection_enabled);
        assert_eq!(config.demo_jobs, 0);
    }

    #[test]
    fn test_env_subscriber_buffer_is_capped() {
        std::env::set_var("VGUARD_SUBSCRIBER_BUFFER", "18446744073709551615");
        let config = WorkerConfig::from_env();
        std::env::remove_var("VGUARD_SUBSCRIBER_BUFFER");
        assert_eq!(config.subscriber_buffer, MAX_SUBSCRIBER_BUFFER);
    }
}
