//! Process configuration loaded from the environment.
//!
//! Every value has a default matching the production deployment; environment
//! variables override them. Invalid values are logged and ignored.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use queue_source::SimulatedFeedConfig;
use tracing::warn;

use crate::acquisition::BackoffPolicy;
use crate::api::server::ApiServerConfig;

pub const DEFAULT_STREAM_URL: &str =
    "https://elands.dol.go.th/QueueOnlineServer/service/queue_stream/294";
pub const DEFAULT_PAGE_URL: &str = "https://elands.dol.go.th/QueueOnlineServer/queue/294";

/// Smallest timer period accepted; tokio intervals reject zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Everything the failover controller needs.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    pub stream_url: String,
    pub page_url: String,
    /// Consecutive stream failures before falling back to scraping.
    pub stream_retry_budget: u32,
    /// Consecutive scrape failures before falling back to simulation.
    pub scrape_retry_budget: u32,
    pub backoff: BackoffPolicy,
    pub connect_timeout: Duration,
    /// Silence tolerated on an open stream before it counts as stalled.
    pub stall_window: Duration,
    pub scrape_timeout: Duration,
    pub poll_interval: Duration,
    /// Period of background stream probes while scraping or simulating.
    pub probe_interval: Duration,
    pub accept_invalid_certs: bool,
    pub simulation: SimulatedFeedConfig,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            page_url: DEFAULT_PAGE_URL.to_string(),
            stream_retry_budget: 5,
            scrape_retry_budget: 3,
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(20),
            stall_window: Duration::from_secs(30),
            scrape_timeout: Duration::from_secs(15),
            poll_interval: Duration::from_secs(20),
            probe_interval: Duration::from_secs(60),
            accept_invalid_certs: false,
            simulation: SimulatedFeedConfig::default(),
        }
    }
}

impl AcquisitionConfig {
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let env = Env(lookup);
        let mut config = Self::default();

        if let Some(url) = env.string("QUEUE_STREAM_URL") {
            config.stream_url = url;
        }
        if let Some(url) = env.string("QUEUE_PAGE_URL") {
            config.page_url = url;
        }
        if let Some(budget) = env.parse("STREAM_RETRY_BUDGET") {
            config.stream_retry_budget = budget;
        }
        if let Some(budget) = env.parse("SCRAPE_RETRY_BUDGET") {
            config.scrape_retry_budget = budget;
        }
        if let Some(ms) = env.parse("BACKOFF_INITIAL_MS") {
            config.backoff.initial_delay_ms = ms;
        }
        if let Some(ms) = env.parse("BACKOFF_MAX_MS") {
            config.backoff.max_delay_ms = ms;
        }
        if let Some(timeout) = env.secs("STREAM_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = timeout;
        }
        if let Some(window) = env.secs("STREAM_STALL_WINDOW_SECS") {
            config.stall_window = window;
        }
        if let Some(timeout) = env.secs("SCRAPE_TIMEOUT_SECS") {
            config.scrape_timeout = timeout;
        }
        if let Some(interval) = env.secs("SCRAPE_POLL_INTERVAL_SECS") {
            config.poll_interval = interval;
        }
        if let Some(interval) = env.secs("SIMULATION_TICK_SECS") {
            config.simulation.tick_interval = interval;
        }
        if let Some(interval) = env.secs("RECONNECT_PROBE_INTERVAL_SECS") {
            config.probe_interval = interval;
        }
        if let Some(accept) = env.flag("UPSTREAM_ACCEPT_INVALID_CERTS") {
            config.accept_invalid_certs = accept;
        }

        config.normalized()
    }

    /// Clamp budgets to at least one attempt and timers to a non-zero period.
    pub fn normalized(mut self) -> Self {
        self.stream_retry_budget = self.stream_retry_budget.max(1);
        self.scrape_retry_budget = self.scrape_retry_budget.max(1);
        self.backoff.max_delay_ms = self.backoff.max_delay_ms.max(self.backoff.initial_delay_ms);
        for period in [
            &mut self.connect_timeout,
            &mut self.stall_window,
            &mut self.scrape_timeout,
            &mut self.poll_interval,
            &mut self.probe_interval,
            &mut self.simulation.tick_interval,
        ] {
            *period = (*period).max(MIN_PERIOD);
        }
        self
    }

    /// Upper bound for one manual retry: a connect attempt plus one scrape.
    pub fn manual_retry_timeout(&self) -> Duration {
        self.connect_timeout + self.scrape_timeout + Duration::from_secs(5)
    }
}

/// Top-level configuration for the binary.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub api: ApiServerConfig,
    pub acquisition: AcquisitionConfig,
    /// Enables daily-rotated file logging when set.
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            api: ApiServerConfig::from_lookup(lookup),
            acquisition: AcquisitionConfig::from_lookup(lookup),
            log_dir: Self::log_dir_from_lookup(lookup),
        }
    }

    /// `LOG_DIR` alone, for initializing logging before the rest of the
    /// configuration is parsed and validated.
    pub fn log_dir_from_env() -> Option<PathBuf> {
        Self::log_dir_from_lookup(&|key| std::env::var(key).ok())
    }

    pub fn log_dir_from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Option<PathBuf> {
        Env(lookup).string("LOG_DIR").map(PathBuf::from)
    }
}

/// Typed accessors over a variable lookup.
pub(crate) struct Env<'a>(pub(crate) &'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    pub(crate) fn string(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub(crate) fn parse<T>(&self, key: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let raw = self.string(key)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, value = %raw, error = %e, "Ignoring invalid configuration value");
                None
            }
        }
    }

    fn secs(&self, key: &str) -> Option<Duration> {
        match self.parse::<u64>(key)? {
            0 => {
                warn!(key, "Ignoring zero duration");
                None
            }
            secs => Some(Duration::from_secs(secs)),
        }
    }

    fn flag(&self, key: &str) -> Option<bool> {
        let raw = self.string(key)?;
        match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                warn!(key, value = %raw, "Ignoring invalid boolean");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AcquisitionConfig::from_lookup(&lookup(&[]));
        assert_eq!(config.stream_url, DEFAULT_STREAM_URL);
        assert_eq!(config.page_url, DEFAULT_PAGE_URL);
        assert_eq!(config.stream_retry_budget, 5);
        assert_eq!(config.scrape_retry_budget, 3);
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.stall_window, Duration::from_secs(30));
        assert_eq!(config.scrape_timeout, Duration::from_secs(15));
        assert_eq!(config.poll_interval, Duration::from_secs(20));
        assert_eq!(config.probe_interval, Duration::from_secs(60));
        assert_eq!(config.simulation.tick_interval, Duration::from_secs(30));
        assert!(!config.accept_invalid_certs);
    }

    #[test]
    fn test_overrides() {
        let config = AcquisitionConfig::from_lookup(&lookup(&[
            ("QUEUE_STREAM_URL", " http://localhost:9000/stream "),
            ("STREAM_RETRY_BUDGET", "3"),
            ("SCRAPE_POLL_INTERVAL_SECS", "5"),
            ("BACKOFF_INITIAL_MS", "100"),
            ("UPSTREAM_ACCEPT_INVALID_CERTS", "yes"),
        ]));
        assert_eq!(config.stream_url, "http://localhost:9000/stream");
        assert_eq!(config.stream_retry_budget, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.backoff.initial_delay_ms, 100);
        assert!(config.accept_invalid_certs);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = AcquisitionConfig::from_lookup(&lookup(&[
            ("STREAM_RETRY_BUDGET", "many"),
            ("SCRAPE_TIMEOUT_SECS", "0"),
            ("UPSTREAM_ACCEPT_INVALID_CERTS", "maybe"),
        ]));
        assert_eq!(config.stream_retry_budget, 5);
        assert_eq!(config.scrape_timeout, Duration::from_secs(15));
        assert!(!config.accept_invalid_certs);
    }

    #[test]
    fn test_budgets_clamped_to_one() {
        let config = AcquisitionConfig::from_lookup(&lookup(&[
            ("STREAM_RETRY_BUDGET", "0"),
            ("SCRAPE_RETRY_BUDGET", "0"),
        ]));
        assert_eq!(config.stream_retry_budget, 1);
        assert_eq!(config.scrape_retry_budget, 1);
    }

    #[test]
    fn test_app_config() {
        let config = AppConfig::from_lookup(&lookup(&[("PORT", "8080"), ("LOG_DIR", "/tmp/qw")]));
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/qw")));

        let config = AppConfig::from_lookup(&lookup(&[("PORT", "8080"), ("API_PORT", "9090")]));
        assert_eq!(config.api.port, 9090);

        assert_eq!(
            AppConfig::log_dir_from_lookup(&lookup(&[("LOG_DIR", " ")])),
            None
        );
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_invalid_values_are_logged() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let config = tracing::subscriber::with_default(subscriber, || {
            AcquisitionConfig::from_lookup(&lookup(&[
                ("STREAM_RETRY_BUDGET", "abc"),
                ("SIMULATION_TICK_SECS", "0"),
            ]))
        });
        assert_eq!(config.stream_retry_budget, 5);

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("WARN"));
        assert!(output.contains("STREAM_RETRY_BUDGET"));
        assert!(output.contains("abc"));
        assert!(output.contains("SIMULATION_TICK_SECS"));
    }
}
