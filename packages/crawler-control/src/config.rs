use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Required by `serve` and `migrate` only.
    pub database_url: Option<String>,
    pub controller: ControllerConfig,
    pub breaker: BreakerConfig,
    pub retry: RetryConfig,
    pub qpi: QpiConfig,
    pub channel: ChannelConfig,
    pub distributor: DistributorConfig,
    pub watcher: WatcherConfig,
}

/// How the worker process is launched and supervised.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Worker script or binary.
    pub entrypoint: PathBuf,
    /// Optional interpreter placed in front of the entrypoint (e.g. `python3`).
    pub interpreter: Option<String>,
    pub working_dir: Option<PathBuf>,
    /// Ring buffer size for captured worker output.
    pub log_buffer_lines: usize,
    /// Wait after SIGTERM before escalating to SIGKILL.
    pub stop_timeout: Duration,
    /// Exits sooner than this after spawn are early exits.
    pub early_exit_window: Duration,
    /// A run alive this long without failing counts as a success.
    pub success_grace: Duration,
    pub monitor_interval: Duration,
    /// Bounded wait for output readers to drain once the worker has exited.
    pub log_drain_timeout: Duration,
    /// Exit codes meaning the worker rejected its arguments.
    pub config_error_exit_codes: Vec<i32>,
    /// Case-insensitive substrings in worker output that flag rate limiting.
    pub rate_limit_markers: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            entrypoint: PathBuf::from("scraper/main.py"),
            interpreter: Some("python3".to_string()),
            working_dir: None,
            log_buffer_lines: 100,
            stop_timeout: Duration::from_secs(10),
            early_exit_window: Duration::from_secs(5),
            success_grace: Duration::from_secs(30),
            monitor_interval: Duration::from_millis(500),
            log_drain_timeout: Duration::from_secs(2),
            config_error_exit_codes: vec![2],
            rate_limit_markers: vec![
                "rate limit".to_string(),
                "429 too many requests".to_string(),
                "quota exceeded".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub threshold: u32,
    /// Failures older than this no longer count.
    pub window: Duration,
    pub cool_down: Duration,
    pub cool_down_multiplier: f64,
    pub max_cool_down: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            window: Duration::from_secs(600),
            cool_down: Duration::from_secs(60),
            cool_down_multiplier: 2.0,
            max_cool_down: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QpiConfig {
    pub reduction_factor: f64,
    pub floor: u32,
    pub restore_factor: f64,
}

impl Default for QpiConfig {
    fn default() -> Self {
        Self {
            reduction_factor: 0.5,
            floor: 1,
            restore_factor: 1.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub channel_name: String,
    pub poll_timeout: Duration,
    pub health_interval: Duration,
    pub health_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            channel_name: "crawler_events".to_string(),
            poll_timeout: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
            health_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            max_reconnect_attempts: 5,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DistributorConfig {
    /// Per-run buffer capacity.
    pub capacity: usize,
    /// Idle buffers older than this are swept; `None` disables the TTL.
    pub stale_run_ttl: Option<Duration>,
    pub sweep_interval: Duration,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            stale_run_ttl: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let defaults = Config::default();
        let controller = ControllerConfig {
            entrypoint: env::var("CRAWLER_ENTRYPOINT")
                .map(PathBuf::from)
                .unwrap_or(defaults.controller.entrypoint),
            interpreter: match env::var("CRAWLER_INTERPRETER") {
                Ok(value) if value.trim().is_empty() => None,
                Ok(value) => Some(value),
                Err(_) => defaults.controller.interpreter,
            },
            working_dir: env::var("CRAWLER_WORKDIR").ok().map(PathBuf::from),
            log_buffer_lines: parse_or("CRAWLER_LOG_LINES", defaults.controller.log_buffer_lines)?,
            stop_timeout: secs_or("CRAWLER_STOP_TIMEOUT_SECS", defaults.controller.stop_timeout)?,
            early_exit_window: secs_or(
                "CRAWLER_EARLY_EXIT_SECS",
                defaults.controller.early_exit_window,
            )?,
            success_grace: secs_or("CRAWLER_SUCCESS_GRACE_SECS", defaults.controller.success_grace)?,
            monitor_interval: millis_or(
                "CRAWLER_MONITOR_INTERVAL_MS",
                defaults.controller.monitor_interval,
            )?,
            log_drain_timeout: defaults.controller.log_drain_timeout,
            config_error_exit_codes: match env::var("CRAWLER_CONFIG_ERROR_EXIT_CODES") {
                Ok(raw) => split_list(&raw)
                    .into_iter()
                    .map(|s| s.parse::<i32>())
                    .collect::<std::result::Result<_, _>>()
                    .context("CRAWLER_CONFIG_ERROR_EXIT_CODES must be a comma-separated list of integers")?,
                Err(_) => defaults.controller.config_error_exit_codes,
            },
            rate_limit_markers: env::var("CRAWLER_RATE_LIMIT_MARKERS")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.controller.rate_limit_markers),
        };

        let breaker = BreakerConfig {
            threshold: parse_or("BREAKER_THRESHOLD", defaults.breaker.threshold)?,
            window: secs_or("BREAKER_WINDOW_SECS", defaults.breaker.window)?,
            cool_down: secs_or("BREAKER_COOL_DOWN_SECS", defaults.breaker.cool_down)?,
            cool_down_multiplier: parse_or(
                "BREAKER_COOL_DOWN_MULTIPLIER",
                defaults.breaker.cool_down_multiplier,
            )?,
            max_cool_down: secs_or("BREAKER_MAX_COOL_DOWN_SECS", defaults.breaker.max_cool_down)?,
        };

        let retry = RetryConfig {
            max_attempts: parse_or("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            base_delay: secs_or("RETRY_BASE_DELAY_SECS", defaults.retry.base_delay)?,
            max_delay: secs_or("RETRY_MAX_DELAY_SECS", defaults.retry.max_delay)?,
        };

        let qpi = QpiConfig {
            reduction_factor: parse_or("QPI_REDUCTION_FACTOR", defaults.qpi.reduction_factor)?,
            floor: parse_or("QPI_FLOOR", defaults.qpi.floor)?,
            restore_factor: parse_or("QPI_RESTORE_FACTOR", defaults.qpi.restore_factor)?,
        };

        let channel = ChannelConfig {
            channel_name: env::var("NOTIFY_CHANNEL").unwrap_or(defaults.channel.channel_name),
            poll_timeout: secs_or("NOTIFY_POLL_TIMEOUT_SECS", defaults.channel.poll_timeout)?,
            health_interval: secs_or(
                "NOTIFY_HEALTH_INTERVAL_SECS",
                defaults.channel.health_interval,
            )?,
            max_reconnect_attempts: parse_or(
                "NOTIFY_MAX_RECONNECT_ATTEMPTS",
                defaults.channel.max_reconnect_attempts,
            )?,
            ..defaults.channel
        };

        let distributor = DistributorConfig {
            capacity: parse_or("EVENT_BUFFER_CAPACITY", defaults.distributor.capacity)?,
            stale_run_ttl: match env::var("EVENT_BUFFER_TTL_SECS") {
                Ok(raw) => Some(Duration::from_secs(
                    raw.parse().context("EVENT_BUFFER_TTL_SECS must be a valid number")?,
                )),
                Err(_) => None,
            },
            ..defaults.distributor
        };

        let watcher = WatcherConfig {
            poll_interval: secs_or("CONFIG_POLL_INTERVAL_SECS", defaults.watcher.poll_interval)?,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok(),
            controller,
            breaker,
            retry,
            qpi,
            channel,
            distributor,
            watcher,
        })
    }

    /// Database URL, for commands that need one.
    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set")
    }
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} must be a valid value", name)),
        Err(_) => Ok(default),
    }
}

fn secs_or(name: &str, default: Duration) -> Result<Duration> {
    parse_or(name, default.as_secs()).map(Duration::from_secs)
}

fn millis_or(name: &str, default: Duration) -> Result<Duration> {
    parse_or(name, default.as_millis() as u64).map(Duration::from_millis)
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
