use anyhow::{Context, Result};
use clap::Parser;
use lib_trends::core::{BackoffPolicy, HubConfig, NotifierConfig, SchedulerConfig};
use lib_trends::ingestors::GitHubSourceConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Config file looked up in the working directory when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "server_trends.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "GitHub trends aggregator with live WebSocket updates and email digests", version)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    #[clap(long, env = "PORT", help = "Port to listen on.")]
    pub port: Option<u16>,

    #[clap(long, env = "TRENDS_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "TRENDS_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "TRENDS_LOG_LEVEL", help = "Log filter (trace, debug, info, warn, error or an EnvFilter directive).")]
    pub log_level: Option<String>,

    #[clap(long, env = "TRENDS_GITHUB_API_URL", help = "Base URL of the GitHub REST API.")]
    pub github_api_url: Option<String>,

    #[clap(long, env = "TRENDS_LOOKBACK_DAYS", help = "Only repositories created within this many days are tracked.")]
    pub lookback_days: Option<i64>,

    #[clap(long, env = "TRENDS_LANGUAGE", help = "Restrict tracking to one language.")]
    pub language: Option<String>,

    #[clap(long, env = "TRENDS_PER_PAGE", help = "Repositories fetched per refresh (max 100).")]
    pub per_page: Option<u32>,

    #[clap(long, env = "TRENDS_POLL_INTERVAL_SECONDS", help = "Seconds between refreshes.")]
    pub poll_interval_seconds: Option<u64>,

    #[clap(long, env = "TRENDS_FETCH_TIMEOUT_SECONDS", help = "Bound on a single fetch.")]
    pub fetch_timeout_seconds: Option<u64>,

    #[clap(long, env = "TRENDS_BACKOFF_BASE_MS", help = "Base delay in milliseconds for fetch retries.")]
    pub backoff_base_ms: Option<u64>,

    #[clap(long, env = "TRENDS_BACKOFF_MAX_MS", help = "Maximum delay in milliseconds for fetch retries.")]
    pub backoff_max_ms: Option<u64>,

    #[clap(long, env = "TRENDS_BACKOFF_JITTER", help = "Jitter as a fraction of the backoff delay, below 1.")]
    pub backoff_jitter: Option<f64>,

    #[clap(long, env = "TRENDS_MAX_RETRIES", help = "Fetch retries per refresh cycle.")]
    pub max_retries: Option<u32>,

    #[clap(long, env = "TRENDS_CLIENT_QUEUE_BOUND", help = "Pending messages per WebSocket client before eviction.")]
    pub client_queue_bound: Option<usize>,

    #[clap(long, env = "TRENDS_WRITE_TIMEOUT_SECONDS", help = "Bound on a single WebSocket write.")]
    pub write_timeout_seconds: Option<u64>,

    #[clap(long, env = "TRENDS_SHUTDOWN_GRACE_SECONDS", help = "Time allowed for clients to drain on shutdown.")]
    pub shutdown_grace_seconds: Option<u64>,

    #[clap(long, env = "TRENDS_DIGEST_INTERVAL_SECONDS", help = "Seconds between email digests.")]
    pub digest_interval_seconds: Option<u64>,

    #[clap(long, env = "TRENDS_DIGEST_SIZE", help = "Repositories per digest.")]
    pub digest_size: Option<usize>,

    #[clap(long, env = "TRENDS_DIGEST_MAX_ATTEMPTS", help = "Delivery attempts per digest.")]
    pub digest_max_attempts: Option<u32>,

    #[clap(long, env = "TRENDS_STATIC_DIR", help = "Directory served for unmatched paths.")]
    pub static_dir: Option<PathBuf>,

    #[clap(long, env = "TRENDS_SECRETS_PATH", help = "Path to the (optionally encrypted) secrets file.")]
    pub secrets_path: Option<PathBuf>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            github_api_url: other.github_api_url.or(self.github_api_url),
            lookback_days: other.lookback_days.or(self.lookback_days),
            language: other.language.or(self.language),
            per_page: other.per_page.or(self.per_page),
            poll_interval_seconds: other.poll_interval_seconds.or(self.poll_interval_seconds),
            fetch_timeout_seconds: other.fetch_timeout_seconds.or(self.fetch_timeout_seconds),
            backoff_base_ms: other.backoff_base_ms.or(self.backoff_base_ms),
            backoff_max_ms: other.backoff_max_ms.or(self.backoff_max_ms),
            backoff_jitter: other.backoff_jitter.or(self.backoff_jitter),
            max_retries: other.max_retries.or(self.max_retries),
            client_queue_bound: other.client_queue_bound.or(self.client_queue_bound),
            write_timeout_seconds: other.write_timeout_seconds.or(self.write_timeout_seconds),
            shutdown_grace_seconds: other.shutdown_grace_seconds.or(self.shutdown_grace_seconds),
            digest_interval_seconds: other.digest_interval_seconds.or(self.digest_interval_seconds),
            digest_size: other.digest_size.or(self.digest_size),
            digest_max_attempts: other.digest_max_attempts.or(self.digest_max_attempts),
            static_dir: other.static_dir.or(self.static_dir),
            secrets_path: other.secrets_path.or(self.secrets_path),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(8080),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            github_api_url: Some("https://api.github.com".to_string()),
            lookback_days: Some(7),
            per_page: Some(100),
            poll_interval_seconds: Some(600),
            fetch_timeout_seconds: Some(20),
            backoff_base_ms: Some(1000),
            backoff_max_ms: Some(60_000),
            backoff_jitter: Some(0.1),
            max_retries: Some(3),
            client_queue_bound: Some(100),
            write_timeout_seconds: Some(5),
            shutdown_grace_seconds: Some(5),
            digest_interval_seconds: Some(24 * 60 * 60),
            digest_size: Some(10),
            digest_max_attempts: Some(3),
            static_dir: Some(PathBuf::from("./static")),
            ..Default::default()
        }
    }
}

/// Fully resolved settings. Every value has passed through the
/// defaults → file → env/CLI chain.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub static_dir: PathBuf,
    pub secrets_path: Option<PathBuf>,
    pub shutdown_grace: Duration,
    pub github: GitHubSourceConfig,
    pub scheduler: SchedulerConfig,
    pub hub: HubConfig,
    pub notifier: NotifierConfig,
}

impl Settings {
    fn from_config(config: Config) -> Settings {
        let scheduler_defaults = SchedulerConfig::default();
        let notifier_defaults = NotifierConfig::default();
        let language = config.language.filter(|l| !l.trim().is_empty());

        Settings {
            port: config.port.unwrap_or(8080),
            log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: config.log_level.unwrap_or_else(|| "info".to_string()),
            static_dir: config.static_dir.unwrap_or_else(|| PathBuf::from("./static")),
            secrets_path: config.secrets_path,
            shutdown_grace: Duration::from_secs(config.shutdown_grace_seconds.unwrap_or(5)),
            github: GitHubSourceConfig {
                api_url: config
                    .github_api_url
                    .unwrap_or_else(|| "https://api.github.com".to_string()),
                lookback_days: config.lookback_days.unwrap_or(7),
                language,
                per_page: config.per_page.unwrap_or(100).clamp(1, 100),
                ..GitHubSourceConfig::default()
            },
            scheduler: SchedulerConfig {
                interval: secs_or(config.poll_interval_seconds, scheduler_defaults.interval),
                fetch_timeout: secs_or(config.fetch_timeout_seconds, scheduler_defaults.fetch_timeout),
                max_retries: config.max_retries.unwrap_or(scheduler_defaults.max_retries),
                backoff: BackoffPolicy {
                    base: config
                        .backoff_base_ms
                        .map(Duration::from_millis)
                        .unwrap_or(scheduler_defaults.backoff.base),
                    max_delay: config
                        .backoff_max_ms
                        .map(Duration::from_millis)
                        .unwrap_or(scheduler_defaults.backoff.max_delay),
                    jitter_ratio: config
                        .backoff_jitter
                        .unwrap_or(scheduler_defaults.backoff.jitter_ratio),
                },
            },
            hub: HubConfig {
                client_queue_bound: config.client_queue_bound.unwrap_or(100).max(1),
                write_timeout: Duration::from_secs(config.write_timeout_seconds.unwrap_or(5)),
            },
            notifier: NotifierConfig {
                interval: secs_or(config.digest_interval_seconds, notifier_defaults.interval),
                digest_size: config.digest_size.unwrap_or(notifier_defaults.digest_size),
                max_attempts: config.digest_max_attempts.unwrap_or(notifier_defaults.max_attempts),
                ..notifier_defaults
            },
        }
    }
}

fn secs_or(value: Option<u64>, fallback: Duration) -> Duration {
    value.map(Duration::from_secs).unwrap_or(fallback)
}

/// Parses the command line (and environment) and resolves the settings.
pub fn load_config() -> Result<Settings> {
    load_config_from(Config::parse())
}

/// # Load Config
///
/// 1. Built-in defaults.
/// 2. The JSON config file (`cli.config_path` or `server_trends.conf`), if
///    present. A file that exists but cannot be read or parsed is an error.
/// 3. Environment variables and CLI arguments, as parsed into `cli`.
pub fn load_config_from(cli: Config) -> Result<Settings> {
    let mut current_config = Config::defaults();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("failed to read config file {}", config_file_path.display()))?;
        let file_config = serde_json::from_str::<Config>(&config_str)
            .with_context(|| format!("failed to parse config file {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
    } else if cli.config_path.is_some() {
        anyhow::bail!("config file not found: {}", config_file_path.display());
    }

    current_config = current_config.merge(cli);
    validate(&current_config)?;
    Ok(Settings::from_config(current_config))
}

fn validate(config: &Config) -> Result<()> {
    if config.poll_interval_seconds == Some(0) {
        anyhow::bail!("pollIntervalSeconds must be at least 1");
    }
    if config.digest_interval_seconds == Some(0) {
        anyhow::bail!("digestIntervalSeconds must be at least 1");
    }
    Ok(())
}
