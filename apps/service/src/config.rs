use std::{env, fmt, fs, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to write config file {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },

    #[error("Failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("Neither XDG_CONFIG_HOME nor HOME is set, pass --config explicitly")]
    ConfigPathUnavailable,

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: Storage,
    pub scheduler: Scheduler,
    pub prober: Prober,
    pub events: Events,
    pub notifier: Notifier,
    pub retention: Retention,
    pub server: Server,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    pub registry_path: path::PathBuf,
    pub history_path: path::PathBuf,
    pub event_log_path: path::PathBuf,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Scheduler {
    pub interval_seconds: u64,
    pub sweep_concurrency: usize,
    pub batch_size: usize,
    pub drain_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Prober {
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub tls_handshake_timeout_ms: u64,
    pub response_header_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Events {
    pub topic: String,
    pub partitions: u32,
    pub publish_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Smtp,
    Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Notifier {
    pub consumer_group: String,
    pub channel: Channel,
    pub from_email: String,
    pub from_name: String,
    pub max_attempts: u32,
    pub backoff_step_seconds: u64,
    pub delivery_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub fetch_batch: usize,
    pub broker_backoff_seconds: u64,
    pub lease_ttl_seconds: u64,
    pub redelivery_backoff_seconds: u64,
    pub max_redeliveries: u32,
    pub smtp: Smtp,
    pub api: Api,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Smtp {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Api {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Retention {
    pub history_days: i64,
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: String,
    pub port: u16,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            registry_path: "pingtower-registry.db".into(),
            history_path: "pingtower-history.db".into(),
            event_log_path: "pingtower-events.db".into(),
            pool_size: 16,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self { interval_seconds: 60, sweep_concurrency: 16, batch_size: 500, drain_timeout_seconds: 30 }
    }
}

impl Default for Prober {
    fn default() -> Self {
        Self {
            request_timeout_ms: 8_000,
            connect_timeout_ms: 3_000,
            tls_handshake_timeout_ms: 3_000,
            response_header_timeout_ms: 5_000,
        }
    }
}

impl Default for Events {
    fn default() -> Self {
        Self { topic: "notification-alerts".into(), partitions: 3, publish_timeout_ms: 5_000 }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self {
            consumer_group: "notification-service".into(),
            channel: Channel::Smtp,
            from_email: "noreply@pingtower.local".into(),
            from_name: "PingTower Alert System".into(),
            max_attempts: 3,
            backoff_step_seconds: 2,
            delivery_timeout_seconds: 30,
            poll_interval_ms: 1_000,
            fetch_batch: 32,
            broker_backoff_seconds: 2,
            lease_ttl_seconds: 120,
            redelivery_backoff_seconds: 30,
            max_redeliveries: 5,
            smtp: Smtp::default(),
            api: Api::default(),
        }
    }
}

impl Default for Smtp {
    fn default() -> Self {
        Self { host: "smtp.mailersend.net".into(), port: 587, username: String::new(), password: None }
    }
}

impl Default for Api {
    fn default() -> Self {
        Self { endpoint: "https://api.mailersend.com/v1/email".into(), api_key: None }
    }
}

impl Default for Retention {
    fn default() -> Self {
        Self { history_days: 30, cleanup_interval_seconds: 3_600 }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self { bind: "0.0.0.0".into(), port: 8080 }
    }
}

impl Prober {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn tls_handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.tls_handshake_timeout_ms)
    }

    pub fn response_header_timeout(&self) -> Duration {
        Duration::from_millis(self.response_header_timeout_ms)
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/pingtower/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("pingtower/config.toml"))
}

fn mask(secret: &Option<String>) -> &'static str {
    match secret {
        Some(value) if !value.is_empty() => "********",
        _ => "<unset>",
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Storage")?;
        write_1(f, "Registry", &self.storage.registry_path.display())?;
        write_1(f, "History", &self.storage.history_path.display())?;
        write_1(f, "Event Log", &self.storage.event_log_path.display())?;
        write_1(f, "Pool Size", &self.storage.pool_size)?;

        write_title_1(f, "Scheduler")?;
        write_1(f, "Interval (s)", &self.scheduler.interval_seconds)?;
        write_1(f, "Sweep Concurrency", &self.scheduler.sweep_concurrency)?;
        write_1(f, "Batch Size", &self.scheduler.batch_size)?;

        write_title_1(f, "Prober")?;
        write_1(f, "Request Timeout (ms)", &self.prober.request_timeout_ms)?;
        write_1(f, "Connect Timeout (ms)", &self.prober.connect_timeout_ms)?;
        write_1(f, "TLS Timeout (ms)", &self.prober.tls_handshake_timeout_ms)?;
        write_1(f, "Header Timeout (ms)", &self.prober.response_header_timeout_ms)?;

        write_title_1(f, "Events")?;
        write_1(f, "Topic", &self.events.topic)?;
        write_1(f, "Partitions", &self.events.partitions)?;

        write_title_1(f, "Notifier")?;
        write_1(f, "Consumer Group", &self.notifier.consumer_group)?;
        write_1(f, "Channel", &format!("{:?}", self.notifier.channel))?;
        write_1(f, "From", &format!("{} <{}>", self.notifier.from_name, self.notifier.from_email))?;
        write_1(f, "Max Attempts", &self.notifier.max_attempts)?;
        write_1(f, "SMTP Host", &format!("{}:{}", self.notifier.smtp.host, self.notifier.smtp.port))?;
        write_1(f, "SMTP Username", &self.notifier.smtp.username)?;
        write_1(f, "SMTP Password", &mask(&self.notifier.smtp.password))?;
        write_1(f, "API Endpoint", &self.notifier.api.endpoint)?;
        write_1(f, "API Key", &mask(&self.notifier.api.api_key))?;

        write_title_1(f, "Retention")?;
        write_1(f, "History (days)", &self.retention.history_days)?;

        write_title_1(f, "Server")?;
        write_1(f, "Bind Address", &self.server.bind)?;
        write_1(f, "Port", &self.server.port)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/pingtower/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// Environment overrides are applied afterwards and the result is validated.
    ///
    /// ```ignore
    /// let cfg = config::Config::from_config(None::<&path::Path>)?;
    /// println!("{}", cfg);
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| Error::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| Error::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| Error::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Secrets and sender identity usually come from the deployment environment.
    pub fn apply_env_overrides(&mut self) {
        let non_empty = |name: &str| env::var(name).ok().filter(|value| !value.trim().is_empty());

        if let Some(username) = non_empty("SMTP_USERNAME") {
            self.notifier.smtp.username = username;
        }
        if let Some(password) = non_empty("SMTP_PASSWORD") {
            self.notifier.smtp.password = Some(password);
        }
        if let Some(api_key) = non_empty("MAILERSEND_API_KEY") {
            self.notifier.api.api_key = Some(api_key);
        }
        if let Some(from_email) = non_empty("FROM_EMAIL") {
            self.notifier.from_email = from_email;
        }
        if let Some(from_name) = non_empty("FROM_NAME") {
            self.notifier.from_name = from_name;
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |message: String| Err(Error::Invalid(message));

        if self.storage.pool_size == 0 {
            return invalid("storage.pool_size must be at least 1".into());
        }
        if self.scheduler.interval_seconds == 0 {
            return invalid("scheduler.interval_seconds must be at least 1".into());
        }
        if self.scheduler.sweep_concurrency == 0 || self.scheduler.batch_size == 0 {
            return invalid("scheduler.sweep_concurrency and batch_size must be at least 1".into());
        }
        if self.events.partitions == 0 {
            return invalid("events.partitions must be at least 1".into());
        }
        if self.notifier.max_attempts == 0 {
            return invalid("notifier.max_attempts must be at least 1".into());
        }
        if self.notifier.lease_ttl_seconds == 0 {
            return invalid("notifier.lease_ttl_seconds must be at least 1".into());
        }
        if self.notifier.fetch_batch == 0 {
            return invalid("notifier.fetch_batch must be at least 1".into());
        }
        if self.retention.history_days <= 0 {
            return invalid("retention.history_days must be positive".into());
        }

        for (name, millis) in [
            ("prober.request_timeout_ms", self.prober.request_timeout_ms),
            ("prober.connect_timeout_ms", self.prober.connect_timeout_ms),
            ("prober.tls_handshake_timeout_ms", self.prober.tls_handshake_timeout_ms),
            ("prober.response_header_timeout_ms", self.prober.response_header_timeout_ms),
            ("events.publish_timeout_ms", self.events.publish_timeout_ms),
        ] {
            validation::validate_timeout(Duration::from_millis(millis))
                .map_err(|e| Error::Invalid(format!("{name}: {e}")))?;
        }
        validation::validate_timeout(Duration::from_secs(self.notifier.delivery_timeout_seconds))
            .map_err(|e| Error::Invalid(format!("notifier.delivery_timeout_seconds: {e}")))?;

        Ok(())
    }
}
