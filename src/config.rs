// We need Duration to turn the millisecond settings into Rust time values
use std::time::Duration;

// Reading the optional JSON config file
use std::fs;
use std::path::Path;

// Every field has a default, so a config file only lists what it overrides
use serde::Deserialize;

use crate::error::ConfigError;

/////////////////////////
// ReceiveMode         //
/////////////////////////

/// How a connection handler treats its socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveMode {
    /// Keep one connection and one accumulator for the handler's lifetime.
    #[default]
    Persistent,
    /// One read-decode-queue cycle, then close the connection.
    #[value(name = "per-message")]
    PerMessage,
}

/////////////////////////
// LoggerConfig        //
/////////////////////////

/// Where and how log lines are written
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum level, parsed by `log::LevelFilter` (e.g. `"debug"`)
    pub log_level: String,

    /// Colored lines on stdout
    pub enable_console_log: bool,

    /// Lines appended to `<log_file_path>/<name>.log`
    pub enable_file_log: bool,

    /// Write JSON envelopes instead of plain text to the log file
    pub enable_json_log: bool,

    /// Directory for the log file; empty means the working directory
    pub log_file_path: String,

    /// chrono format string for timestamps
    pub date_format: String,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            log_level: "info".to_string(),
            enable_console_log: true,
            enable_file_log: false,
            enable_json_log: false,
            log_file_path: String::new(),
            date_format: "%Y-%m-%d %H:%M:%S%.3f".to_string(),
        }
    }
}

//////////////////////
// ServerConfig     //
//////////////////////

/// All the settings the ingestion pipeline needs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// IP or hostname to listen on (e.g. `"0.0.0.0"`)
    pub host: String,

    /// Port number (e.g. `5500`)
    pub port: u16,

    /// Largest chunk read from a socket in one call
    pub read_buffer_size: usize,

    /// Consecutive empty reads tolerated before a handler stops
    pub idle_limit: u32,

    /// Milliseconds to sleep after an empty read
    pub idle_sleep_ms: u64,

    /// Optional socket read timeout; a timed-out read counts as empty
    pub read_timeout_ms: Option<u64>,

    /// Persistent or one-shot connections
    pub receive_mode: ReceiveMode,

    /// Milliseconds between accept attempts while no client is waiting
    pub accept_poll_ms: u64,

    /// Milliseconds to sleep after a failed accept
    pub accept_error_backoff_ms: u64,

    /// Seconds between queue length reports; 0 turns the monitor off
    pub queue_report_interval_secs: u64,

    /// Milliseconds between consumer drains
    pub redraw_interval_ms: u64,

    /// Logging settings
    pub logger: LoggerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 5500,
            read_buffer_size: 1024,
            idle_limit: 400,
            idle_sleep_ms: 10,
            read_timeout_ms: None,
            receive_mode: ReceiveMode::Persistent,
            accept_poll_ms: 10,
            accept_error_backoff_ms: 100,
            queue_report_interval_secs: 10,
            redraw_interval_ms: 100,
            logger: LoggerConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load settings from a JSON file; missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: ServerConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the handler loop meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.read_buffer_size == 0 {
            return Err(ConfigError::Invalid("read_buffer_size must be positive".into()));
        }
        if self.idle_limit == 0 {
            return Err(ConfigError::Invalid("idle_limit must be positive".into()));
        }
        Ok(())
    }

    /// `"host:port"` as handed to the OS
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }

    pub fn accept_error_backoff(&self) -> Duration {
        Duration::from_millis(self.accept_error_backoff_ms)
    }

    pub fn redraw_interval(&self) -> Duration {
        Duration::from_millis(self.redraw_interval_ms)
    }

    /// `None` when the queue monitor is disabled
    pub fn queue_report_interval(&self) -> Option<Duration> {
        match self.queue_report_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
