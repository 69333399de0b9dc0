// Import local time formatting tools from chrono
use chrono::Local;

// Set the global log level (e.g., Debug, Info, Warn, Error)
use log::LevelFilter;

// Set up the dispatch builder for combining logger outputs
use fern::Dispatch;
use fern::colors::{Color, ColoredLevelConfig};

// JSON envelopes for the structured file output
use serde_json::Value as JsonValue;

// Standard I/O and filesystem operations (stdout, file creation)
use std::{fs, io};

// Used to initialize a static value only once in a thread-safe way
use std::sync::OnceLock;

// All user settings for the dispatcher
use crate::config::LoggerConfig;

/// A simple Logger struct that wraps logging functions.
/// Clonable so every handler thread can carry its own copy.
///
/// Until [`init_logger`] runs, calls go to the `log` facade's no-op logger,
/// which keeps library code quiet in tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct Logger;

impl Logger {
    /// Logs a message at DEBUG level
    pub fn debug(&self, msg: &str) {
        log::debug!("{}", msg);
    }

    /// Logs a message at INFO level
    pub fn info(&self, msg: &str) {
        log::info!("{}", msg);
    }

    /// Logs a message at WARN level
    pub fn warn(&self, msg: &str) {
        log::warn!("{}", msg);
    }

    /// Logs a message at ERROR level
    pub fn error(&self, msg: &str) {
        log::error!("{}", msg);
    }
}

/// Static global LOGGER instance, initialized once
static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Compute `<log_file_path>/<name>.log`, with dots in `name` turned into
/// underscores so `daq.server` does not look like an extension.
pub fn log_file_path(name: &str, cfg: &LoggerConfig) -> String {
    let file_name = format!("{}.log", name.replace('.', "_"));
    if cfg.log_file_path.is_empty() {
        file_name
    } else {
        format!("{}/{}", cfg.log_file_path.trim_end_matches('/'), file_name)
    }
}

/// Build the JSON line written to the log file when `enable_json_log` is set.
/// A message that is itself JSON is embedded as an object, anything else as a
/// string.
pub fn json_envelope(timestamp: &str, name: &str, level: log::Level, raw: &str) -> JsonValue {
    let message: JsonValue =
        serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()));
    serde_json::json!({
        "timestamp": timestamp,
        "name":      name,
        "level":     level.to_string(),
        "message":   message,
    })
}

/// Initialize the global logger exactly once, according to the provided settings.
/// After this call, all calls to `log::debug!(), info!(), warn!(), error!()` (and the
/// `Logger` methods) go through the configured fern dispatcher.
pub fn init_logger(name: &str, cfg: &LoggerConfig) -> Logger {
    *LOGGER.get_or_init(|| {
        // ────────────────────────────────────────────────────────────────
        // 1) Parse the configured level string into a log::LevelFilter
        //    If parsing fails, fall back to Info.
        // ────────────────────────────────────────────────────────────────
        let level = cfg
            .log_level
            .parse::<LevelFilter>()
            .unwrap_or(LevelFilter::Info);

        let mut base = Dispatch::new().level(level);

        // ────────────────────────────────────────────────────────────────
        // 2) Console branch: timestamp, name, colored level, message
        // ────────────────────────────────────────────────────────────────
        if cfg.enable_console_log {
            let nm = name.to_string();
            let datefmt = cfg.date_format.clone();
            let colors = ColoredLevelConfig::new()
                .info(Color::Green)
                .warn(Color::Yellow)
                .error(Color::Red)
                .debug(Color::Blue);

            base = base.chain(
                Dispatch::new()
                    .format(move |out, message, record| {
                        out.finish(format_args!(
                            "\x1b[92m{}\x1b[0m - \x1b[94m{}\x1b[0m - {} - {}",
                            Local::now().format(&datefmt),
                            nm,
                            colors.color(record.level()),
                            message
                        ))
                    })
                    .chain(io::stdout()),
            );
        }

        // ────────────────────────────────────────────────────────────────
        // 3) File branch: plain text or JSON envelopes
        // ────────────────────────────────────────────────────────────────
        if cfg.enable_file_log {
            if !cfg.log_file_path.is_empty() {
                let _ = fs::create_dir_all(&cfg.log_file_path);
            }

            let nm = name.to_string();
            let datefmt = cfg.date_format.clone();
            let enable_json = cfg.enable_json_log;
            let filepath = log_file_path(name, cfg);

            let log_format_file = move |out: fern::FormatCallback,
                                        message: &std::fmt::Arguments,
                                        record: &log::Record| {
                let timestamp = Local::now().format(&datefmt).to_string();
                if enable_json {
                    let envelope =
                        json_envelope(&timestamp, &nm, record.level(), &message.to_string());
                    out.finish(format_args!("{}", envelope))
                } else {
                    out.finish(format_args!(
                        "{} - {} - {} - {}",
                        timestamp,
                        nm,
                        record.level(),
                        message
                    ))
                }
            };

            // Don't fail startup over a log file; fall back to a sink
            let file_output: Box<dyn io::Write + Send> = match fern::log_file(&filepath) {
                Ok(fh) => Box::new(fh),
                Err(err) => {
                    eprintln!("Warning: could not open log file {}: {}", filepath, err);
                    Box::new(io::sink())
                }
            };

            base = base.chain(Dispatch::new().format(log_format_file).chain(file_output));
        }

        // ────────────────────────────────────────────────────────────────
        // 4) Install as the global logger. Another logger may already be
        //    installed (e.g. by a test harness); that is not fatal.
        // ────────────────────────────────────────────────────────────────
        if let Err(e) = base.apply() {
            eprintln!("Warning: logger already initialized: {}", e);
        }

        Logger
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_lands_in_configured_directory() {
        let mut cfg = LoggerConfig::default();
        assert_eq!(log_file_path("daq.server", &cfg), "daq_server.log");

        cfg.log_file_path = "logs/".to_string();
        assert_eq!(log_file_path("daq_server", &cfg), "logs/daq_server.log");
    }

    #[test]
    fn json_envelope_embeds_json_messages() {
        let envelope = json_envelope("t0", "daq", log::Level::Info, r#"{"queue": 3}"#);
        assert_eq!(envelope["message"]["queue"], 3);
        assert_eq!(envelope["level"], "INFO");

        let envelope = json_envelope("t0", "daq", log::Level::Warn, "plain text");
        assert_eq!(envelope["message"], "plain text");
        assert_eq!(envelope["name"], "daq");
    }
}
