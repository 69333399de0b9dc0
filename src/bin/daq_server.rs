//! Remote sensing server: receive readings from networked sensors and keep a
//! live chart of them until the sender signals the end, the stream goes
//! quiet, or Ctrl+C.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use simple_daq::codec::{SENSOR_INTERNAL, SENSOR_THERMOCOUPLE};
use simple_daq::config::{ReceiveMode, ServerConfig};
use simple_daq::server::monitor::spawn_queue_monitor;
use simple_daq::shutdown::spawn_signal_listener;
use simple_daq::{
    ChartRenderer, Consumer, IngestionServer, Logger, ServerError, SharedQueue, ShutdownToken,
    init_logger,
};

#[derive(Parser)]
#[command(name = "daq_server")]
#[command(about = "Receive sensor readings over TCP and plot them live", long_about = None)]
struct Cli {
    /// Hostname or IP address to listen on
    serverip: Option<String>,

    /// TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// JSON file with server settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep connections open, or handle one record per connection
    #[arg(short, long, value_enum)]
    mode: Option<ReceiveMode>,

    /// Consecutive empty reads before the stream is considered dead
    #[arg(long)]
    idle_limit: Option<u32>,

    /// Minimum log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<ServerConfig, ServerError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::from_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(host) = self.serverip {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(mode) = self.mode {
            config.receive_mode = mode;
        }
        if let Some(limit) = self.idle_limit {
            config.idle_limit = limit;
        }
        if let Some(level) = self.log_level {
            config.logger.log_level = level;
        }
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("daq_server: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let logger = init_logger("daq_server", &config.logger);
    match run(config, logger) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            logger.error(&format!("Server error: {}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(config: ServerConfig, logger: Logger) -> Result<(), ServerError> {
    let queue = SharedQueue::new();
    let shutdown = ShutdownToken::new();

    // Bind before anything else so a taken port fails fast.
    let server = IngestionServer::bind(config.clone(), queue.clone(), shutdown.clone(), logger)?;
    let server = server.spawn()?;

    let monitor = match config.queue_report_interval() {
        Some(interval) => Some(spawn_queue_monitor(
            queue.clone(),
            shutdown.clone(),
            interval,
            logger,
        )?),
        None => None,
    };
    // Detached: it exits by itself once the flag is set.
    let _signals = spawn_signal_listener(shutdown.clone(), logger)?;

    let mut consumer = Consumer::new(queue.clone(), shutdown, ChartRenderer::new(logger), logger);
    consumer.run(config.redraw_interval());

    server.close();
    let result = server.join();
    if let Some(monitor) = monitor {
        let _ = monitor.join();
    }

    let chart = consumer.renderer();
    for sensor_id in [SENSOR_THERMOCOUPLE, SENSOR_INTERNAL] {
        if let Some(series) = chart.series(sensor_id) {
            logger.info(&format!("{}: {} points", series.label, series.points.len()));
        }
    }
    logger.info(&format!("Queue length at exit is {}", queue.len()));
    result
}
