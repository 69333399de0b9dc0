//! Sensor client: sample the probe on a fixed interval and push each reading
//! to the server. Ctrl+C (or `--duration-secs`) ends the run with the
//! end-of-stream record so the server stops plotting.

use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;

use simple_daq::config::LoggerConfig;
use simple_daq::sender::{DeliveryMode, SimulatedProbe, Transmitter, run_sender};
use simple_daq::shutdown::spawn_signal_listener;
use simple_daq::{SenderError, ShutdownToken, init_logger};

#[derive(Parser)]
#[command(name = "daq_sender")]
#[command(about = "Stream simulated thermocouple readings to a daq_server", long_about = None)]
struct Cli {
    /// Hostname or IP address of the server
    serverip: String,

    /// TCP port
    #[arg(short, long, default_value_t = 5500)]
    port: u16,

    /// Milliseconds between samples
    #[arg(short, long, default_value_t = 50)]
    interval_ms: u64,

    /// Keep one connection, or reconnect for every data point
    #[arg(short, long, value_enum, default_value_t = DeliveryMode::SingleSocket)]
    mode: DeliveryMode,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short, long)]
    duration_secs: Option<u64>,

    /// Minimum log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let logger = init_logger(
        "daq_sender",
        &LoggerConfig {
            log_level: cli.log_level.clone(),
            ..LoggerConfig::default()
        },
    );

    match run(&cli) {
        Ok(sent) => {
            logger.info(&format!("Done: {} data points sent", sent));
            ExitCode::SUCCESS
        }
        Err(e) => {
            logger.error(&format!("Sender error: {}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<u64, SenderError> {
    let logger = simple_daq::Logger;
    let shutdown = ShutdownToken::new();
    let _signals = spawn_signal_listener(shutdown.clone(), logger)?;

    if let Some(secs) = cli.duration_secs {
        let timer = shutdown.clone();
        thread::Builder::new()
            .name("daq-sender-timer".to_string())
            .spawn(move || {
                if !timer.wait_timeout(Duration::from_secs(secs), Duration::from_millis(100)) {
                    timer.trigger();
                }
            })?;
    }

    let mut transmitter = Transmitter::connect((cli.serverip.as_str(), cli.port), cli.mode)?;
    logger.info(&format!(
        "📡 Sending to {}:{} every {} ms ({:?})",
        cli.serverip, cli.port, cli.interval_ms, cli.mode
    ));

    let mut probe = SimulatedProbe::default();
    run_sender(
        &mut probe,
        &mut transmitter,
        Duration::from_millis(cli.interval_ms),
        &shutdown,
        logger,
    )
}
