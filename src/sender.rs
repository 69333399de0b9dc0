//! Sending side: where readings come from and how they reach the server.
//!
//! Real deployments read a thermocouple amplifier over SPI; that hardware
//! access lives behind [`SensorSource`]. [`SimulatedProbe`] stands in for it
//! so the relay can be exercised end to end without a board attached.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use crate::codec::{Record, SENSOR_INTERNAL, SENSOR_THERMOCOUPLE, encode_record};
use crate::error::SenderError;
use crate::logger::Logger;
use crate::shutdown::ShutdownToken;

/// Largest acknowledgement read back after each data point.
pub const ACK_BUFFER_SIZE: usize = 1024;

/// Default sampling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Two-channel sensor, polled on a fixed interval.
pub trait SensorSource {
    /// Thermocouple reading in °C.
    fn read_primary_value(&mut self) -> f64;

    /// Cold-junction (board) reading in °C.
    fn read_secondary_value(&mut self) -> f64;
}

/// Deterministic stand-in for the SPI thermocouple amplifier: a slow sine
/// around room temperature on the probe, a steadier board temperature.
#[derive(Debug, Clone)]
pub struct SimulatedProbe {
    started: Instant,
    ambient: f64,
}

impl SimulatedProbe {
    pub fn new(ambient: f64) -> Self {
        SimulatedProbe {
            started: Instant::now(),
            ambient,
        }
    }

    fn phase(&self) -> f64 {
        self.started.elapsed().as_secs_f64() / 10.0
    }
}

impl Default for SimulatedProbe {
    fn default() -> Self {
        SimulatedProbe::new(22.0)
    }
}

impl SensorSource for SimulatedProbe {
    fn read_primary_value(&mut self) -> f64 {
        self.ambient + 3.0 * (self.phase() * std::f64::consts::TAU).sin()
    }

    fn read_secondary_value(&mut self) -> f64 {
        self.ambient + 2.0 + 0.25 * (self.phase() * std::f64::consts::PI).cos()
    }
}

/// Connection policy for the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DeliveryMode {
    /// One connection for the whole session.
    #[value(name = "single")]
    SingleSocket,
    /// Connect before and close after every data point. Pairs with the
    /// server's per-message receive mode; slow at high rates.
    #[value(name = "multi")]
    MultiSocket,
}

/// Pushes encoded records to the server and waits for each echo.
pub struct Transmitter {
    addr: SocketAddr,
    mode: DeliveryMode,
    stream: Option<TcpStream>,
}

impl Transmitter {
    /// Resolve `addr`; in single-socket mode, also connect right away.
    pub fn connect(addr: impl ToSocketAddrs, mode: DeliveryMode) -> Result<Self, SenderError> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "could not resolve address")
        })?;

        let mut transmitter = Transmitter {
            addr,
            mode,
            stream: None,
        };
        if mode == DeliveryMode::SingleSocket {
            transmitter.open()?;
        }
        Ok(transmitter)
    }

    fn open(&mut self) -> Result<&mut TcpStream, SenderError> {
        let stream = match self.stream.take() {
            Some(stream) => stream,
            None => {
                let stream =
                    TcpStream::connect(self.addr).map_err(|source| SenderError::Connect {
                        addr: self.addr,
                        source,
                    })?;
                stream.set_nodelay(true).ok();
                stream
            }
        };
        Ok(self.stream.insert(stream))
    }

    /// Send one record and wait for its echo. Returns the echoed bytes.
    pub fn send_data_point(&mut self, record: &Record) -> Result<Vec<u8>, SenderError> {
        let line = encode_record(record);
        let mut ack = [0u8; ACK_BUFFER_SIZE];
        let stream = self.open()?;
        stream.write_all(&line)?;
        let n = stream.read(&mut ack)?;
        let echoed = ack[..n].to_vec();

        if self.mode == DeliveryMode::MultiSocket {
            self.close();
        }
        Ok(echoed)
    }

    /// Ask the receiving side to stop.
    pub fn signal_end(&mut self) -> Result<Vec<u8>, SenderError> {
        self.send_data_point(&Record::termination())
    }

    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Sample both channels every `interval` and transmit them with the time
/// since start. When `shutdown` trips, send the end-of-stream record and
/// close. Returns the number of data points sent.
pub fn run_sender<S: SensorSource>(
    source: &mut S,
    transmitter: &mut Transmitter,
    interval: Duration,
    shutdown: &ShutdownToken,
    logger: Logger,
) -> Result<u64, SenderError> {
    let started = Instant::now();
    let mut sent = 0u64;

    while !shutdown.is_triggered() {
        let elapsed = started.elapsed().as_secs_f64();
        let probe = source.read_primary_value();
        let board = source.read_secondary_value();

        transmitter.send_data_point(&Record::new(SENSOR_THERMOCOUPLE, elapsed, probe))?;
        transmitter.send_data_point(&Record::new(SENSOR_INTERNAL, elapsed, board))?;
        sent += 2;
        logger.debug(&format!("t={:.2}s probe={:.2} board={:.2}", elapsed, probe, board));

        thread::sleep(interval);
    }

    logger.info(&format!("🏁 Sent {} data points; signalling end of stream.", sent));
    transmitter.signal_end()?;
    transmitter.close();
    Ok(sent)
}
