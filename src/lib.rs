//! Live data-acquisition relay.
//!
//! Remote senders push newline-delimited sensor readings over TCP. Each
//! accepted connection gets its own thread that echoes every chunk back,
//! decodes complete lines and hands the records to a shared queue. A single
//! consumer drains that queue on a redraw interval and feeds a renderer.
//!
//! The whole pipeline shares one [`ShutdownToken`]. Any handler that goes idle
//! for too long, the server's `close()`, the consumer receiving the
//! termination sentinel, or Ctrl+C trips it, and every loop exits.

// Line-based record format shared by the server and the sender.
pub mod codec;

// Settings for the server, the handlers and the logger.
pub mod config;

// Error types for configuration, binding and the sender side.
pub mod error;

// Logging utilities for connection lifecycle events.
pub mod logger;

// Unbounded producer/consumer handoff between handlers and the consumer.
pub mod queue;

// One-way cancellation flag observed by every loop.
pub mod shutdown;

// Listening socket, per-connection handlers and the queue monitor.
pub mod server;

// Pull side of the queue and the live chart renderer.
pub mod consumer;

// Sensor source contract and the transmitter that pushes readings.
pub mod sender;

pub use codec::{DecodeError, Record};
pub use config::{LoggerConfig, ReceiveMode, ServerConfig};
pub use consumer::{ChartRenderer, Consumer, Renderer};
pub use error::{ConfigError, SenderError, ServerError};
pub use logger::{Logger, init_logger};
pub use queue::SharedQueue;
pub use server::{IngestionServer, ServerControl, ServerHandle};
pub use shutdown::ShutdownToken;
