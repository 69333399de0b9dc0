use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;

// Accumulator for partial lines between reads.
use bytes::BytesMut;

use crate::codec::{Record, decode_line};
use crate::config::{ReceiveMode, ServerConfig};
use crate::logger::Logger;
use crate::queue::SharedQueue;
use crate::server::ServerControl;
use crate::shutdown::ShutdownToken;

/// The slice of [`ServerConfig`] a handler needs.
#[derive(Debug, Clone, Copy)]
pub struct HandlerSettings {
    pub read_buffer_size: usize,
    pub idle_limit: u32,
    pub idle_sleep: Duration,
    pub read_timeout: Option<Duration>,
    pub mode: ReceiveMode,
}

impl From<&ServerConfig> for HandlerSettings {
    fn from(config: &ServerConfig) -> Self {
        HandlerSettings {
            read_buffer_size: config.read_buffer_size,
            idle_limit: config.idle_limit,
            idle_sleep: config.idle_sleep(),
            read_timeout: config.read_timeout(),
            mode: config.receive_mode,
        }
    }
}

impl Default for HandlerSettings {
    fn default() -> Self {
        HandlerSettings::from(&ServerConfig::default())
    }
}

/// Why a handler's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerExit {
    /// Too many consecutive empty reads; the whole pipeline was stopped.
    IdleTimeout,
    /// The shutdown flag was observed.
    Shutdown,
    /// Per-message mode finished its single cycle.
    MessageHandled,
    /// Reset, broken pipe or another socket error; only this connection ends.
    ConnectionError,
}

enum ReadOutcome {
    Data,
    Empty,
    Retry,
}

/// Owns one accepted connection for its entire lifetime.
pub struct ConnectionHandler {
    stream: TcpStream,
    peer: SocketAddr,
    settings: HandlerSettings,
    queue: SharedQueue<Record>,
    shutdown: ShutdownToken,
    server: Option<ServerControl>,
    logger: Logger,
    buf: Vec<u8>,
    pending: BytesMut,
    // Leading bytes of `pending` already known to hold no newline.
    scanned: usize,
    idle_count: u32,
    lines_seen: u64,
    queued: u64,
    dropped: u64,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        settings: HandlerSettings,
        queue: SharedQueue<Record>,
        shutdown: ShutdownToken,
        logger: Logger,
    ) -> Self {
        ConnectionHandler {
            stream,
            peer,
            buf: vec![0u8; settings.read_buffer_size.max(1)],
            settings,
            queue,
            shutdown,
            server: None,
            logger,
            pending: BytesMut::new(),
            scanned: 0,
            idle_count: 0,
            lines_seen: 0,
            queued: 0,
            dropped: 0,
        }
    }

    /// Let an idle timeout stop the server that accepted this connection.
    pub fn with_server(mut self, server: ServerControl) -> Self {
        self.server = Some(server);
        self
    }

    /// Run until the connection ends; the socket is closed on return.
    pub fn run(mut self) -> HandlerExit {
        self.logger.info(&format!(
            "📡 Receiving from {} ({:?} mode)",
            self.peer, self.settings.mode
        ));

        if let Some(timeout) = self.settings.read_timeout {
            if let Err(e) = self.stream.set_read_timeout(Some(timeout)) {
                self.logger.warn(&format!("Failed to set read timeout for {}: {}", self.peer, e));
            }
        }

        let exit = match self.settings.mode {
            ReceiveMode::Persistent => self.run_persistent(),
            ReceiveMode::PerMessage => self.run_per_message(),
        };

        self.logger.info(&format!(
            "{} connection closed ({:?}): {} records queued, {} lines dropped",
            self.peer, exit, self.queued, self.dropped
        ));
        exit
    }

    fn run_persistent(&mut self) -> HandlerExit {
        loop {
            if self.shutdown.is_triggered() {
                self.logger.warn(&format!("🛑 {} disconnected due to shutdown.", self.peer));
                self.discard_pending();
                self.close();
                return HandlerExit::Shutdown;
            }

            match self.receive_chunk() {
                Ok(ReadOutcome::Data) | Ok(ReadOutcome::Retry) => {}
                Ok(ReadOutcome::Empty) => {
                    if self.idle_count > self.settings.idle_limit {
                        self.logger.warn(&format!(
                            "⏰ Ending {} due to lack of data ({} empty reads)",
                            self.peer, self.idle_count
                        ));
                        self.flush_pending();
                        self.stop();
                        return HandlerExit::IdleTimeout;
                    }
                }
                Err(e) => {
                    self.logger.warn(&format!("❌ Error on {}: {}", self.peer, e));
                    self.discard_pending();
                    self.close();
                    return HandlerExit::ConnectionError;
                }
            }
        }
    }

    // One read-decode-queue cycle: stop after the first complete line or the
    // first empty read, whichever comes first.
    fn run_per_message(&mut self) -> HandlerExit {
        loop {
            if self.shutdown.is_triggered() {
                self.close();
                return HandlerExit::Shutdown;
            }

            let seen_before = self.lines_seen;
            match self.receive_chunk() {
                Ok(ReadOutcome::Data) if self.lines_seen > seen_before => break,
                Ok(ReadOutcome::Data) | Ok(ReadOutcome::Retry) => {}
                Ok(ReadOutcome::Empty) => break,
                Err(e) => {
                    self.logger.warn(&format!("❌ Error on {}: {}", self.peer, e));
                    self.close();
                    return HandlerExit::ConnectionError;
                }
            }
        }

        self.flush_pending();
        self.close();
        HandlerExit::MessageHandled
    }

    /// Read one chunk, echo it, and queue every complete line it finishes.
    fn receive_chunk(&mut self) -> io::Result<ReadOutcome> {
        match self.stream.read(&mut self.buf) {
            Ok(0) => {
                self.idle_count += 1;
                thread::sleep(self.settings.idle_sleep);
                Ok(ReadOutcome::Empty)
            }
            Ok(n) => {
                self.idle_count = 0;
                // Echo is the sender's acknowledgement.
                self.stream.write_all(&self.buf[..n])?;
                self.pending.extend_from_slice(&self.buf[..n]);
                self.flush_lines();
                Ok(ReadOutcome::Data)
            }
            // Only reachable with a read timeout configured.
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                self.idle_count += 1;
                Ok(ReadOutcome::Empty)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(ReadOutcome::Retry),
            Err(e) => Err(e),
        }
    }

    fn flush_lines(&mut self) {
        loop {
            let Some(offset) = self.pending[self.scanned..].iter().position(|&b| b == b'\n') else {
                break;
            };
            let line = self.pending.split_to(self.scanned + offset + 1);
            self.scanned = 0;
            self.queue_line(&line);
        }
        self.scanned = self.pending.len();
    }

    // A sender that stops without a trailing newline still delivered a line.
    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            let rest = self.pending.split();
            self.scanned = 0;
            self.queue_line(&rest);
        }
    }

    fn discard_pending(&mut self) {
        if !self.pending.is_empty() {
            self.logger.warn(&format!(
                "⚠️ Discarding {} unterminated bytes from {}",
                self.pending.len(),
                self.peer
            ));
            self.pending.clear();
            self.scanned = 0;
        }
    }

    fn queue_line(&mut self, line: &[u8]) {
        if line.iter().all(|b| b.is_ascii_whitespace()) {
            return;
        }
        self.lines_seen += 1;

        match decode_line(line) {
            Ok(record) => {
                if record.is_termination() {
                    self.logger.info(&format!("🏁 {} sent the end-of-stream record", self.peer));
                } else {
                    self.logger.debug(&format!(
                        "📨 From {}: sensor {} t={:.5} value={:.5}",
                        self.peer, record.sensor_id, record.elapsed_seconds, record.value
                    ));
                }
                self.queue.push(record);
                self.queued += 1;
            }
            Err(e) => {
                self.dropped += 1;
                self.logger.warn(&format!("⚠️ Dropping line from {}: {}", self.peer, e));
            }
        }
    }

    /// Stop protocol: close this socket, stop the server, trip the flag.
    fn stop(&mut self) {
        self.close();
        if let Some(server) = &self.server {
            server.close();
        }
        self.shutdown.trigger();
    }

    fn close(&mut self) {
        // The descriptor itself is released when the handler is dropped.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    fn fast_settings(mode: ReceiveMode) -> HandlerSettings {
        HandlerSettings {
            read_buffer_size: 16,
            idle_limit: 5,
            idle_sleep: Duration::from_millis(1),
            read_timeout: None,
            mode,
        }
    }

    // Returns the client end and the handler thread.
    fn start_handler(
        settings: HandlerSettings,
        queue: &SharedQueue<Record>,
        shutdown: &ShutdownToken,
    ) -> (TcpStream, JoinHandle<HandlerExit>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let client = TcpStream::connect(listener.local_addr().expect("addr")).expect("connect");
        let (stream, peer) = listener.accept().expect("accept");
        let handler =
            ConnectionHandler::new(stream, peer, settings, queue.clone(), shutdown.clone(), Logger);
        (client, thread::spawn(move || handler.run()))
    }

    fn read_echo(client: &mut TcpStream, expected: usize) -> Vec<u8> {
        let mut echoed = Vec::new();
        let mut buf = [0u8; 64];
        while echoed.len() < expected {
            let n = client.read(&mut buf).expect("read echo");
            assert!(n > 0, "server closed before echoing everything");
            echoed.extend_from_slice(&buf[..n]);
        }
        echoed
    }

    #[test]
    fn lines_split_across_reads_are_reassembled() {
        let queue = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        let (mut client, handle) =
            start_handler(fast_settings(ReceiveMode::Persistent), &queue, &shutdown);

        // Longer than the 16-byte read buffer, and two lines in one write.
        let payload = b"0,1.00000,23.50000\n1,1.00000,24.25000\n";
        client.write_all(payload).expect("send");
        assert_eq!(read_echo(&mut client, payload.len()), payload.to_vec());
        drop(client);

        assert_eq!(handle.join().expect("handler"), HandlerExit::IdleTimeout);
        assert_eq!(
            queue.drain_available(),
            vec![Record::new(0, 1.0, 23.5), Record::new(1, 1.0, 24.25)]
        );
    }

    #[test]
    fn malformed_lines_are_dropped_and_the_loop_continues() {
        let queue = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        let (mut client, handle) =
            start_handler(fast_settings(ReceiveMode::Persistent), &queue, &shutdown);

        let payload = b"garbage\n\n0,2.0,oops\n1,2.00000,19.00000\n";
        client.write_all(payload).expect("send");
        read_echo(&mut client, payload.len());
        drop(client);

        handle.join().expect("handler");
        assert_eq!(queue.drain_available(), vec![Record::new(1, 2.0, 19.0)]);
    }

    #[test]
    fn idle_timeout_trips_the_shared_flag() {
        let queue = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        let (client, handle) =
            start_handler(fast_settings(ReceiveMode::Persistent), &queue, &shutdown);
        drop(client);

        assert_eq!(handle.join().expect("handler"), HandlerExit::IdleTimeout);
        assert!(shutdown.is_triggered());
        assert!(queue.is_empty());
    }

    #[test]
    fn read_timeout_counts_as_empty_read() {
        let queue = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        let settings = HandlerSettings {
            read_timeout: Some(Duration::from_millis(5)),
            ..fast_settings(ReceiveMode::Persistent)
        };
        // The client stays open but silent.
        let (_client, handle) = start_handler(settings, &queue, &shutdown);

        assert_eq!(handle.join().expect("handler"), HandlerExit::IdleTimeout);
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn existing_shutdown_stops_the_loop_without_reading() {
        let queue = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        shutdown.trigger();
        let (_client, handle) =
            start_handler(fast_settings(ReceiveMode::Persistent), &queue, &shutdown);
        assert_eq!(handle.join().expect("handler"), HandlerExit::Shutdown);
    }

    #[test]
    fn per_message_mode_handles_one_line_then_closes() {
        let queue = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        let (mut client, handle) =
            start_handler(fast_settings(ReceiveMode::PerMessage), &queue, &shutdown);

        client.write_all(b"1,3.00000,21.00000\n").expect("send");
        assert_eq!(handle.join().expect("handler"), HandlerExit::MessageHandled);
        assert_eq!(queue.drain_available(), vec![Record::new(1, 3.0, 21.0)]);
        // One-shot connections never stop the pipeline.
        assert!(!shutdown.is_triggered());

        // Echo was sent, then the server side closed.
        let echoed = read_echo(&mut client, 19);
        assert_eq!(echoed, b"1,3.00000,21.00000\n");
        let mut rest = [0u8; 8];
        assert_eq!(client.read(&mut rest).expect("eof"), 0);
    }

    #[test]
    fn per_message_mode_accepts_unterminated_line_on_close() {
        let queue = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        let (mut client, handle) =
            start_handler(fast_settings(ReceiveMode::PerMessage), &queue, &shutdown);

        client.write_all(b"0,4.00000,22.00000").expect("send");
        client.shutdown(Shutdown::Write).expect("half close");

        assert_eq!(handle.join().expect("handler"), HandlerExit::MessageHandled);
        assert_eq!(queue.drain_available(), vec![Record::new(0, 4.0, 22.0)]);
    }

    #[test]
    fn persistent_mode_queues_unterminated_tail_on_idle_stop() {
        let queue = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        let (mut client, handle) =
            start_handler(fast_settings(ReceiveMode::Persistent), &queue, &shutdown);

        let payload = b"0,1.0,2.0\n1,2.0,3.0";
        client.write_all(payload).expect("send");
        read_echo(&mut client, payload.len());
        client.shutdown(Shutdown::Write).expect("half close");

        assert_eq!(handle.join().expect("handler"), HandlerExit::IdleTimeout);
        assert_eq!(
            queue.drain_available(),
            vec![Record::new(0, 1.0, 2.0), Record::new(1, 2.0, 3.0)]
        );
    }

    #[test]
    fn long_line_arriving_in_many_reads_is_queued_once() {
        let queue = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        let (mut client, handle) =
            start_handler(fast_settings(ReceiveMode::Persistent), &queue, &shutdown);

        // Padding spans well over a hundred 16-byte reads before the newline.
        let mut payload = b"1,5.00000,".to_vec();
        payload.extend(std::iter::repeat_n(b' ', 2000));
        payload.extend_from_slice(b"24.00000\n0,6.00000,25.00000\n");
        for chunk in payload.chunks(100) {
            client.write_all(chunk).expect("send");
        }
        read_echo(&mut client, payload.len());
        drop(client);

        assert_eq!(handle.join().expect("handler"), HandlerExit::IdleTimeout);
        assert_eq!(
            queue.drain_available(),
            vec![Record::new(1, 5.0, 24.0), Record::new(0, 6.0, 25.0)]
        );
    }

    #[test]
    fn reset_by_peer_ends_only_this_connection() {
        let queue = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        let (mut client, handle) =
            start_handler(fast_settings(ReceiveMode::Persistent), &queue, &shutdown);

        client.write_all(b"0,1.0,2.0\n").expect("send");
        // Leaving the echo unread makes the close a reset.
        thread::sleep(Duration::from_millis(50));
        drop(client);

        assert_eq!(handle.join().expect("handler"), HandlerExit::ConnectionError);
        assert!(!shutdown.is_triggered());
        assert_eq!(queue.drain_available(), vec![Record::new(0, 1.0, 2.0)]);
    }
}
