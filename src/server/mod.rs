// === IMPORTS ===

// Standard library type for holding an IP address and port together.
use std::net::{SocketAddr, TcpListener, TcpStream};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

// Arc for shared ownership across threads; Mutex guards the listening socket
// so `close()` can drop it while the accept loop is between polls.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

// One OS thread per connection plus the accept thread.
use std::thread::{self, JoinHandle};

use std::io::ErrorKind;

// === MODULES ===

// Per-connection receive loop.
pub mod handler;

// Periodic queue length reports.
pub mod monitor;

use crate::codec::Record;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::logger::Logger;
use crate::queue::SharedQueue;
use crate::shutdown::ShutdownToken;

use handler::{ConnectionHandler, HandlerSettings};

// === TYPES ===

// State behind every `ServerControl` clone.
struct ListenerState {
    // `None` once closed; dropping the listener closes the socket.
    socket: Mutex<Option<TcpListener>>,
    stopped: AtomicBool,
    shutdown: ShutdownToken,
    logger: Logger,
}

/// Cheap, clonable handle that can stop the server from any thread.
///
/// Handlers hold one so an idle timeout can tear the whole server down.
#[derive(Clone)]
pub struct ServerControl {
    state: Arc<ListenerState>,
}

impl ServerControl {
    fn socket(&self) -> MutexGuard<'_, Option<TcpListener>> {
        self.state
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stop accepting: mark the server stopped, trip the shutdown flag and
    /// close the listening socket.
    ///
    /// Safe to call any number of times from any thread. Returns `true` only
    /// for the call that actually closed the socket.
    pub fn close(&self) -> bool {
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.shutdown.trigger();

        let closed = self.socket().take();
        match closed {
            Some(listener) => {
                drop(listener);
                self.state.logger.info("🧹 Listening socket closed.");
                true
            }
            None => false,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }
}

/// Owns the listening socket and spawns one handler thread per connection.
pub struct IngestionServer {
    config: ServerConfig,
    local_addr: SocketAddr,
    control: ServerControl,
    queue: SharedQueue<Record>,
    shutdown: ShutdownToken,
    active_connections: Arc<AtomicUsize>,
    logger: Logger,
}

/// Returned by [`IngestionServer::spawn`]: the accept thread plus a control
/// handle.
pub struct ServerHandle {
    local_addr: SocketAddr,
    control: ServerControl,
    join: JoinHandle<Result<(), ServerError>>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn control(&self) -> ServerControl {
        self.control.clone()
    }

    pub fn close(&self) -> bool {
        self.control.close()
    }

    /// Wait for the accept loop to finish.
    pub fn join(self) -> Result<(), ServerError> {
        match self.join.join() {
            Ok(result) => result,
            Err(_) => Err(ServerError::Io(std::io::Error::other(
                "accept thread panicked",
            ))),
        }
    }
}

// === BIND ===

impl IngestionServer {
    /// Bind the configured address. Failure here (port in use, bad address)
    /// is returned straight to the caller; there is no retry.
    pub fn bind(
        config: ServerConfig,
        queue: SharedQueue<Record>,
        shutdown: ShutdownToken,
        logger: Logger,
    ) -> Result<Self, ServerError> {
        config.validate()?;

        // Build the "host:port" string so the OS knows where to listen
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr).map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr()?;

        // The accept loop polls so it can notice the shutdown flag and a
        // concurrent `close()`.
        listener.set_nonblocking(true)?;

        logger.info(&format!("🚀 Ingestion server listening on {}", local_addr));

        let control = ServerControl {
            state: Arc::new(ListenerState {
                socket: Mutex::new(Some(listener)),
                stopped: AtomicBool::new(false),
                shutdown: shutdown.clone(),
                logger,
            }),
        };

        Ok(IngestionServer {
            config,
            local_addr,
            control,
            queue,
            shutdown,
            active_connections: Arc::new(AtomicUsize::new(0)),
            logger,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn control(&self) -> ServerControl {
        self.control.clone()
    }

    pub fn close(&self) -> bool {
        self.control.close()
    }

    /// Handler threads still running.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Run the accept loop on a dedicated thread.
    pub fn spawn(self) -> Result<ServerHandle, ServerError> {
        let local_addr = self.local_addr;
        let control = self.control.clone();
        let name = "daq-accept".to_string();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .map_err(|source| ServerError::Spawn { name, source })?;

        Ok(ServerHandle {
            local_addr,
            control,
            join,
        })
    }

    // === CONNECTIONS ===

    /// Accept connections until the shutdown flag is set or the listening
    /// socket is closed, spawning a handler thread for each one.
    pub fn run(&self) -> Result<(), ServerError> {
        self.logger.info("Starting server thread");

        loop {
            if self.shutdown.is_triggered() || self.control.is_stopped() {
                self.logger.info("🧹 Server received shutdown signal.");
                break;
            }

            // Hold the lock only for one non-blocking accept so `close()`
            // never waits long.
            let accepted = {
                let socket = self.control.socket();
                match socket.as_ref() {
                    Some(listener) => listener.accept(),
                    None => break,
                }
            };

            match accepted {
                Ok((stream, addr)) => self.handle_new_connection(stream, addr),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(self.config.accept_poll());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                // e.g. too many open files: warn and pause briefly
                Err(e) => {
                    self.logger.warn(&format!("⚠️ Failed to accept connection: {}", e));
                    thread::sleep(self.config.accept_error_backoff());
                }
            }
        }

        // Nothing may connect once the loop is gone.
        self.control.close();
        Ok(())
    }

    /// Prepare the accepted socket and hand it to its own thread.
    fn handle_new_connection(&self, stream: TcpStream, addr: SocketAddr) {
        // Accepted sockets may inherit non-blocking mode from the listener.
        if let Err(e) = stream.set_nonblocking(false) {
            self.logger.warn(&format!("⚠️ Failed to make {} blocking: {}", addr, e));
        }
        // Small acknowledgements go out immediately
        if let Err(e) = stream.set_nodelay(true) {
            self.logger.warn(&format!("⚠️ Failed to set TCP_NODELAY for {}: {}", addr, e));
        }

        let handler = ConnectionHandler::new(
            stream,
            addr,
            HandlerSettings::from(&self.config),
            self.queue.clone(),
            self.shutdown.clone(),
            self.logger,
        )
        .with_server(self.control.clone());

        let active = Arc::clone(&self.active_connections);
        let current = active.fetch_add(1, Ordering::SeqCst) + 1;
        self.logger.info(&format!("🔌 {} connected. Active connections: {}", addr, current));

        let logger = self.logger;
        let spawned = thread::Builder::new()
            .name(format!("daq-conn-{}", addr))
            .spawn(move || {
                handler.run();
                let remaining = active.fetch_sub(1, Ordering::SeqCst) - 1;
                logger.info(&format!("🔌 {} disconnected. Active connections: {}", addr, remaining));
            });

        // The handler (and its socket) was moved into the failed closure and
        // is already dropped; only the counter needs fixing.
        if let Err(e) = spawned {
            self.active_connections.fetch_sub(1, Ordering::SeqCst);
            self.logger.error(&format!("Failed to spawn handler for {}: {}", addr, e));
        }
    }
}
