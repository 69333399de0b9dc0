use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::logger::Logger;

/// How often the Ctrl+C listener re-checks the flag while waiting.
const SIGNAL_POLL: Duration = Duration::from_millis(50);

/// One-way cancellation flag shared by the server, every handler and the
/// consumer of one pipeline.
///
/// Cloning yields another handle to the same flag. Once triggered it stays
/// triggered; restarting a pipeline means building a new token.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that flipped it.
    pub fn trigger(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep in `poll` steps until the flag is set or `timeout` elapses.
    /// Returns whether the flag was observed set.
    pub fn wait_timeout(&self, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_triggered() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(poll.min(deadline - now));
        }
    }
}

/// This function spawns a background thread that:
/// - Listens for a Ctrl+C signal (SIGINT) on a small Tokio runtime
/// - Logs the shutdown event
/// - Triggers the token so every loop winds down
///
/// The thread also exits on its own once something else triggers the token.
pub fn spawn_signal_listener(
    shutdown: ShutdownToken,
    logger: Logger,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("daq-signal".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    logger.error(&format!("Failed to build signal runtime: {}", e));
                    return;
                }
            };

            rt.block_on(async {
                let flag_watch = async {
                    while !shutdown.is_triggered() {
                        tokio::time::sleep(SIGNAL_POLL).await;
                    }
                };

                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            logger.error(&format!("Failed to listen for ctrl_c: {}", e));
                            return;
                        }
                        logger.warn("🛑 Ctrl+C received, shutting down.");
                        shutdown.trigger();
                    }
                    _ = flag_watch => {}
                }
            });
        })
}
