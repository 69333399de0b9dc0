use std::fmt;
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::logger::Logger;
use crate::queue::SharedQueue;
use crate::shutdown::ShutdownToken;

// Granularity at which the monitor notices shutdown between reports.
const MONITOR_POLL: Duration = Duration::from_millis(50);

/// Snapshot of the queue for the periodic report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueReport {
    pub length: usize,
    pub total_pushed: u64,
}

impl QueueReport {
    pub fn capture<T>(queue: &SharedQueue<T>) -> Self {
        QueueReport {
            length: queue.len(),
            total_pushed: queue.total_pushed(),
        }
    }
}

impl fmt::Display for QueueReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Queue length is {} ({} received in total)",
            self.length, self.total_pushed
        )
    }
}

/// Spawn a thread that logs the queue length every `interval` until the
/// shutdown flag is set. It only observes; nothing is ever dropped.
pub fn spawn_queue_monitor<T: Send + 'static>(
    queue: SharedQueue<T>,
    shutdown: ShutdownToken,
    interval: Duration,
    logger: Logger,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("daq-queue-monitor".to_string())
        .spawn(move || {
            while !shutdown.wait_timeout(interval, MONITOR_POLL) {
                let report = QueueReport::capture(&queue);
                if report.length > 0 {
                    logger.info(&format!("📊 {}", report));
                } else {
                    logger.debug(&format!("📊 {}", report));
                }
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_reflects_backlog_and_history() {
        let queue = SharedQueue::new();
        queue.push(1);
        queue.push(2);
        queue.try_pop();

        let report = QueueReport::capture(&queue);
        assert_eq!(
            report,
            QueueReport {
                length: 1,
                total_pushed: 2
            }
        );
        assert_eq!(report.to_string(), "Queue length is 1 (2 received in total)");
    }

    #[test]
    fn monitor_stops_with_the_pipeline() {
        let queue: SharedQueue<u32> = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        let handle = spawn_queue_monitor(
            queue.clone(),
            shutdown.clone(),
            Duration::from_millis(10),
            Logger,
        )
        .expect("spawn monitor");

        queue.push(5);
        thread::sleep(Duration::from_millis(40));
        shutdown.trigger();
        handle.join().expect("monitor thread");
        // Reports never consume entries.
        assert_eq!(queue.len(), 1);
    }
}
