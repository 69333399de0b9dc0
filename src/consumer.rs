//! Pull side of the pipeline.
//!
//! The consumer drains everything buffered in the queue once per redraw
//! interval and hands the readings to a [`Renderer`]. The first termination
//! sentinel it sees stops the renderer and the rest of the pipeline.

use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use crate::codec::{Record, SENSOR_INTERNAL, SENSOR_THERMOCOUPLE};
use crate::logger::Logger;
use crate::queue::SharedQueue;
use crate::shutdown::ShutdownToken;

/// Something that displays readings as they arrive.
pub trait Renderer {
    /// Draw a batch of readings, oldest first. Never sees the sentinel.
    fn render(&mut self, points: &[Record]);

    /// Called exactly once when the stream ends.
    fn stop(&mut self);
}

/// Single reader of the shared queue.
pub struct Consumer<R: Renderer> {
    queue: SharedQueue<Record>,
    shutdown: ShutdownToken,
    renderer: R,
    stopped: bool,
    logger: Logger,
}

impl<R: Renderer> Consumer<R> {
    pub fn new(
        queue: SharedQueue<Record>,
        shutdown: ShutdownToken,
        renderer: R,
        logger: Logger,
    ) -> Self {
        Consumer {
            queue,
            shutdown,
            renderer,
            stopped: false,
            logger,
        }
    }

    /// Everything currently buffered, sentinels included. Never blocks.
    pub fn drain_available(&self) -> Vec<Record> {
        self.queue.drain_available()
    }

    /// One redraw step: drain, render the readings that precede the first
    /// sentinel, and stop if a sentinel was seen. Returns the drained batch.
    pub fn tick(&mut self) -> Vec<Record> {
        let batch = self.drain_available();
        if batch.is_empty() || self.stopped {
            return batch;
        }

        let end = batch
            .iter()
            .position(Record::is_termination)
            .unwrap_or(batch.len());

        if end > 0 {
            self.renderer.render(&batch[..end]);
        }
        if end < batch.len() {
            let discarded = batch.len() - end - 1;
            if discarded > 0 {
                self.logger.debug(&format!(
                    "Discarding {} records queued after the end-of-stream record",
                    discarded
                ));
            }
            self.logger.info("🏁 End of stream received.");
            self.stop();
        }
        batch
    }

    /// Tick every `redraw_interval` until a sentinel arrives or the shutdown
    /// flag is set. The renderer is always stopped on return.
    pub fn run(&mut self, redraw_interval: Duration) {
        self.logger.info("Starting plotting thread");
        while !self.stopped && !self.shutdown.is_triggered() {
            self.tick();
            if !self.stopped {
                thread::sleep(redraw_interval);
            }
        }
        self.stop();
    }

    /// Stop the renderer once and trip the shutdown flag.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.renderer.stop();
        self.shutdown.trigger();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }
}

/// Legend label for a sensor channel.
pub fn sensor_label(sensor_id: i32) -> String {
    match sensor_id {
        SENSOR_THERMOCOUPLE => "Thermocouple".to_string(),
        SENSOR_INTERNAL => "Internal".to_string(),
        other => format!("Sensor {}", other),
    }
}

/// Visible range of one chart axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

/// Chart viewport. Starts at x ∈ [0, 5] seconds, y ∈ [0, 30] °C and only
/// ever grows to keep new points visible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    pub x: AxisRange,
    pub y: AxisRange,
}

impl Default for AxisLimits {
    fn default() -> Self {
        AxisLimits {
            x: AxisRange { min: 0.0, max: 5.0 },
            y: AxisRange { min: 0.0, max: 30.0 },
        }
    }
}

impl AxisLimits {
    /// Widen the viewport for point `(x, y)`. Returns whether anything
    /// changed, i.e. whether a full redraw is needed.
    pub fn include(&mut self, x: f64, y: f64) -> bool {
        let before = *self;
        if x >= self.x.max {
            self.x.max *= 2.0;
        }
        if x < self.x.min {
            self.x.min = 0.9 * x;
        }
        if y >= self.y.max {
            self.y.max *= 1.1;
        }
        if y < self.y.min {
            self.y.min = y - 2.0;
        }
        *self != before
    }
}

/// One plotted line.
#[derive(Debug, Clone, Default)]
pub struct Series {
    pub label: String,
    pub points: Vec<(f64, f64)>,
}

/// Live chart kept in memory; each render logs a one-line summary.
#[derive(Debug, Default)]
pub struct ChartRenderer {
    series: BTreeMap<i32, Series>,
    limits: AxisLimits,
    redraws: u64,
    stopped: bool,
    logger: Logger,
}

impl ChartRenderer {
    pub fn new(logger: Logger) -> Self {
        let mut chart = ChartRenderer {
            logger,
            ..ChartRenderer::default()
        };
        for id in [SENSOR_THERMOCOUPLE, SENSOR_INTERNAL] {
            chart.series_mut(id);
        }
        chart
    }

    fn series_mut(&mut self, sensor_id: i32) -> &mut Series {
        self.series.entry(sensor_id).or_insert_with(|| Series {
            label: sensor_label(sensor_id),
            points: Vec::new(),
        })
    }

    pub fn series(&self, sensor_id: i32) -> Option<&Series> {
        self.series.get(&sensor_id)
    }

    pub fn limits(&self) -> AxisLimits {
        self.limits
    }

    /// Full redraws forced by the viewport growing.
    pub fn redraws(&self) -> u64 {
        self.redraws
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Renderer for ChartRenderer {
    fn render(&mut self, points: &[Record]) {
        for record in points {
            self.series_mut(record.sensor_id)
                .points
                .push((record.elapsed_seconds, record.value));
            if self.limits.include(record.elapsed_seconds, record.value) {
                self.redraws += 1;
            }
        }

        if let Some(latest) = points
            .iter()
            .rev()
            .find(|r| r.sensor_id == SENSOR_THERMOCOUPLE)
        {
            self.logger.info(&format!("🌡️ {:.2}", latest.value));
        }

        let counts: Vec<String> = self
            .series
            .values()
            .map(|s| format!("{}={}", s.label, s.points.len()))
            .collect();
        self.logger.debug(&format!(
            "Drew {} points [{}] x=[{:.1}, {:.1}] y=[{:.1}, {:.1}]",
            points.len(),
            counts.join(", "),
            self.limits.x.min,
            self.limits.x.max,
            self.limits.y.min,
            self.limits.y.max
        ));
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.logger.info("🛑 Rendering stopped.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingRenderer {
        batches: Vec<Vec<Record>>,
        stops: usize,
    }

    impl Renderer for RecordingRenderer {
        fn render(&mut self, points: &[Record]) {
            self.batches.push(points.to_vec());
        }

        fn stop(&mut self) {
            self.stops += 1;
        }
    }

    fn consumer() -> (SharedQueue<Record>, ShutdownToken, Consumer<RecordingRenderer>) {
        let queue = SharedQueue::new();
        let shutdown = ShutdownToken::new();
        let consumer = Consumer::new(
            queue.clone(),
            shutdown.clone(),
            RecordingRenderer::default(),
            Logger,
        );
        (queue, shutdown, consumer)
    }

    #[test]
    fn tick_renders_everything_buffered_in_one_pass() {
        let (queue, _, mut consumer) = consumer();
        queue.push(Record::new(0, 0.1, 20.0));
        queue.push(Record::new(1, 0.1, 22.0));

        assert_eq!(consumer.tick().len(), 2);
        assert!(consumer.tick().is_empty());
        assert_eq!(consumer.renderer().batches.len(), 1);
        assert_eq!(consumer.renderer().batches[0].len(), 2);
    }

    #[test]
    fn sentinel_stops_exactly_once() {
        let (queue, shutdown, mut consumer) = consumer();
        queue.push(Record::new(0, 0.1, 20.0));
        queue.push(Record::termination());
        queue.push(Record::new(0, 0.2, 20.5));

        let batch = consumer.tick();
        assert!(batch.iter().any(Record::is_termination));
        assert_eq!(consumer.renderer().batches, vec![vec![Record::new(0, 0.1, 20.0)]]);
        assert_eq!(consumer.renderer().stops, 1);
        assert!(shutdown.is_triggered());

        queue.push(Record::termination());
        consumer.tick();
        consumer.stop();
        assert_eq!(consumer.renderer().stops, 1);
    }

    #[test]
    fn run_returns_on_shutdown_and_stops_renderer() {
        let (_, shutdown, mut consumer) = consumer();
        shutdown.trigger();
        consumer.run(Duration::from_millis(1));
        assert!(consumer.is_stopped());
        assert_eq!(consumer.renderer().stops, 1);
    }

    #[test]
    fn run_ends_at_sentinel() {
        let (queue, _, mut consumer) = consumer();
        queue.push(Record::new(1, 0.5, 25.0));
        queue.push(Record::termination());
        consumer.run(Duration::from_millis(1));
        assert_eq!(consumer.renderer().stops, 1);
        assert_eq!(consumer.renderer().batches.len(), 1);
    }

    #[test]
    fn axis_limits_grow_to_fit() {
        let mut limits = AxisLimits::default();
        assert!(!limits.include(1.0, 20.0));

        assert!(limits.include(5.0, 20.0));
        assert_eq!(limits.x.max, 10.0);

        assert!(limits.include(6.0, 30.0));
        assert!((limits.y.max - 33.0).abs() < 1e-9);

        assert!(limits.include(6.0, -4.0));
        assert_eq!(limits.y.min, -6.0);

        assert!(limits.include(-1.0, 10.0));
        assert!((limits.x.min + 0.9).abs() < 1e-9);
    }

    #[test]
    fn chart_keeps_one_series_per_sensor() {
        let mut chart = ChartRenderer::new(Logger);
        chart.render(&[
            Record::new(0, 0.0, 21.0),
            Record::new(1, 0.0, 23.0),
            Record::new(0, 6.0, 21.5),
            Record::new(4, 6.0, 1.0),
        ]);

        assert_eq!(chart.series(0).map(|s| s.points.len()), Some(2));
        assert_eq!(chart.series(1).map(|s| s.label.as_str()), Some("Internal"));
        assert_eq!(chart.series(4).map(|s| s.label.as_str()), Some("Sensor 4"));
        assert_eq!(chart.limits().x.max, 10.0);
        assert_eq!(chart.redraws(), 1);

        chart.stop();
        assert!(chart.is_stopped());
    }
}
