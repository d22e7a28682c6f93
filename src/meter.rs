//! Throughput counters for the detection loop.
//!
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tokio::{task::JoinHandle, time::interval};

/// Cycle counters, reset on read.
#[derive(Default)]
pub struct Meter {
    cycles: AtomicU64,
    detections: AtomicU64,
    not_ready: AtomicU64,
    failures: AtomicU64,
}

impl Meter {
    pub const fn new() -> Meter {
        Meter {
            cycles: AtomicU64::new(0),
            detections: AtomicU64::new(0),
            not_ready: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn tick_cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_detections(&self, count: u64) {
        self.detections.fetch_add(count, Ordering::Relaxed);
    }

    pub fn tick_not_ready(&self) {
        self.not_ready.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_reset_cycles(&self) -> u64 {
        self.cycles.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_detections(&self) -> u64 {
        self.detections.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_not_ready(&self) -> u64 {
        self.not_ready.swap(0, Ordering::Relaxed)
    }

    pub fn get_reset_failures(&self) -> u64 {
        self.failures.swap(0, Ordering::Relaxed)
    }
}

/// Periodically log cycle and detection rates.
pub fn spawn_meter_logger(meter: Arc<Meter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut log_interval = interval(Duration::from_secs(5));
        log_interval.tick().await;

        loop {
            let start = Instant::now();
            log_interval.tick().await;

            let cycles = meter.get_reset_cycles();
            let detections = meter.get_reset_detections();
            let not_ready = meter.get_reset_not_ready();
            let failures = meter.get_reset_failures();
            let elapsed = start.elapsed().as_secs_f32();

            if cycles > 0 {
                log::info!(
                    "cycles per second: {:.2}, detections per second: {:.2}",
                    cycles as f32 / elapsed,
                    detections as f32 / elapsed
                );
            }
            if not_ready > 0 {
                log::debug!("cycles without frame data: {not_ready}");
            }
            if failures > 0 {
                log::warn!("failed inference cycles: {failures}");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let meter = Meter::new();
        meter.tick_cycle();
        meter.tick_cycle();
        meter.add_detections(3);
        meter.tick_failure();

        assert_eq!(meter.get_reset_cycles(), 2);
        assert_eq!(meter.get_reset_detections(), 3);
        assert_eq!(meter.get_reset_failures(), 1);
        assert_eq!(meter.get_reset_not_ready(), 0);

        // Reads reset the counters.
        assert_eq!(meter.get_reset_cycles(), 0);
        assert_eq!(meter.get_reset_detections(), 0);
    }
}
