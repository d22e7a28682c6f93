//! The fixed-period detection loop.
//!
use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use tokio::{
    task,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    alert::{AlertPolicy, Notifier},
    annotate::{self, OverlaySurface},
    config::WatchConfig,
    meter::Meter,
    nn::{Detector, ModelError, SsdMobilenet},
    sensors::FrameSource,
};

/// Result of a single detection cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CycleOutcome {
    /// Detector, annotator and alert policy all ran.
    Completed,
    /// The source had no decodable frame; nothing was touched.
    NotReady,
    /// Inference failed; annotation and alerting were skipped.
    InferenceFailed,
    /// The loop was stopped mid-cycle; the result was discarded.
    Cancelled,
}

/// Periodic capture → detect → annotate → alert loop.
///
/// Exactly one cycle is active at a time: cycles execute inline between
/// ticks, and ticks elapsing during a slow cycle are skipped, not queued.
pub struct Watcher {
    config: WatchConfig,
    source: Arc<dyn FrameSource>,
    detector: Arc<dyn Detector>,
    notifier: Arc<dyn Notifier>,
    overlay: Arc<Mutex<OverlaySurface>>,
    policy: AlertPolicy,
    meter: Arc<Meter>,
    cancel: CancellationToken,
}

impl Watcher {
    /// Build a watcher around an already-loaded detector.
    pub fn new(
        config: WatchConfig,
        source: Arc<dyn FrameSource>,
        detector: Arc<dyn Detector>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let policy = AlertPolicy::new(config.cooldown, config.rules.clone());
        Self {
            config,
            source,
            detector,
            notifier,
            overlay: Arc::new(Mutex::new(OverlaySurface::new())),
            policy,
            meter: Arc::new(Meter::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Load the detection model per `config`, then build the watcher.
    ///
    /// Suspends until the model is ready. A failure here is fatal to the
    /// session; there is no retry.
    pub async fn start(
        config: WatchConfig,
        source: Arc<dyn FrameSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ModelError> {
        log::info!("loading detection model");
        let detector = SsdMobilenet::load(
            config.model_path.clone(),
            config.min_confidence,
            config.max_iou,
        )
        .await?;
        log::info!("detection model ready");

        Ok(Self::new(config, source, Arc::new(detector), notifier))
    }

    /// Token stopping the loop. Results of an in-flight cycle are discarded.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared overlay surface carrying the latest annotations.
    pub fn overlay(&self) -> Arc<Mutex<OverlaySurface>> {
        Arc::clone(&self.overlay)
    }

    pub fn meter(&self) -> Arc<Meter> {
        Arc::clone(&self.meter)
    }

    /// Drive detection cycles at the configured period until cancelled.
    pub async fn run(mut self) {
        log::info!("watch loop running (period {:?})", self.config.period);

        let mut ticker = interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if self.cycle().await == CycleOutcome::Cancelled {
                        break;
                    }
                }
            }
        }

        log::info!("watch loop stopped");
    }

    /// Run one capture → detect → annotate → alert cycle.
    async fn cycle(&mut self) -> CycleOutcome {
        if !self.source.ready() {
            self.meter.tick_not_ready();
            return CycleOutcome::NotReady;
        }
        let Some((width, height)) = self.source.dimensions() else {
            self.meter.tick_not_ready();
            return CycleOutcome::NotReady;
        };
        let Some(frame) = self.source.grab() else {
            self.meter.tick_not_ready();
            return CycleOutcome::NotReady;
        };

        // Alert timing references the cycle start, not the moment inference
        // finishes.
        let now = Instant::now();

        self.overlay.lock().unwrap().match_size(width, height);

        let detector = Arc::clone(&self.detector);
        let result = task::spawn_blocking(move || detector.detect(&frame)).await;

        if self.cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let detections = match result {
            Ok(Ok(detections)) => detections,
            Ok(Err(err)) => {
                log::warn!("skipping cycle: {err}");
                self.meter.tick_failure();
                return CycleOutcome::InferenceFailed;
            }
            Err(err) => {
                log::warn!("skipping cycle: inference task died: {err}");
                self.meter.tick_failure();
                return CycleOutcome::InferenceFailed;
            }
        };

        annotate::draw_detections(&mut self.overlay.lock().unwrap(), &detections);

        let warnings = self.policy.evaluate(&detections, now);
        for warning in &warnings {
            self.notifier.warn(warning);
        }

        self.meter.tick_cycle();
        self.meter.add_detections(detections.len() as u64);
        log::debug!(
            "cycle done: {} detections, {} warnings",
            detections.len(),
            warnings.len()
        );

        CycleOutcome::Completed
    }
}
