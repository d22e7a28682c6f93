//! Loop-level behavior, driven entirely through the stub source, detector
//! and notifier.

use std::{
    sync::{mpsc, Arc, Mutex},
    time::Duration,
};

use camwatch::{
    alert::MemoryNotifier,
    config::{AlertRule, WatchConfig},
    nn::{BBox, Detection, Detector, ModelError, SsdMobilenet, StubDetector},
    sensors::StaticSource,
    watcher::Watcher,
};
use image::RgbImage;
use tokio::time::sleep;

fn person() -> Detection {
    Detection::new("person", 0.9, BBox::new(8.0, 8.0, 24.0, 32.0))
}

fn test_config() -> WatchConfig {
    WatchConfig {
        period: Duration::from_millis(10),
        cooldown: Duration::from_secs(60),
        rules: vec![AlertRule::new("person", 1)],
        ..WatchConfig::default()
    }
}

#[tokio::test]
async fn one_alert_batch_per_cooldown_window() {
    let source = Arc::new(StaticSource::new(RgbImage::new(64, 48)));
    let notifier = Arc::new(MemoryNotifier::new());
    let detector = Arc::new(StubDetector::repeating(vec![person(), person()]));

    let watcher = Watcher::new(test_config(), source, detector, notifier.clone());
    let cancel = watcher.cancel_token();
    let handle = tokio::spawn(watcher.run());

    // Many cycles elapse, all inside one cooldown window.
    sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    handle.await.unwrap();

    let warnings = notifier.warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].label, "person");
    assert_eq!(warnings[0].count, 2);
}

#[tokio::test]
async fn detector_failure_does_not_stop_the_loop() {
    let source = Arc::new(StaticSource::new(RgbImage::new(64, 48)));
    let notifier = Arc::new(MemoryNotifier::new());
    // Two failed cycles, then a qualifying result once.
    let detector = Arc::new(StubDetector::new(vec![
        Err(ModelError::Inference("tensor shape mismatch".into())),
        Err(ModelError::Inference("tensor shape mismatch".into())),
        Ok(vec![person(), person()]),
    ]));

    let watcher = Watcher::new(test_config(), source, detector, notifier.clone());
    let cancel = watcher.cancel_token();
    let handle = tokio::spawn(watcher.run());

    sleep(Duration::from_millis(200)).await;
    cancel.cancel();
    handle.await.unwrap();

    // The loop survived the failures and alerted on the later cycle.
    assert_eq!(notifier.warnings().len(), 1);
}

#[tokio::test]
async fn not_ready_source_keeps_everything_untouched() {
    let source = Arc::new(StaticSource::new(RgbImage::new(64, 48)));
    source.set_ready(false);
    let notifier = Arc::new(MemoryNotifier::new());
    let detector = Arc::new(StubDetector::repeating(vec![person(), person()]));

    let watcher = Watcher::new(test_config(), source, detector, notifier.clone());
    let overlay = watcher.overlay();
    let cancel = watcher.cancel_token();
    let handle = tokio::spawn(watcher.run());

    sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert!(notifier.warnings().is_empty());
    assert_eq!(overlay.lock().unwrap().dimensions(), (0, 0));
}

#[tokio::test]
async fn overlay_follows_source_resolution() {
    let source = Arc::new(StaticSource::new(RgbImage::new(64, 48)));
    let notifier = Arc::new(MemoryNotifier::new());
    let detector = Arc::new(StubDetector::repeating(vec![]));

    let watcher = Watcher::new(test_config(), source.clone(), detector, notifier);
    let overlay = watcher.overlay();
    let cancel = watcher.cancel_token();
    let handle = tokio::spawn(watcher.run());

    sleep(Duration::from_millis(100)).await;
    assert_eq!(overlay.lock().unwrap().dimensions(), (64, 48));

    source.swap_frame(RgbImage::new(32, 24));
    sleep(Duration::from_millis(100)).await;
    assert_eq!(overlay.lock().unwrap().dimensions(), (32, 24));

    cancel.cancel();
    handle.await.unwrap();
}

/// Detector that signals entry, then blocks until released.
struct BlockingDetector {
    entered: mpsc::Sender<()>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl Detector for BlockingDetector {
    fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        self.entered.send(()).ok();
        self.release.lock().unwrap().recv().ok();
        Ok(vec![person(), person()])
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopping_discards_in_flight_detections() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();

    let source = Arc::new(StaticSource::new(RgbImage::new(64, 48)));
    let notifier = Arc::new(MemoryNotifier::new());
    let detector = Arc::new(BlockingDetector {
        entered: entered_tx,
        release: Mutex::new(release_rx),
    });

    let watcher = Watcher::new(test_config(), source, detector, notifier.clone());
    let overlay = watcher.overlay();
    let cancel = watcher.cancel_token();
    let handle = tokio::spawn(watcher.run());

    // Wait until inference is in flight, stop the loop, then let the
    // detector finish.
    entered_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("detector never entered");
    cancel.cancel();
    release_tx.send(()).unwrap();

    handle.await.unwrap();

    // The late result was discarded: nothing drawn, nobody notified.
    assert!(overlay.lock().unwrap().is_blank());
    assert!(notifier.warnings().is_empty());
}

#[tokio::test]
#[ignore = "fetches the pretrained model over the network"]
async fn live_model_detects_nothing_on_a_black_frame() {
    let model = SsdMobilenet::load(None, 0.5, 0.5).await.unwrap();
    let detections = model.detect(&RgbImage::new(640, 480)).unwrap();
    assert!(detections.is_empty());
}
