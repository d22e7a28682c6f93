//! Frame acquisition.
//!
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use rscam::{Camera, Config};

/// Source of frames for the detection loop.
///
/// While `ready` is false the loop treats its cycle as a no-op; `grab`
/// returning `None` is handled the same way.
pub trait FrameSource: Send + Sync {
    fn ready(&self) -> bool;

    /// Native frame dimensions, once known.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Snapshot of the current frame.
    fn grab(&self) -> Option<RgbImage>;
}

/// V4L2 video device streaming MJPG frames.
pub struct Webcam {
    cam: Camera,
    resolution: (u32, u32),
}

impl Webcam {
    /// Open and start a video device on a Linux machine.
    ///
    /// Resolution and frame rate default to the maximum the device reports
    /// for the MJPG format.
    pub fn open(
        device: &str,
        resolution: Option<(u32, u32)>,
        frame_rate: Option<(u32, u32)>,
    ) -> Result<Webcam> {
        let mut cam = Camera::new(device).with_context(|| format!("opening camera {device}"))?;
        let format = b"MJPG";
        log_supported_formats(&cam);

        let resolution = resolution
            .map(Ok)
            .unwrap_or_else(|| get_max_resolution(&cam, format))?;

        let frame_rate = frame_rate
            .map(Ok)
            .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

        log::info!(
            "using camera {} at {}x{}",
            device,
            resolution.0,
            resolution.1
        );

        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format,
            ..Default::default()
        })?;

        Ok(Webcam { cam, resolution })
    }
}

impl FrameSource for Webcam {
    fn ready(&self) -> bool {
        // The device streams from `open` on; `capture` blocks until the
        // driver has a frame.
        true
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some(self.resolution)
    }

    fn grab(&self) -> Option<RgbImage> {
        let frame = match self.cam.capture() {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("error capturing frame: {err}");
                return None;
            }
        };

        match image::load_from_memory(&frame[..]) {
            Ok(image) => Some(image.to_rgb8()),
            Err(err) => {
                log::error!("error decoding frame: {err}");
                None
            }
        }
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            // Map to iterator over ((width, height), num_pixels)
            .map(|res| (res, res.0 * res.1))
            // Get the highest resolution in terms of number of pixels
            .max_by(|a, b| a.1.cmp(&b.1))
            .map(|res| *res.0),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| anyhow!("no resolution found"))
}

/// Get the maximum supported frame rate for the given format and resolution.
fn get_max_frame_rate(cam: &Camera, format: &[u8], resolution: (u32, u32)) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("found frame rates: {:?}", &interval_info);
    match interval_info {
        rscam::IntervalInfo::Discretes(frame_rates) => frame_rates
            .iter()
            // Map discrete values to real frame rate
            .map(|(denominator, numerator)| ((denominator, numerator), numerator / denominator))
            // Get the highest frame rate
            .max_by(|a, b| a.1.cmp(&b.1))
            .map(|((&d, &n), _)| (d, n)),
        rscam::IntervalInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| anyhow!("no frame rate found"))
}

fn log_supported_formats(cam: &Camera) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!("supported formats: {:?}", formats);
}

/// In-memory source with toggleable readiness and a swappable frame.
pub struct StaticSource {
    frame: Mutex<RgbImage>,
    ready: AtomicBool,
}

impl StaticSource {
    pub fn new(frame: RgbImage) -> Self {
        Self {
            frame: Mutex::new(frame),
            ready: AtomicBool::new(true),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Replace the frame, e.g. to emulate a resolution change.
    pub fn swap_frame(&self, frame: RgbImage) {
        *self.frame.lock().unwrap() = frame;
    }
}

impl FrameSource for StaticSource {
    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.ready()
            .then(|| self.frame.lock().unwrap().dimensions())
    }

    fn grab(&self) -> Option<RgbImage> {
        self.ready().then(|| self.frame.lock().unwrap().clone())
    }
}
