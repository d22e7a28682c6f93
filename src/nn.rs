//! Detection model wrapper around a pretrained SSD-MobileNet COCO network.
//!
use std::{cmp::Ordering, collections::VecDeque, path::PathBuf, sync::Mutex};

use image::RgbImage;
use ndarray::s;
use smallvec::SmallVec;
use thiserror::Error;
use tract_onnx::prelude::*;

use crate::utils;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = SmallVec<[TValue; 4]>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Input edge length expected by the network.
const NN_INPUT_SIZE: u32 = 300;

const MODEL_FILE: &str = "ssd_mobilenet_v1_10.onnx";
const MODEL_URL: &str = "https://github.com/onnx/models/raw/main/validated/vision/\
                         object_detection_segmentation/ssd-mobilenetv1/model/ssd_mobilenet_v1_10.onnx";

/// Errors from acquiring or running the detection model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to fetch model file: {0}")]
    Fetch(String),
    #[error("failed to load detection model: {0}")]
    Load(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Bounding box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }
}

/// One model output: class label, confidence and bounding box.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
        }
    }
}

pub trait Detector: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, ModelError>;
}

/// Pretrained SSD-MobileNet object detector.
pub struct SsdMobilenet {
    model: NnModel,
    min_confidence: f32,
    max_iou: f32,
}

impl SsdMobilenet {
    /// Load the model, fetching the weights file into the cache directory if
    /// no explicit path is given.
    pub async fn load(
        model_path: Option<PathBuf>,
        min_confidence: f32,
        max_iou: f32,
    ) -> Result<Self, ModelError> {
        let path = match model_path {
            Some(path) => path,
            None => cached_model_path().await?,
        };

        let model = tokio::task::spawn_blocking(move || build_model(&path))
            .await
            .map_err(|err| ModelError::Load(err.to_string()))??;

        Ok(Self {
            model,
            min_confidence,
            max_iou,
        })
    }

    fn preproc(&self, frame: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            frame,
            NN_INPUT_SIZE,
            NN_INPUT_SIZE,
            image::imageops::FilterType::Triangle,
        );

        // The network takes raw u8 pixels in NHWC order and normalizes
        // internally.
        tract_ndarray::Array4::from_shape_fn(
            (1, NN_INPUT_SIZE as usize, NN_INPUT_SIZE as usize, 3),
            |(_, y, x, c)| resized[(x as u32, y as u32)][c],
        )
        .into()
    }
}

impl Detector for SsdMobilenet {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        let (width, height) = frame.dimensions();
        let input = tvec!(self.preproc(frame).into());
        let raw_nn_out = self
            .model
            .run(input)
            .map_err(|err| ModelError::Inference(err.to_string()))?;

        decode_nn_out(raw_nn_out, width, height, self.min_confidence, self.max_iou)
    }
}

fn build_model(path: &std::path::Path) -> Result<NnModel, ModelError> {
    let input_fact = InferenceFact::dt_shape(u8::datum_type(), tvec!(1, 300, 300, 3));

    tract_onnx::onnx()
        .model_for_path(path)
        .and_then(|model| model.with_input_fact(0, input_fact))
        .and_then(|model| model.into_optimized())
        .and_then(|model| model.into_runnable())
        .map_err(|err| ModelError::Load(err.to_string()))
}

async fn cached_model_path() -> Result<PathBuf, ModelError> {
    let path = dirs::cache_dir()
        .ok_or_else(|| ModelError::Fetch("no cache directory on this system".into()))?
        .join("camwatch")
        .join(MODEL_FILE);

    if !path.exists() {
        log::info!("fetching model to {}", path.display());
        let client = reqwest::Client::new();
        utils::download_file(&client, MODEL_URL, &path)
            .await
            .map_err(|err| ModelError::Fetch(err.to_string()))?;
    }

    Ok(path)
}

/// Map the raw network output to pixel-space detections.
///
/// The network emits `(num_detections, boxes, scores, classes)` with boxes as
/// `[y_tl, x_tl, y_br, x_br]` normalized to `0..1`. Candidates below the
/// confidence floor or without a named class are dropped, the rest are scaled
/// to frame pixels and deduplicated per class.
fn decode_nn_out(
    raw_nn_out: NnOut,
    frame_width: u32,
    frame_height: u32,
    min_confidence: f32,
    max_iou: f32,
) -> Result<Vec<Detection>, ModelError> {
    let as_view = |index: usize| {
        raw_nn_out[index]
            .to_array_view::<f32>()
            .map_err(|err| ModelError::Inference(err.to_string()))
    };

    let num_detections = as_view(0)?.iter().next().copied().unwrap_or(0.0) as usize;
    let boxes = as_view(1)?;
    let boxes = boxes.slice(s![0, .., ..]);
    let scores = as_view(2)?;
    let scores = scores.slice(s![0, ..]);
    let classes = as_view(3)?;
    let classes = classes.slice(s![0, ..]);

    let (width, height) = (frame_width as f32, frame_height as f32);

    let mut candidates = Vec::new();
    for i in 0..num_detections.min(scores.len()) {
        let confidence = scores[i];
        if confidence < min_confidence {
            continue;
        }
        let label = match label_for(classes[i] as usize) {
            Some(label) => label,
            None => continue,
        };

        let (y_tl, x_tl) = (boxes[[i, 0]], boxes[[i, 1]]);
        let (y_br, x_br) = (boxes[[i, 2]], boxes[[i, 3]]);
        let bbox = BBox::new(
            x_tl * width,
            y_tl * height,
            (x_br - x_tl) * width,
            (y_br - y_tl) * height,
        );

        candidates.push(Detection::new(label, confidence, bbox));
    }

    candidates.sort_by(|a, b| {
        a.confidence
            .partial_cmp(&b.confidence)
            .unwrap_or(Ordering::Equal)
    });

    Ok(non_maximum_suppression(candidates, max_iou))
}

/// Run non-maximum-suppression on candidate detections.
///
/// Candidates must be sorted by ascending confidence. The most confident
/// detection is taken from the back and any remaining detection of the same
/// class overlapping it with an IoU above `max_iou` is discarded. Different
/// classes never suppress each other.
fn non_maximum_suppression(mut candidates: Vec<Detection>, max_iou: f32) -> Vec<Detection> {
    let mut selected: Vec<Detection> = Vec::new();
    'candidates: while let Some(candidate) = candidates.pop() {
        for kept in &selected {
            if kept.label == candidate.label && iou(&kept.bbox, &candidate.bbox) > max_iou {
                continue 'candidates;
            }
        }
        selected.push(candidate);
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(a: &BBox, b: &BBox) -> f32 {
    let left = a.x.max(b.x);
    let top = a.y.max(b.y);
    let right = (a.x + a.width).min(b.x + b.width);
    let bottom = (a.y + a.height).min(b.y + b.height);

    let overlap = (right - left).max(0.0) * (bottom - top).max(0.0);

    overlap / (a.area() + b.area() - overlap + EPS)
}

/// Class name for a COCO category id, if the id names one.
///
/// The network reports the 91-slot COCO category ids, which contain gaps;
/// detections falling into a gap carry no usable label.
pub fn label_for(class_id: usize) -> Option<&'static str> {
    match COCO_LABELS.get(class_id) {
        Some(&"") | None => None,
        Some(&label) => Some(label),
    }
}

#[rustfmt::skip]
const COCO_LABELS: [&str; 91] = [
    "", "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train",
    "truck", "boat", "traffic light", "fire hydrant", "", "stop sign",
    "parking meter", "bench", "bird", "cat", "dog", "horse", "sheep", "cow",
    "elephant", "bear", "zebra", "giraffe", "", "backpack", "umbrella", "",
    "", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard",
    "sports ball", "kite", "baseball bat", "baseball glove", "skateboard",
    "surfboard", "tennis racket", "bottle", "", "wine glass", "cup", "fork",
    "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "", "dining table", "", "", "toilet", "",
    "tv", "laptop", "mouse", "remote", "keyboard", "cell phone", "microwave",
    "oven", "toaster", "sink", "refrigerator", "", "book", "clock", "vase",
    "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Scripted detector for tests and demos: pops queued results, then keeps
/// returning the fallback detections.
pub struct StubDetector {
    script: Mutex<VecDeque<Result<Vec<Detection>, ModelError>>>,
    fallback: Vec<Detection>,
}

impl StubDetector {
    pub fn new(script: Vec<Result<Vec<Detection>, ModelError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Vec::new(),
        }
    }

    /// Detector that reports the same detections on every call.
    pub fn repeating(detections: Vec<Detection>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: detections,
        }
    }
}

impl Detector for StubDetector {
    fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>, ModelError> {
        match self.script.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self.fallback.clone()),
        }
    }
}
