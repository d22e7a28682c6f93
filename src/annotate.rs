//! Overlay annotation of detections.
//!
use image::{Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use lazy_static::lazy_static;

use crate::nn::Detection;

/// Stroke and label color.
const COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
/// Stroke width of the detection rectangles in pixels.
const STROKE_WIDTH: u32 = 2;
/// Label text height in pixels.
const LABEL_SCALE: f32 = 18.0;
/// Gap between the label and the box edge in pixels.
const LABEL_GAP: i32 = 5;

lazy_static! {
    static ref DEJAVU_MONO: rusttype::Font<'static> = {
        let font_data: &[u8] = include_bytes!("../resources/DejaVuSansMono.ttf");
        rusttype::Font::try_from_bytes(font_data).expect("failed to load font")
    };
}

/// Transparent drawing surface layered over the video frame.
pub struct OverlaySurface {
    image: RgbaImage,
}

impl OverlaySurface {
    pub fn new() -> Self {
        Self {
            image: RgbaImage::new(0, 0),
        }
    }

    /// Resize the surface to the frame dimensions, dropping old content.
    /// A no-op while the dimensions already match.
    pub fn match_size(&mut self, width: u32, height: u32) {
        if self.image.dimensions() != (width, height) {
            self.image = RgbaImage::new(width, height);
        }
    }

    /// Reset every pixel to fully transparent.
    pub fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn is_blank(&self) -> bool {
        self.image.pixels().all(|pixel| pixel[3] == 0)
    }
}

impl Default for OverlaySurface {
    fn default() -> Self {
        Self::new()
    }
}

/// Draw bounding boxes and labels for the detections onto the surface.
///
/// The surface is cleared first, so a call fully replaces the previous
/// cycle's drawing and drawing the same detections twice yields the same
/// pixels.
pub fn draw_detections(surface: &mut OverlaySurface, detections: &[Detection]) {
    surface.clear();

    for detection in detections {
        let x = detection.bbox.x.round() as i32;
        let y = detection.bbox.y.round() as i32;
        let width = (detection.bbox.width.round() as u32).max(1);
        let height = (detection.bbox.height.round() as u32).max(1);

        for inset in 0..STROKE_WIDTH {
            let rect = Rect::at(x + inset as i32, y + inset as i32).of_size(
                width.saturating_sub(2 * inset).max(1),
                height.saturating_sub(2 * inset).max(1),
            );
            draw_hollow_rect_mut(&mut surface.image, rect, COLOR);
        }

        let label = format!("{} {:.0}%", detection.label, detection.confidence * 100.0);
        draw_text_mut(
            &mut surface.image,
            COLOR,
            x,
            y - LABEL_SCALE as i32 - LABEL_GAP,
            rusttype::Scale {
                x: LABEL_SCALE,
                y: LABEL_SCALE,
            },
            &DEJAVU_MONO,
            &label,
        );
    }
}
