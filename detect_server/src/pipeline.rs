//! Annotation pipeline: frame in, frame with boxes and labels out.
//!
//! The canonical pixel order inside the server is RGB. Sources that deliver
//! BGR data are converted once at ingest via [`PixelOrder`]; drawing and
//! display encoding always operate on RGB buffers.
use std::sync::Arc;

use async_stream::stream;
use futures::{pin_mut, Stream, StreamExt};
use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_hollow_rect_mut, draw_text_mut},
    rect::Rect,
};
use lazy_static::lazy_static;

use crate::nn::{DetectError, Detection, Detector, CLASS_METAL, CLASS_PLASTIC};

/// Default confidence threshold for label resolution.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_SCALE: f32 = 16.0;
/// Vertical offset of the label text above the box's top-left corner.
const TEXT_OFFSET: i32 = 10;

/// Pixel order of an incoming raster buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrder {
    Rgb,
    Bgr,
}

/// Resolved category label of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Metal,
    Plastic,
    Other,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Metal => "metal",
            Label::Plastic => "plastic",
            Label::Other => "other",
        }
    }
}

/// Resolve the label for a detection.
///
/// Below the threshold the label is unconditionally `Other`, regardless of
/// class. The threshold never suppresses drawing, only the label text.
pub fn resolve_label(class_id: u32, score: f32, threshold: f32) -> Label {
    if score < threshold {
        return Label::Other;
    }
    match class_id {
        CLASS_METAL => Label::Metal,
        CLASS_PLASTIC => Label::Plastic,
        _ => Label::Other,
    }
}

/// What gets drawn for one detection.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    /// Integer-rounded bounding box, corners inclusive.
    pub rect: Rect,
    /// Text drawn next to the box, `"{label} {score:.2}"`.
    pub text: String,
    /// Top-left anchor of the text, slightly above the box.
    pub text_anchor: (i32, i32),
}

impl Annotation {
    fn resolve(detection: &Detection, threshold: f32) -> Self {
        let label = resolve_label(detection.class_id, detection.score, threshold);

        let x1 = detection.bbox[0].round() as i32;
        let y1 = detection.bbox[1].round() as i32;
        let x2 = detection.bbox[2].round() as i32;
        let y2 = detection.bbox[3].round() as i32;

        // Corners are inclusive; degenerate boxes still get a 1px rectangle.
        let width = (x2 - x1 + 1).max(1) as u32;
        let height = (y2 - y1 + 1).max(1) as u32;

        Self {
            rect: Rect::at(x1, y1).of_size(width, height),
            text: format!("{} {:.2}", label.as_str(), detection.score),
            text_anchor: (x1, (y1 - TEXT_OFFSET).max(0)),
        }
    }
}

/// Runs detection on frames and draws the results in place.
///
/// The detector is an explicitly passed-in dependency so that tests can
/// substitute a fake one.
pub struct Annotator {
    detector: Box<dyn Detector + Send + Sync>,
    threshold: f32,
}

impl Annotator {
    pub fn new(detector: Box<dyn Detector + Send + Sync>, threshold: f32) -> Self {
        Self {
            detector,
            threshold,
        }
    }

    /// Detect objects on an RGB frame and draw one rectangle and label per
    /// detection, mutating the frame in place.
    ///
    /// Every detection is drawn; the confidence threshold only decides
    /// whether the label names the class or falls back to "other". Returns
    /// the resolved annotations.
    pub fn annotate(&self, frame: &mut RgbImage) -> Result<Vec<Annotation>, DetectError> {
        let detections = self.detector.detect(frame)?;

        let annotations: Vec<Annotation> = detections
            .iter()
            .map(|detection| Annotation::resolve(detection, self.threshold))
            .collect();

        for annotation in &annotations {
            draw_hollow_rect_mut(frame, annotation.rect, BOX_COLOR);
            draw_text_mut(
                frame,
                BOX_COLOR,
                annotation.text_anchor.0,
                annotation.text_anchor.1,
                rusttype::Scale {
                    x: TEXT_SCALE,
                    y: TEXT_SCALE,
                },
                &DEJAVU_MONO,
                &annotation.text,
            );
        }

        Ok(annotations)
    }

    /// Like [`Annotator::annotate`], but converts a BGR buffer to canonical
    /// RGB first. The frame stays RGB afterwards.
    pub fn annotate_with_order(
        &self,
        frame: &mut RgbImage,
        order: PixelOrder,
    ) -> Result<Vec<Annotation>, DetectError> {
        if order == PixelOrder::Bgr {
            swap_channels(frame);
        }
        self.annotate(frame)
    }
}

/// Annotate every frame of a source.
///
/// The source is a lazy sequence of frames: finite for a single uploaded
/// image, unbounded for a live camera feed. Both HTTP callers go through
/// this single entry point.
pub fn annotate_frames<S>(
    annotator: Arc<Annotator>,
    frames: S,
) -> impl Stream<Item = Result<RgbImage, DetectError>>
where
    S: Stream<Item = RgbImage>,
{
    stream! {
        pin_mut!(frames);
        while let Some(mut frame) = frames.next().await {
            match annotator.annotate(&mut frame) {
                Ok(_) => yield Ok(frame),
                Err(e) => yield Err(e),
            }
        }
    }
}

fn swap_channels(frame: &mut RgbImage) {
    for pixel in frame.pixels_mut() {
        pixel.0.swap(0, 2);
    }
}

lazy_static! {
    static ref DEJAVU_MONO: rusttype::Font<'static> = {
        let font_data: &[u8] = include_bytes!("../resources/DejaVuSansMono.ttf");
        rusttype::Font::try_from_bytes(font_data).expect("failed to load font")
    };
}

#[cfg(test)]
mod test {

    use super::*;

    #[test]
    fn labels_resolve_by_class_above_threshold() {
        assert_eq!(resolve_label(0, 0.9, 0.5), Label::Metal);
        assert_eq!(resolve_label(1, 0.5, 0.5), Label::Plastic);
        assert_eq!(resolve_label(2, 0.9, 0.5), Label::Other);
        assert_eq!(resolve_label(17, 1.0, 0.5), Label::Other);
    }

    #[test]
    fn labels_below_threshold_are_other_regardless_of_class() {
        assert_eq!(resolve_label(0, 0.49, 0.5), Label::Other);
        assert_eq!(resolve_label(1, 0.0, 0.5), Label::Other);
        assert_eq!(resolve_label(5, 0.2, 0.5), Label::Other);
    }

    #[test]
    fn annotation_formats_text_and_anchor() {
        let detection = Detection {
            bbox: [10.0, 10.0, 50.0, 50.0],
            score: 0.9,
            class_id: 0,
        };

        let annotation = Annotation::resolve(&detection, 0.5);

        assert_eq!(annotation.text, "metal 0.90");
        assert_eq!(annotation.text_anchor, (10, 0));
        assert_eq!(annotation.rect, Rect::at(10, 10).of_size(41, 41));
    }

    #[test]
    fn annotation_anchor_is_clamped_to_the_image() {
        let detection = Detection {
            bbox: [4.0, 5.0, 20.0, 20.0],
            score: 0.7,
            class_id: 1,
        };

        let annotation = Annotation::resolve(&detection, 0.5);

        assert_eq!(annotation.text_anchor, (4, 0));
    }

    #[test]
    fn annotation_rounds_box_coordinates() {
        let detection = Detection {
            bbox: [10.4, 9.6, 49.5, 50.2],
            score: 0.8,
            class_id: 0,
        };

        let annotation = Annotation::resolve(&detection, 0.5);

        assert_eq!(annotation.rect, Rect::at(10, 10).of_size(41, 41));
    }
}
