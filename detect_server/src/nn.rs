//! Neural network backed waste detection.
//!
use std::{fmt, path::Path};

use image::RgbImage;
use ndarray::s;
use smallvec::SmallVec;
use tract_onnx::prelude::*;

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;
type NnOut = SmallVec<[Arc<Tensor>; 4]>;

/// Class id the model assigns to metal waste.
pub const CLASS_METAL: u32 = 0;
/// Class id the model assigns to plastic waste.
pub const CLASS_PLASTIC: u32 = 1;

/// Failure of a detector to execute on a frame.
///
/// The pipeline performs no retry or recovery; this surfaces to the caller.
#[derive(Debug)]
pub enum DetectError {
    InferenceFailed(String),
}

impl fmt::Display for DetectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DetectError::InferenceFailed(msg) => write!(f, "inference failed: {}", msg),
        }
    }
}

impl std::error::Error for DetectError {}

/// One candidate object instance reported by a detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    /// Bounding box `[x1, y1, x2, y2]` in pixel units, origin top-left.
    pub bbox: [f32; 4],
    /// Confidence score in `[0, 1]`.
    pub score: f32,
    /// Class identifier.
    pub class_id: u32,
}

/// A detector maps a frame to a list of candidate detections.
///
/// Detectors report every candidate the model emits; confidence thresholding
/// is left to the annotation pipeline so that low-confidence detections can
/// still be drawn with a generic label.
pub trait Detector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectError>;
}

/// Pretrained waste-detection model executed with tract.
///
/// The artifact is an ONNX export with non-max suppression embedded. Its
/// single output has shape `[1, N, 6]` with rows
/// `[x1, y1, x2, y2, score, class]` in model-input pixel coordinates.
pub struct WasteModel {
    model: NnModel,
    width: u32,
    height: u32,
}

impl WasteModel {
    /// Load the model from a local ONNX file and prepare it for inference.
    ///
    /// The optimized plan is immutable and inference-only, so there is no
    /// training state to switch off before running it.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let (width, height) = (640, 640);
        let input_fact = InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, 3, height as usize, width as usize),
        );
        let model = tract_onnx::onnx()
            .model_for_path(path)?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            input,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        // Scale pixels to [0, 1], NCHW
        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| resized[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into()
    }
}

impl Detector for WasteModel {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        let valid_input = tvec!(self.preproc(frame));
        let raw_nn_out = self
            .model
            .run(valid_input)
            .map_err(|e| DetectError::InferenceFailed(e.to_string()))?;

        parse_detections(
            raw_nn_out,
            (self.width, self.height),
            (frame.width(), frame.height()),
        )
    }
}

/// Turn the raw model output into detections in source-frame coordinates.
fn parse_detections(
    raw_nn_out: NnOut,
    model_size: (u32, u32),
    frame_size: (u32, u32),
) -> Result<Vec<Detection>, DetectError> {
    let view = raw_nn_out[0]
        .to_array_view::<f32>()
        .map_err(|e| DetectError::InferenceFailed(e.to_string()))?;

    let rows = view
        .into_dimensionality::<ndarray::Ix3>()
        .map_err(|e| DetectError::InferenceFailed(format!("unexpected output shape: {}", e)))?;

    if rows.shape()[2] != 6 {
        return Err(DetectError::InferenceFailed(format!(
            "unexpected output shape {:?}",
            rows.shape()
        )));
    }

    let scale_x = frame_size.0 as f32 / model_size.0 as f32;
    let scale_y = frame_size.1 as f32 / model_size.1 as f32;

    let detections = rows
        .slice(s![0, .., ..])
        .outer_iter()
        .map(|row| Detection {
            bbox: [
                row[0usize] * scale_x,
                row[1usize] * scale_y,
                row[2usize] * scale_x,
                row[3usize] * scale_y,
            ],
            score: row[4usize],
            class_id: row[5usize] as u32,
        })
        .collect();

    Ok(detections)
}

#[cfg(test)]
mod test {

    use super::*;

    fn raw_out(rows: Vec<[f32; 6]>) -> NnOut {
        let n = rows.len();
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let arr = tract_ndarray::Array3::from_shape_vec((1, n, 6), flat).unwrap();
        let tensor: Tensor = arr.into();
        smallvec::smallvec![Arc::new(tensor)]
    }

    #[test]
    fn parse_keeps_all_rows_without_score_filtering() {
        let raw = raw_out(vec![
            [10.0, 10.0, 50.0, 50.0, 0.9, 0.0],
            [100.0, 120.0, 140.0, 180.0, 0.1, 1.0],
        ]);

        let detections = parse_detections(raw, (640, 640), (640, 640)).unwrap();

        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].bbox, [10.0, 10.0, 50.0, 50.0]);
        assert_eq!(detections[0].class_id, CLASS_METAL);
        assert_eq!(detections[1].class_id, CLASS_PLASTIC);
        assert!((detections[1].score - 0.1).abs() < f32::EPSILON);
    }

    #[test]
    fn parse_scales_boxes_to_frame_coordinates() {
        let raw = raw_out(vec![[10.0, 20.0, 50.0, 60.0, 0.8, 1.0]]);

        let detections = parse_detections(raw, (640, 640), (1280, 320)).unwrap();

        assert_eq!(detections[0].bbox, [20.0, 10.0, 100.0, 30.0]);
    }

    #[test]
    fn parse_rejects_unexpected_output_shape() {
        let arr = tract_ndarray::Array3::<f32>::zeros((1, 2, 5));
        let tensor: Tensor = arr.into();
        let raw: NnOut = smallvec::smallvec![Arc::new(tensor)];

        let result = parse_detections(raw, (640, 640), (640, 640));

        assert!(matches!(result, Err(DetectError::InferenceFailed(_))));
    }
}
