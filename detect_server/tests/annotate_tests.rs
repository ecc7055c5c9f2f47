//! Pipeline behavior with a substituted detector.
use std::sync::Arc;

use futures::StreamExt;
use image::{Rgb, RgbImage};

use detect_server::nn::{DetectError, Detection, Detector};
use detect_server::pipeline::{annotate_frames, Annotator, PixelOrder};

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

struct FakeDetector {
    detections: Vec<Detection>,
}

impl Detector for FakeDetector {
    fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        Ok(self.detections.clone())
    }
}

struct FailingDetector;

impl Detector for FailingDetector {
    fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        Err(DetectError::InferenceFailed("model exploded".into()))
    }
}

fn detection(bbox: [f32; 4], score: f32, class_id: u32) -> Detection {
    Detection {
        bbox,
        score,
        class_id,
    }
}

fn annotator(detections: Vec<Detection>) -> Annotator {
    Annotator::new(Box::new(FakeDetector { detections }), 0.5)
}

fn white_frame() -> RgbImage {
    RgbImage::from_pixel(100, 100, WHITE)
}

#[test]
fn every_detection_gets_exactly_one_annotation() {
    let annotator = annotator(vec![
        detection([10.0, 10.0, 30.0, 30.0], 0.9, 0),
        detection([40.0, 40.0, 60.0, 60.0], 0.8, 1),
        detection([70.0, 70.0, 90.0, 90.0], 0.3, 0),
    ]);
    let mut frame = white_frame();

    let annotations = annotator.annotate(&mut frame).unwrap();

    assert_eq!(annotations.len(), 3);
    assert_eq!(annotations[0].text, "metal 0.90");
    assert_eq!(annotations[1].text, "plastic 0.80");
    // Below threshold: still drawn, but labeled "other"
    assert_eq!(annotations[2].text, "other 0.30");
}

#[test]
fn frame_dimensions_are_preserved() {
    let annotator = annotator(vec![detection([5.0, 5.0, 95.0, 95.0], 0.9, 1)]);
    let mut frame = white_frame();

    annotator.annotate(&mut frame).unwrap();

    assert_eq!((frame.width(), frame.height()), (100, 100));
}

#[test]
fn metal_detection_is_drawn_with_box_and_label() {
    let annotator = annotator(vec![detection([10.0, 10.0, 50.0, 50.0], 0.9, 0)]);
    let mut frame = white_frame();

    let annotations = annotator.annotate(&mut frame).unwrap();

    assert_eq!(annotations.len(), 1);
    assert_eq!(annotations[0].text, "metal 0.90");
    assert_eq!(annotations[0].text_anchor, (10, 0));

    // Rectangle corners (10,10)-(50,50)
    for (x, y) in [(10, 10), (50, 10), (10, 50), (50, 50)] {
        assert_eq!(*frame.get_pixel(x, y), GREEN, "corner ({x},{y})");
    }
    // Interior stays untouched
    assert_eq!(*frame.get_pixel(30, 30), WHITE);

    // Label text rendered above the box
    let text_pixels = (0..10)
        .flat_map(|y| (10..90).map(move |x| (x, y)))
        .filter(|&(x, y)| *frame.get_pixel(x, y) != WHITE)
        .count();
    assert!(text_pixels > 0, "no label text drawn above the box");
}

#[test]
fn annotation_is_deterministic_across_copies() {
    let detections = vec![
        detection([10.0, 10.0, 50.0, 50.0], 0.9, 0),
        detection([20.0, 60.0, 80.0, 90.0], 0.4, 1),
    ];
    let annotator = annotator(detections);

    let mut first = white_frame();
    let mut second = white_frame();

    let annotations_first = annotator.annotate(&mut first).unwrap();
    let annotations_second = annotator.annotate(&mut second).unwrap();

    assert_eq!(annotations_first, annotations_second);
    assert_eq!(first.as_raw(), second.as_raw());
}

#[test]
fn detector_failure_surfaces_and_leaves_the_frame_untouched() {
    let annotator = Annotator::new(Box::new(FailingDetector), 0.5);
    let mut frame = white_frame();

    let result = annotator.annotate(&mut frame);

    assert!(matches!(result, Err(DetectError::InferenceFailed(_))));
    assert!(frame.pixels().all(|p| *p == WHITE));
}

#[test]
fn bgr_frames_are_converted_to_canonical_rgb() {
    let annotator = annotator(vec![detection([2.0, 2.0, 6.0, 6.0], 0.9, 1)]);

    // A red frame stored in BGR order
    let mut frame = RgbImage::from_pixel(40, 40, Rgb([0, 0, 255]));
    let annotations = annotator
        .annotate_with_order(&mut frame, PixelOrder::Bgr)
        .unwrap();

    assert_eq!(annotations[0].text, "plastic 0.90");
    // Untouched pixels are now canonical RGB red
    assert_eq!(*frame.get_pixel(30, 30), Rgb([255, 0, 0]));
}

#[tokio::test]
async fn frame_sources_of_any_length_run_through_one_pipeline() {
    let annotator = Arc::new(annotator(vec![detection([10.0, 10.0, 50.0, 50.0], 0.9, 0)]));

    // Finite source: a single uploaded image
    let single = annotate_frames(Arc::clone(&annotator), futures::stream::iter([white_frame()]));
    futures::pin_mut!(single);
    let annotated = single.next().await.unwrap().unwrap();
    assert_eq!(*annotated.get_pixel(10, 10), GREEN);
    assert!(single.next().await.is_none());

    // Longer source: consecutive camera frames
    let feed = annotate_frames(
        Arc::clone(&annotator),
        futures::stream::iter([white_frame(), white_frame(), white_frame()]),
    );
    futures::pin_mut!(feed);
    let mut count = 0;
    while let Some(result) = feed.next().await {
        assert_eq!(*result.unwrap().get_pixel(50, 50), GREEN);
        count += 1;
    }
    assert_eq!(count, 3);
}
