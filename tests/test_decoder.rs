mod common;
use common::*;

use platecascade::detection::decode;
use platecascade::detection::decoder::normalized_center;

#[test]
fn test_decode_scales_center_box_to_corner_pixels() -> anyhow::Result<()> {
    // 640x480 image, center (200, 175), 200x150, class 2 at 0.92
    let row = vec![
        200.0 / 640.0,
        175.0 / 480.0,
        200.0 / 640.0,
        150.0 / 480.0,
        0.95,
        0.01,
        0.05,
        0.92,
    ];
    let outputs = vec![RawOutput::from_rows(&[row])];

    let detections = decode(&outputs, 640, 480, 0.5)?;

    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].bbox, BoundingBox::new(100, 100, 200, 150));
    assert_eq!(detections[0].class_id, 2);
    assert_eq!(detections[0].confidence, 0.92);
    Ok(())
}

#[test]
fn test_decode_excludes_confidence_equal_to_minimum() -> anyhow::Result<()> {
    let at_threshold = vec![0.5, 0.5, 0.25, 0.25, 1.0, 0.5, 0.0];
    let above_threshold = vec![0.5, 0.5, 0.25, 0.25, 1.0, 0.0, 0.5001];
    let outputs = vec![RawOutput::from_rows(&[at_threshold, above_threshold])];

    let detections = decode(&outputs, 100, 100, 0.5)?;

    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class_id, 1);
    assert!(detections.iter().all(|d| d.confidence > 0.5));
    Ok(())
}

#[test]
fn test_decode_ignores_objectness_column() -> anyhow::Result<()> {
    // High objectness but weak class scores
    let row = vec![0.5, 0.5, 0.5, 0.5, 0.99, 0.1, 0.2];
    let detections = decode(&[RawOutput::from_rows(&[row])], 64, 64, 0.3)?;
    assert!(detections.is_empty());
    Ok(())
}

#[test]
fn test_decode_first_maximum_wins() -> anyhow::Result<()> {
    let row = vec![0.5, 0.5, 0.5, 0.5, 1.0, 0.25, 0.75, 0.75];
    let detections = decode(&[RawOutput::from_rows(&[row])], 64, 64, 0.5)?;
    assert_eq!(detections[0].class_id, 1);
    Ok(())
}

#[test]
fn test_decode_keeps_order_across_outputs() -> anyhow::Result<()> {
    let first = RawOutput::from_rows(&[pred_row((16, 16, 8, 8), (64, 64), 0, 0.6, 2)]);
    let second = RawOutput::new(
        vec![1, 2, 7],
        [
            pred_row((40, 40, 8, 8), (64, 64), 1, 0.7, 2),
            pred_row((50, 50, 8, 8), (64, 64), 0, 0.8, 2),
        ]
        .concat(),
    );

    let detections = decode(&[first, second], 64, 64, 0.5)?;

    let confidences: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
    assert_eq!(confidences, vec![0.6, 0.7, 0.8]);
    assert_eq!(detections[1].bbox, BoundingBox::new(36, 36, 8, 8));
    Ok(())
}

#[test]
fn test_decode_empty_output_is_not_an_error() -> anyhow::Result<()> {
    let outputs = vec![RawOutput::new(vec![0, 85], Vec::new())];
    assert!(decode(&outputs, 64, 64, 0.5)?.is_empty());
    assert!(decode(&[], 64, 64, 0.5)?.is_empty());
    Ok(())
}

#[test]
fn test_decode_rejects_malformed_shapes() {
    let wrong_rank = RawOutput::new(vec![1, 1, 1, 7], vec![0.0; 7]);
    let wrong_length = RawOutput::new(vec![2, 7], vec![0.0; 7]);
    let too_narrow = RawOutput::new(vec![1, 5], vec![0.0; 5]);
    let batched = RawOutput::new(vec![2, 1, 7], vec![0.0; 14]);

    for output in [wrong_rank, wrong_length, too_narrow, batched] {
        let result = decode(&[output], 64, 64, 0.5);
        assert!(matches!(result, Err(CascadeError::Decode(_))), "{:?}", result);
    }
}

#[test]
fn test_decode_rejects_out_of_range_box_values() {
    let huge = vec![1e7, 0.5, 1e7, 0.5, 1.0, 0.9];
    let infinite = vec![0.5, f32::INFINITY, 0.5, 0.5, 1.0, 0.9];
    let not_a_number = vec![0.5, 0.5, f32::NAN, 0.5, 1.0, 0.9];

    for row in [huge, infinite, not_a_number] {
        let result = decode(&[RawOutput::from_rows(&[row])], 640, 480, 0.5);
        assert!(matches!(result, Err(CascadeError::Decode(_))), "{:?}", result);
    }
}

#[test]
fn test_decode_accepts_boxes_reaching_past_the_image() -> anyhow::Result<()> {
    // Partially outside boxes are legal and clamped later
    let row = vec![1.1, -0.1, 0.5, 0.5, 1.0, 0.9];
    let detections = decode(&[RawOutput::from_rows(&[row])], 100, 100, 0.5)?;
    assert_eq!(detections.len(), 1);
    assert!(detections[0].bbox.x > 50);

    // Weak predictions are skipped before their box is looked at
    let weak = vec![f32::NAN, 0.5, 0.5, 0.5, 1.0, 0.1];
    assert!(decode(&[RawOutput::from_rows(&[weak])], 100, 100, 0.5)?.is_empty());
    Ok(())
}

#[test]
fn test_center_corner_round_trip() {
    let boxes = [(200, 175, 200, 150), (10, 10, 4, 6), (0, 0, 2, 2), (63, 31, 20, 12)];
    for &(cx, cy, w, h) in &boxes {
        let bbox = BoundingBox::from_center(cx, cy, w, h);
        assert_eq!(bbox.center(), (cx, cy));
        assert_eq!((bbox.width, bbox.height), (w, h));
    }
}

#[test]
fn test_normalized_center_matches_decode() -> anyhow::Result<()> {
    let bbox = BoundingBox::new(32, 16, 64, 32);
    let mut row = normalized_center(&bbox, 128, 64).to_vec();
    row.extend([1.0, 0.9]);

    let detections = decode(&[RawOutput::from_rows(&[row])], 128, 64, 0.5)?;
    assert_eq!(detections[0].bbox, bbox);
    Ok(())
}
