use crate::detection::RawOutput;
use crate::error::{CascadeError, Result};
use crate::models::{BoundingBox, Detection};

/// Leading values of a prediction row before the class scores:
/// center x, center y, width, height, objectness
pub const BOX_VALUES: usize = 4;
pub const SCORES_OFFSET: usize = 5;

/// Largest magnitude accepted for a normalized box value
pub const MAX_BOX_EXTENT: f32 = 16.0;

/// Split an output tensor into prediction rows
fn prediction_rows(output: &RawOutput) -> Result<(usize, usize)> {
    let (rows, cols) = match output.shape.as_slice() {
        [rows, cols] => (*rows, *cols),
        [1, rows, cols] => (*rows, *cols),
        shape => {
            return Err(CascadeError::Decode(format!(
                "expected [rows, cols] or [1, rows, cols], got {:?}",
                shape
            )));
        }
    };

    if rows * cols != output.data.len() {
        return Err(CascadeError::Decode(format!(
            "shape {:?} does not match {} values",
            output.shape,
            output.data.len()
        )));
    }

    if rows > 0 && cols <= SCORES_OFFSET {
        return Err(CascadeError::Decode(format!(
            "prediction rows need at least {} values, got {}",
            SCORES_OFFSET + 1,
            cols
        )));
    }

    Ok((rows, cols))
}

/// Index and value of the best class score; the first maximum wins
fn best_class(scores: &[f32]) -> (usize, f32) {
    let mut class_id = 0;
    let mut confidence = scores[0];
    for (i, &score) in scores.iter().enumerate().skip(1) {
        if score > confidence {
            confidence = score;
            class_id = i;
        }
    }
    (class_id, confidence)
}

/// Scale a normalized box value to pixels, rejecting values no detector
/// could produce for this image.
fn scale_box_value(value: f32, extent: f64) -> Result<i32> {
    if !value.is_finite() || value.abs() > MAX_BOX_EXTENT {
        return Err(CascadeError::Decode(format!("box value {} out of range", value)));
    }
    let scaled = value as f64 * extent;
    if scaled.abs() > (i32::MAX / 4) as f64 {
        return Err(CascadeError::Decode(format!(
            "box value {} does not fit an image of {} pixels",
            value, extent
        )));
    }
    Ok(scaled as i32)
}

/// Decode raw detector output into candidate detections.
///
/// A prediction is kept only if its best class score is strictly greater
/// than `min_confidence`. Boxes are scaled from normalized center format to
/// corner format in pixels of the original image. A kept prediction with a
/// non-finite or far out of range box value fails with `Decode`.
pub fn decode(
    outputs: &[RawOutput],
    original_width: u32,
    original_height: u32,
    min_confidence: f32,
) -> Result<Vec<Detection>> {
    let w = original_width as f64;
    let h = original_height as f64;
    let mut detections = Vec::new();

    for output in outputs {
        let (rows, cols) = prediction_rows(output)?;
        if rows == 0 {
            continue;
        }

        for row in output.data.chunks_exact(cols) {
            let (class_id, confidence) = best_class(&row[SCORES_OFFSET..]);
            if !(confidence > min_confidence) {
                continue;
            }

            let center_x = scale_box_value(row[0], w)?;
            let center_y = scale_box_value(row[1], h)?;
            let width = scale_box_value(row[2], w)?;
            let height = scale_box_value(row[3], h)?;

            detections.push(Detection {
                bbox: BoundingBox::from_center(center_x, center_y, width, height),
                class_id,
                confidence,
            });
        }
    }

    debug_assert!(detections.iter().all(|d| d.confidence > min_confidence));
    Ok(detections)
}

/// Normalized `(cx, cy, w, h)` of a box in an image of the given size.
/// Inverse of the box scaling done by [`decode`], up to truncation.
pub fn normalized_center(
    bbox: &BoundingBox,
    image_width: u32,
    image_height: u32,
) -> [f32; BOX_VALUES] {
    let (cx, cy) = bbox.center();
    [
        cx as f32 / image_width as f32,
        cy as f32 / image_height as f32,
        bbox.width as f32 / image_width as f32,
        bbox.height as f32 / image_height as f32,
    ]
}
