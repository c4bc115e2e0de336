use serde::{Deserialize, Serialize};

use crate::models::{BoundingBox, Detection};

/// Whether boxes of different classes may suppress each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionMode {
    /// All candidates compete regardless of class
    #[default]
    Global,
    /// Only candidates of the same class compete
    PerClass,
}

/// Greedy non-maximum suppression.
///
/// Candidates whose confidence is not above `min_confidence` are ignored.
/// Returns indices into the input lists in selection order (descending
/// confidence, lower index first on ties).
pub fn suppress(
    boxes: &[BoundingBox],
    confidences: &[f32],
    class_ids: &[usize],
    min_confidence: f32,
    overlap_threshold: f32,
    mode: SuppressionMode,
) -> Vec<usize> {
    let count = boxes.len().min(confidences.len()).min(class_ids.len());

    let mut candidates: Vec<usize> = (0..count)
        .filter(|&i| confidences[i] > min_confidence)
        .collect();

    // Stable sort keeps equal confidences in input order
    candidates.sort_by(|&a, &b| {
        confidences[b]
            .partial_cmp(&confidences[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut kept: Vec<usize> = Vec::new();

    for candidate in candidates {
        let overlaps_kept = kept.iter().any(|&k| {
            let competes = match mode {
                SuppressionMode::Global => true,
                SuppressionMode::PerClass => class_ids[k] == class_ids[candidate],
            };
            competes && boxes[k].iou(&boxes[candidate]) > overlap_threshold
        });

        if !overlaps_kept {
            kept.push(candidate);
        }
    }

    kept
}

/// Run [`suppress`] over decoded detections
pub fn suppress_detections(
    detections: &[Detection],
    min_confidence: f32,
    overlap_threshold: f32,
    mode: SuppressionMode,
) -> Vec<usize> {
    let boxes: Vec<BoundingBox> = detections.iter().map(|d| d.bbox).collect();
    let confidences: Vec<f32> = detections.iter().map(|d| d.confidence).collect();
    let class_ids: Vec<usize> = detections.iter().map(|d| d.class_id).collect();

    suppress(&boxes, &confidences, &class_ids, min_confidence, overlap_threshold, mode)
}
