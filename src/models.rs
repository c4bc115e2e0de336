use image::DynamicImage;
use serde::Serialize;

/// Axis-aligned box in pixel coordinates of the image it was detected on.
/// Coordinates may fall outside the image until clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Build a corner-format box from a center-format one
    pub fn from_center(center_x: i32, center_y: i32, width: i32, height: i32) -> Self {
        let x = (center_x as f64 - width as f64 / 2.0) as i32;
        let y = (center_y as f64 - height as f64 / 2.0) as i32;
        Self { x, y, width, height }
    }

    /// Center in pixel coordinates (truncated)
    pub fn center(&self) -> (i32, i32) {
        let cx = (self.x as f64 + self.width as f64 / 2.0) as i32;
        let cy = (self.y as f64 + self.height as f64 / 2.0) as i32;
        (cx, cy)
    }

    pub fn area(&self) -> f32 {
        if self.width <= 0 || self.height <= 0 {
            return 0.0;
        }
        self.width as f32 * self.height as f32
    }

    /// Intersection over union, 0 when the union is empty
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x) as i64;
        let y1 = self.y.max(other.y) as i64;
        let x2 = (self.x as i64 + self.width as i64).min(other.x as i64 + other.width as i64);
        let y2 = (self.y as i64 + self.height as i64).min(other.y as i64 + other.height as i64);

        let intersection = (x2 - x1).max(0) as f32 * (y2 - y1).max(0) as f32;
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Clamp to an image of the given size, returning `(x, y, width, height)`.
    /// Width or height is 0 when the box lies outside the image.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> (u32, u32, u32, u32) {
        let max_x = image_width as i64;
        let max_y = image_height as i64;

        let x0 = (self.x as i64).clamp(0, max_x);
        let y0 = (self.y as i64).clamp(0, max_y);
        let x1 = (self.x as i64 + self.width.max(0) as i64).clamp(0, max_x);
        let y1 = (self.y as i64 + self.height.max(0) as i64).clamp(0, max_y);

        (x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32)
    }

    /// Extract the region from `image`, `None` if nothing is left after clamping
    pub fn crop(&self, image: &DynamicImage) -> Option<DynamicImage> {
        let (x, y, width, height) = self.clamp_to(image.width(), image.height());
        if width == 0 || height == 0 {
            return None;
        }
        Some(image.crop_imm(x, y, width, height))
    }
}

/// One candidate produced by the decoder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub confidence: f32,
}

/// Image region cut out of a kept detection, named after its lineage
#[derive(Debug, Clone)]
pub struct Crop {
    pub name: String,
    /// Index of the stage that produced this crop
    pub stage: usize,
    pub detection: Detection,
    pub image: DynamicImage,
}

/// Final-stage detection: one recognized piece of plate content
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub label: String,
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Token {
    /// `<label>: <confidence>` with four decimals
    pub fn display_line(&self) -> String {
        format!("{}: {:.4}", self.label, self.confidence)
    }
}

/// Provenance name of a child: `<parent>_<index>_<classId>_<confidence>`
pub fn provenance_name(parent: &str, index: usize, detection: &Detection) -> String {
    format!(
        "{}_{}_{}_{}",
        parent, index, detection.class_id, detection.confidence
    )
}

/// Valid for processing when both dimensions are non-zero
pub fn is_processable(image: &DynamicImage) -> bool {
    image.width() > 0 && image.height() > 0
}
