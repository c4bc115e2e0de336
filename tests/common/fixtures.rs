use image::{DynamicImage, ImageBuffer, Rgb};
use platecascade::detection::{Detector, RawOutput};
use platecascade::{Cancellation, CascadeError};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Detector returning canned outputs keyed by the size of the image it is given
pub struct ScriptedDetector {
    labels: Vec<String>,
    outputs: HashMap<(u32, u32), Vec<RawOutput>>,
    rejected: HashSet<(u32, u32)>,
    calls: AtomicUsize,
    cancel_on_call: Option<Cancellation>,
}

impl ScriptedDetector {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            outputs: HashMap::new(),
            rejected: HashSet::new(),
            calls: AtomicUsize::new(0),
            cancel_on_call: None,
        }
    }

    /// Rows returned for images of `width`x`height`
    pub fn on_size(mut self, width: u32, height: u32, rows: Vec<Vec<f32>>) -> Self {
        self.outputs.insert((width, height), vec![RawOutput::from_rows(&rows)]);
        self
    }

    pub fn with_outputs(mut self, width: u32, height: u32, outputs: Vec<RawOutput>) -> Self {
        self.outputs.insert((width, height), outputs);
        self
    }

    /// Treat images of this size as invalid
    pub fn reject(mut self, width: u32, height: u32) -> Self {
        self.rejected.insert((width, height));
        self
    }

    /// Trigger `cancel` whenever the detector runs
    pub fn cancelling(mut self, cancel: Cancellation) -> Self {
        self.cancel_on_call = Some(cancel);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for ScriptedDetector {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn infer(&self, image: &DynamicImage) -> Result<Vec<RawOutput>, CascadeError> {
        let size = (image.width(), image.height());
        if size.0 == 0 || size.1 == 0 || self.rejected.contains(&size) {
            return Err(CascadeError::InvalidImage {
                width: size.0,
                height: size.1,
            });
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(cancel) = &self.cancel_on_call {
            cancel.cancel();
        }

        Ok(self.outputs.get(&size).cloned().unwrap_or_default())
    }
}

/// Prediction row for a pixel box `(cx, cy, w, h)` in an image of `image` size.
/// Values are nudged a quarter pixel up so truncation lands on the intended integer.
pub fn pred_row(
    (cx, cy, w, h): (i32, i32, i32, i32),
    image: (u32, u32),
    class_id: usize,
    confidence: f32,
    num_classes: usize,
) -> Vec<f32> {
    let (iw, ih) = (image.0 as f64, image.1 as f64);
    let mut row = vec![
        ((cx as f64 + 0.25) / iw) as f32,
        ((cy as f64 + 0.25) / ih) as f32,
        ((w as f64 + 0.25) / iw) as f32,
        ((h as f64 + 0.25) / ih) as f32,
        confidence,
    ];
    let mut scores = vec![0.0f32; num_classes];
    scores[class_id] = confidence;
    row.extend(scores);
    row
}

/// Gradient test image of the given size
pub fn solid_image(width: u32, height: u32) -> DynamicImage {
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128u8])
    });
    DynamicImage::ImageRgb8(img)
}

/// Creates a JPEG of the given size in `dir` and returns its path
pub fn write_jpeg(
    dir: &std::path::Path,
    name: &str,
    width: u32,
    height: u32,
) -> std::path::PathBuf {
    let path = dir.join(name);
    solid_image(width, height)
        .to_rgb8()
        .save_with_format(&path, image::ImageFormat::Jpeg)
        .expect("Failed to save test image");
    path
}

pub const VEHICLE_LABELS: [&str; 3] = ["car", "bus", "truck"];
pub const PLATE_LABELS: [&str; 2] = ["plate-one-line", "plate-two-lines"];
pub const CHAR_LABELS: [&str; 4] = ["A", "B", "1", "2"];
