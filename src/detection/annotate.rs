use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::models::Detection;

/// Drawing color for a class id. Same id, same color, on every run.
pub fn class_color(class_id: usize) -> Rgb<u8> {
    // splitmix64 finalizer
    let mut z = (class_id as u64).wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;

    Rgb([(z & 0xFF) as u8, ((z >> 8) & 0xFF) as u8, ((z >> 16) & 0xFF) as u8])
}

/// Copy of `image` with the detections outlined in their class colors
pub fn annotate(image: &DynamicImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.to_rgb8();

    for detection in detections {
        let (x, y, width, height) = detection.bbox.clamp_to(canvas.width(), canvas.height());
        if width == 0 || height == 0 {
            continue;
        }

        let color = class_color(detection.class_id);
        let rect = Rect::at(x as i32, y as i32).of_size(width, height);
        draw_hollow_rect_mut(&mut canvas, rect, color);

        // Second outline for a 2px border
        if width > 2 && height > 2 {
            let inner = Rect::at(x as i32 + 1, y as i32 + 1).of_size(width - 2, height - 2);
            draw_hollow_rect_mut(&mut canvas, inner, color);
        }
    }

    canvas
}
