use image::DynamicImage;
use image::imageops::FilterType;
use serde::Deserialize;

/// Channel order the network was trained with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Resize an image to the network input size
pub fn resize_for_network(img: &DynamicImage, width: u32, height: u32) -> DynamicImage {
    img.resize_exact(width, height, FilterType::Triangle)
}

/// Convert an image into a normalized planar (NCHW, batch 1) buffer.
///
/// Pixel values are scaled to [0,1]. Decoded images are stored as RGB, so
/// `ChannelOrder::Bgr` swaps the first and last planes.
pub fn to_planar_tensor(
    img: &DynamicImage,
    width: u32,
    height: u32,
    order: ChannelOrder,
) -> Vec<f32> {
    let resized = resize_for_network(img, width, height).to_rgb8();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    let (first, last) = match order {
        ChannelOrder::Rgb => (0, 2),
        ChannelOrder::Bgr => (2, 0),
    };

    for (x, y, pixel) in resized.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        data[first * plane + offset] = pixel[0] as f32 / 255.0;
        data[plane + offset] = pixel[1] as f32 / 255.0;
        data[last * plane + offset] = pixel[2] as f32 / 255.0;
    }

    data
}
