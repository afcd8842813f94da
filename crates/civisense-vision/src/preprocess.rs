//! Shared tensor preparation for the three inference services.
//!
//! All three stages first clamp the image to the configured max dimension
//! (matching the pre-detect downscale used upstream of every model) before
//! resizing to the model's expected square input and converting to a
//! channel-first `f32` tensor.

use image::imageops::FilterType;
use image::RgbImage;

/// ImageNet normalization constants, used by both the classifier and the
/// embedder (both MobileNetV2 heads sharing one backbone).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Downscales `image` so its longer side is at most `max_dimension`,
/// leaving it untouched if already within budget. Matches the "only
/// shrink, never grow" behavior of the upstream pre-detect resize.
#[must_use]
pub fn clamp_max_dimension(image: &RgbImage, max_dimension: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    let longest = width.max(height);
    if longest <= max_dimension || longest == 0 {
        return image.clone();
    }
    let scale = f64::from(max_dimension) / f64::from(longest);
    let new_width = ((f64::from(width) * scale).round() as u32).max(1);
    let new_height = ((f64::from(height) * scale).round() as u32).max(1);
    image::imageops::resize(image, new_width, new_height, FilterType::Triangle)
}

/// Resizes to an `edge x edge` square (YOLO's letterbox-free variant used
/// by the source service, which passes a plain resize rather than padded
/// letterboxing) and lays the result out as a contiguous CHW, `[0, 1]`
/// `f32` buffer.
#[must_use]
pub fn to_chw_tensor(image: &RgbImage, edge: u32) -> Vec<f32> {
    let resized = image::imageops::resize(image, edge, edge, FilterType::Triangle);
    let (width, height) = resized.dimensions();
    let mut tensor = vec![0.0_f32; 3 * (width * height) as usize];
    let plane = (width * height) as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        tensor[idx] = f32::from(pixel[0]) / 255.0;
        tensor[plane + idx] = f32::from(pixel[1]) / 255.0;
        tensor[2 * plane + idx] = f32::from(pixel[2]) / 255.0;
    }
    tensor
}

/// Resizes to `edge x edge`, then applies ImageNet mean/std normalization
/// per channel, as MobileNetV2's torchvision preprocessing does.
#[must_use]
pub fn to_normalized_chw_tensor(image: &RgbImage, edge: u32) -> Vec<f32> {
    let resized = image::imageops::resize(image, edge, edge, FilterType::Triangle);
    let (width, height) = resized.dimensions();
    let mut tensor = vec![0.0_f32; 3 * (width * height) as usize];
    let plane = (width * height) as usize;
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = (y * width + x) as usize;
        for channel in 0..3 {
            let normalized =
                (f32::from(pixel[channel]) / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel];
            tensor[channel * plane + idx] = normalized;
        }
    }
    tensor
}

/// Reads a newline-delimited label file, one label per output index.
/// Missing or unreadable files degrade to an empty list rather than a
/// startup error -- labels fall back to the numeric index at lookup time.
pub fn load_labels(path: &str) -> Vec<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(err) => {
            tracing::warn!(path, error = %err, "label file unavailable; falling back to numeric indices");
            Vec::new()
        }
    }
}

/// Looks up `index` in `labels`, falling back to the stringified index.
#[must_use]
pub fn label_for(labels: &[String], index: usize) -> String {
    labels
        .get(index)
        .cloned()
        .unwrap_or_else(|| index.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_leaves_small_images_untouched() {
        let image = RgbImage::from_pixel(10, 10, image::Rgb([1, 2, 3]));
        let clamped = clamp_max_dimension(&image, 1024);
        assert_eq!(clamped.dimensions(), (10, 10));
    }

    #[test]
    fn clamp_shrinks_oversized_images() {
        let image = RgbImage::from_pixel(2000, 1000, image::Rgb([1, 2, 3]));
        let clamped = clamp_max_dimension(&image, 1000);
        assert_eq!(clamped.dimensions(), (1000, 500));
    }

    #[test]
    fn chw_tensor_has_three_planes() {
        let image = RgbImage::from_pixel(4, 4, image::Rgb([255, 0, 0]));
        let tensor = to_chw_tensor(&image, 4);
        assert_eq!(tensor.len(), 3 * 4 * 4);
        assert!((tensor[0] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn label_for_falls_back_to_index() {
        let labels = vec!["pothole".to_string()];
        assert_eq!(label_for(&labels, 0), "pothole");
        assert_eq!(label_for(&labels, 5), "5");
    }
}
