use image::{DynamicImage, Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use voc::{NormBox, RawDetection, SharedDetector, StubDetector};

/// Creates an RGB image whose pixel at (x, y) is [x, y, 0], so crops reveal where they came from
pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([x as u8, y as u8, 0])
    }))
}

/// Pixel at (x, y) as [r, g, b]
pub fn pixel_at(image: &DynamicImage, x: u32, y: u32) -> [u8; 3] {
    image.to_rgb8().get_pixel(x, y).0
}

/// Shorthand for a raw detection in normalized center form
pub fn raw(class_id: usize, confidence: f32, cx: f32, cy: f32, w: f32, h: f32) -> RawDetection {
    RawDetection {
        class_id,
        confidence,
        norm_box: NormBox::new(cx, cy, w, h),
    }
}

/// Stub detector with the classes used throughout the tests
pub fn vehicle_stub() -> StubDetector {
    StubDetector::new(vec!["car", "truck", "plate"])
}

/// Wraps a stub so the test keeps a handle for inspecting calls
pub fn shared(stub: StubDetector) -> (Arc<StubDetector>, SharedDetector) {
    let stub = Arc::new(stub);
    let detector: SharedDetector = stub.clone();
    (stub, detector)
}

/// Writes a gradient PNG into `dir` and returns its path
pub fn write_test_image(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    gradient_image(width, height)
        .save(&path)
        .expect("Failed to save test image");
    path
}
