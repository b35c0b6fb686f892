//! Coordinate transforms between normalized and pixel space, overlap and cropping

use image::{DynamicImage, GenericImageView};
use serde::Deserialize;

use crate::error::{Result, VocError};
use crate::models::{NormBox, PixelBox};

/// What to do when a crop's far edge runs past the image bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CropPolicy {
    /// Truncate the region at the image edge
    #[default]
    Clamp,
    /// Fail with `InvalidRegion`
    Reject,
}

/// Map a normalized center-form box to a pixel corner-form box, unclamped
/// Suppression compares these boxes, so edge boxes keep their true overlap
pub fn to_corner_box(norm: &NormBox, image_width: u32, image_height: u32) -> PixelBox {
    let (img_w, img_h) = (image_width as f32, image_height as f32);
    let center_x = norm.cx * img_w;
    let center_y = norm.cy * img_h;
    let w = norm.w * img_w;
    let h = norm.h * img_h;
    PixelBox {
        x: center_x - w / 2.0,
        y: center_y - h / 2.0,
        w,
        h,
    }
}

/// Map a normalized center-form box to a pixel box with its origin clamped to zero
///
/// Width and height are scaled but never clamped, so the far edge may lie past
/// the image bounds. `crop` decides what happens to such boxes
pub fn to_pixel_box(norm: &NormBox, image_width: u32, image_height: u32) -> PixelBox {
    clamp_origin(&to_corner_box(norm, image_width, image_height))
}

/// Move a box's origin to be non-negative, keeping its width and height
pub fn clamp_origin(b: &PixelBox) -> PixelBox {
    PixelBox {
        x: b.x.max(0.0),
        y: b.y.max(0.0),
        w: b.w,
        h: b.h,
    }
}

/// Intersection over union of two pixel boxes
pub fn iou(a: &PixelBox, b: &PixelBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.x2().min(b.x2());
    let y2 = a.y2().min(b.y2());

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - intersection;
    if union <= 0.0 {
        return 0.0;
    }
    intersection / union
}

/// Pixel region `[x1, x2) x [y1, y2)` a crop request resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Region {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }
}

/// Resolve a pixel box against an image of the given size
///
/// Corners are rounded half-to-even. The origin is clamped to zero; the far
/// edge is clamped or rejected according to `policy`. Empty regions are always
/// rejected
pub fn region_for(
    pixel_box: &PixelBox,
    width: u32,
    height: u32,
    policy: CropPolicy,
) -> Result<Region> {
    let x1 = pixel_box.x.max(0.0).round_ties_even() as i64;
    let y1 = pixel_box.y.max(0.0).round_ties_even() as i64;
    let mut x2 = pixel_box.x2().round_ties_even() as i64;
    let mut y2 = pixel_box.y2().round_ties_even() as i64;

    let invalid = |x2: i64, y2: i64| VocError::InvalidRegion {
        x1,
        y1,
        x2,
        y2,
        width,
        height,
    };

    let out_of_bounds = x2 > width as i64 || y2 > height as i64;
    if out_of_bounds {
        match policy {
            CropPolicy::Clamp => {
                x2 = x2.min(width as i64);
                y2 = y2.min(height as i64);
            }
            CropPolicy::Reject => return Err(invalid(x2, y2)),
        }
    }

    if x2 <= x1 || y2 <= y1 {
        return Err(invalid(x2, y2));
    }

    Ok(Region {
        x1: x1 as u32,
        y1: y1 as u32,
        x2: x2 as u32,
        y2: y2 as u32,
    })
}

/// Copy the region covered by `pixel_box` out of `image` into a new image
pub fn crop(image: &DynamicImage, pixel_box: &PixelBox, policy: CropPolicy) -> Result<DynamicImage> {
    let (width, height) = image.dimensions();
    let region = region_for(pixel_box, width, height, policy)?;
    Ok(image.crop_imm(region.x1, region.y1, region.width(), region.height()))
}
