use std::fmt;

/// Box in normalized center form: every field is a fraction of the image size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl NormBox {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }
}

/// Box in pixel units, anchored at its top-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl PixelBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn x2(&self) -> f32 {
        self.x + self.w
    }

    pub fn y2(&self) -> f32 {
        self.y + self.h
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }
}

/// One candidate object exactly as the detector reported it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: usize,
    pub confidence: f32,
    pub norm_box: NormBox,
}

/// A candidate resolved against the class table and mapped to pixel space
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    /// Crop box: origin clamped to the image, extent kept
    pub pixel_box: PixelBox,
    /// Box as the detector placed it, possibly starting off-image; used for overlap
    pub corner_box: PixelBox,
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "class name: {:>12} confidence: {:5.4} box: {:8.1} {:8.1} {:8.1} {:8.1}",
            self.class_name,
            self.confidence,
            self.pixel_box.x,
            self.pixel_box.y,
            self.pixel_box.w,
            self.pixel_box.h
        )
    }
}
