use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the detection cascade
#[derive(Debug, Error)]
pub enum VocError {
    /// The backing model could not be loaded. Fatal at pipeline construction
    #[error("failed to load model {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    /// The detector reported a class id outside its own class table
    #[error("class id {class_id} out of range for a table of {class_count} classes")]
    UnknownClass { class_id: usize, class_count: usize },

    /// A crop request that is empty or falls outside the source image
    #[error("invalid crop region [{x1}, {x2}) x [{y1}, {y2}) on a {width}x{height} image")]
    InvalidRegion {
        x1: i64,
        y1: i64,
        x2: i64,
        y2: i64,
        width: u32,
        height: u32,
    },

    /// The detector runtime failed while processing an image
    #[error("detector failure: {0}")]
    Detector(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("pipeline run cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, VocError>;
