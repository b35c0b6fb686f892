pub mod batch;
pub mod config;
pub mod detector;
pub mod error;
pub mod geometry;
pub mod models;
pub mod nms;
pub mod pipeline;

pub use models::{Detection, NormBox, PixelBox, RawDetection};
pub use detector::{DetectorAdapter, DetectorCache, SharedDetector, SingleFlight, StubDetector};
pub use error::VocError;
pub use geometry::CropPolicy;
pub use nms::Suppressor;
pub use pipeline::{
    CancelToken, DetectionStage, Pipeline, PipelineContext, PipelineData, PipelineStep,
};
