mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from voc for tests
pub use voc::{
    CancelToken, CropPolicy, DetectionStage, NormBox, Pipeline, RawDetection, SharedDetector,
    StubDetector, VocError,
};
