pub mod detector;
pub mod keypoint;
pub mod landmarks;
#[cfg(feature = "movenet")]
pub mod preprocess;

#[cfg(feature = "movenet")]
pub use detector::MoveNetDetector;
pub use detector::PoseEstimator;
pub use keypoint::{FrameSize, Keypoint, KeypointIndex, PixelPoint, Pose};
pub use landmarks::AnatomicalLandmarks;
