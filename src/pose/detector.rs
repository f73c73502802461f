use anyhow::Result;

use super::keypoint::Pose;
use crate::camera::Frame;

/// フレーム → 1人分の姿勢。人がいなければ None
pub trait PoseEstimator: Send {
    fn estimate(&mut self, frame: &Frame) -> Result<Option<Pose>>;
}

#[cfg(feature = "movenet")]
pub use movenet::MoveNetDetector;

#[cfg(feature = "movenet")]
mod movenet {
    use std::path::Path;

    use anyhow::{Context, Result};
    use log::info;
    use ort::session::builder::GraphOptimizationLevel;
    use ort::session::Session;
    use ort::value::Tensor;

    use super::PoseEstimator;
    use crate::camera::Frame;
    use crate::pose::keypoint::{Keypoint, KeypointIndex, Pose};
    use crate::pose::preprocess::preprocess_jpeg;

    /// MoveNet (ONNX) による姿勢推定
    pub struct MoveNetDetector {
        session: Session,
        min_pose_confidence: f32,
    }

    impl MoveNetDetector {
        pub fn new<P: AsRef<Path>>(model_path: P, min_pose_confidence: f32) -> Result<Self> {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .commit_from_file(model_path.as_ref())
                .with_context(|| format!("Failed to load ONNX model: {}", model_path.as_ref().display()))?;
            info!("[pose] MoveNet loaded from {}", model_path.as_ref().display());

            Ok(Self {
                session,
                min_pose_confidence,
            })
        }
    }

    impl PoseEstimator for MoveNetDetector {
        fn estimate(&mut self, frame: &Frame) -> Result<Option<Pose>> {
            let input = preprocess_jpeg(&frame.jpeg)?;
            let input_tensor = Tensor::from_array(input)?;
            let outputs = self
                .session
                .run(ort::inputs!["serving_default_input_0" => input_tensor])
                .context("Inference failed")?;

            // [1, 1, 17, 3] (y, x, confidence)
            let output: ndarray::ArrayViewD<f32> = outputs["StatefulPartitionedCall_0"]
                .try_extract_array()
                .context("Failed to extract output tensor")?;

            let mut keypoints = [Keypoint::default(); KeypointIndex::COUNT];
            for (i, kp) in keypoints.iter_mut().enumerate() {
                let y = output[[0, 0, i, 0]];
                let x = output[[0, 0, i, 1]];
                let confidence = output[[0, 0, i, 2]];
                *kp = Keypoint::new(x, y, confidence);
            }

            let pose = Pose::new(keypoints);
            if pose.average_confidence() < self.min_pose_confidence {
                return Ok(None);
            }
            Ok(Some(pose))
        }
    }
}
