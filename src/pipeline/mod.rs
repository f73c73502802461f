//! トリガー後のシーン解析・音声案内パイプライン

pub mod capture;
pub mod orchestrator;
pub mod prompt;

pub use capture::CaptureStore;
pub use orchestrator::{
    PipelineFailure, PipelineOrchestrator, PipelineOutcome, PipelineRequest, PipelineResult, PipelineStep,
};
pub use prompt::{build_prompt, NO_DISTRESS_RESPONSE};
