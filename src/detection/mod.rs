//! 姿勢判定 → デバウンス → 状態遷移

pub mod classifier;
pub mod debounce;
pub mod state;

pub use classifier::{DistressAssessment, DistressCheck, PostureClassifier, PostureSnapshot};
pub use debounce::{DebounceGate, GateSignal};
pub use state::{Command, DetectionState, DetectionStateMachine, Transition, TriggerRejection};
