pub mod constraint;
pub mod environment;
pub mod hotspot;
pub mod inference;
pub mod motion;
pub mod resample;

pub use constraint::ConstraintStage;
pub use environment::EnvironmentStage;
pub use hotspot::HotspotStage;
pub use inference::{FitSummary, InferenceResult, InferenceStage, StateProfile, FEATURE_COLUMNS};
pub use motion::MotionStage;
pub use resample::ResampleStage;
