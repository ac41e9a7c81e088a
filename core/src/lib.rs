//! Trajectory-to-behavioral-state inference core for tracked marine animals.
//!
//! Raw GPS pings are resampled onto a uniform time grid, turned into motion
//! features with great-circle math, bounded by physical constraints, fused
//! with satellite-derived ocean covariates and finally classified into
//! foraging or migrating states by a two-component Gaussian mixture. The
//! stages share one configuration, one seeded random source and one error
//! type so a batch run is reproducible end to end.

pub mod export;
pub mod interface;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod telemetry;

pub use prelude::{ProcessingStage, StageConfig, StageContext, StageError, StageOutput};
