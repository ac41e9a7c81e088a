pub mod geo;
pub mod matrix;
pub mod mixture;
pub mod random;
pub mod stats;

pub use geo::{haversine_km, turning_angle, LatLon};
pub use matrix::{MatrixHelper, Standardizer};
pub use mixture::{GaussianMixture, MixtureConfig};
pub use random::PipelineRng;
pub use stats::StatsHelper;
