pub mod records;
pub mod satellite;
pub mod track;

pub use records::{
    Behavior, ClassifiedObservation, ConstrainedStep, DataQuality, EnvironmentalSample,
    FeatureVector, HotspotBin, MotionRow, SpeedCategory, SpeedFlag, StateAssignment,
};
pub use satellite::{
    CompositeFile, CompositeSummary, EddyStats, SatelliteComposite, SshPass, SshPassFile,
    VariableMean,
};
pub use track::{
    build_tracks, read_pings_csv, read_pings_json, ObservationTrack, Ping, PingRecord,
    ResampledObservation, Track, ValidationError,
};
