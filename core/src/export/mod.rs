//! CSV and JSON outputs of a pipeline run.

pub mod io;
pub mod rows;

pub use io::{
    read_detailed, read_features, read_records, read_summary, write_detailed, write_features,
    write_hotspots, write_records, write_summary,
};
pub use rows::{DetailedRecord, FeatureRecord, HotspotRecord};
