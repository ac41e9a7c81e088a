use super::rows::{DetailedRecord, FeatureRecord, HotspotRecord};
use crate::interface::{ClassifiedObservation, FeatureVector, HotspotBin};
use crate::prelude::StageResult;
use crate::processing::FitSummary;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Read, Write};

/// Writes `records` as a headed CSV table.
pub fn write_records<W, T>(writer: W, records: &[T]) -> StageResult<()>
where
    W: Write,
    T: Serialize,
{
    let mut csv = csv::Writer::from_writer(writer);
    for record in records {
        csv.serialize(record)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn read_records<R, T>(reader: R) -> StageResult<Vec<T>>
where
    R: Read,
    T: DeserializeOwned,
{
    let mut csv = csv::Reader::from_reader(reader);
    let mut records = Vec::new();
    for record in csv.deserialize() {
        records.push(record?);
    }
    Ok(records)
}

pub fn write_features<W: Write>(writer: W, rows: &[FeatureVector]) -> StageResult<()> {
    let records: Vec<FeatureRecord> = rows.iter().map(FeatureRecord::from).collect();
    write_records(writer, &records)
}

pub fn read_features<R: Read>(reader: R) -> StageResult<Vec<FeatureVector>> {
    let records: Vec<FeatureRecord> = read_records(reader)?;
    Ok(records.into_iter().map(FeatureVector::from).collect())
}

pub fn write_detailed<W: Write>(
    writer: W,
    observations: &[ClassifiedObservation],
    high_confidence_threshold: f64,
) -> StageResult<()> {
    let records: Vec<DetailedRecord> = observations
        .iter()
        .map(|obs| DetailedRecord::from_observation(obs, high_confidence_threshold))
        .collect();
    write_records(writer, &records)
}

pub fn read_detailed<R: Read>(reader: R) -> StageResult<Vec<DetailedRecord>> {
    read_records(reader)
}

pub fn write_hotspots<W: Write>(writer: W, bins: &[HotspotBin]) -> StageResult<()> {
    let records: Vec<HotspotRecord> = bins.iter().map(HotspotRecord::from).collect();
    write_records(writer, &records)
}

/// Pretty-printed fit summary, the reusable half of a model run.
pub fn write_summary<W: Write>(writer: W, summary: &FitSummary) -> StageResult<()> {
    serde_json::to_writer_pretty(writer, summary)?;
    Ok(())
}

pub fn read_summary<R: Read>(reader: R) -> StageResult<FitSummary> {
    Ok(serde_json::from_reader(reader)?)
}
