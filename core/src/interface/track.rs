use crate::math::geo::LatLon;
use crate::prelude::{DataQualityEvent, RecordPosition, StageError, StageResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;

/// Orientation reported by tags that carry an IMU.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

/// One validated GPS fix. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ping {
    pub subject_id: String,
    pub timestamp: DateTime<Utc>,
    pub position: LatLon,
    pub altitude: Option<f64>,
    pub temperature: Option<f64>,
    pub pressure: Option<f64>,
    pub orientation: Option<Quaternion>,
}

impl Ping {
    pub fn new(subject_id: impl Into<String>, timestamp: DateTime<Utc>, latitude: f64, longitude: f64) -> Self {
        Self {
            subject_id: subject_id.into(),
            timestamp,
            position: LatLon::new(latitude, longitude),
            altitude: None,
            temperature: None,
            pressure: None,
            orientation: None,
        }
    }
}

/// All pings of one subject, strictly increasing in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub subject_id: String,
    pub pings: Vec<Ping>,
}

impl Track {
    pub fn len(&self) -> usize {
        self.pings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pings.is_empty()
    }
}

/// Groups pings by subject, sorts them in time and collapses duplicate
/// timestamps (first fix wins). Subjects come back in id order.
pub fn build_tracks(pings: Vec<Ping>) -> (Vec<Track>, Vec<DataQualityEvent>) {
    let mut grouped: BTreeMap<String, Vec<Ping>> = BTreeMap::new();
    for ping in pings {
        grouped.entry(ping.subject_id.clone()).or_default().push(ping);
    }

    let mut events = Vec::new();
    let tracks = grouped
        .into_iter()
        .map(|(subject_id, mut pings)| {
            pings.sort_by_key(|p| p.timestamp);
            let before = pings.len();
            pings.dedup_by_key(|p| p.timestamp);
            if pings.len() < before {
                events.push(DataQualityEvent::DuplicateTimestamps {
                    subject_id: subject_id.clone(),
                    dropped: before - pings.len(),
                });
            }
            Track { subject_id, pings }
        })
        .collect();
    (tracks, events)
}

/// A track point after grid resampling: the grid time paired with the
/// nearest raw fix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResampledObservation {
    pub subject_id: String,
    pub grid_time: DateTime<Utc>,
    pub ping_time: DateTime<Utc>,
    pub position: LatLon,
    /// `ping_time - grid_time` in seconds.
    pub offset_seconds: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTrack {
    pub subject_id: String,
    pub observations: Vec<ResampledObservation>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("missing field {0}")]
    MissingField(&'static str),
    #[error("unparseable timestamp {0:?}")]
    InvalidTimestamp(String),
    #[error("coordinate ({latitude}, {longitude}) out of range")]
    CoordinateOutOfRange { latitude: f64, longitude: f64 },
    #[error("field {0} is not finite")]
    NonFinite(&'static str),
}

/// Flat ping row as found in track CSV files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingRecord {
    pub subject_id: String,
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub qx: Option<f64>,
    #[serde(default)]
    pub qy: Option<f64>,
    #[serde(default)]
    pub qz: Option<f64>,
    #[serde(default)]
    pub qw: Option<f64>,
}

impl PingRecord {
    pub const REQUIRED_COLUMNS: [&'static str; 4] = ["subject_id", "timestamp", "latitude", "longitude"];

    pub fn validate(&self) -> Result<Ping, ValidationError> {
        let subject_id = self.subject_id.trim();
        if subject_id.is_empty() {
            return Err(ValidationError::MissingField("subject_id"));
        }
        let timestamp = parse_timestamp(&self.timestamp)?;
        let position = validate_position(self.latitude, self.longitude)?;
        let orientation = match (self.qx, self.qy, self.qz, self.qw) {
            (Some(x), Some(y), Some(z), Some(w)) => Some(Quaternion { x, y, z, w }),
            _ => None,
        };
        Ok(Ping {
            subject_id: subject_id.to_string(),
            timestamp,
            position,
            altitude: finite_or_none(self.altitude),
            temperature: finite_or_none(self.temperature),
            pressure: finite_or_none(self.pressure),
            orientation,
        })
    }
}

/// Subject ids arrive as text or as integers depending on the tag vendor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SubjectId {
    Number(i64),
    Text(String),
}

impl SubjectId {
    fn into_string(self) -> String {
        match self {
            SubjectId::Number(n) => n.to_string(),
            SubjectId::Text(s) => s,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GpsRecord {
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub alt: Option<f64>,
}

/// Tag-API shaped ping: position and orientation nested in sub-objects.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NestedPingRecord {
    pub id: SubjectId,
    pub timestamp: String,
    #[serde(rename = "GPS")]
    pub gps: GpsRecord,
    #[serde(default)]
    pub temp: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
    #[serde(default)]
    pub q: Option<Quaternion>,
}

impl NestedPingRecord {
    pub fn validate(self) -> Result<Ping, ValidationError> {
        let subject_id = self.id.into_string();
        if subject_id.trim().is_empty() {
            return Err(ValidationError::MissingField("id"));
        }
        Ok(Ping {
            subject_id: subject_id.trim().to_string(),
            timestamp: parse_timestamp(&self.timestamp)?,
            position: validate_position(self.gps.lat, self.gps.lon)?,
            altitude: finite_or_none(self.gps.alt),
            temperature: finite_or_none(self.temp),
            pressure: finite_or_none(self.pressure),
            orientation: self.q,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
enum JsonPingRecord {
    Flat(PingRecord),
    Nested(NestedPingRecord),
}

fn finite_or_none(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn validate_position(latitude: f64, longitude: f64) -> Result<LatLon, ValidationError> {
    if !latitude.is_finite() {
        return Err(ValidationError::NonFinite("latitude"));
    }
    if !longitude.is_finite() {
        return Err(ValidationError::NonFinite("longitude"));
    }
    let position = LatLon::new(latitude, longitude);
    if !position.is_valid() {
        return Err(ValidationError::CoordinateOutOfRange {
            latitude,
            longitude,
        });
    }
    Ok(position)
}

/// Accepts RFC 3339 and the common zone-less ISO 8601 forms (read as UTC).
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField("timestamp"));
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&midnight));
        }
    }
    Err(ValidationError::InvalidTimestamp(trimmed.to_string()))
}

/// Reads a track CSV. Rows that fail to parse or validate become
/// `InvalidRecord` events; a missing required column fails the whole file.
pub fn read_pings_csv<R: Read>(reader: R) -> StageResult<(Vec<Ping>, Vec<DataQualityEvent>)> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    for column in PingRecord::REQUIRED_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(StageError::InvalidInput(format!(
                "track csv is missing column {}",
                column
            )));
        }
    }

    let mut pings = Vec::new();
    let mut events = Vec::new();
    for (idx, row) in csv_reader.deserialize::<PingRecord>().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        match row {
            Ok(record) => match record.validate() {
                Ok(ping) => pings.push(ping),
                Err(err) => events.push(DataQualityEvent::InvalidRecord {
                    position: RecordPosition::Line(line),
                    reason: err.to_string(),
                }),
            },
            Err(err) if err.is_io_error() => return Err(err.into()),
            Err(err) => events.push(DataQualityEvent::InvalidRecord {
                position: RecordPosition::Line(line),
                reason: err.to_string(),
            }),
        }
    }
    Ok((pings, events))
}

/// Reads a JSON array of pings in either the flat or the nested shape.
pub fn read_pings_json<R: Read>(reader: R) -> StageResult<(Vec<Ping>, Vec<DataQualityEvent>)> {
    let values: Vec<serde_json::Value> = serde_json::from_reader(reader)?;
    let mut pings = Vec::new();
    let mut events = Vec::new();
    for (idx, value) in values.into_iter().enumerate() {
        let validated = serde_json::from_value::<JsonPingRecord>(value)
            .map_err(|err| err.to_string())
            .and_then(|record| {
                match record {
                    JsonPingRecord::Flat(flat) => flat.validate(),
                    JsonPingRecord::Nested(nested) => nested.validate(),
                }
                .map_err(|err| err.to_string())
            });
        match validated {
            Ok(ping) => pings.push(ping),
            Err(reason) => events.push(DataQualityEvent::InvalidRecord {
                position: RecordPosition::Index(idx),
                reason,
            }),
        }
    }
    Ok((pings, events))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn build_tracks_sorts_and_collapses_duplicates() {
        let pings = vec![
            Ping::new("b", at(5), 1.0, 1.0),
            Ping::new("a", at(3), 2.0, 2.0),
            Ping::new("a", at(1), 3.0, 3.0),
            Ping::new("a", at(3), 4.0, 4.0),
        ];
        let (tracks, events) = build_tracks(pings);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].subject_id, "a");
        assert_eq!(tracks[0].len(), 2);
        assert!(tracks[0].pings[0].timestamp < tracks[0].pings[1].timestamp);
        assert_eq!(tracks[0].pings[1].position.latitude, 2.0);
        assert_eq!(
            events,
            vec![DataQualityEvent::DuplicateTimestamps {
                subject_id: "a".into(),
                dropped: 1
            }]
        );
    }

    #[test]
    fn parse_timestamp_accepts_common_forms() {
        let expected = Utc.with_ymd_and_hms(2023, 7, 4, 12, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2023-07-04T12:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2023-07-04T14:30:00+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2023-07-04 12:30:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2023-07-04T12:30").unwrap(), expected);
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(ValidationError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn validate_rejects_out_of_range_coordinates() {
        let record = PingRecord {
            subject_id: "s1".into(),
            timestamp: "2024-01-01T00:00:00Z".into(),
            latitude: 95.0,
            longitude: 0.0,
            altitude: None,
            temperature: None,
            pressure: None,
            qx: None,
            qy: None,
            qz: None,
            qw: None,
        };
        assert!(matches!(
            record.validate(),
            Err(ValidationError::CoordinateOutOfRange { .. })
        ));
    }

    #[test]
    fn csv_reader_tolerates_missing_sensor_columns_and_bad_rows() {
        let data = "subject_id,timestamp,latitude,longitude,temperature\n\
                    s1,2024-01-01T00:00:00Z,25.0,-80.0,24.5\n\
                    s1,2024-01-01T06:00:00Z,not-a-number,-80.0,\n\
                    s1,2024-01-01T12:00:00Z,25.2,-80.1,\n";
        let (pings, events) = read_pings_csv(data.as_bytes()).unwrap();
        assert_eq!(pings.len(), 2);
        assert_eq!(pings[0].temperature, Some(24.5));
        assert_eq!(pings[1].temperature, None);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            DataQualityEvent::InvalidRecord {
                position: RecordPosition::Line(3),
                ..
            }
        ));
        assert!(events[0].to_string().starts_with("record at line 3 rejected"));
    }

    #[test]
    fn csv_reader_requires_core_columns() {
        let data = "subject_id,timestamp,latitude\ns1,2024-01-01T00:00:00Z,25.0\n";
        assert!(matches!(
            read_pings_csv(data.as_bytes()),
            Err(StageError::InvalidInput(_))
        ));
    }

    #[test]
    fn json_reader_accepts_flat_and_nested_shapes() {
        let data = r#"[
            {"subject_id": "s1", "timestamp": "2024-01-01T00:00:00Z", "latitude": 25.0, "longitude": -80.0},
            {"id": 7, "timestamp": "2024-01-01T06:00:00Z", "GPS": {"lat": 26.0, "lon": -81.0, "alt": 0.0},
             "temp": 22.0, "pressure": 1.2, "q": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}},
            {"id": 8, "timestamp": "2024-01-01T06:00:00Z"}
        ]"#;
        let (pings, events) = read_pings_json(data.as_bytes()).unwrap();
        assert_eq!(pings.len(), 2);
        assert_eq!(pings[1].subject_id, "7");
        assert_eq!(pings[1].temperature, Some(22.0));
        assert!(pings[1].orientation.is_some());
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            DataQualityEvent::InvalidRecord {
                position: RecordPosition::Index(2),
                ..
            }
        ));
        assert!(events[0].to_string().starts_with("record at element 2 rejected"));
    }
}
