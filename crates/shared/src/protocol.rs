use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{
    domain::{Instrument, PlaybackState, REST_MARKER},
    error::ProtocolError,
};

pub const DEFAULT_TONGUING_DELAY_MS: u32 = 30;
/// Sentinel bpm that tells the service to use the tempo stored in the file.
pub const FILE_DEFAULT_BPM: f64 = 0.0;

/// Checks a record against the wire contract, on either side of serde.
pub trait Validate {
    fn validate(&self) -> Result<(), ProtocolError>;
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ProtocolError> {
    if value.trim().is_empty() {
        return Err(ProtocolError::Empty { field });
    }
    Ok(())
}

fn require_tempo(bpm: f64) -> Result<(), ProtocolError> {
    if !bpm.is_finite() || bpm < 0.0 {
        return Err(ProtocolError::InvalidBpm(bpm));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicFileDescriptor {
    pub filename: String,
    #[serde(default)]
    pub title: String,
    pub bpm: f64,
    /// Number of notes in the piece.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

impl Validate for MusicFileDescriptor {
    fn validate(&self) -> Result<(), ProtocolError> {
        require_non_empty("filename", &self.filename)?;
        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(ProtocolError::NonPositiveFileBpm {
                filename: self.filename.clone(),
                bpm: self.bpm,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicFileList {
    pub total: usize,
    #[serde(default, deserialize_with = "null_as_default")]
    pub files: Vec<MusicFileDescriptor>,
}

impl Validate for MusicFileList {
    fn validate(&self) -> Result<(), ProtocolError> {
        if self.total != self.files.len() {
            return Err(ProtocolError::TotalMismatch {
                total: self.total,
                actual: self.files.len(),
            });
        }
        self.files.iter().try_for_each(Validate::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStartRequest {
    pub filename: String,
    pub instrument: Instrument,
    pub bpm: f64,
    pub tonguing_delay: u32,
}

impl PlaybackStartRequest {
    pub fn new(filename: impl Into<String>, instrument: Instrument) -> Self {
        Self {
            filename: filename.into(),
            instrument,
            bpm: FILE_DEFAULT_BPM,
            tonguing_delay: DEFAULT_TONGUING_DELAY_MS,
        }
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = bpm;
        self
    }

    pub fn with_tonguing_delay(mut self, tonguing_delay: u32) -> Self {
        self.tonguing_delay = tonguing_delay;
        self
    }

    pub fn uses_file_tempo(&self) -> bool {
        self.bpm == FILE_DEFAULT_BPM
    }
}

impl Validate for PlaybackStartRequest {
    fn validate(&self) -> Result<(), ProtocolError> {
        require_non_empty("filename", &self.filename)?;
        require_tempo(self.bpm)
    }
}

/// Generic acknowledgement; anything besides `message` is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Validate for Ack {
    fn validate(&self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawPlaybackStatus {
    #[serde(default)]
    state: Option<PlaybackState>,
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    is_paused: bool,
    #[serde(default, alias = "current_file", deserialize_with = "empty_as_none")]
    active_file: Option<String>,
    #[serde(default)]
    bpm: Option<f64>,
    #[serde(default)]
    tonguing_delay: Option<u32>,
    #[serde(default, alias = "current_note")]
    position: Option<u64>,
    #[serde(default)]
    total_notes: Option<u64>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    elapsed_time: Option<String>,
}

/// Server-side view of playback. Accepts both the explicit `state` form and
/// the `is_playing`/`is_paused` flag form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPlaybackStatus")]
pub struct PlaybackStatusSnapshot {
    pub state: PlaybackState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tonguing_delay: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_notes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<String>,
}

impl TryFrom<RawPlaybackStatus> for PlaybackStatusSnapshot {
    type Error = ProtocolError;

    fn try_from(raw: RawPlaybackStatus) -> Result<Self, Self::Error> {
        if let Some(bpm) = raw.bpm {
            require_tempo(bpm)?;
        }
        let state = raw
            .state
            .unwrap_or_else(|| PlaybackState::from_flags(raw.is_playing, raw.is_paused));
        Ok(Self {
            state,
            active_file: raw.active_file,
            bpm: raw.bpm,
            tonguing_delay: raw.tonguing_delay,
            position: raw.position,
            total_notes: raw.total_notes,
            progress: raw.progress,
            elapsed_time: raw.elapsed_time,
        })
    }
}

impl Validate for PlaybackStatusSnapshot {
    fn validate(&self) -> Result<(), ProtocolError> {
        if let Some(bpm) = self.bpm {
            require_tempo(bpm)?;
        }
        Ok(())
    }
}

/// Actuator positions for one hand: a list of pressed fingers or a raw code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActuatorCode {
    Fingers(Vec<String>),
    Code(String),
}

impl Default for ActuatorCode {
    fn default() -> Self {
        Self::Fingers(Vec::new())
    }
}

impl std::fmt::Display for ActuatorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fingers(fingers) if fingers.is_empty() => f.write_str("-"),
            Self::Fingers(fingers) => f.write_str(&fingers.join(",")),
            Self::Code(code) => f.write_str(code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingeringEntry {
    pub note: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub left: ActuatorCode,
    #[serde(default, deserialize_with = "null_as_default")]
    pub right: ActuatorCode,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FingeringList {
    #[serde(default, deserialize_with = "null_as_default")]
    pub fingerings: Vec<FingeringEntry>,
}

impl Validate for FingeringList {
    fn validate(&self) -> Result<(), ProtocolError> {
        self.fingerings
            .iter()
            .try_for_each(|entry| require_non_empty("fingering note", &entry.note))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendFingeringRequest {
    pub note: String,
    pub instrument: Instrument,
}

impl Validate for SendFingeringRequest {
    fn validate(&self) -> Result<(), ProtocolError> {
        require_non_empty("note", &self.note)
    }
}

/// One `[note, duration]` pair; duration is in beats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, f64)", into = "(String, f64)")]
pub struct TimelineEntry {
    pub note: String,
    pub duration: f64,
}

impl TimelineEntry {
    pub fn new(note: impl Into<String>, duration: f64) -> Self {
        Self {
            note: note.into(),
            duration,
        }
    }

    pub fn rest(duration: f64) -> Self {
        Self::new(REST_MARKER, duration)
    }

    pub fn is_rest(&self) -> bool {
        self.note == REST_MARKER
    }
}

impl From<(String, f64)> for TimelineEntry {
    fn from((note, duration): (String, f64)) -> Self {
        Self { note, duration }
    }
}

impl From<TimelineEntry> for (String, f64) {
    fn from(entry: TimelineEntry) -> Self {
        (entry.note, entry.duration)
    }
}

pub fn validate_timeline(timeline: &[TimelineEntry]) -> Result<(), ProtocolError> {
    for (i, entry) in timeline.iter().enumerate() {
        let index = i + 1;
        if entry.note.trim().is_empty() {
            return Err(ProtocolError::EmptyNote { index });
        }
        if !entry.duration.is_finite() || entry.duration <= 0.0 {
            return Err(ProtocolError::InvalidDuration {
                index,
                note: entry.note.clone(),
                duration: entry.duration,
            });
        }
    }
    Ok(())
}

pub fn total_beats(timeline: &[TimelineEntry]) -> f64 {
    // `Sum` for f64 starts from -0.0.
    timeline.iter().fold(0.0, |acc, entry| acc + entry.duration)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub bpm: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timeline: Vec<TimelineEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl Validate for TimelineResponse {
    fn validate(&self) -> Result<(), ProtocolError> {
        require_tempo(self.bpm)?;
        validate_timeline(&self.timeline)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateTimelineRequest<'a> {
    pub filename: &'a str,
    pub timeline: &'a [TimelineEntry],
}

impl Validate for UpdateTimelineRequest<'_> {
    fn validate(&self) -> Result<(), ProtocolError> {
        require_non_empty("filename", self.filename)?;
        validate_timeline(self.timeline)
    }
}

/// A timeline read from disk: either a bare `[[note, duration], ...]` array
/// or a music file object carrying a `timeline` key.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TimelineDocument {
    Bare(Vec<TimelineEntry>),
    MusicFile { timeline: Vec<TimelineEntry> },
}

impl TimelineDocument {
    pub fn into_entries(self) -> Vec<TimelineEntry> {
        match self {
            Self::Bare(entries) => entries,
            Self::MusicFile { timeline } => timeline,
        }
    }
}

/// Piece, instrument and tempo settings that identify a compiled execution
/// sequence on the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionProfile {
    pub source_file: String,
    pub instrument: Instrument,
    pub bpm: f64,
    pub tonguing_delay: u32,
}

impl ExecutionProfile {
    pub fn new(source_file: impl Into<String>, instrument: Instrument) -> Self {
        Self {
            source_file: source_file.into(),
            instrument,
            bpm: FILE_DEFAULT_BPM,
            tonguing_delay: DEFAULT_TONGUING_DELAY_MS,
        }
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = bpm;
        self
    }

    pub fn with_tonguing_delay(mut self, tonguing_delay: u32) -> Self {
        self.tonguing_delay = tonguing_delay;
        self
    }

    /// Query pairs for the existence check. The service names compiled
    /// sequences with the bpm rounded to an integer, so it is sent that way.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        vec![
            ("source_file", self.source_file.clone()),
            ("instrument", self.instrument.code().to_string()),
            ("bpm", format!("{:.0}", self.bpm)),
            ("tonguing_delay", self.tonguing_delay.to_string()),
        ]
    }
}

impl Validate for ExecutionProfile {
    fn validate(&self) -> Result<(), ProtocolError> {
        require_non_empty("source_file", &self.source_file)?;
        require_tempo(self.bpm)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreprocessResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub exec_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_path: Option<String>,
    #[serde(default)]
    pub total_events: u64,
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default)]
    pub duration_sec: f64,
}

impl Validate for PreprocessResponse {
    fn validate(&self) -> Result<(), ProtocolError> {
        require_non_empty("exec_file", &self.exec_file)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecCheckResponse {
    pub exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_events: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Validate for ExecCheckResponse {
    fn validate(&self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecPlayRequest {
    pub exec_file: String,
}

impl Validate for ExecPlayRequest {
    fn validate(&self) -> Result<(), ProtocolError> {
        require_non_empty("exec_file", &self.exec_file)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecPlayResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub exec_file: String,
    #[serde(default)]
    pub total_events: u64,
    #[serde(default)]
    pub duration_sec: f64,
}

impl Validate for ExecPlayResponse {
    fn validate(&self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpDebugRequest {
    pub command: String,
}

impl Validate for PumpDebugRequest {
    fn validate(&self) -> Result<(), ProtocolError> {
        require_non_empty("command", &self.command)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpDebugResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
}

impl Validate for PumpDebugResponse {
    fn validate(&self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceConfigResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub config: Map<String, Value>,
}

impl Validate for DeviceConfigResponse {
    fn validate(&self) -> Result<(), ProtocolError> {
        Ok(())
    }
}

/// Actuator settings to persist on the service; keys the service does not
/// know are ignored there.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveDeviceConfigRequest<'a> {
    pub config: &'a Map<String, Value>,
}

impl Validate for SaveDeviceConfigRequest<'_> {
    fn validate(&self) -> Result<(), ProtocolError> {
        if self.config.is_empty() {
            return Err(ProtocolError::Empty { field: "config" });
        }
        Ok(())
    }
}
