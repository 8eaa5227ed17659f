use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Note name the service uses for a rest beat.
pub const REST_MARKER: &str = "NO";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Instrument {
    #[default]
    #[serde(rename = "sks")]
    Saxophone,
    #[serde(rename = "sn")]
    Suona,
}

impl Instrument {
    pub fn code(self) -> &'static str {
        match self {
            Self::Saxophone => "sks",
            Self::Suona => "sn",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Saxophone => "saxophone",
            Self::Suona => "suona",
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Instrument {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sks" | "saxophone" => Ok(Self::Saxophone),
            "sn" | "suona" => Ok(Self::Suona),
            _ => Err(ProtocolError::UnknownInstrument(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
    Stopped,
}

impl PlaybackState {
    /// Derives a state from the flag pair older service builds report.
    pub fn from_flags(is_playing: bool, is_paused: bool) -> Self {
        if is_paused {
            Self::Paused
        } else if is_playing {
            Self::Playing
        } else {
            Self::Idle
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

impl FromStr for PlaybackState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(Self::Idle),
            "playing" => Ok(Self::Playing),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            _ => Err(ProtocolError::UnknownState(s.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for PlaybackState {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
