use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use client_core::{ClientError, PerformanceApi};
use serde_json::{Map, Value};
use shared::{
    domain::Instrument,
    protocol::{
        validate_timeline, Ack, DeviceConfigResponse, ExecCheckResponse, ExecPlayResponse,
        ExecutionProfile, FingeringList, MusicFileList, PlaybackStartRequest,
        PlaybackStatusSnapshot, PreprocessResponse, PumpDebugResponse, TimelineDocument,
        TimelineEntry, TimelineResponse,
    },
};
use thiserror::Error;
use tracing::debug;

use crate::render;

pub const PROGRAM: &str = "perfctl";

#[derive(Debug, Error)]
pub enum CliError {
    #[error("no command given")]
    MissingCommand,
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{message}")]
    Usage {
        message: String,
        usage: &'static str,
    },
    #[error("failed to read timeline file '{}': {source}", .path.display())]
    TimelineFile {
        path: PathBuf,
        source: io::Error,
    },
    #[error("timeline file '{}' is invalid: {reason}", .path.display())]
    InvalidTimelineFile { path: PathBuf, reason: String },
    #[error("failed to read device settings file '{}': {source}", .path.display())]
    DeviceSettingsFile {
        path: PathBuf,
        source: io::Error,
    },
    #[error("device settings file '{}' is invalid: {reason}", .path.display())]
    InvalidDeviceSettingsFile { path: PathBuf, reason: String },
    #[error("configuration error: {0:#}")]
    Config(anyhow::Error),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Why an argument parser refused its input.
enum ArgError {
    /// Reported with the command's usage line.
    Invalid(String),
    Other(CliError),
}

type ArgParser = fn(&[String]) -> Result<Invocation, ArgError>;

/// One row of the command table.
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub summary: &'static str,
    pub min_args: usize,
    /// Shown when fewer than `min_args` arguments are given.
    pub missing: &'static str,
    parse: ArgParser,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "list",
        usage: "list [search]",
        summary: "List music files, optionally filtered by name",
        min_args: 0,
        missing: "",
        parse: parse_list,
    },
    CommandSpec {
        name: "play",
        usage: "play <filename> [bpm] [tonguing_delay]",
        summary: "Play a piece on the saxophone (bpm 0 = file default)",
        min_args: 1,
        missing: "a music file name is required",
        parse: parse_play_saxophone,
    },
    CommandSpec {
        name: "play-suona",
        usage: "play-suona <filename> [bpm] [tonguing_delay]",
        summary: "Play a piece on the suona (bpm 0 = file default)",
        min_args: 1,
        missing: "a music file name is required",
        parse: parse_play_suona,
    },
    CommandSpec {
        name: "pause",
        usage: "pause",
        summary: "Pause or resume playback",
        min_args: 0,
        missing: "",
        parse: parse_pause,
    },
    CommandSpec {
        name: "stop",
        usage: "stop",
        summary: "Stop playback",
        min_args: 0,
        missing: "",
        parse: parse_stop,
    },
    CommandSpec {
        name: "status",
        usage: "status",
        summary: "Show the playback status",
        min_args: 0,
        missing: "",
        parse: parse_status,
    },
    CommandSpec {
        name: "fingerings",
        usage: "fingerings [instrument]",
        summary: "Show the fingering table of an instrument (sks or sn)",
        min_args: 0,
        missing: "",
        parse: parse_fingerings,
    },
    CommandSpec {
        name: "send-note",
        usage: "send-note <note> [instrument]",
        summary: "Send the fingering of a single note",
        min_args: 1,
        missing: "a note name is required",
        parse: parse_send_note,
    },
    CommandSpec {
        name: "timeline",
        usage: "timeline <filename>",
        summary: "Show the note timeline of a piece",
        min_args: 1,
        missing: "a music file name is required",
        parse: parse_timeline,
    },
    CommandSpec {
        name: "timeline-update",
        usage: "timeline-update <filename> <timeline.json>",
        summary: "Replace the timeline of a piece with the contents of a local file",
        min_args: 2,
        missing: "a music file name and a timeline file are required",
        parse: parse_timeline_update,
    },
    CommandSpec {
        name: "preprocess",
        usage: "preprocess <filename> [instrument] [bpm] [tonguing_delay]",
        summary: "Compile a piece into an execution sequence",
        min_args: 1,
        missing: "a music file name is required",
        parse: parse_preprocess,
    },
    CommandSpec {
        name: "exec-check",
        usage: "exec-check <filename> [instrument] [bpm] [tonguing_delay]",
        summary: "Check whether a compiled execution sequence exists",
        min_args: 1,
        missing: "a music file name is required",
        parse: parse_exec_check,
    },
    CommandSpec {
        name: "exec-play",
        usage: "exec-play <exec_file>",
        summary: "Play a compiled execution sequence",
        min_args: 1,
        missing: "an execution sequence file name is required",
        parse: parse_exec_play,
    },
    CommandSpec {
        name: "pump",
        usage: "pump <command>",
        summary: "Send a raw command to the air pump",
        min_args: 1,
        missing: "a pump command is required",
        parse: parse_pump,
    },
    CommandSpec {
        name: "config",
        usage: "config",
        summary: "Show the service's actuator configuration",
        min_args: 0,
        missing: "",
        parse: parse_device_config,
    },
    CommandSpec {
        name: "config-reload",
        usage: "config-reload",
        summary: "Make the service reload its actuator configuration",
        min_args: 0,
        missing: "",
        parse: parse_reload_device_config,
    },
    CommandSpec {
        name: "config-save",
        usage: "config-save <settings.json>",
        summary: "Save actuator settings from a local JSON object to the service",
        min_args: 1,
        missing: "a settings file is required",
        parse: parse_save_device_config,
    },
];

pub fn find_command(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|spec| spec.name == name)
}

/// Command list appended to `--help` and printed on usage errors.
pub fn command_help() -> String {
    let width = COMMANDS.iter().map(|c| c.usage.len()).max().unwrap_or(0);
    let mut text = String::from("Commands:\n");
    for spec in COMMANDS {
        text.push_str(&format!(
            "  {:width$}  {}\n",
            spec.usage,
            spec.summary,
            width = width
        ));
    }
    text
}

pub fn usage_text() -> String {
    format!(
        "Usage: {PROGRAM} [--base-url URL] [--config FILE] [-v] <command> [args...]\n\n{}",
        command_help()
    )
}

/// A validated command, ready to perform its single service call.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    List { search: Option<String> },
    Play(PlaybackStartRequest),
    Pause,
    Stop,
    Status,
    Fingerings(Instrument),
    SendNote { note: String, instrument: Instrument },
    Timeline { filename: String },
    UpdateTimeline {
        filename: String,
        timeline: Vec<TimelineEntry>,
    },
    Preprocess(ExecutionProfile),
    ExecCheck(ExecutionProfile),
    ExecPlay { exec_file: String },
    Pump { command: String },
    DeviceConfig,
    ReloadDeviceConfig,
    SaveDeviceConfig { config: Map<String, Value> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Listing(MusicFileList),
    Started {
        ack: Ack,
        request: PlaybackStartRequest,
    },
    Acknowledged(Ack),
    Status(PlaybackStatusSnapshot),
    Fingerings {
        instrument: Instrument,
        list: FingeringList,
    },
    Timeline {
        filename: String,
        response: TimelineResponse,
    },
    TimelineUpdated {
        filename: String,
        entries: usize,
        ack: Ack,
    },
    Preprocessed(PreprocessResponse),
    ExecChecked {
        profile: ExecutionProfile,
        response: ExecCheckResponse,
    },
    ExecStarted(ExecPlayResponse),
    Pump(PumpDebugResponse),
    DeviceConfig(DeviceConfigResponse),
    DeviceConfigSaved { settings: usize, ack: Ack },
}

impl Invocation {
    pub async fn execute(self, api: &dyn PerformanceApi) -> Result<Outcome, ClientError> {
        let outcome = match self {
            Self::List { search } => Outcome::Listing(api.list_music_files(search.as_deref()).await?),
            Self::Play(request) => {
                let ack = api.start_playback(&request).await?;
                Outcome::Started { ack, request }
            }
            Self::Pause => Outcome::Acknowledged(api.toggle_pause().await?),
            Self::Stop => Outcome::Acknowledged(api.stop_playback().await?),
            Self::Status => Outcome::Status(api.status().await?),
            Self::Fingerings(instrument) => Outcome::Fingerings {
                instrument,
                list: api.fingerings(instrument).await?,
            },
            Self::SendNote { note, instrument } => {
                Outcome::Acknowledged(api.send_fingering(&note, instrument).await?)
            }
            Self::Timeline { filename } => {
                let response = api.timeline(&filename).await?;
                Outcome::Timeline { filename, response }
            }
            Self::UpdateTimeline { filename, timeline } => {
                let ack = api.update_timeline(&filename, &timeline).await?;
                Outcome::TimelineUpdated {
                    filename,
                    entries: timeline.len(),
                    ack,
                }
            }
            Self::Preprocess(profile) => Outcome::Preprocessed(api.preprocess(&profile).await?),
            Self::ExecCheck(profile) => {
                let response = api.check_exec(&profile).await?;
                Outcome::ExecChecked { profile, response }
            }
            Self::ExecPlay { exec_file } => Outcome::ExecStarted(api.play_exec(&exec_file).await?),
            Self::Pump { command } => Outcome::Pump(api.pump_debug(&command).await?),
            Self::DeviceConfig => Outcome::DeviceConfig(api.device_config().await?),
            Self::ReloadDeviceConfig => Outcome::DeviceConfig(api.reload_device_config().await?),
            Self::SaveDeviceConfig { config } => {
                let ack = api.save_device_config(&config).await?;
                Outcome::DeviceConfigSaved {
                    settings: config.len(),
                    ack,
                }
            }
        };
        Ok(outcome)
    }
}

/// Resolves a command word and its positional arguments. Nothing here touches
/// the network.
pub fn parse(command: Option<&str>, args: &[String]) -> Result<Invocation, CliError> {
    let Some(name) = command else {
        return Err(CliError::MissingCommand);
    };
    let spec = find_command(name).ok_or_else(|| CliError::UnknownCommand(name.to_string()))?;
    if args.len() < spec.min_args {
        return Err(CliError::Usage {
            message: spec.missing.to_string(),
            usage: spec.usage,
        });
    }
    (spec.parse)(args).map_err(|err| match err {
        ArgError::Invalid(message) => CliError::Usage {
            message,
            usage: spec.usage,
        },
        ArgError::Other(err) => err,
    })
}

pub async fn execute(
    invocation: Invocation,
    api: &dyn PerformanceApi,
    out: &mut dyn Write,
) -> Result<(), CliError> {
    debug!(?invocation, "perfctl: dispatching");
    let outcome = invocation.execute(api).await?;
    render::outcome(&outcome, out)?;
    Ok(())
}

pub fn exit_status(result: &Result<(), CliError>) -> u8 {
    match result {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

/// Prints the single `error:` line for a failed invocation, plus usage text
/// where it helps.
pub fn report(err: &CliError, out: &mut dyn Write) -> io::Result<()> {
    match err {
        CliError::MissingCommand => write!(out, "{}", usage_text()),
        CliError::UnknownCommand(name) => {
            writeln!(out, "error: unknown command '{name}'")?;
            write!(out, "{}", usage_text())
        }
        CliError::Usage { message, usage } => {
            writeln!(out, "error: {message}")?;
            writeln!(out, "usage: {PROGRAM} {usage}")
        }
        other => writeln!(out, "error: {}", error_chain(other)),
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut line = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !line.contains(&text) {
            line.push_str(": ");
            line.push_str(&text);
        }
        source = cause.source();
    }
    line
}

fn arg(args: &[String], index: usize) -> Option<&str> {
    args.get(index).map(String::as_str)
}

fn parse_bpm(raw: &str) -> Result<f64, ArgError> {
    let bpm: f64 = raw
        .trim()
        .parse()
        .map_err(|_| ArgError::Invalid(format!("bpm must be a number, got '{raw}'")))?;
    if !bpm.is_finite() || bpm < 0.0 {
        return Err(ArgError::Invalid(format!(
            "bpm must be 0 (file default) or a positive number, got '{raw}'"
        )));
    }
    Ok(bpm)
}

fn parse_tonguing_delay(raw: &str) -> Result<u32, ArgError> {
    raw.trim().parse().map_err(|_| {
        ArgError::Invalid(format!(
            "tonguing delay must be a whole number of milliseconds >= 0, got '{raw}'"
        ))
    })
}

fn parse_instrument(raw: Option<&str>) -> Result<Instrument, ArgError> {
    match raw {
        Some(raw) => raw
            .parse()
            .map_err(|err: shared::error::ProtocolError| ArgError::Invalid(err.to_string())),
        None => Ok(Instrument::default()),
    }
}

fn parse_list(args: &[String]) -> Result<Invocation, ArgError> {
    let search = arg(args, 0).filter(|s| !s.is_empty()).map(str::to_string);
    Ok(Invocation::List { search })
}

fn parse_start(args: &[String], instrument: Instrument) -> Result<Invocation, ArgError> {
    let mut request = PlaybackStartRequest::new(&args[0], instrument);
    if let Some(raw) = arg(args, 1) {
        request = request.with_bpm(parse_bpm(raw)?);
    }
    if let Some(raw) = arg(args, 2) {
        request = request.with_tonguing_delay(parse_tonguing_delay(raw)?);
    }
    Ok(Invocation::Play(request))
}

fn parse_play_saxophone(args: &[String]) -> Result<Invocation, ArgError> {
    parse_start(args, Instrument::Saxophone)
}

fn parse_play_suona(args: &[String]) -> Result<Invocation, ArgError> {
    parse_start(args, Instrument::Suona)
}

fn parse_pause(_: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::Pause)
}

fn parse_stop(_: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::Stop)
}

fn parse_status(_: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::Status)
}

fn parse_fingerings(args: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::Fingerings(parse_instrument(arg(args, 0))?))
}

fn parse_send_note(args: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::SendNote {
        note: args[0].clone(),
        instrument: parse_instrument(arg(args, 1))?,
    })
}

fn parse_timeline(args: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::Timeline {
        filename: args[0].clone(),
    })
}

fn parse_timeline_update(args: &[String]) -> Result<Invocation, ArgError> {
    let path = PathBuf::from(&args[1]);
    let timeline = read_timeline_file(&path).map_err(ArgError::Other)?;
    Ok(Invocation::UpdateTimeline {
        filename: args[0].clone(),
        timeline,
    })
}

/// Reads a local timeline, either a bare `[[note, duration], ...]` array or a
/// music file with a `timeline` key.
pub fn read_timeline_file(path: &Path) -> Result<Vec<TimelineEntry>, CliError> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::TimelineFile {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = |reason: String| CliError::InvalidTimelineFile {
        path: path.to_path_buf(),
        reason,
    };
    let document: TimelineDocument =
        serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))?;
    let timeline = document.into_entries();
    validate_timeline(&timeline).map_err(|e| invalid(e.to_string()))?;
    Ok(timeline)
}

fn parse_profile(args: &[String]) -> Result<ExecutionProfile, ArgError> {
    let mut profile = ExecutionProfile::new(&args[0], parse_instrument(arg(args, 1))?);
    if let Some(raw) = arg(args, 2) {
        profile = profile.with_bpm(parse_bpm(raw)?);
    }
    if let Some(raw) = arg(args, 3) {
        profile = profile.with_tonguing_delay(parse_tonguing_delay(raw)?);
    }
    Ok(profile)
}

fn parse_preprocess(args: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::Preprocess(parse_profile(args)?))
}

fn parse_exec_check(args: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::ExecCheck(parse_profile(args)?))
}

fn parse_exec_play(args: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::ExecPlay {
        exec_file: args[0].clone(),
    })
}

fn parse_pump(args: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::Pump {
        command: args.join(" "),
    })
}

fn parse_device_config(_: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::DeviceConfig)
}

fn parse_reload_device_config(_: &[String]) -> Result<Invocation, ArgError> {
    Ok(Invocation::ReloadDeviceConfig)
}

fn parse_save_device_config(args: &[String]) -> Result<Invocation, ArgError> {
    let config = read_device_settings_file(Path::new(&args[0])).map_err(ArgError::Other)?;
    Ok(Invocation::SaveDeviceConfig { config })
}

/// Reads the settings object printed by `config`. It must be a non-empty
/// JSON object.
pub fn read_device_settings_file(path: &Path) -> Result<Map<String, Value>, CliError> {
    let raw = fs::read_to_string(path).map_err(|source| CliError::DeviceSettingsFile {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = |reason: String| CliError::InvalidDeviceSettingsFile {
        path: path.to_path_buf(),
        reason,
    };
    let config: Map<String, Value> =
        serde_json::from_str(&raw).map_err(|e| invalid(e.to_string()))?;
    if config.is_empty() {
        return Err(invalid("no settings in file".into()));
    }
    Ok(config)
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;
