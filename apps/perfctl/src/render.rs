use std::io::{self, Write};

use serde::Serialize;
use shared::protocol::{total_beats, Ack, FingeringList, TimelineResponse};

use crate::dispatch::Outcome;

/// Listings of fingerings and timeline notes show at most this many rows.
pub const PREVIEW_LIMIT: usize = 10;

pub fn outcome(outcome: &Outcome, out: &mut dyn Write) -> io::Result<()> {
    match outcome {
        Outcome::Listing(listing) => {
            writeln!(out, "Found {} music files:", listing.total)?;
            for file in &listing.files {
                writeln!(out, "  {} - {} ({} BPM)", file.filename, file.title, file.bpm)?;
            }
            Ok(())
        }
        Outcome::Started { ack, request } => {
            acknowledge(ack, out)?;
            writeln!(out, "Playback request:")?;
            pretty(request, out)
        }
        Outcome::Acknowledged(ack) => acknowledge(ack, out),
        Outcome::Status(status) => {
            writeln!(out, "Playback status:")?;
            pretty(status, out)
        }
        Outcome::Fingerings { instrument, list } => {
            writeln!(
                out,
                "{} ({}) fingerings:",
                instrument.code().to_uppercase(),
                instrument.name()
            )?;
            fingerings(list, out)
        }
        Outcome::Timeline { filename, response } => timeline(filename, response, out),
        Outcome::TimelineUpdated {
            filename,
            entries,
            ack,
        } => {
            acknowledge(ack, out)?;
            writeln!(out, "  {entries} notes written to {filename}")
        }
        Outcome::Preprocessed(compiled) => {
            acknowledge_message(compiled.message.as_deref(), out)?;
            writeln!(out, "  exec file: {}", compiled.exec_file)?;
            if let Some(path) = &compiled.exec_path {
                writeln!(out, "  path: {path}")?;
            }
            writeln!(
                out,
                "  {} events, {:.1}s",
                compiled.total_events, compiled.duration_sec
            )
        }
        Outcome::ExecChecked { profile, response } => {
            let exec_file = response.exec_file.as_deref().unwrap_or("<unknown>");
            if response.exists {
                writeln!(out, "Execution sequence {exec_file} is ready")?;
                if let (Some(events), Some(secs)) = (response.total_events, response.duration_sec)
                {
                    writeln!(out, "  {events} events, {secs:.1}s")?;
                }
            } else {
                writeln!(
                    out,
                    "No execution sequence for {} ({}, {} BPM, {} ms) yet; expected {exec_file}",
                    profile.source_file,
                    profile.instrument,
                    profile.bpm,
                    profile.tonguing_delay
                )?;
            }
            if let Some(error) = &response.error {
                writeln!(out, "  warning: {error}")?;
            }
            Ok(())
        }
        Outcome::ExecStarted(started) => {
            acknowledge_message(started.message.as_deref(), out)?;
            writeln!(
                out,
                "  {}: {} events, {:.1}s",
                started.exec_file, started.total_events, started.duration_sec
            )
        }
        Outcome::Pump(pump) => {
            acknowledge_message(pump.message.as_deref(), out)?;
            match &pump.response {
                Some(serde_json::Value::String(text)) => writeln!(out, "  response: {text}"),
                Some(other) => writeln!(out, "  response: {other}"),
                None => Ok(()),
            }
        }
        Outcome::DeviceConfig(config) => {
            acknowledge_message(config.message.as_deref(), out)?;
            if let Some(warning) = &config.warning {
                writeln!(out, "warning: {warning}")?;
            }
            pretty(&config.config, out)
        }
        Outcome::DeviceConfigSaved { settings, ack } => {
            acknowledge(ack, out)?;
            writeln!(out, "  {settings} settings saved")
        }
    }
}

fn acknowledge(ack: &Ack, out: &mut dyn Write) -> io::Result<()> {
    acknowledge_message(ack.message.as_deref(), out)
}

fn acknowledge_message(message: Option<&str>, out: &mut dyn Write) -> io::Result<()> {
    match message {
        Some(message) => writeln!(out, "ok: {message}"),
        None => writeln!(out, "ok"),
    }
}

fn pretty<T: Serialize + ?Sized>(value: &T, out: &mut dyn Write) -> io::Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    writeln!(out, "{text}")
}

fn fingerings(list: &FingeringList, out: &mut dyn Write) -> io::Result<()> {
    for entry in list.fingerings.iter().take(PREVIEW_LIMIT) {
        writeln!(out, "  {}: L={}, R={}", entry.note, entry.left, entry.right)?;
    }
    writeln!(out, "  ... {} fingerings in total", list.fingerings.len())
}

fn timeline(filename: &str, response: &TimelineResponse, out: &mut dyn Write) -> io::Result<()> {
    let notes = &response.timeline;
    writeln!(out, "{filename} timeline:")?;
    writeln!(out, "  BPM: {}", response.bpm)?;
    writeln!(out, "  Notes: {} ({} beats)", notes.len(), total_beats(notes))?;
    if notes.is_empty() {
        return writeln!(out, "  (no notes)");
    }
    writeln!(out, "  First {} notes:", notes.len().min(PREVIEW_LIMIT))?;
    for (i, entry) in notes.iter().take(PREVIEW_LIMIT).enumerate() {
        let rest = if entry.is_rest() { " (rest)" } else { "" };
        writeln!(
            out,
            "    {}. {}{rest} - {} beats",
            i + 1,
            entry.note,
            entry.duration
        )?;
    }
    writeln!(out, "  ... {} notes in total", notes.len())
}
