use super::*;
use std::{
    env,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use client_core::Result as ApiResult;
use serde_json::Value;
use shared::{
    domain::PlaybackState,
    protocol::{ActuatorCode, FingeringEntry, MusicFileDescriptor},
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    List(Option<String>),
    Start(PlaybackStartRequest),
    Pause,
    Stop,
    Status,
    Fingerings(Instrument),
    SendFingering(String, Instrument),
    Timeline(String),
    UpdateTimeline(String, usize),
    Preprocess(ExecutionProfile),
    CheckExec(ExecutionProfile),
    PlayExec(String),
    Pump(String),
    DeviceConfig,
    ReloadDeviceConfig,
    SaveDeviceConfig(usize),
}

#[derive(Default)]
struct FakeApi {
    calls: Mutex<Vec<Call>>,
    fingering_count: usize,
    timeline_len: usize,
    fail_status: bool,
}

impl FakeApi {
    fn record(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn ack(message: &str) -> Ack {
        Ack {
            message: Some(message.to_string()),
            ..Ack::default()
        }
    }
}

#[async_trait]
impl PerformanceApi for FakeApi {
    async fn list_music_files(&self, search: Option<&str>) -> ApiResult<MusicFileList> {
        self.record(Call::List(search.map(str::to_string)));
        Ok(MusicFileList {
            total: 1,
            files: vec![MusicFileDescriptor {
                filename: "test.json".into(),
                title: "Test Scale".into(),
                bpm: 90.0,
                duration: None,
                file_path: None,
                file_size: None,
                modified_at: None,
            }],
        })
    }

    async fn start_playback(&self, request: &PlaybackStartRequest) -> ApiResult<Ack> {
        self.record(Call::Start(request.clone()));
        Ok(Self::ack("Playback started"))
    }

    async fn toggle_pause(&self) -> ApiResult<Ack> {
        self.record(Call::Pause);
        Ok(Self::ack("Playback paused"))
    }

    async fn stop_playback(&self) -> ApiResult<Ack> {
        self.record(Call::Stop);
        Ok(Self::ack("Playback stopped"))
    }

    async fn status(&self) -> ApiResult<PlaybackStatusSnapshot> {
        self.record(Call::Status);
        if self.fail_status {
            return Err(ClientError::HttpStatus {
                code: 500,
                body: r#"{"error":"controller offline"}"#.into(),
            });
        }
        Ok(PlaybackStatusSnapshot {
            state: PlaybackState::Playing,
            active_file: Some("test.json".into()),
            bpm: Some(90.0),
            tonguing_delay: Some(30),
            position: Some(4),
            total_notes: Some(32),
            progress: Some(12.5),
            elapsed_time: None,
        })
    }

    async fn fingerings(&self, instrument: Instrument) -> ApiResult<FingeringList> {
        self.record(Call::Fingerings(instrument));
        let fingerings = (0..self.fingering_count)
            .map(|i| FingeringEntry {
                note: format!("N{i}"),
                left: ActuatorCode::Fingers(vec!["Thumb1".into()]),
                right: ActuatorCode::default(),
            })
            .collect();
        Ok(FingeringList { fingerings })
    }

    async fn send_fingering(&self, note: &str, instrument: Instrument) -> ApiResult<Ack> {
        self.record(Call::SendFingering(note.to_string(), instrument));
        Ok(Self::ack("Fingering sent"))
    }

    async fn timeline(&self, filename: &str) -> ApiResult<TimelineResponse> {
        self.record(Call::Timeline(filename.to_string()));
        let timeline = (0..self.timeline_len)
            .map(|i| {
                if i % 4 == 3 {
                    TimelineEntry::rest(1.0)
                } else {
                    TimelineEntry::new("A4", 0.5)
                }
            })
            .collect();
        Ok(TimelineResponse {
            filename: Some(filename.to_string()),
            bpm: 96.0,
            timeline,
            meta: None,
        })
    }

    async fn update_timeline(&self, filename: &str, timeline: &[TimelineEntry]) -> ApiResult<Ack> {
        self.record(Call::UpdateTimeline(filename.to_string(), timeline.len()));
        Ok(Self::ack("Timeline updated"))
    }

    async fn preprocess(&self, profile: &ExecutionProfile) -> ApiResult<PreprocessResponse> {
        self.record(Call::Preprocess(profile.clone()));
        Ok(PreprocessResponse {
            message: Some("Preprocessing finished".into()),
            exec_file: "test_sks_96_30.exec".into(),
            exec_path: None,
            total_events: 12,
            duration_ms: 1500.0,
            duration_sec: 1.5,
        })
    }

    async fn check_exec(&self, profile: &ExecutionProfile) -> ApiResult<ExecCheckResponse> {
        self.record(Call::CheckExec(profile.clone()));
        Ok(ExecCheckResponse {
            exists: false,
            exec_file: Some("test_sn_96_30.exec".into()),
            exec_path: None,
            total_events: None,
            duration_ms: None,
            duration_sec: None,
            error: None,
        })
    }

    async fn play_exec(&self, exec_file: &str) -> ApiResult<ExecPlayResponse> {
        self.record(Call::PlayExec(exec_file.to_string()));
        Ok(ExecPlayResponse {
            message: Some("Execution started".into()),
            exec_file: exec_file.to_string(),
            total_events: 12,
            duration_sec: 1.5,
        })
    }

    async fn pump_debug(&self, command: &str) -> ApiResult<PumpDebugResponse> {
        self.record(Call::Pump(command.to_string()));
        Ok(PumpDebugResponse {
            message: Some("Command sent".into()),
            command: Some(command.to_string()),
            response: Some(Value::String("OK".into())),
        })
    }

    async fn device_config(&self) -> ApiResult<DeviceConfigResponse> {
        self.record(Call::DeviceConfig);
        Ok(DeviceConfigResponse::default())
    }

    async fn reload_device_config(&self) -> ApiResult<DeviceConfigResponse> {
        self.record(Call::ReloadDeviceConfig);
        Ok(DeviceConfigResponse {
            message: Some("Configuration reloaded".into()),
            ..DeviceConfigResponse::default()
        })
    }

    async fn save_device_config(&self, config: &Map<String, Value>) -> ApiResult<Ack> {
        self.record(Call::SaveDeviceConfig(config.len()));
        Ok(Self::ack("Config saved"))
    }
}

async fn run_command(
    api: &FakeApi,
    command: Option<&str>,
    args: &[&str],
) -> (Result<(), CliError>, String) {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    let mut out = Vec::new();
    let result = match parse(command, &args) {
        Ok(invocation) => execute(invocation, api, &mut out).await,
        Err(err) => Err(err),
    };
    (result, String::from_utf8(out).expect("utf8 output"))
}

fn reported(err: &CliError) -> String {
    let mut out = Vec::new();
    report(err, &mut out).expect("report");
    String::from_utf8(out).expect("utf8 report")
}

static NEXT_FILE: AtomicUsize = AtomicUsize::new(0);

fn temp_json(contents: &str) -> PathBuf {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let seq = NEXT_FILE.fetch_add(1, Ordering::Relaxed);
    let path = env::temp_dir().join(format!("perfctl_dispatch_test_{suffix}_{seq}.json"));
    fs::write(&path, contents).expect("write temp file");
    path
}

#[tokio::test]
async fn missing_command_prints_usage_and_fails() {
    let api = FakeApi::default();
    let (result, out) = run_command(&api, None, &[]).await;

    assert_eq!(exit_status(&result), 1);
    let err = result.expect_err("missing command");
    assert!(matches!(err, CliError::MissingCommand));
    assert!(reported(&err).starts_with("Usage: perfctl"));
    assert!(out.is_empty());
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn play_without_filename_is_a_usage_error_without_requests() {
    let api = FakeApi::default();
    let (result, _) = run_command(&api, Some("play"), &[]).await;

    let err = result.expect_err("usage error");
    assert!(matches!(err, CliError::Usage { .. }));
    assert_eq!(
        reported(&err),
        "error: a music file name is required\nusage: perfctl play <filename> [bpm] [tonguing_delay]\n"
    );
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn play_defaults_to_saxophone_and_file_tempo() {
    let api = FakeApi::default();
    let (result, out) = run_command(&api, Some("play"), &["test.json"]).await;

    assert_eq!(exit_status(&result), 0);
    assert_eq!(
        api.calls(),
        vec![Call::Start(PlaybackStartRequest::new(
            "test.json",
            Instrument::Saxophone
        ))]
    );
    let Call::Start(request) = &api.calls()[0] else {
        panic!("expected a start call");
    };
    assert_eq!(request.bpm, 0.0);
    assert_eq!(request.tonguing_delay, 30);
    assert!(out.starts_with("ok: Playback started\nPlayback request:\n"));
    assert!(out.contains("\"instrument\": \"sks\""));
}

#[tokio::test]
async fn play_suona_forwards_tempo_and_default_delay() {
    let api = FakeApi::default();
    let (result, _) = run_command(&api, Some("play-suona"), &["molihua.json", "120"]).await;

    assert!(result.is_ok());
    assert_eq!(
        api.calls(),
        vec![Call::Start(
            PlaybackStartRequest::new("molihua.json", Instrument::Suona).with_bpm(120.0)
        )]
    );
}

#[tokio::test]
async fn explicit_tonguing_delay_is_forwarded() {
    let api = FakeApi::default();
    let (result, _) = run_command(&api, Some("play"), &["test.json", "96", "45"]).await;

    assert!(result.is_ok());
    assert_eq!(
        api.calls(),
        vec![Call::Start(
            PlaybackStartRequest::new("test.json", Instrument::Saxophone)
                .with_bpm(96.0)
                .with_tonguing_delay(45)
        )]
    );
}

#[tokio::test]
async fn malformed_numbers_are_rejected_before_any_request() {
    let api = FakeApi::default();

    for args in [
        vec!["test.json", "fast"],
        vec!["test.json", "-5"],
        vec!["test.json", "NaN"],
        vec!["test.json", "90", "soft"],
        vec!["test.json", "90", "-1"],
    ] {
        let (result, _) = run_command(&api, Some("play"), &args).await;
        let err = result.expect_err("invalid number");
        let text = reported(&err);
        assert!(text.starts_with("error: "), "{text}");
        assert!(
            text.ends_with("usage: perfctl play <filename> [bpm] [tonguing_delay]\n"),
            "{text}"
        );
    }
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn unknown_command_is_reported_with_usage() {
    let api = FakeApi::default();
    let (result, _) = run_command(&api, Some("dance"), &[]).await;

    let err = result.expect_err("unknown command");
    assert!(matches!(err, CliError::UnknownCommand(ref name) if name == "dance"));
    let text = reported(&err);
    assert!(text.starts_with("error: unknown command 'dance'\nUsage: perfctl"));
    assert!(text.contains("play-suona <filename>"));
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn send_note_defaults_to_saxophone() {
    let api = FakeApi::default();
    let (result, out) = run_command(&api, Some("send-note"), &["A4"]).await;
    assert!(result.is_ok());
    assert_eq!(out, "ok: Fingering sent\n");

    let (result, _) = run_command(&api, Some("send-note"), &["C5", "sn"]).await;
    assert!(result.is_ok());

    let (result, _) = run_command(&api, Some("send-note"), &["C5", "flute"]).await;
    assert!(matches!(result, Err(CliError::Usage { .. })));

    assert_eq!(
        api.calls(),
        vec![
            Call::SendFingering("A4".into(), Instrument::Saxophone),
            Call::SendFingering("C5".into(), Instrument::Suona),
        ]
    );
}

#[tokio::test]
async fn fingerings_preview_is_capped() {
    let api = FakeApi {
        fingering_count: 25,
        ..FakeApi::default()
    };
    let (result, out) = run_command(&api, Some("fingerings"), &[]).await;

    assert!(result.is_ok());
    assert_eq!(api.calls(), vec![Call::Fingerings(Instrument::Saxophone)]);
    assert!(out.starts_with("SKS (saxophone) fingerings:\n"));
    let rows = out.lines().filter(|line| line.starts_with("  N")).count();
    assert_eq!(rows, render::PREVIEW_LIMIT);
    assert!(out.contains("  N0: L=Thumb1, R=-\n"));
    assert!(!out.contains("N10:"));
    assert!(out.ends_with("  ... 25 fingerings in total\n"));
}

#[tokio::test]
async fn timeline_preview_is_capped_and_marks_rests() {
    let api = FakeApi {
        timeline_len: 14,
        ..FakeApi::default()
    };
    let (result, out) = run_command(&api, Some("timeline"), &["test.json"]).await;

    assert!(result.is_ok());
    assert_eq!(api.calls(), vec![Call::Timeline("test.json".into())]);
    assert!(out.starts_with("test.json timeline:\n  BPM: 96\n"));
    assert!(out.contains("  First 10 notes:\n"));
    assert!(out.contains("    4. NO (rest) - 1 beats\n"));
    assert!(out.contains("    10. A4 - 0.5 beats\n"));
    assert!(!out.contains("    11."));
    assert!(out.ends_with("  ... 14 notes in total\n"));
}

#[tokio::test]
async fn service_failure_is_a_single_error_line() {
    let api = FakeApi {
        fail_status: true,
        ..FakeApi::default()
    };
    let (result, out) = run_command(&api, Some("status"), &[]).await;

    assert_eq!(exit_status(&result), 1);
    let err = result.expect_err("status failure");
    assert_eq!(reported(&err), "error: HTTP 500: controller offline\n");
    assert!(out.is_empty());
}

#[tokio::test]
async fn status_renders_snapshot() {
    let api = FakeApi::default();
    let (result, out) = run_command(&api, Some("status"), &[]).await;

    assert!(result.is_ok());
    assert!(out.starts_with("Playback status:\n"));
    assert!(out.contains("\"state\": \"playing\""));
    assert!(out.contains("\"active_file\": \"test.json\""));
}

#[tokio::test]
async fn list_passes_search_through_and_drops_empty_filters() {
    let api = FakeApi::default();
    let (result, out) = run_command(&api, Some("list"), &["moli"]).await;
    assert!(result.is_ok());
    assert!(out.starts_with("Found 1 music files:\n"));

    let (result, _) = run_command(&api, Some("list"), &[""]).await;
    assert!(result.is_ok());
    let (result, _) = run_command(&api, Some("list"), &[]).await;
    assert!(result.is_ok());

    assert_eq!(
        api.calls(),
        vec![
            Call::List(Some("moli".into())),
            Call::List(None),
            Call::List(None),
        ]
    );
}

#[tokio::test]
async fn transport_commands_map_to_single_calls() {
    let api = FakeApi::default();
    for command in ["pause", "stop", "config", "config-reload"] {
        let (result, _) = run_command(&api, Some(command), &[]).await;
        assert!(result.is_ok(), "{command}");
    }
    assert_eq!(
        api.calls(),
        vec![
            Call::Pause,
            Call::Stop,
            Call::DeviceConfig,
            Call::ReloadDeviceConfig,
        ]
    );
}

#[tokio::test]
async fn timeline_update_reads_bare_and_music_file_documents() {
    let bare = temp_json(r#"[["A4", 1], ["NO", 0.5], ["C5", 2.0]]"#);
    let music = temp_json(r#"{"title": "Test", "bpm": 90, "timeline": [["D5", 1.5]]}"#);
    let api = FakeApi::default();

    let bare_arg = bare.to_string_lossy().to_string();
    let (result, out) = run_command(&api, Some("timeline-update"), &["test.json", bare_arg.as_str()]).await;
    assert!(result.is_ok());
    assert_eq!(out, "ok: Timeline updated\n  3 notes written to test.json\n");

    let music_arg = music.to_string_lossy().to_string();
    let (result, _) = run_command(&api, Some("timeline-update"), &["other.json", music_arg.as_str()]).await;
    assert!(result.is_ok());

    assert_eq!(
        api.calls(),
        vec![
            Call::UpdateTimeline("test.json".into(), 3),
            Call::UpdateTimeline("other.json".into(), 1),
        ]
    );
    fs::remove_file(bare).expect("cleanup");
    fs::remove_file(music).expect("cleanup");
}

#[tokio::test]
async fn invalid_timeline_files_never_reach_the_service() {
    let zero = temp_json(r#"[["A4", 0]]"#);
    let garbage = temp_json("not json");
    let api = FakeApi::default();

    let zero_arg = zero.to_string_lossy().to_string();
    let (result, _) = run_command(&api, Some("timeline-update"), &["test.json", zero_arg.as_str()]).await;
    let err = result.expect_err("zero duration");
    assert!(matches!(err, CliError::InvalidTimelineFile { .. }));
    assert!(reported(&err).starts_with("error: timeline file '"));

    let garbage_arg = garbage.to_string_lossy().to_string();
    let (result, _) =
        run_command(&api, Some("timeline-update"), &["test.json", garbage_arg.as_str()]).await;
    assert!(matches!(result, Err(CliError::InvalidTimelineFile { .. })));

    let missing = env::temp_dir().join("perfctl_timeline_that_does_not_exist.json");
    let missing_arg = missing.to_string_lossy().to_string();
    let (result, _) =
        run_command(&api, Some("timeline-update"), &["test.json", missing_arg.as_str()]).await;
    assert!(matches!(result, Err(CliError::TimelineFile { .. })));

    let (result, _) = run_command(&api, Some("timeline-update"), &["test.json"]).await;
    assert!(matches!(result, Err(CliError::Usage { .. })));

    assert!(api.calls().is_empty());
    fs::remove_file(zero).expect("cleanup");
    fs::remove_file(garbage).expect("cleanup");
}

#[tokio::test]
async fn timeline_update_rejects_objects_without_a_timeline() {
    let typo = temp_json(r#"{"api_base": "http://x/api", "timelne": [["A4", 1.0]]}"#);
    let null = temp_json(r#"{"title": "Test", "timeline": null}"#);
    let api = FakeApi::default();

    for path in [&typo, &null] {
        let arg = path.to_string_lossy().to_string();
        let (result, out) =
            run_command(&api, Some("timeline-update"), &["test.json", arg.as_str()]).await;
        let err = result.expect_err("timeline key required");
        assert!(matches!(err, CliError::InvalidTimelineFile { .. }), "{err:?}");
        assert!(out.is_empty());
    }

    assert!(api.calls().is_empty());
    fs::remove_file(typo).expect("cleanup");
    fs::remove_file(null).expect("cleanup");
}

#[tokio::test]
async fn config_save_sends_the_settings_object() {
    let settings = temp_json(
        r#"{"sks_left_press_profile": [10, 20, 30], "sn_left_high_Thumb": [5]}"#,
    );
    let empty = temp_json("{}");
    let array = temp_json("[1, 2]");
    let api = FakeApi::default();

    let arg = settings.to_string_lossy().to_string();
    let (result, out) = run_command(&api, Some("config-save"), &[arg.as_str()]).await;
    assert!(result.is_ok());
    assert_eq!(out, "ok: Config saved\n  2 settings saved\n");

    for path in [&empty, &array] {
        let arg = path.to_string_lossy().to_string();
        let (result, _) = run_command(&api, Some("config-save"), &[arg.as_str()]).await;
        assert!(
            matches!(result, Err(CliError::InvalidDeviceSettingsFile { .. })),
            "{result:?}"
        );
    }
    let (result, _) = run_command(&api, Some("config-save"), &[]).await;
    assert!(matches!(result, Err(CliError::Usage { .. })));

    assert_eq!(api.calls(), vec![Call::SaveDeviceConfig(2)]);
    for path in [settings, empty, array] {
        fs::remove_file(path).expect("cleanup");
    }
}

#[tokio::test]
async fn exec_commands_carry_the_profile() {
    let api = FakeApi::default();

    let (result, out) = run_command(&api, Some("exec-check"), &["test.json", "sn", "96"]).await;
    assert!(result.is_ok());
    assert_eq!(
        out,
        "No execution sequence for test.json (sn, 96 BPM, 30 ms) yet; expected test_sn_96_30.exec\n"
    );

    let (result, out) = run_command(&api, Some("preprocess"), &["test.json"]).await;
    assert!(result.is_ok());
    assert!(out.starts_with("ok: Preprocessing finished\n  exec file: test_sks_96_30.exec\n"));

    let (result, out) = run_command(&api, Some("exec-play"), &["test_sks_96_30.exec"]).await;
    assert!(result.is_ok());
    assert!(out.contains("test_sks_96_30.exec: 12 events, 1.5s"));

    assert_eq!(
        api.calls(),
        vec![
            Call::CheckExec(ExecutionProfile::new("test.json", Instrument::Suona).with_bpm(96.0)),
            Call::Preprocess(ExecutionProfile::new("test.json", Instrument::Saxophone)),
            Call::PlayExec("test_sks_96_30.exec".into()),
        ]
    );
}

#[tokio::test]
async fn pump_joins_its_arguments() {
    let api = FakeApi::default();
    let (result, out) = run_command(&api, Some("pump"), &["SET", "40"]).await;

    assert!(result.is_ok());
    assert_eq!(out, "ok: Command sent\n  response: OK\n");
    assert_eq!(api.calls(), vec![Call::Pump("SET 40".into())]);
}

#[test]
fn every_command_is_listed_in_help() {
    let help = command_help();
    for spec in COMMANDS {
        assert!(find_command(spec.name).is_some(), "{}", spec.name);
        assert!(spec.usage.starts_with(spec.name), "{}", spec.name);
        assert!(help.contains(spec.usage), "{}", spec.name);
        assert_eq!(spec.min_args == 0, spec.missing.is_empty(), "{}", spec.name);
    }
    assert_eq!(COMMANDS.len(), 17);
}

#[test]
fn configuration_errors_keep_their_context() {
    let err = CliError::Config(anyhow::anyhow!("failed to read config file 'x.toml'"));
    assert_eq!(
        reported(&err),
        "error: configuration error: failed to read config file 'x.toml'\n"
    );
}
