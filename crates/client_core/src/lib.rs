use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};
use shared::{
    domain::Instrument,
    protocol::{
        Ack, DeviceConfigResponse, ExecCheckResponse, ExecPlayRequest, ExecPlayResponse,
        ExecutionProfile, FingeringList, MusicFileList, PlaybackStartRequest,
        PlaybackStatusSnapshot, PreprocessResponse, PumpDebugRequest, PumpDebugResponse,
        SaveDeviceConfigRequest, SendFingeringRequest, TimelineEntry, TimelineResponse,
        UpdateTimelineRequest, Validate,
    },
};
use tracing::{debug, warn};
use url::Url;

pub mod error;

pub use error::ClientError;

pub const DEFAULT_API_BASE: &str = "http://localhost:8088/api";

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    /// Whole-request timeout. `None` leaves the transport default in place.
    pub timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

/// Operations of the performance service. Every call is a single round trip.
#[async_trait]
pub trait PerformanceApi: Send + Sync {
    /// Lists music files; `None` or an empty string applies no filter.
    async fn list_music_files(&self, search: Option<&str>) -> Result<MusicFileList>;
    async fn start_playback(&self, request: &PlaybackStartRequest) -> Result<Ack>;
    /// Toggles between playing and paused.
    async fn toggle_pause(&self) -> Result<Ack>;
    async fn stop_playback(&self) -> Result<Ack>;
    async fn status(&self) -> Result<PlaybackStatusSnapshot>;
    async fn fingerings(&self, instrument: Instrument) -> Result<FingeringList>;
    async fn send_fingering(&self, note: &str, instrument: Instrument) -> Result<Ack>;
    async fn timeline(&self, filename: &str) -> Result<TimelineResponse>;
    /// Replaces the whole stored timeline of `filename`.
    async fn update_timeline(&self, filename: &str, timeline: &[TimelineEntry]) -> Result<Ack>;
    async fn preprocess(&self, profile: &ExecutionProfile) -> Result<PreprocessResponse>;
    async fn check_exec(&self, profile: &ExecutionProfile) -> Result<ExecCheckResponse>;
    async fn play_exec(&self, exec_file: &str) -> Result<ExecPlayResponse>;
    async fn pump_debug(&self, command: &str) -> Result<PumpDebugResponse>;
    async fn device_config(&self) -> Result<DeviceConfigResponse>;
    async fn reload_device_config(&self) -> Result<DeviceConfigResponse>;
    /// Writes the given actuator settings into the service's config file.
    async fn save_device_config(&self, config: &Map<String, Value>) -> Result<Ack>;
}

pub struct PerformanceClient {
    http: Client,
    base_url: String,
}

impl PerformanceClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url).map_err(|e| ClientError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ClientError::InvalidBaseUrl {
                url: config.base_url,
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> Result<T>
    where
        T: DeserializeOwned + Validate,
    {
        let mut request = self.http.get(self.endpoint(path));
        if !query.is_empty() {
            request = request.query(query);
        }
        self.execute("GET", path, request).await
    }

    async fn post<T>(&self, path: &str) -> Result<T>
    where
        T: DeserializeOwned + Validate,
    {
        let request = self.http.post(self.endpoint(path));
        self.execute("POST", path, request).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Validate + ?Sized,
        T: DeserializeOwned + Validate,
    {
        body.validate()?;
        let request = self.http.post(self.endpoint(path)).json(body);
        self.execute("POST", path, request).await
    }

    async fn execute<T>(&self, method: &str, path: &str, request: RequestBuilder) -> Result<T>
    where
        T: DeserializeOwned + Validate,
    {
        debug!(method, path, base_url = %self.base_url, "perf api: sending request");
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            warn!(method, path, status = status.as_u16(), "perf api: request rejected");
            return Err(ClientError::HttpStatus {
                code: status.as_u16(),
                body,
            });
        }

        let decoded: T = serde_json::from_str(&body).map_err(|e| ClientError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        decoded.validate().map_err(|e| ClientError::Decode {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        debug!(method, path, status = status.as_u16(), "perf api: response decoded");
        Ok(decoded)
    }
}

#[async_trait]
impl PerformanceApi for PerformanceClient {
    async fn list_music_files(&self, search: Option<&str>) -> Result<MusicFileList> {
        let query: Vec<(&str, String)> = search
            .filter(|s| !s.is_empty())
            .map(|s| vec![("search", s.to_string())])
            .unwrap_or_default();
        self.get("/files", &query).await
    }

    async fn start_playback(&self, request: &PlaybackStartRequest) -> Result<Ack> {
        self.post_json("/playback/start", request).await
    }

    async fn toggle_pause(&self) -> Result<Ack> {
        self.post("/playback/pause").await
    }

    async fn stop_playback(&self) -> Result<Ack> {
        self.post("/playback/stop").await
    }

    async fn status(&self) -> Result<PlaybackStatusSnapshot> {
        self.get("/playback/status", &[]).await
    }

    async fn fingerings(&self, instrument: Instrument) -> Result<FingeringList> {
        self.get("/fingerings", &[("instrument", instrument.code().to_string())])
            .await
    }

    async fn send_fingering(&self, note: &str, instrument: Instrument) -> Result<Ack> {
        let request = SendFingeringRequest {
            note: note.to_string(),
            instrument,
        };
        self.post_json("/fingerings/send", &request).await
    }

    async fn timeline(&self, filename: &str) -> Result<TimelineResponse> {
        self.get("/timeline", &[("filename", filename.to_string())])
            .await
    }

    async fn update_timeline(&self, filename: &str, timeline: &[TimelineEntry]) -> Result<Ack> {
        let request = UpdateTimelineRequest { filename, timeline };
        self.post_json("/timeline/update", &request).await
    }

    async fn preprocess(&self, profile: &ExecutionProfile) -> Result<PreprocessResponse> {
        self.post_json("/preprocess", profile).await
    }

    async fn check_exec(&self, profile: &ExecutionProfile) -> Result<ExecCheckResponse> {
        profile.validate()?;
        self.get("/exec/check", &profile.query_pairs()).await
    }

    async fn play_exec(&self, exec_file: &str) -> Result<ExecPlayResponse> {
        let request = ExecPlayRequest {
            exec_file: exec_file.to_string(),
        };
        self.post_json("/exec/play", &request).await
    }

    async fn pump_debug(&self, command: &str) -> Result<PumpDebugResponse> {
        let request = PumpDebugRequest {
            command: command.to_string(),
        };
        self.post_json("/pump/debug", &request).await
    }

    async fn device_config(&self) -> Result<DeviceConfigResponse> {
        self.get("/config", &[]).await
    }

    async fn reload_device_config(&self) -> Result<DeviceConfigResponse> {
        self.post("/config/reload").await
    }

    async fn save_device_config(&self, config: &Map<String, Value>) -> Result<Ack> {
        self.post_json("/config/save", &SaveDeviceConfigRequest { config })
            .await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
