//! HTTP client for the instance management panel.
//!
//! The panel wraps every payload in `{"status": <code>, "data": ...}`. Both a
//! non-2xx HTTP status and an envelope status other than 200 are reported as
//! `Upstream` errors. One client serves as both the [`InstanceController`]
//! and the remote [`ArtifactSource`].

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::artifact::ArtifactSource;
use crate::config::PanelConfig;
use crate::error::{Error, Result};
use crate::instance::{
    Dashboard, InstanceAction, InstanceController, InstanceDetail, InstanceStatus,
};
use crate::{rlog_debug, rlog_trace};

/// Listing page size; QR files live in small directories.
const FILE_PAGE_SIZE: &str = "100";

/// File list entry type for regular files.
const FILE_TYPE_FILE: i64 = 1;

#[derive(Debug, Deserialize)]
struct Envelope {
    status: i64,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDetail {
    instance_uuid: String,
    status: i64,
    #[serde(default)]
    process: Option<RawProcess>,
    #[serde(default)]
    config: Option<RawInstanceConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProcess {
    cpu_usage: Option<f64>,
    memory: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInstanceConfig {
    #[serde(default)]
    nickname: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDashboard {
    #[serde(default)]
    version: String,
    #[serde(default)]
    remote_count: RawRemoteCount,
}

#[derive(Debug, Default, Deserialize)]
struct RawRemoteCount {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    available: u64,
}

#[derive(Debug, Deserialize)]
struct RawFileList {
    #[serde(default)]
    items: Vec<RawFileEntry>,
}

#[derive(Debug, Deserialize)]
struct RawFileEntry {
    name: String,
    #[serde(default)]
    time: String,
    #[serde(rename = "type")]
    kind: i64,
}

#[derive(Debug, Deserialize)]
struct RawDownload {
    password: String,
    addr: String,
}

/// Parse a JavaScript `Date.toString()` timestamp such as
/// `Fri Jun 07 2024 08:53:34 GMT+0800 (China Standard Time)`.
pub fn parse_panel_time(raw: &str) -> Result<DateTime<Utc>> {
    let trimmed = raw.split('(').next().unwrap_or(raw).trim();
    DateTime::parse_from_str(trimmed, "%a %b %d %Y %H:%M:%S GMT%z")
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Upstream(format!("unparseable file time {:?}: {}", raw, e)))
}

/// Split `path` into the directory to list and the entry name to look for.
fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => ("/", path),
    }
}

fn decode<T: DeserializeOwned>(data: Value, what: &str) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| Error::Upstream(format!("unexpected {} response: {}", what, e)))
}

fn action_endpoint(action: InstanceAction) -> &'static str {
    match action {
        InstanceAction::Start => "open",
        InstanceAction::Stop => "stop",
        InstanceAction::Restart => "restart",
        InstanceAction::ForceStop => "kill",
    }
}

pub struct PanelClient {
    http: Client,
    base_url: String,
    api_key: String,
    daemon_id: String,
}

impl PanelClient {
    pub fn new(config: &PanelConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            daemon_id: config.daemon_id.clone(),
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        instance_id: Option<&str>,
    ) -> RequestBuilder {
        let mut builder = self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-requested-with", "XMLHttpRequest")
            .query(&[("apikey", self.api_key.as_str())]);
        if let Some(id) = instance_id {
            builder = builder.query(&[("uuid", id), ("daemonId", self.daemon_id.as_str())]);
        }
        builder
    }

    /// Send a panel request and return the envelope's `data`.
    async fn call(&self, builder: RequestBuilder, what: &str) -> Result<Value> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        rlog_trace!("panel {} -> HTTP {} ({} bytes)", what, status, body.len());

        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "panel {} failed with HTTP {}: {}",
                what,
                status.as_u16(),
                body.trim()
            )));
        }

        let envelope: Envelope = serde_json::from_str(&body)
            .map_err(|e| Error::Upstream(format!("unexpected {} response: {}", what, e)))?;
        if envelope.status != 200 {
            return Err(Error::Upstream(format!(
                "panel {} failed with status {}: {}",
                what, envelope.status, envelope.data
            )));
        }
        Ok(envelope.data)
    }

    fn download_url(addr: &str, password: &str, file_name: &str) -> Result<Url> {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        };
        let mut url = Url::parse(&base)
            .map_err(|e| Error::Upstream(format!("bad download address {}: {}", addr, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Upstream(format!("bad download address {}", addr)))?
            .pop_if_empty()
            .extend(["download", password, file_name]);
        Ok(url)
    }
}

#[async_trait]
impl InstanceController for PanelClient {
    async fn action(&self, instance_id: &str, action: InstanceAction) -> Result<()> {
        rlog_debug!("panel: {} {}", action, instance_id);
        let path = format!("/api/protected_instance/{}", action_endpoint(action));
        let builder = self.request(reqwest::Method::GET, &path, Some(instance_id));
        self.call(builder, "instance action").await?;
        Ok(())
    }

    async fn detail(&self, instance_id: &str) -> Result<InstanceDetail> {
        let builder = self.request(reqwest::Method::GET, "/api/instance", Some(instance_id));
        let data = self.call(builder, "instance detail").await?;
        let raw: RawDetail = decode(data, "instance detail")?;
        let process = raw.process;
        Ok(InstanceDetail {
            instance_id: raw.instance_uuid,
            nickname: raw.config.unwrap_or_default().nickname,
            status: InstanceStatus::from_code(raw.status),
            cpu_usage: process.as_ref().and_then(|p| p.cpu_usage),
            memory: process.as_ref().and_then(|p| p.memory),
        })
    }

    async fn dashboard(&self) -> Result<Dashboard> {
        let builder = self.request(reqwest::Method::GET, "/api/dashboard", None);
        let raw: RawDashboard = decode(self.call(builder, "dashboard").await?, "dashboard")?;
        Ok(Dashboard {
            version: raw.version,
            remote_total: raw.remote_count.total,
            remote_available: raw.remote_count.available,
        })
    }
}

#[async_trait]
impl ArtifactSource for PanelClient {
    async fn stat(&self, scope: &str, path: &str) -> Result<Option<DateTime<Utc>>> {
        let (dir, name) = split_path(path);
        let builder = self
            .request(reqwest::Method::GET, "/api/files/list", Some(scope))
            .query(&[("target", dir), ("page", "0"), ("page_size", FILE_PAGE_SIZE)]);
        let list: RawFileList = decode(self.call(builder, "file list").await?, "file list")?;

        match list
            .items
            .into_iter()
            .find(|item| item.name == name && item.kind == FILE_TYPE_FILE)
        {
            Some(item) => parse_panel_time(&item.time).map(Some),
            None => Ok(None),
        }
    }

    async fn read_as_text(&self, scope: &str, path: &str) -> Result<String> {
        let builder = self
            .request(reqwest::Method::POST, "/api/files/download", Some(scope))
            .query(&[("file_name", path)]);
        let data = self.call(builder, "file download").await?;
        let ticket: RawDownload = decode(data, "file download")?;

        let (_, name) = split_path(path);
        let url = Self::download_url(&ticket.addr, &ticket.password, name)?;
        rlog_debug!("panel: downloading {} from {}", path, ticket.addr);

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "download of {} failed with HTTP {}",
                path,
                status.as_u16()
            )));
        }
        let bytes = response.bytes().await?;
        Ok(STANDARD.encode(&bytes))
    }
}
