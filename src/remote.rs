//! Steam Workshop catalog lookups and archive downloads.
//!
//! Each call handles one mod and moves through [`CallState`]. Batches drive
//! calls one after another; see [`crate::update`].

use std::io::{BufReader, Seek, SeekFrom, Write};

use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};
use tracing_unwrap::ResultExt;
use url::Url;

use crate::{
    cache::ModCache,
    error::{ModError, Result},
    modinfo::{self, ModInfo, WORKSHOP_PREFIX},
    reporter::Reporter,
};

pub const STEAM_API_URL: &str =
    "https://api.steampowered.com/ISteamRemoteStorage/GetPublishedFileDetails/v1/";
pub const INVISIBLE_INC_APP_ID: u64 = 243970;

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub api_url: Url,
    pub app_id: u64,
}

impl CatalogConfig {
    pub fn new(api_url: &str, app_id: u64) -> Result<Self> {
        let api_url = Url::parse(api_url)
            .map_err(|e| ModError::InvalidArgument(format!("Bad catalog URL {}: {}", api_url, e)))?;
        Ok(CatalogConfig { api_url, app_id })
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        CatalogConfig {
            api_url: Url::parse(STEAM_API_URL).expect_or_log("Built-in catalog URL is invalid"),
            app_id: INVISIBLE_INC_APP_ID,
        }
    }
}

/// A validated catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteModInfo {
    /// Numeric workshop ID.
    pub id: String,
    pub title: String,
    pub description: String,
    pub download_url: String,
    pub last_updated: DateTime<Utc>,
}

impl RemoteModInfo {
    pub fn mod_id(&self) -> String {
        format!("{}{}", WORKSHOP_PREFIX, self.id)
    }

    /// Cache version ID this entry would be stored under.
    pub fn version_id(&self) -> String {
        modinfo::format_version_id(&self.last_updated)
    }

    pub fn as_mod_info(&self) -> ModInfo {
        ModInfo::new(self.mod_id(), self.title.clone())
    }
}

#[derive(Debug, Deserialize)]
struct DetailsEnvelope {
    response: DetailsResponse,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    resultcount: u32,
    #[serde(default)]
    publishedfiledetails: Vec<FileDetails>,
}

#[derive(Debug, Deserialize)]
struct FileDetails {
    publishedfileid: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    file_url: Option<String>,
    #[serde(default)]
    filename: String,
    time_updated: Option<i64>,
    #[serde(default)]
    consumer_app_id: u64,
}

/// Parses and validates a `GetPublishedFileDetails` response body.
pub fn parse_mod_info(body: &str, app_id: u64) -> Result<RemoteModInfo> {
    let envelope: DetailsEnvelope = serde_json::from_str(body)?;
    let details = match envelope.response.publishedfiledetails.into_iter().next() {
        Some(details) if envelope.response.resultcount >= 1 => details,
        _ => return Err(ModError::remote("No results")),
    };
    let id = details
        .publishedfileid
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ModError::remote("Missing publishedfileid"))?;
    if details.consumer_app_id != app_id {
        return Err(ModError::remote(format!(
            "Mod is for non-Invisible-Inc app: ID {}",
            details.consumer_app_id
        )));
    }
    if !details.filename.ends_with(".zip") {
        return Err(ModError::remote(format!(
            "File is not a .zip, possibly not a Mod: {}",
            details.filename
        )));
    }
    let download_url = details
        .file_url
        .filter(|url| !url.is_empty())
        .ok_or_else(|| ModError::remote("Missing file_url"))?;
    let last_updated = details
        .time_updated
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .ok_or_else(|| ModError::remote("Missing time_updated"))?;

    Ok(RemoteModInfo {
        id,
        title: details.title,
        description: details.description,
        download_url,
        last_updated,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState<T> {
    Idle,
    InFlight,
    Succeeded(T),
    Failed(String),
}

impl<T> CallState<T> {
    pub fn is_finished(&self) -> bool {
        matches!(self, CallState::Succeeded(_) | CallState::Failed(_))
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            CallState::Succeeded(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CallState::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    fn finish(&mut self, result: Result<T>) {
        *self = match result {
            Ok(value) => CallState::Succeeded(value),
            Err(e) => CallState::Failed(e.to_string()),
        };
    }
}

/// HTTP client for the catalog.
#[derive(Debug, Clone)]
pub struct ModDownloader {
    client: Client,
    config: CatalogConfig,
}

impl ModDownloader {
    pub fn new(config: CatalogConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("iimodman/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(ModDownloader { client, config })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn info_call(&self) -> ModInfoCall<'_> {
        ModInfoCall {
            downloader: self,
            state: CallState::Idle,
        }
    }

    pub fn download_call(&self) -> ModDownloadCall<'_> {
        ModDownloadCall {
            downloader: self,
            state: CallState::Idle,
        }
    }
}

/// Looks up one mod in the catalog.
#[derive(Debug)]
pub struct ModInfoCall<'a> {
    downloader: &'a ModDownloader,
    state: CallState<RemoteModInfo>,
}

impl ModInfoCall<'_> {
    pub fn state(&self) -> &CallState<RemoteModInfo> {
        &self.state
    }

    /// Fetches info for a workshop ID, given with or without the
    /// `workshop-` prefix. A finished call can be started again.
    pub async fn start(&mut self, workshop_id: &str) -> &CallState<RemoteModInfo> {
        self.state = CallState::InFlight;
        let result = self.fetch(workshop_id).await;
        if let Err(e) = &result {
            warn!("Info lookup for {} failed: {}", workshop_id, e);
        }
        self.state.finish(result);
        &self.state
    }

    async fn fetch(&self, workshop_id: &str) -> Result<RemoteModInfo> {
        let id = workshop_id.strip_prefix(WORKSHOP_PREFIX).unwrap_or(workshop_id);
        debug!("Requesting info for workshop item {}", id);
        let response = self
            .downloader
            .client
            .post(self.downloader.config.api_url.clone())
            .form(&[("itemcount", "1"), ("publishedfileids[0]", id)])
            .send()
            .await?;
        response.error_for_status_ref()?;
        let body = response.text().await?;
        parse_mod_info(&body, self.downloader.config.app_id)
    }
}

/// Downloads one archive and adds it to the cache.
#[derive(Debug)]
pub struct ModDownloadCall<'a> {
    downloader: &'a ModDownloader,
    state: CallState<String>,
}

impl ModDownloadCall<'_> {
    pub fn state(&self) -> &CallState<String> {
        &self.state
    }

    /// Downloads the archive to a temporary file, then extracts it into the
    /// cache. Succeeds with the new version ID.
    ///
    /// Nothing is extracted unless the whole body was received.
    pub async fn start(
        &mut self,
        cache: &mut ModCache,
        info: &RemoteModInfo,
        reporter: &dyn Reporter,
    ) -> &CallState<String> {
        self.state = CallState::InFlight;
        let result = match self.download(info, reporter).await {
            Ok(file) => Self::add_to_cache(cache, info, file),
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!("Download of {} failed: {}", info.mod_id(), e);
        }
        self.state.finish(result);
        &self.state
    }

    async fn download(&self, info: &RemoteModInfo, reporter: &dyn Reporter) -> Result<std::fs::File> {
        debug!("Downloading {} from {}", info.mod_id(), info.download_url);
        let response = self
            .downloader
            .client
            .get(&info.download_url)
            .send()
            .await?;
        response.error_for_status_ref()?;

        let total = response.content_length();
        reporter.begin_progress(&format!("Downloading {}", info.title), total);
        let mut file = tempfile::tempfile()?;
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)?;
            downloaded += chunk.len() as u64;
            reporter.update_progress(downloaded, total);
        }
        reporter.end_progress();

        if let Some(total) = total {
            if downloaded != total {
                return Err(ModError::Network {
                    message: format!("Incomplete download: {} of {} bytes", downloaded, total),
                });
            }
        }
        file.flush()?;
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    fn add_to_cache(cache: &mut ModCache, info: &RemoteModInfo, file: std::fs::File) -> Result<String> {
        let mod_id = info.mod_id();
        cache.add_unloaded(&info.as_mod_info());
        let version =
            cache.add_version_from_archive(&mod_id, &info.version_id(), BufReader::new(file))?;
        info!("Downloaded {} {}", mod_id, version);
        Ok(version.id().to_string())
    }
}
