//! Batch refresh of cached mods from the remote catalog.
//!
//! Runs in two phases. Every info lookup finishes before the confirmation
//! prompt, so the user sees the full list of pending downloads. Downloads
//! then run one at a time.

use itertools::Itertools;
use tracing::{debug, info};

use crate::{
    cache::ModCache,
    error::Result,
    modinfo,
    remote::{CallState, ModDownloader, RemoteModInfo},
    reporter::Reporter,
};

/// What to do with IDs the cache doesn't know yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingCacheAction {
    #[default]
    Skip,
    Add,
}

/// What to do when the remote's latest version is already cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatestVersionAction {
    #[default]
    Skip,
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdateMode {
    #[default]
    Download,
    /// Only record which mods have a newer remote version.
    CheckOnly,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    pub missing_cache: MissingCacheAction,
    pub latest_version: LatestVersionAction,
    pub mode: UpdateMode,
    pub confirm: bool,
}

#[derive(Debug, Default)]
pub struct UpdateReport {
    /// `(mod ID, reason)` for every ID that was not downloaded.
    pub skipped: Vec<(String, String)>,
    /// `(mod ID, version ID)` for every new cache version.
    pub downloaded: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
    /// Mods with a newer remote version, in check-only mode.
    pub updates_available: Vec<RemoteModInfo>,
    pub aborted: bool,
}

impl UpdateReport {
    pub fn success(&self) -> bool {
        !self.aborted && self.failed.is_empty()
    }
}

pub struct CacheUpdater<'a> {
    downloader: &'a ModDownloader,
    reporter: &'a dyn Reporter,
    options: UpdateOptions,
}

impl<'a> CacheUpdater<'a> {
    pub fn new(downloader: &'a ModDownloader, reporter: &'a dyn Reporter, options: UpdateOptions) -> Self {
        CacheUpdater {
            downloader,
            reporter,
            options,
        }
    }

    pub async fn run(&self, cache: &mut ModCache, mod_ids: &[String]) -> Result<UpdateReport> {
        let (pending, mut report) = self.lookup(cache, mod_ids).await;

        if self.options.mode == UpdateMode::CheckOnly {
            for remote in pending {
                cache.mark_available_version(&remote.mod_id(), remote.last_updated)?;
                self.reporter
                    .text_output(&format!("{} has an update available", remote.title));
                report.updates_available.push(remote);
            }
            cache.save_metadata()?;
            return Ok(report);
        }

        if pending.is_empty() {
            self.reporter.text_output("No mods to update.");
            cache.save_metadata()?;
            return Ok(report);
        }

        if self.options.confirm {
            self.reporter.text_output(&format!(
                "The following mods will be downloaded:\n  {}",
                pending
                    .iter()
                    .map(|r| format!("\"{}\" [{}]", r.title, r.mod_id()))
                    .join(" ")
            ));
            if !self.reporter.confirm("Continue?") {
                self.reporter.text_output("Abort.");
                report.aborted = true;
                cache.save_metadata()?;
                return Ok(report);
            }
        }

        self.download(cache, &pending, &mut report).await?;
        Ok(report)
    }

    /// First phase: filters `mod_ids` and fetches catalog info for the rest.
    ///
    /// Returns the mods that need a download. Unknown mods may be added to
    /// the cache in memory, but nothing is written to disk.
    pub async fn lookup(&self, cache: &mut ModCache, mod_ids: &[String]) -> (Vec<RemoteModInfo>, UpdateReport) {
        let mut report = UpdateReport::default();

        let candidates: Vec<&String> = mod_ids
            .iter()
            .unique()
            .filter(|id| {
                let reason = if !modinfo::is_workshop_id(id) {
                    Some("Not a workshop mod")
                } else if !cache.contains(id) && self.options.missing_cache == MissingCacheAction::Skip {
                    Some("Mod does not exist in cache")
                } else {
                    None
                };
                if let Some(reason) = reason {
                    self.reporter.text_output(&format!("Skipping {}: {}", id, reason));
                    report.skipped.push((id.to_string(), reason.to_string()));
                }
                reason.is_none()
            })
            .collect();

        let pending = self.fetch_infos(cache, &candidates, &mut report).await;
        (pending, report)
    }

    /// Second phase: downloads `pending` one at a time and saves metadata.
    pub async fn download(
        &self,
        cache: &mut ModCache,
        pending: &[RemoteModInfo],
        report: &mut UpdateReport,
    ) -> Result<()> {
        self.download_all(cache, pending, report).await;
        cache.save_metadata()
    }

    /// Looks up every candidate and returns the ones that need a download.
    async fn fetch_infos(
        &self,
        cache: &mut ModCache,
        candidates: &[&String],
        report: &mut UpdateReport,
    ) -> Vec<RemoteModInfo> {
        let mut pending = Vec::new();
        let total = candidates.len() as u64;
        self.reporter.begin_progress("Fetching mod info", Some(total));
        let mut call = self.downloader.info_call();
        for (i, mod_id) in candidates.iter().enumerate() {
            let remote = match call.start(mod_id).await {
                CallState::Succeeded(remote) => remote.clone(),
                CallState::Failed(reason) => {
                    self.reporter
                        .text_output(&format!("Skipping {}: {}", mod_id, reason));
                    report.skipped.push((mod_id.to_string(), reason.clone()));
                    continue;
                }
                CallState::Idle | CallState::InFlight => continue,
            };
            self.reporter.update_progress(i as u64 + 1, Some(total));

            if cache.add_unloaded(&remote.as_mod_info()).is_some() {
                info!("Added {} to cache", remote.as_mod_info());
            }
            let is_latest = cache
                .get(&remote.mod_id())
                .map_or(false, |m| m.contains_version(&remote.version_id()));
            if is_latest && self.options.latest_version == LatestVersionAction::Skip {
                debug!("{} is up to date", remote.mod_id());
                self.reporter
                    .text_output(&format!("{} is already up to date", remote.title));
                report
                    .skipped
                    .push((remote.mod_id(), "Already up to date".to_string()));
                continue;
            }
            pending.push(remote);
        }
        self.reporter.end_progress();
        pending
    }

    async fn download_all(&self, cache: &mut ModCache, pending: &[RemoteModInfo], report: &mut UpdateReport) {
        let mut call = self.downloader.download_call();
        for remote in pending {
            match call.start(cache, remote, self.reporter).await {
                CallState::Succeeded(version_id) => {
                    self.reporter
                        .text_output(&format!("{} downloaded {}", remote.title, version_id));
                    report.downloaded.push((remote.mod_id(), version_id.clone()));
                }
                CallState::Failed(reason) => {
                    self.reporter
                        .text_output(&format!("Failed to download {}: {}", remote.mod_id(), reason));
                    report.failed.push((remote.mod_id(), reason.clone()));
                }
                CallState::Idle | CallState::InFlight => {}
            }
        }
    }
}
