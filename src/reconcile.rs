//! Brings the install directory in line with a [`ModSpec`].
//!
//! [`plan`] classifies every spec entry as install, update or kept, and every
//! installed mod missing from the spec as a removal. [`apply`] runs removals,
//! then installs, then updates, stopping at the first failure. [`SyncRun`]
//! wraps both with the optional remote fetch and confirmation steps.

use std::fmt;

use tracing::{debug, info, warn};

use crate::{
    cache::ModCache,
    error::{ErrorKind, ModError, Result},
    installed::{InstallRefreshLevel, ModList},
    modinfo,
    remote::ModDownloader,
    reporter::Reporter,
    spec::{ModSpec, SpecMod, VersionTarget},
    update::{CacheUpdater, MissingCacheAction, UpdateOptions, UpdateReport},
};

const UNBACKED_REMOVAL: &str =
    "Trying to remove a mod version that isn't saved in the mod cache (-f to override)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Collecting,
    FetchingRemote,
    AwaitingConfirmation,
    Applying,
    Finished,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Remove {
        mod_id: String,
        name: String,
        /// False when the installed content matches no cache version.
        cache_backed: bool,
    },
    Install(SpecMod),
    Update {
        target: SpecMod,
        from_version: Option<String>,
    },
}

impl SyncAction {
    pub fn mod_id(&self) -> &str {
        match self {
            SyncAction::Remove { mod_id, .. } => mod_id,
            SyncAction::Install(target) | SyncAction::Update { target, .. } => &target.id,
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Remove { mod_id, name, .. } => write!(f, "remove {} [{}]", name, mod_id),
            SyncAction::Install(target) => write!(f, "install {}", target),
            SyncAction::Update { target, from_version } => write!(
                f,
                "update {} (from {})",
                target,
                from_version.as_deref().unwrap_or("unknown version")
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub mod_id: String,
    pub reason: String,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Default)]
pub struct SyncPlan {
    pub removes: Vec<SyncAction>,
    pub installs: Vec<SyncAction>,
    pub updates: Vec<SyncAction>,
    /// Mods that stay exactly as installed.
    pub kept: Vec<String>,
    pub rejected: Vec<Rejection>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.removes.is_empty() && self.installs.is_empty() && self.updates.is_empty()
    }

    /// Actions in execution order.
    pub fn actions(&self) -> impl Iterator<Item = &SyncAction> {
        self.removes
            .iter()
            .chain(self.installs.iter())
            .chain(self.updates.iter())
    }

    /// Removals that would delete the only copy of some content.
    pub fn unbacked_removals(&self) -> impl Iterator<Item = &SyncAction> {
        self.removes
            .iter()
            .filter(|a| matches!(a, SyncAction::Remove { cache_backed: false, .. }))
    }

    /// Rejected workshop mods a catalog download could satisfy.
    pub fn fetchable(&self, target: &ModSpec) -> Vec<String> {
        self.rejected
            .iter()
            .filter(|r| r.kind == ErrorKind::NotFound && modinfo::is_workshop_id(&r.mod_id))
            .filter(|r| {
                target
                    .get(&r.mod_id)
                    .map_or(false, |s| !matches!(s.version, VersionTarget::Exact(_)))
            })
            .map(|r| r.mod_id.clone())
            .collect()
    }
}

enum Resolution {
    Keep,
    Target(SpecMod),
}

/// Resolves a spec entry to an exact cache version, or to "leave as is".
fn resolve(spec: &SpecMod, cache: &ModCache, installed: &ModList) -> Result<Resolution> {
    let existing = installed.get(&spec.id);
    if spec.version == VersionTarget::KeepCurrent {
        if let Some(existing) = existing {
            return match spec.alias.as_deref() {
                Some(alias) if alias != existing.installed_id() => Err(ModError::AliasMismatch {
                    mod_id: spec.id.clone(),
                    installed: existing.installed_id().to_string(),
                    requested: alias.to_string(),
                }),
                _ => Ok(Resolution::Keep),
            };
        }
    }

    let Some(cached) = cache.get(&spec.id) else {
        // An installed mod the cache never saw can still be kept as is.
        if existing.is_some() && !matches!(spec.version, VersionTarget::Exact(_)) {
            return Ok(Resolution::Keep);
        }
        return Err(ModError::ModNotFound {
            mod_id: spec.id.clone(),
        });
    };
    let version = match &spec.version {
        VersionTarget::Exact(version_id) => {
            cached
                .version(version_id)
                .ok_or_else(|| ModError::VersionNotFound {
                    mod_id: spec.id.clone(),
                    version_id: version_id.clone(),
                })?
        }
        _ => cached
            .latest_version()
            .ok_or_else(|| ModError::NoDownloadedVersions {
                mod_id: spec.id.clone(),
            })?,
    };
    let alias = spec
        .alias
        .clone()
        .or_else(|| cached.default_alias().map(str::to_string))
        .filter(|a| *a != spec.id);
    Ok(Resolution::Target(version.as_spec(alias)))
}

/// Computes the actions that turn the installed set into `target`.
pub fn plan(target: &ModSpec, cache: &ModCache, installed: &ModList) -> SyncPlan {
    let mut plan = SyncPlan::default();

    for spec in target.mods() {
        match resolve(spec, cache, installed) {
            Ok(Resolution::Keep) => plan.kept.push(spec.id.clone()),
            Ok(Resolution::Target(resolved)) => match installed.get(&spec.id) {
                None => plan.installs.push(SyncAction::Install(resolved)),
                Some(current) => {
                    let same_version =
                        current.cache_version_id() == Some(resolved.version.as_str());
                    if same_version && current.installed_id() == resolved.installed_id() {
                        plan.kept.push(spec.id.clone());
                    } else {
                        plan.updates.push(SyncAction::Update {
                            target: resolved,
                            from_version: current.cache_version_id().map(str::to_string),
                        });
                    }
                }
            },
            Err(e) => {
                debug!("Rejecting {}: {}", spec.id, e);
                plan.rejected.push(Rejection {
                    mod_id: spec.id.clone(),
                    reason: e.to_string(),
                    kind: e.kind(),
                });
            }
        }
    }

    for current in installed.mods() {
        if !target.contains(current.id()) {
            plan.removes.push(SyncAction::Remove {
                mod_id: current.id().to_string(),
                name: current.info().name.clone(),
                cache_backed: current.has_cache_version(),
            });
        }
    }
    plan
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub state: SyncState,
    pub completed: Vec<SyncAction>,
    pub failed: Option<(SyncAction, String)>,
    /// Actions not attempted because the batch stopped.
    pub skipped: Vec<SyncAction>,
    pub rejected: Vec<Rejection>,
    pub abort_reason: Option<String>,
}

impl SyncReport {
    fn new(state: SyncState, plan: &SyncPlan) -> Self {
        SyncReport {
            state,
            completed: Vec::new(),
            failed: None,
            skipped: Vec::new(),
            rejected: plan.rejected.clone(),
            abort_reason: None,
        }
    }

    pub fn success(&self) -> bool {
        self.state == SyncState::Finished && self.failed.is_none()
    }
}

/// Executes a plan in order, stopping at the first failed action.
pub fn apply(
    plan: &SyncPlan,
    cache: &mut ModCache,
    installed: &mut ModList,
    reporter: &dyn Reporter,
) -> SyncReport {
    let mut report = SyncReport::new(SyncState::Applying, plan);
    let mut actions = plan.actions();
    for action in actions.by_ref() {
        let result = match action {
            SyncAction::Remove { mod_id, .. } => installed.remove_mod(cache, mod_id),
            SyncAction::Install(target) | SyncAction::Update { target, .. } => {
                installed.install_mod(cache, target).map(|_| ())
            }
        };
        match result {
            Ok(()) => {
                reporter.text_output(&format!("Done: {}", action));
                report.completed.push(action.clone());
            }
            Err(e) => {
                warn!("Failed to {}: {}", action, e);
                reporter.text_output(&format!("Failed to {}: {}", action, e));
                report.failed = Some((action.clone(), e.to_string()));
                break;
            }
        }
    }
    report.skipped = actions.cloned().collect();
    report.state = if report.failed.is_some() {
        SyncState::Aborted
    } else {
        SyncState::Finished
    };
    report
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Allow removing installed mods that match no cache version.
    pub force_remove_uncached: bool,
    pub confirm: bool,
    /// Download workshop mods the cache is missing before planning.
    pub fetch_missing: bool,
}

/// One reconciliation run against a target spec.
pub struct SyncRun<'a> {
    cache: &'a mut ModCache,
    installed: &'a mut ModList,
    reporter: &'a dyn Reporter,
    downloader: Option<&'a ModDownloader>,
    options: SyncOptions,
    state: SyncState,
    plan: SyncPlan,
}

impl<'a> SyncRun<'a> {
    pub fn new(
        cache: &'a mut ModCache,
        installed: &'a mut ModList,
        reporter: &'a dyn Reporter,
        options: SyncOptions,
    ) -> Self {
        SyncRun {
            cache,
            installed,
            reporter,
            downloader: None,
            options,
            state: SyncState::Collecting,
            plan: SyncPlan::default(),
        }
    }

    pub fn with_downloader(mut self, downloader: &'a ModDownloader) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn plan(&self) -> &SyncPlan {
        &self.plan
    }

    /// Plans, confirms once, then applies.
    ///
    /// With `fetch_missing`, catalog lookups happen before the prompt and the
    /// pending downloads are listed with the other changes. Nothing is
    /// downloaded unless the prompt is accepted.
    pub async fn run(&mut self, target: &ModSpec) -> Result<SyncReport> {
        self.state = SyncState::Collecting;
        self.plan = plan(target, self.cache, self.installed);

        let reporter = self.reporter;
        let updater = self.downloader.map(|downloader| {
            let options = UpdateOptions {
                missing_cache: MissingCacheAction::Add,
                ..Default::default()
            };
            CacheUpdater::new(downloader, reporter, options)
        });
        let mut downloads = Vec::new();
        if let (true, Some(updater)) = (self.options.fetch_missing, &updater) {
            let missing = self.plan.fetchable(target);
            if !missing.is_empty() {
                self.state = SyncState::FetchingRemote;
                downloads = updater.lookup(self.cache, &missing).await.0;
            }
        }

        for rejection in &self.plan.rejected {
            if !downloads.iter().any(|r| r.mod_id() == rejection.mod_id) {
                self.reporter
                    .text_output(&format!("Skipping {}: {}", rejection.mod_id, rejection.reason));
            }
        }

        if !self.options.force_remove_uncached && self.plan.unbacked_removals().next().is_some() {
            for action in self.plan.unbacked_removals() {
                self.reporter.text_output(&format!("Not backed by cache: {}", action));
            }
            self.reporter.text_output(UNBACKED_REMOVAL);
            return Ok(self.abort(UNBACKED_REMOVAL));
        }

        if self.plan.is_empty() && downloads.is_empty() {
            self.reporter.text_output("Nothing to do.");
            self.state = SyncState::Finished;
            return Ok(SyncReport::new(self.state, &self.plan));
        }

        if self.options.confirm {
            self.state = SyncState::AwaitingConfirmation;
            for remote in &downloads {
                self.reporter.text_output(&format!(
                    "  download and install \"{}\" [{}]",
                    remote.title,
                    remote.mod_id()
                ));
            }
            for action in self.plan.actions() {
                self.reporter.text_output(&format!("  {}", action));
            }
            if !self.reporter.confirm("Apply these changes?") {
                self.reporter.text_output("Abort.");
                return Ok(self.abort("Declined"));
            }
        }

        if let (false, Some(updater)) = (downloads.is_empty(), &updater) {
            self.state = SyncState::FetchingRemote;
            let mut update_report = UpdateReport::default();
            updater.download(self.cache, &downloads, &mut update_report).await?;
            // New versions may match what is already installed.
            self.installed.refresh(self.cache, InstallRefreshLevel::Full)?;
            self.plan = plan(target, self.cache, self.installed);
            for rejection in &self.plan.rejected {
                if downloads.iter().any(|r| r.mod_id() == rejection.mod_id) {
                    self.reporter
                        .text_output(&format!("Skipping {}: {}", rejection.mod_id, rejection.reason));
                }
            }
            if self.plan.is_empty() {
                self.state = SyncState::Finished;
                return Ok(SyncReport::new(self.state, &self.plan));
            }
        }

        self.state = SyncState::Applying;
        info!("Applying {} mod changes", self.plan.actions().count());
        let report = apply(&self.plan, self.cache, self.installed, self.reporter);
        self.state = report.state;
        Ok(report)
    }

    fn abort(&mut self, reason: &str) -> SyncReport {
        self.state = SyncState::Aborted;
        let mut report = SyncReport::new(self.state, &self.plan);
        report.skipped = self.plan.actions().cloned().collect();
        report.abort_reason = Some(reason.to_string());
        report
    }
}
