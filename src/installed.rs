//! Mods present in the game's install directory.
//!
//! Each mod lives in `{root}/{folder}/`, where the folder is the mod ID or an
//! alias. A `modman.json` sidecar records the mod ID and cache version it was
//! installed from. The sidecar is only a hint: a full refresh hashes the
//! folder and asks the cache which version actually matches.

use std::{
    cell::OnceCell,
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::{
    cache::{self, ModCache},
    error::{ModError, Result},
    events::{ChangeEvent, ChangeHint, EventSink, RefreshScope},
    fsutil,
    hashing::hash_mod_dir,
    modinfo::{self, IdStatus, ModInfo},
    spec::{ModSpec, SpecMod, VersionTarget},
};

pub const SIDECAR_FILE: &str = "modman.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InstallRefreshLevel {
    /// Just enumerate folders and sidecars.
    IdOnly,
    /// Also parse `modinfo.txt`.
    ContentOnly,
    /// Also hash each mod and match it against the cache.
    Full,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstallSidecar {
    mod_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version_id: Option<String>,
}

#[derive(Debug)]
pub struct InstalledMod {
    id: String,
    folder: String,
    info: ModInfo,
    path: PathBuf,
    hash: OnceCell<String>,
    cache_version_id: Option<String>,
    /// The ID came from the sidecar rather than the folder name.
    id_locked: bool,
}

impl InstalledMod {
    fn load(folder: &str, path: PathBuf, level: InstallRefreshLevel) -> Option<InstalledMod> {
        if !modinfo::has_marker(&path) {
            debug!("Skipping {}: no {}", path.display(), modinfo::MODINFO_FILE);
            return None;
        }
        let sidecar = match fsutil::read_json::<InstallSidecar>(&path.join(SIDECAR_FILE)) {
            Ok(sidecar) => sidecar.filter(|s| !s.mod_id.is_empty()),
            Err(e) => {
                warn!("Ignoring install sidecar: {}", e);
                None
            }
        };
        let status = if sidecar.is_some() {
            IdStatus::Locked
        } else {
            IdStatus::Tentative
        };
        let id = sidecar
            .as_ref()
            .map_or_else(|| folder.to_string(), |s| s.mod_id.clone());

        let mut installed = InstalledMod {
            info: ModInfo::new(id.clone(), ""),
            id,
            folder: folder.to_string(),
            path,
            hash: OnceCell::new(),
            cache_version_id: sidecar.and_then(|s| s.version_id),
            id_locked: status == IdStatus::Locked,
        };
        if level == InstallRefreshLevel::IdOnly {
            return Some(installed);
        }

        match ModInfo::read(&installed.path, &installed.id, status) {
            Ok(info) => {
                installed.id = info.id.clone();
                installed.info = info;
            }
            Err(e) => {
                warn!("Skipping {}: {}", installed.path.display(), e);
                return None;
            }
        }
        Some(installed)
    }

    /// Matches this mod's content against the cache.
    fn associate(&mut self, cache: &mut ModCache, hint: Option<&str>) {
        if !cache.contains(&self.id) {
            self.cache_version_id = None;
            return;
        }
        let hash = match self.hash() {
            Ok(hash) => hash.to_string(),
            Err(e) => {
                warn!("Failed to hash {}: {}", self.path.display(), e);
                cache.unmark_installed(&self.id);
                self.cache_version_id = None;
                return;
            }
        };
        self.cache_version_id = cache
            .mark_installed_version(&self.id, &hash, hint)
            .map(|v| v.id().to_string());
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Folder name, when it differs from the mod ID.
    pub fn alias(&self) -> Option<&str> {
        (self.folder != self.id).then_some(self.folder.as_str())
    }

    /// Folder name under the install root.
    pub fn installed_id(&self) -> &str {
        &self.folder
    }

    pub fn info(&self) -> &ModInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cache_version_id(&self) -> Option<&str> {
        self.cache_version_id.as_deref()
    }

    pub fn has_cache_version(&self) -> bool {
        self.cache_version_id.is_some()
    }

    pub fn hash(&self) -> Result<&str> {
        if let Some(hash) = self.hash.get() {
            return Ok(hash);
        }
        let hash = hash_mod_dir(&self.path)?;
        Ok(self.hash.get_or_init(|| hash))
    }

    /// Spec line reproducing this install. Mods without a cache version can
    /// only be kept as they are.
    pub fn as_spec(&self, cache: &ModCache) -> SpecMod {
        let version = match &self.cache_version_id {
            Some(v) => VersionTarget::Exact(v.clone()),
            None => VersionTarget::KeepCurrent,
        };
        let version_name = self
            .cache_version_id
            .as_deref()
            .and_then(|v| cache.get(&self.id)?.version(v))
            .and_then(|v| v.version_name().map(str::to_string))
            .or_else(|| self.info.version.clone());
        SpecMod::new(self.id.clone(), version)
            .with_alias(self.alias().map(str::to_string))
            .with_name(self.info.name.clone(), version_name)
    }
}

/// The install directory, indexed by mod ID.
#[derive(Debug)]
pub struct ModList {
    root: PathBuf,
    mods: Vec<InstalledMod>,
    index: HashMap<String, usize>,
    events: EventSink,
}

impl ModList {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ModList {
            root: root.into(),
            mods: Vec::new(),
            index: HashMap::new(),
            events: EventSink::default(),
        }
    }

    pub fn subscribe(&mut self) -> UnboundedReceiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mods(&self) -> &[InstalledMod] {
        &self.mods
    }

    pub fn get(&self, mod_id: &str) -> Option<&InstalledMod> {
        self.index.get(mod_id).map(|&i| &self.mods[i])
    }

    pub fn contains(&self, mod_id: &str) -> bool {
        self.index.contains_key(mod_id)
    }

    pub fn install_path(&self, installed_id: &str) -> Result<PathBuf> {
        cache::check_path_component(installed_id)?;
        Ok(self.root.join(installed_id))
    }

    /// Installed mods that don't match any cached version.
    pub fn uncached_mods(&self) -> impl Iterator<Item = &InstalledMod> {
        self.mods.iter().filter(|m| !m.has_cache_version())
    }

    /// Rescans the install directory.
    ///
    /// Mods that disappeared since the last refresh are unmarked in the cache.
    pub fn refresh(&mut self, cache: &mut ModCache, level: InstallRefreshLevel) -> Result<()> {
        debug!("Refreshing installed mods at {} ({:?})", self.root.display(), level);
        // Keyed by folder, since a folder's ID can change between levels.
        let previous: HashMap<String, (String, Option<String>)> = self
            .mods
            .drain(..)
            .map(|m| (m.folder, (m.id, m.cache_version_id)))
            .collect();

        let load_level = level.min(InstallRefreshLevel::ContentOnly);
        for folder in cache::list_dir_names(&self.root)? {
            let path = self.root.join(&folder);
            if let Some(mut installed) = InstalledMod::load(&folder, path, load_level) {
                // Without modinfo.txt a tentative ID can't be resolved yet.
                if load_level == InstallRefreshLevel::IdOnly && !installed.id_locked {
                    if let Some((id, _)) = previous.get(&folder) {
                        installed.id = id.clone();
                        installed.info.id = id.clone();
                    }
                }
                self.mods.push(installed);
            }
        }
        self.reindex();

        for installed in self.mods.iter_mut() {
            let hint = installed.cache_version_id.clone().or_else(|| {
                previous
                    .get(&installed.folder)
                    .filter(|(id, _)| *id == installed.id)
                    .and_then(|(_, version)| version.clone())
            });
            match level {
                InstallRefreshLevel::Full => installed.associate(cache, hint.as_deref()),
                _ => installed.cache_version_id = hint,
            }
        }

        for (mod_id, _) in previous.values().filter(|(id, _)| !self.index.contains_key(id)) {
            debug!("{} is no longer installed", mod_id);
            cache.unmark_installed(mod_id);
        }
        info!("Found {} installed mods", self.mods.len());
        self.events.emit(ChangeEvent::Refreshed {
            scope: RefreshScope::All,
            hint: ChangeHint::None,
        });
        Ok(())
    }

    /// Installs the cache version a spec line resolves to.
    ///
    /// The content is copied under the alias (the spec's, else the mod's
    /// default alias, else the mod ID), replacing any earlier install of the
    /// same mod. `KeepCurrent` on an installed mod only refreshes it.
    pub fn install_mod(&mut self, cache: &mut ModCache, spec: &SpecMod) -> Result<&InstalledMod> {
        if spec.version == VersionTarget::KeepCurrent {
            if let Some(i) = self.index.get(&spec.id).copied() {
                let existing = &self.mods[i];
                if let Some(alias) = spec.alias.as_deref() {
                    if alias != existing.installed_id() {
                        return Err(ModError::AliasMismatch {
                            mod_id: spec.id.clone(),
                            installed: existing.installed_id().to_string(),
                            requested: alias.to_string(),
                        });
                    }
                }
                debug!("Keeping {} as installed", existing.info);
                return Ok(&self.mods[i]);
            }
        }

        let cached = cache.get(&spec.id).ok_or_else(|| ModError::ModNotFound {
            mod_id: spec.id.clone(),
        })?;
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
        let version_id = version.id().to_string();
        let source = version.path().to_path_buf();
        let installed_id = spec
            .alias
            .clone()
            .or_else(|| cached.default_alias().map(str::to_string))
            .unwrap_or_else(|| spec.id.clone());
        let target = self.install_path(&installed_id)?;

        if self
            .mods
            .iter()
            .any(|m| m.id != spec.id && m.installed_id() == installed_id)
        {
            return Err(ModError::DestinationCollision(target));
        }
        let old_path = self
            .get(&spec.id)
            .filter(|m| m.installed_id() != installed_id)
            .map(|m| m.path.clone());

        info!("Installing {} {} as {}", spec.id, version_id, installed_id);
        let staging = fsutil::staging_dir(&self.root)?;
        fsutil::copy_dir_recursive(&source, staging.path())?;
        let sidecar = InstallSidecar {
            mod_id: spec.id.clone(),
            version_id: Some(version_id.clone()),
        };
        if let Err(e) = fsutil::write_json_atomic(&staging.path().join(SIDECAR_FILE), &sidecar) {
            warn!("Failed to write install sidecar for {}: {}", spec.id, e);
        }
        fsutil::commit_staged(staging, &target)?;
        if let Some(old_path) = old_path {
            debug!("Removing previous install at {}", old_path.display());
            // The new copy is already live, so record it either way.
            if let Err(e) = fsutil::remove_mod_dir(&old_path) {
                warn!(
                    "Left previous install of {} at {}: {}",
                    spec.id,
                    old_path.display(),
                    e
                );
            }
        }

        let mut installed = InstalledMod::load(&installed_id, target.clone(), InstallRefreshLevel::ContentOnly)
            .ok_or(ModError::MissingMarker(target))?;
        installed.associate(cache, Some(&version_id));
        let mod_id = installed.id.clone();
        match self.index.get(&spec.id).copied() {
            Some(i) => self.mods[i] = installed,
            None => self.mods.push(installed),
        }
        self.mods.sort_by(|a, b| a.folder.cmp(&b.folder));
        self.reindex();
        self.events.emit(ChangeEvent::Refreshed {
            scope: RefreshScope::Mods(vec![mod_id.clone()]),
            hint: ChangeHint::None,
        });

        self.get(&mod_id).ok_or(ModError::NotInstalled { mod_id })
    }

    /// Deletes an installed mod's folder.
    pub fn remove_mod(&mut self, cache: &mut ModCache, mod_id: &str) -> Result<()> {
        let i = self
            .index
            .get(mod_id)
            .copied()
            .ok_or_else(|| ModError::NotInstalled {
                mod_id: mod_id.to_string(),
            })?;
        let path = self.mods[i].path.clone();
        if path.as_os_str().is_empty() || path == self.root {
            return Err(ModError::InvalidArgument(format!(
                "Refusing to remove {:?} for {}",
                path, mod_id
            )));
        }
        info!("Removing {} from {}", mod_id, path.display());
        fsutil::remove_mod_dir(&path)?;
        self.mods.remove(i);
        self.reindex();
        cache.unmark_installed(mod_id);
        self.events.emit(ChangeEvent::Refreshed {
            scope: RefreshScope::Mods(vec![mod_id.to_string()]),
            hint: ChangeHint::None,
        });
        Ok(())
    }

    /// Specification of the current install state.
    pub fn to_spec(&self, cache: &ModCache) -> ModSpec {
        self.mods.iter().map(|m| m.as_spec(cache)).collect()
    }

    /// Rebuilds the ID index. A mod whose ID is already taken by an earlier
    /// folder gets a numeric suffix.
    fn reindex(&mut self) {
        self.index.clear();
        let mut taken: HashSet<String> = HashSet::new();
        for (i, installed) in self.mods.iter_mut().enumerate() {
            if taken.contains(&installed.id) {
                let mut n = 1;
                let mut candidate = format!("{}-{}", installed.id, n);
                while taken.contains(&candidate) {
                    n += 1;
                    candidate = format!("{}-{}", installed.id, n);
                }
                warn!(
                    "Duplicate mod ID {} in {}, using {}",
                    installed.id, installed.folder, candidate
                );
                installed.id = candidate;
            }
            taken.insert(installed.id.clone());
            self.index.insert(installed.id.clone(), i);
        }
    }
}
