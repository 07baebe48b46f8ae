//! The local cache of downloaded mod versions.
//!
//! Layout on disk is `{root}/{modId}/{versionId}/`, plus a small metadata
//! file at the root holding what can't be derived from the folders: display
//! names of mods with nothing downloaded, default aliases and "available
//! version" markers.

use std::{
    cell::OnceCell,
    collections::{BTreeMap, HashMap},
    fmt,
    fs::{self, File},
    io::{Read, Seek},
    path::{Component, Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::{
    error::{ModError, Result},
    events::{ChangeEvent, ChangeHint, EventSink, RefreshScope},
    fsutil,
    hashing::hash_mod_dir,
    modinfo::{self, IdStatus, ModInfo},
    spec::{SpecMod, VersionTarget},
};

pub const METADATA_FILE: &str = "modmandb.json";

const MAX_ORIGINAL_VERSIONS: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshLevel {
    /// Parse every version's metadata.
    Full,
    /// Only enumerate version IDs.
    IdOnly,
    /// Parse the newest version of each mod, register the rest by ID.
    LatestOnly,
}

#[derive(Debug)]
pub struct CachedVersion {
    mod_id: String,
    id: String,
    path: PathBuf,
    timestamp: Option<DateTime<Utc>>,
    info: OnceCell<ModInfo>,
    hash: OnceCell<String>,
    installed: bool,
}

impl CachedVersion {
    /// Loads a version folder. `None` if it has no metadata marker.
    fn load(mod_id: &str, id: &str, path: PathBuf, level: RefreshLevel) -> Option<CachedVersion> {
        if !modinfo::has_marker(&path) {
            debug!("Skipping {}: no {}", path.display(), modinfo::MODINFO_FILE);
            return None;
        }
        let version = CachedVersion {
            mod_id: mod_id.to_string(),
            id: id.to_string(),
            timestamp: modinfo::parse_version_id(id),
            path,
            info: OnceCell::new(),
            hash: OnceCell::new(),
            installed: false,
        };
        if level == RefreshLevel::Full {
            match ModInfo::read(&version.path, mod_id, IdStatus::Locked) {
                Ok(info) => {
                    let _ = version.info.set(info);
                }
                Err(e) => {
                    warn!("Skipping {}: {}", version.path.display(), e);
                    return None;
                }
            }
        }
        Some(version)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mod_id(&self) -> &str {
        &self.mod_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Download time encoded in the version ID, for remote versions.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn installed(&self) -> bool {
        self.installed
    }

    pub fn is_loaded(&self) -> bool {
        self.info.get().is_some()
    }

    /// Metadata from `modinfo.txt`, read on first access for ID-only versions.
    pub fn info(&self) -> &ModInfo {
        self.info.get_or_init(|| {
            ModInfo::read(&self.path, &self.mod_id, IdStatus::Locked).unwrap_or_else(|e| {
                warn!("Failed to read metadata for {}: {}", self.path.display(), e);
                ModInfo::new(self.mod_id.clone(), "")
            })
        })
    }

    pub fn version_name(&self) -> Option<&str> {
        self.info().version.as_deref()
    }

    /// Content hash, computed once.
    pub fn hash(&self) -> Result<&str> {
        if let Some(hash) = self.hash.get() {
            return Ok(hash);
        }
        let hash = hash_mod_dir(&self.path)?;
        Ok(self.hash.get_or_init(|| hash))
    }

    pub fn as_spec(&self, alias: Option<String>) -> SpecMod {
        SpecMod::new(self.mod_id.clone(), VersionTarget::Exact(self.id.clone()))
            .with_alias(alias)
            .with_name(
                self.info().name.clone(),
                self.version_name().map(str::to_string),
            )
    }
}

impl fmt::Display for CachedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.version_name() {
            Some(name) => write!(f, "{} [{}]", name, self.id),
            None => write!(f, "[{}]", self.id),
        }
    }
}

#[derive(Debug)]
pub struct CachedMod {
    id: String,
    info: ModInfo,
    path: PathBuf,
    default_alias: Option<String>,
    available_version: Option<DateTime<Utc>>,
    /// Sorted by version ID, newest first.
    versions: Vec<CachedVersion>,
}

impl CachedMod {
    fn new(id: &str, name: &str, path: PathBuf) -> Self {
        CachedMod {
            id: id.to_string(),
            info: ModInfo::new(id, name),
            path,
            default_alias: None,
            available_version: None,
            versions: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn info(&self) -> &ModInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn default_alias(&self) -> Option<&str> {
        self.default_alias.as_deref()
    }

    pub fn available_version(&self) -> Option<DateTime<Utc>> {
        self.available_version
    }

    pub fn versions(&self) -> &[CachedVersion] {
        &self.versions
    }

    pub fn is_downloaded(&self) -> bool {
        !self.versions.is_empty()
    }

    pub fn latest_version(&self) -> Option<&CachedVersion> {
        self.versions.first()
    }

    pub fn version(&self, version_id: &str) -> Option<&CachedVersion> {
        self.version_index(version_id).map(|i| &self.versions[i])
    }

    pub fn contains_version(&self, version_id: &str) -> bool {
        self.version_index(version_id).is_some()
    }

    pub fn installed_version(&self) -> Option<&CachedVersion> {
        self.versions.iter().find(|v| v.installed)
    }

    /// True when the remote has a version newer than anything downloaded.
    pub fn has_update_available(&self) -> bool {
        match (self.available_version, self.latest_version()) {
            (Some(available), Some(latest)) => latest.timestamp().map_or(true, |t| t < available),
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn version_index(&self, version_id: &str) -> Option<usize> {
        self.versions.iter().position(|v| v.id == version_id)
    }

    fn version_index_from_hash(&self, hash: &str, hint: Option<&str>) -> Option<usize> {
        let matches = |v: &CachedVersion| match v.hash() {
            Ok(h) => h == hash,
            Err(e) => {
                warn!("Failed to hash {}: {}", v.path.display(), e);
                false
            }
        };
        if let Some(i) = hint.and_then(|h| self.version_index(h)) {
            if matches(&self.versions[i]) {
                return Some(i);
            }
        }
        self.versions.iter().position(matches)
    }

    /// Rescans this mod's version folders. Returns false if none were found.
    fn refresh(&mut self, level: RefreshLevel, installed_version: Option<&str>) -> Result<bool> {
        self.versions.clear();
        let mut version_ids = list_dir_names(&self.path)?;
        version_ids.sort_by(|a, b| b.cmp(a));

        for version_id in version_ids {
            let version_level = match level {
                RefreshLevel::LatestOnly if self.versions.is_empty() => RefreshLevel::Full,
                RefreshLevel::LatestOnly => RefreshLevel::IdOnly,
                other => other,
            };
            let path = self.path.join(&version_id);
            if let Some(mut version) = CachedVersion::load(&self.id, &version_id, path, version_level) {
                version.installed = installed_version == Some(version_id.as_str());
                self.versions.push(version);
            }
        }
        self.clear_downloaded_available_version();

        if let Some(latest) = self.versions.first() {
            if level != RefreshLevel::IdOnly {
                self.info = latest.info().clone();
            }
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Reloads a single version folder and returns its index.
    fn refresh_version(&mut self, version_id: &str, level: RefreshLevel) -> Option<usize> {
        let existing = self.version_index(version_id);
        let was_installed = existing.map_or(false, |i| self.versions[i].installed);
        if let Some(i) = existing {
            self.versions.remove(i);
        }
        let mut version =
            CachedVersion::load(&self.id, version_id, self.path.join(version_id), level)?;
        version.installed = was_installed;
        let position = self
            .versions
            .iter()
            .position(|v| v.id.as_str() < version_id)
            .unwrap_or(self.versions.len());
        self.versions.insert(position, version);
        if position == 0 {
            self.info = self.versions[0].info().clone();
        }
        self.clear_downloaded_available_version();
        Some(position)
    }

    fn clear_downloaded_available_version(&mut self) {
        if let Some(available) = self.available_version {
            if self.contains_version(&modinfo::format_version_id(&available)) {
                debug!("Available version of {} is downloaded", self.id);
                self.available_version = None;
            }
        }
    }

    /// First unused `NNN-original` or `dev` version ID for local copies.
    fn original_version_id(&self) -> Result<String> {
        if !modinfo::is_workshop_id(&self.id) {
            return Ok("dev".to_string());
        }
        (0..MAX_ORIGINAL_VERSIONS)
            .map(|i| format!("{:03}-original", i))
            .find(|id| !self.contains_version(id))
            .ok_or_else(|| ModError::VersionIdsExhausted {
                mod_id: self.id.clone(),
            })
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheMetadata {
    #[serde(default)]
    mods: BTreeMap<String, ModMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModMetadata {
    #[serde(default)]
    display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    available_version: Option<DateTime<Utc>>,
}

/// Every mod and version downloaded locally, sorted by mod ID.
#[derive(Debug)]
pub struct ModCache {
    root: PathBuf,
    mods: Vec<CachedMod>,
    index: HashMap<String, usize>,
    events: EventSink,
}

impl ModCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ModCache {
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

    pub fn mods(&self) -> &[CachedMod] {
        &self.mods
    }

    pub fn get(&self, mod_id: &str) -> Option<&CachedMod> {
        self.index.get(mod_id).map(|&i| &self.mods[i])
    }

    pub fn contains(&self, mod_id: &str) -> bool {
        self.index.contains_key(mod_id)
    }

    pub fn mod_path(&self, mod_id: &str) -> PathBuf {
        self.root.join(mod_id)
    }

    pub fn version_path(&self, mod_id: &str, version_id: &str) -> PathBuf {
        self.mod_path(mod_id).join(version_id)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root.join(METADATA_FILE)
    }

    /// Rescans the cache root.
    ///
    /// Which version of each mod is installed is kept across the rescan.
    pub fn refresh(&mut self, level: RefreshLevel) -> Result<()> {
        debug!("Refreshing mod cache at {} ({:?})", self.root.display(), level);
        let installed: HashMap<String, String> = self
            .mods
            .iter()
            .filter_map(|m| m.installed_version().map(|v| (m.id.clone(), v.id.clone())))
            .collect();

        self.mods.clear();
        self.index.clear();
        self.load_metadata();

        for mod_id in list_dir_names(&self.root)? {
            let installed_version = installed.get(&mod_id).map(String::as_str);
            match self.index.get(&mod_id).copied() {
                Some(i) => {
                    if let Err(e) = self.mods[i].refresh(level, installed_version) {
                        warn!("Failed to scan {}: {}", mod_id, e);
                    }
                }
                None => {
                    let mut cached = CachedMod::new(&mod_id, "", self.mod_path(&mod_id));
                    match cached.refresh(level, installed_version) {
                        Ok(true) => {
                            self.index.insert(mod_id, self.mods.len());
                            self.mods.push(cached);
                        }
                        Ok(false) => debug!("Ignoring {}: no versions and no metadata", mod_id),
                        Err(e) => warn!("Skipping {}: {}", mod_id, e),
                    }
                }
            }
        }
        self.sort_and_reindex();
        info!("Loaded {} mods from cache", self.mods.len());
        self.events.emit(ChangeEvent::Refreshed {
            scope: RefreshScope::All,
            hint: ChangeHint::None,
        });
        Ok(())
    }

    /// Registers a mod with nothing downloaded yet.
    ///
    /// Returns `None` if the mod is already known.
    pub fn add_unloaded(&mut self, info: &ModInfo) -> Option<&CachedMod> {
        if info.id.is_empty() || self.contains(&info.id) {
            return None;
        }
        debug!("Registering {}", info);
        let mut cached = CachedMod::new(&info.id, &info.name, self.mod_path(&info.id));
        cached.info = info.clone();
        let i = self.insert_mod(cached);
        Some(&self.mods[i])
    }

    /// Extracts a zip archive as a new version.
    ///
    /// Backslash separated entry names are extracted into subfolders.
    pub fn add_version_from_archive<R: Read + Seek>(
        &mut self,
        mod_id: &str,
        version_id: &str,
        archive: R,
    ) -> Result<&CachedVersion> {
        check_path_component(mod_id)?;
        check_path_component(version_id)?;
        let staging = fsutil::staging_dir(&self.mod_path(mod_id))?;
        extract_zip(archive, staging.path())?;
        if !modinfo::has_marker(staging.path()) {
            return Err(ModError::MissingMarker(
                self.version_path(mod_id, version_id),
            ));
        }
        fsutil::commit_staged(staging, &self.version_path(mod_id, version_id))?;
        self.finish_added_version(mod_id, version_id)
    }

    /// Copies a mod folder as a new version.
    pub fn add_version_from_directory(
        &mut self,
        mod_id: &str,
        version_id: &str,
        source: &Path,
    ) -> Result<&CachedVersion> {
        check_path_component(mod_id)?;
        check_path_component(version_id)?;
        if !modinfo::has_marker(source) {
            return Err(ModError::MissingMarker(source.to_path_buf()));
        }
        let staging = fsutil::staging_dir(&self.mod_path(mod_id))?;
        fsutil::copy_dir_recursive(source, staging.path())?;
        fsutil::commit_staged(staging, &self.version_path(mod_id, version_id))?;
        self.finish_added_version(mod_id, version_id)
    }

    /// Copies installed content that has no cache version into the cache.
    ///
    /// Workshop mods get the first free `NNN-original` ID, local mods `dev`.
    pub fn add_original_version(&mut self, mod_id: &str, source: &Path) -> Result<&CachedVersion> {
        let version_id = match self.get(mod_id) {
            Some(cached) => cached.original_version_id()?,
            None => CachedMod::new(mod_id, "", PathBuf::new()).original_version_id()?,
        };
        self.add_version_from_directory(mod_id, &version_id, source)
    }

    fn finish_added_version(&mut self, mod_id: &str, version_id: &str) -> Result<&CachedVersion> {
        let (i, is_new) = match self.index.get(mod_id).copied() {
            Some(i) => (i, false),
            None => {
                let cached = CachedMod::new(mod_id, "", self.mod_path(mod_id));
                (self.insert_mod(cached), true)
            }
        };
        let vi = self.mods[i]
            .refresh_version(version_id, RefreshLevel::Full)
            .ok_or_else(|| ModError::MissingMarker(self.version_path(mod_id, version_id)))?;
        info!("Added {} {} to cache", mod_id, version_id);
        if !is_new {
            self.events.emit(ChangeEvent::Refreshed {
                scope: RefreshScope::Mods(vec![mod_id.to_string()]),
                hint: ChangeHint::VersionOnly,
            });
        }
        Ok(&self.mods[i].versions[vi])
    }

    /// Reloads one version folder from disk.
    pub fn refresh_version(
        &mut self,
        mod_id: &str,
        version_id: &str,
        level: RefreshLevel,
    ) -> Option<&CachedVersion> {
        let i = *self.index.get(mod_id)?;
        let vi = self.mods[i].refresh_version(version_id, level)?;
        Some(&self.mods[i].versions[vi])
    }

    /// Flags the version matching an installed mod's content as installed.
    ///
    /// Any previously flagged version of the mod is cleared, including when
    /// nothing matches.
    pub fn mark_installed_version(
        &mut self,
        mod_id: &str,
        hash: &str,
        hint: Option<&str>,
    ) -> Option<&CachedVersion> {
        let i = *self.index.get(mod_id)?;
        let found = self.mods[i].version_index_from_hash(hash, hint);
        let previous = self.mods[i].versions.iter().position(|v| v.installed);
        if found != previous {
            let cached = &mut self.mods[i];
            if let Some(p) = previous {
                cached.versions[p].installed = false;
            }
            if let Some(f) = found {
                cached.versions[f].installed = true;
            }
            debug!("Installed version of {} is now {:?}", mod_id, found.map(|f| &cached.versions[f].id));
            self.events.emit(ChangeEvent::MetadataChanged {
                mod_ids: vec![mod_id.to_string()],
            });
        }
        found.map(|f| &self.mods[i].versions[f])
    }

    pub fn unmark_installed(&mut self, mod_id: &str) {
        let Some(&i) = self.index.get(mod_id) else {
            return;
        };
        let mut changed = false;
        for version in self.mods[i].versions.iter_mut().filter(|v| v.installed) {
            version.installed = false;
            changed = true;
        }
        if changed {
            self.events.emit(ChangeEvent::MetadataChanged {
                mod_ids: vec![mod_id.to_string()],
            });
        }
    }

    /// Sets the folder name a mod is installed under by default. An alias
    /// equal to the mod ID clears it.
    pub fn set_default_alias(&mut self, mod_id: &str, alias: Option<&str>) -> Result<()> {
        let alias = alias.filter(|a| !a.is_empty() && *a != mod_id);
        if let Some(alias) = alias {
            check_path_component(alias)?;
        }
        let cached = self.get_mut(mod_id)?;
        cached.default_alias = alias.map(str::to_string);
        self.events.emit(ChangeEvent::MetadataChanged {
            mod_ids: vec![mod_id.to_string()],
        });
        Ok(())
    }

    /// Records a remote version that hasn't been downloaded.
    ///
    /// Ignored if that version is already in the cache.
    pub fn mark_available_version(&mut self, mod_id: &str, time: DateTime<Utc>) -> Result<()> {
        let cached = self.get_mut(mod_id)?;
        if cached.contains_version(&modinfo::format_version_id(&time)) {
            return Ok(());
        }
        cached.available_version = Some(time);
        self.events.emit(ChangeEvent::MetadataChanged {
            mod_ids: vec![mod_id.to_string()],
        });
        Ok(())
    }

    pub fn clear_available_version(&mut self, mod_id: &str) -> Result<()> {
        let cached = self.get_mut(mod_id)?;
        if cached.available_version.take().is_some() {
            self.events.emit(ChangeEvent::MetadataChanged {
                mod_ids: vec![mod_id.to_string()],
            });
        }
        Ok(())
    }

    /// Writes the metadata file, replacing it entirely.
    pub fn save_metadata(&self) -> Result<()> {
        let metadata = CacheMetadata {
            mods: self
                .mods
                .iter()
                .map(|m| {
                    (
                        m.id.clone(),
                        ModMetadata {
                            display_name: m.info.name.clone(),
                            default_alias: m.default_alias.clone(),
                            available_version: m.available_version,
                        },
                    )
                })
                .collect(),
        };
        debug!("Saving metadata for {} mods", metadata.mods.len());
        fsutil::write_json_atomic(&self.metadata_path(), &metadata)
    }

    fn load_metadata(&mut self) {
        let path = self.metadata_path();
        let metadata: CacheMetadata = match fsutil::read_json(&path) {
            Ok(Some(m)) => m,
            Ok(None) => return,
            Err(e) => {
                warn!("Ignoring cache metadata: {}", e);
                return;
            }
        };
        for (mod_id, entry) in metadata.mods {
            if check_path_component(&mod_id).is_err() {
                warn!("Ignoring invalid mod ID in cache metadata: {:?}", mod_id);
                continue;
            }
            let mut cached = CachedMod::new(&mod_id, &entry.display_name, self.mod_path(&mod_id));
            cached.default_alias = entry.default_alias.filter(|a| !a.is_empty());
            cached.available_version = entry.available_version;
            self.index.insert(mod_id, self.mods.len());
            self.mods.push(cached);
        }
    }

    fn get_mut(&mut self, mod_id: &str) -> Result<&mut CachedMod> {
        match self.index.get(mod_id) {
            Some(&i) => Ok(&mut self.mods[i]),
            None => Err(ModError::ModNotFound {
                mod_id: mod_id.to_string(),
            }),
        }
    }

    fn insert_mod(&mut self, cached: CachedMod) -> usize {
        let mod_id = cached.id.clone();
        self.mods.push(cached);
        self.sort_and_reindex();
        self.events.emit(ChangeEvent::ModsAppended {
            mod_ids: vec![mod_id.clone()],
        });
        self.index[&mod_id]
    }

    fn sort_and_reindex(&mut self) {
        self.mods.sort_by(|a, b| a.id.cmp(&b.id));
        self.index = self
            .mods
            .iter()
            .enumerate()
            .map(|(i, m)| (m.id.clone(), i))
            .collect();
    }
}

/// Rejects IDs that would escape their parent folder.
pub(crate) fn check_path_component(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(|c| c == '/' || c == '\\') => Ok(()),
        _ => Err(ModError::InvalidArgument(format!(
            "Not a valid folder name: {:?}",
            name
        ))),
    }
}

/// Sorted names of the visible subdirectories of `dir`.
pub(crate) fn list_dir_names(dir: &Path) -> Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(ModError::io_with_path(e, dir)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| ModError::io_with_path(e, dir))?;
        if !entry.path().is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) if name.starts_with('.') || fsutil::is_staging_name(&name) => {}
            Ok(name) => names.push(name),
            Err(name) => warn!("Skipping non UTF-8 folder name {:?}", name),
        }
    }
    names.sort();
    Ok(names)
}

fn extract_zip<R: Read + Seek>(archive: R, dest: &Path) -> Result<()> {
    let mut zip = ZipArchive::new(archive)?;
    debug!("Extracting {} entries to {}", zip.len(), dest.display());
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let name = entry.name().replace('\\', "/");
        let Some(relative) = enclosed_path(&name) else {
            warn!("Skipping unsafe archive entry {:?}", entry.name());
            continue;
        };
        let out = dest.join(relative);
        if entry.is_dir() || name.ends_with('/') {
            fs::create_dir_all(&out).map_err(|e| ModError::io_with_path(e, &out))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(|e| ModError::io_with_path(e, parent))?;
        }
        let mut file = File::create(&out).map_err(|e| ModError::io_with_path(e, &out))?;
        std::io::copy(&mut entry, &mut file).map_err(|e| ModError::io_with_path(e, &out))?;
    }
    Ok(())
}

fn enclosed_path(name: &str) -> Option<PathBuf> {
    let mut path = PathBuf::new();
    for component in Path::new(name).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!path.as_os_str().is_empty()).then_some(path)
}
