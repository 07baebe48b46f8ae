//! Core of a mod manager for Invisible Inc.
//!
//! Tracks a local cache of downloaded mod versions, the mods installed in
//! the game's mod folder, and reconciles both against a text specification
//! of the desired mods.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod fsutil;
pub mod hashing;
pub mod installed;
pub mod modinfo;
pub mod reconcile;
pub mod remote;
pub mod reporter;
pub mod spec;
pub mod update;

pub use cache::{CachedMod, CachedVersion, ModCache, RefreshLevel};
pub use config::ModManConfig;
pub use error::{ErrorKind, ModError, Result};
pub use events::ChangeEvent;
pub use installed::{InstallRefreshLevel, InstalledMod, ModList};
pub use modinfo::ModInfo;
pub use reconcile::{SyncOptions, SyncPlan, SyncRun, SyncState};
pub use remote::{CatalogConfig, ModDownloader, RemoteModInfo};
pub use reporter::Reporter;
pub use spec::{ModSpec, SpecMod, VersionTarget};
pub use update::{CacheUpdater, UpdateOptions, UpdateReport};
