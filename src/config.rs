use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{
    cache::ModCache,
    error::{ModError, Result},
    installed::ModList,
};

pub const CACHE_PATH_ENV: &str = "IIMODMAN_CACHE_PATH";
pub const INSTALL_PATH_ENV: &str = "IIMODMAN_INSTALL_PATH";

/// Where the cache and the game's mod folder live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModManConfig {
    pub cache_path: PathBuf,
    pub install_path: PathBuf,
}

impl ModManConfig {
    pub fn new(cache_path: impl Into<PathBuf>, install_path: impl Into<PathBuf>) -> Self {
        ModManConfig {
            cache_path: cache_path.into(),
            install_path: install_path.into(),
        }
    }

    pub fn default_cache_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("iimodman").join("cache"))
    }

    pub fn default_install_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| {
            d.join("Steam")
                .join("steamapps")
                .join("common")
                .join("InvisibleInc")
                .join("mods")
        })
    }

    /// Fills in whichever paths weren't given with the platform defaults.
    pub fn resolve(cache_path: Option<PathBuf>, install_path: Option<PathBuf>) -> Result<Self> {
        let cache_path = cache_path
            .or_else(Self::default_cache_path)
            .ok_or_else(|| ModError::InvalidArgument("No cache path configured".into()))?;
        let install_path = install_path
            .or_else(Self::default_install_path)
            .ok_or_else(|| ModError::InvalidArgument("No install path configured".into()))?;
        debug!(
            "Using cache {} and install dir {}",
            cache_path.display(),
            install_path.display()
        );
        Ok(ModManConfig::new(cache_path, install_path))
    }

    pub fn ensure_cache_dir(&self) -> Result<&Path> {
        if !self.cache_path.is_dir() {
            info!("Creating cache directory {}", self.cache_path.display());
            std::fs::create_dir_all(&self.cache_path)
                .map_err(|e| ModError::io_with_path(e, &self.cache_path))?;
        }
        Ok(&self.cache_path)
    }

    /// Fails if the install directory doesn't exist, since it normally
    /// comes with the game.
    pub fn check_install_dir(&self) -> Result<&Path> {
        if self.install_path.is_dir() {
            Ok(&self.install_path)
        } else {
            Err(ModError::io_with_path(
                std::io::Error::from(std::io::ErrorKind::NotFound),
                &self.install_path,
            ))
        }
    }

    pub fn open_cache(&self) -> ModCache {
        ModCache::new(&self.cache_path)
    }

    pub fn open_mod_list(&self) -> ModList {
        ModList::new(&self.install_path)
    }
}
