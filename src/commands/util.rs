use std::io::Write;

use colored::Colorize;
use iimodman::{
    InstallRefreshLevel, ModCache, ModList, ModManConfig, RefreshLevel, Reporter,
};
use inquire::Confirm;
use tracing::debug;

use crate::Result as CrateResult;

/// Terminal front end: status on stderr, `inquire` prompts.
pub struct ConsoleReporter {
    pub assume_yes: bool,
}

impl ConsoleReporter {
    pub fn new(assume_yes: bool) -> Self {
        ConsoleReporter { assume_yes }
    }
}

impl Reporter for ConsoleReporter {
    fn begin_progress(&self, label: &str, _total: Option<u64>) {
        eprintln!("{}", label.bold());
    }

    fn update_progress(&self, current: u64, total: Option<u64>) {
        match total {
            Some(total) => eprint!("\r  {}/{}", current, total),
            None => eprint!("\r  {} bytes", current),
        }
        let _ = std::io::stderr().flush();
    }

    fn end_progress(&self) {
        eprintln!();
    }

    fn text_output(&self, line: &str) {
        eprintln!("{}", line);
    }

    fn confirm(&self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        match Confirm::new(prompt).with_default(true).prompt() {
            Ok(answer) => answer,
            Err(e) => {
                debug!("Confirmation failed: {}", e);
                false
            }
        }
    }
}

pub fn open_cache(config: &ModManConfig, level: RefreshLevel) -> CrateResult<ModCache> {
    config.ensure_cache_dir()?;
    let mut cache = config.open_cache();
    cache.refresh(level)?;
    Ok(cache)
}

/// Opens the cache and the install directory, associated by content hash.
pub fn open_installed(
    config: &ModManConfig,
    level: RefreshLevel,
) -> CrateResult<(ModCache, ModList)> {
    let mut cache = open_cache(config, level)?;
    config.check_install_dir()?;
    let mut mods = config.open_mod_list();
    mods.refresh(&mut cache, InstallRefreshLevel::Full)?;
    Ok((cache, mods))
}

pub fn workshop_ids(ids: Vec<String>) -> Vec<String> {
    ids.into_iter()
        .map(|id| {
            if id.chars().all(|c| c.is_ascii_digit()) {
                format!("{}{}", iimodman::modinfo::WORKSHOP_PREFIX, id)
            } else {
                id
            }
        })
        .collect()
}
