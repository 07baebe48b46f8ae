use std::{cmp::Ordering, path::PathBuf};

use colored::Colorize;
use iimodman::{
    modinfo::compare_version_strings,
    CatalogConfig, ModDownloader, ModManConfig, ModSpec, RefreshLevel, Reporter, SpecMod,
    SyncOptions, SyncRun,
};
use itertools::Itertools;
use tracing::{info, warn};

use super::util::{self, ConsoleReporter};
use crate::Result as CrateResult;

pub fn mods_list(config: &ModManConfig) -> CrateResult<()> {
    let (cache, mods) = util::open_installed(config, RefreshLevel::LatestOnly)?;
    for installed in mods.mods() {
        let version = match installed.cache_version_id() {
            Some(version_id) => version_id.green().to_string(),
            None => "not in cache".red().to_string(),
        };
        let cached = cache.get(installed.id());
        let update = cached.is_some_and(|m| m.has_update_available());
        let newer_cached = match (
            installed.info().version.as_deref(),
            cached.and_then(|m| m.latest_version()).and_then(|v| v.version_name()),
        ) {
            (Some(current), Some(latest)) => {
                compare_version_strings(current, latest) == Ordering::Less
            }
            _ => false,
        };
        println!(
            "- {}{} {}{}{}",
            installed.info(),
            installed
                .alias()
                .map(|alias| format!(" as {}", alias.italic()))
                .unwrap_or_default(),
            version,
            if newer_cached {
                " (newer version cached)".cyan().to_string()
            } else {
                String::new()
            },
            if update {
                " (update available)".yellow().to_string()
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

/// Prints the installed mods as spec lines.
pub fn mods_export(config: &ModManConfig, versioned: bool) -> CrateResult<()> {
    let (cache, mods) = util::open_installed(config, RefreshLevel::LatestOnly)?;
    print!("{}", mods.to_spec(&cache).to_spec_string(versioned));
    Ok(())
}

pub fn mods_install(config: &ModManConfig, lines: Vec<String>) -> CrateResult<()> {
    let (mut cache, mut mods) = util::open_installed(config, RefreshLevel::LatestOnly)?;
    let specs: Vec<SpecMod> = lines
        .iter()
        .filter_map(|line| {
            let spec = SpecMod::from_spec_string(line);
            if spec.is_none() {
                eprintln!("{} {}", "Invalid mod spec:".red(), line);
            }
            spec
        })
        .collect();

    let mut failed = 0;
    for spec in &specs {
        match mods.install_mod(&mut cache, spec) {
            Ok(installed) => {
                info!("Installed {}", installed.info());
                println!("Installed {}", installed.info());
            }
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", "Failed:".bold().red(), spec, e);
            }
        }
    }
    if failed > 0 {
        return Err(format!("{} of {} mods failed to install", failed, specs.len()).into());
    }
    Ok(())
}

pub fn mods_remove(config: &ModManConfig, ids: Vec<String>, assume_yes: bool) -> CrateResult<()> {
    let (mut cache, mut mods) = util::open_installed(config, RefreshLevel::LatestOnly)?;
    let reporter = ConsoleReporter::new(assume_yes);
    let ids = util::workshop_ids(ids);

    let (present, missing): (Vec<&String>, Vec<&String>) =
        ids.iter().unique().partition(|id| mods.contains(id));
    for id in missing {
        warn!("Mod not installed: {}", id);
        reporter.text_output(&format!("Skipping {}: not installed", id));
    }
    if present.is_empty() {
        return Ok(());
    }

    let uncached = present
        .iter()
        .filter(|id| mods.get(id).is_some_and(|m| !m.has_cache_version()))
        .join(" ");
    if !uncached.is_empty() {
        reporter.text_output(&format!(
            "{} {}",
            "Not saved in the mod cache:".yellow(),
            uncached
        ));
    }
    if !reporter.confirm(&format!("Remove {}?", present.iter().join(" "))) {
        reporter.text_output("Abort.");
        return Ok(());
    }
    for id in present {
        mods.remove_mod(&mut cache, id)?;
        println!("Removed {}", id);
    }
    Ok(())
}

/// Reconciles the install directory with the concatenation of spec files.
pub async fn mods_sync(
    config: &ModManConfig,
    files: Vec<PathBuf>,
    force: bool,
    fetch: bool,
    assume_yes: bool,
) -> CrateResult<()> {
    let mut target = ModSpec::new();
    for file in &files {
        let count = target.append_file(file)?;
        info!("Read {} mods from {}", count, file.display());
    }

    let (mut cache, mut mods) = util::open_installed(config, RefreshLevel::LatestOnly)?;
    let reporter = ConsoleReporter::new(assume_yes);
    let downloader = ModDownloader::new(CatalogConfig::default())?;
    let options = SyncOptions {
        force_remove_uncached: force,
        confirm: !assume_yes,
        fetch_missing: fetch,
    };
    let report = SyncRun::new(&mut cache, &mut mods, &reporter, options)
        .with_downloader(&downloader)
        .run(&target)
        .await?;
    if let Some((action, error)) = &report.failed {
        return Err(format!("{}: {}", action, error).into());
    }
    Ok(())
}
