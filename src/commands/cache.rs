use colored::Colorize;
use iimodman::{
    update::{LatestVersionAction, MissingCacheAction, UpdateMode},
    CacheUpdater, CachedMod, CatalogConfig, InstallRefreshLevel, ModDownloader, ModManConfig,
    RefreshLevel, Reporter, UpdateOptions,
};
use itertools::Itertools;
use tracing::{debug, info};

use super::util::{self, ConsoleReporter};
use crate::Result as CrateResult;

pub fn cache_list(config: &ModManConfig, details: bool) -> CrateResult<()> {
    let cache = util::open_cache(
        config,
        if details {
            RefreshLevel::Full
        } else {
            RefreshLevel::LatestOnly
        },
    )?;

    for cached in cache.mods() {
        if details {
            print_mod_tree(cached);
        } else {
            let latest = cached
                .latest_version()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "not downloaded".to_string());
            println!(
                "- {} [{}] {}{}",
                cached.info().name.bold(),
                cached.id(),
                latest,
                if cached.has_update_available() {
                    " (update available)".yellow().to_string()
                } else {
                    String::new()
                }
            );
        }
    }
    Ok(())
}

fn print_mod_tree(cached: &CachedMod) {
    let title_corner = boxy::Char::upper_left(boxy::Weight::Thick);
    let title_side_h = boxy::Char::horizontal(boxy::Weight::Thick).to_string();
    let title_side_v = boxy::Char::vertical(boxy::Weight::Thick);
    let title_branch = boxy::Char::right_tee(boxy::Weight::Thick).down(boxy::Weight::Normal);
    let left_branch_more = boxy::Char::right_tee(boxy::Weight::Normal);
    let left_branch_done = boxy::Char::lower_left(boxy::Weight::Normal);
    let left_node = boxy::Char::left_half(boxy::Weight::Normal);
    let down_branch = boxy::Char::down_tee(boxy::Weight::Normal);

    let name = &cached.info().name;
    let width = name.chars().count() + 2;
    println!(
        "{}{}{}",
        title_corner,
        title_side_h.repeat(width),
        title_corner.rotate_cw(1)
    );
    println!("{} {} {}", title_side_v, name.bold(), title_side_v);
    println!(
        "{}{}{}",
        title_branch,
        title_side_h.repeat(width),
        title_corner.rotate_cw(2)
    );
    println!(
        "{}{}{} {}",
        left_branch_more,
        left_node,
        "Mod ID:".bold(),
        cached.id()
    );
    if let Some(alias) = cached.default_alias() {
        println!(
            "{}{}{} {}",
            left_branch_more,
            left_node,
            "Default alias:".bold(),
            alias
        );
    }
    if let Some(available) = cached.available_version() {
        println!(
            "{}{}{} {}",
            left_branch_more,
            left_node,
            "Available:".bold(),
            available.to_rfc3339().yellow()
        );
    }

    if cached.versions().is_empty() {
        println!(
            "{}{}{} none",
            left_branch_done,
            left_node,
            "Versions:".bold()
        );
        return;
    }
    println!(
        "{}{}{}{}",
        left_branch_done,
        down_branch,
        left_node,
        "Versions:".bold()
    );
    let mut versions = cached.versions().iter().peekable();
    while let Some(version) = versions.next() {
        let label = if version.installed() {
            format!("{} (installed)", version).green().bold()
        } else {
            version.to_string().normal()
        };
        println!(
            " {}{}{}",
            if versions.peek().is_some() {
                left_branch_more
            } else {
                left_branch_done
            },
            left_node,
            label
        );
    }
}

/// Registers workshop mods and downloads their latest version.
pub async fn cache_add(config: &ModManConfig, ids: Vec<String>, assume_yes: bool) -> CrateResult<()> {
    let options = UpdateOptions {
        missing_cache: MissingCacheAction::Add,
        confirm: !assume_yes,
        ..Default::default()
    };
    run_update(config, util::workshop_ids(ids), options).await
}

pub async fn cache_update(
    config: &ModManConfig,
    ids: Vec<String>,
    add_missing: bool,
    force: bool,
    check_only: bool,
    assume_yes: bool,
) -> CrateResult<()> {
    let options = UpdateOptions {
        missing_cache: if add_missing {
            MissingCacheAction::Add
        } else {
            MissingCacheAction::Skip
        },
        latest_version: if force {
            LatestVersionAction::Force
        } else {
            LatestVersionAction::Skip
        },
        mode: if check_only {
            UpdateMode::CheckOnly
        } else {
            UpdateMode::Download
        },
        confirm: !assume_yes,
    };
    run_update(config, util::workshop_ids(ids), options).await
}

async fn run_update(config: &ModManConfig, ids: Vec<String>, options: UpdateOptions) -> CrateResult<()> {
    let mut cache = util::open_cache(config, RefreshLevel::LatestOnly)?;
    let ids = if ids.is_empty() {
        debug!("Updating every workshop mod in the cache");
        cache
            .mods()
            .iter()
            .filter(|m| m.info().is_workshop())
            .map(|m| m.id().to_string())
            .collect()
    } else {
        ids
    };

    let reporter = ConsoleReporter::new(!options.confirm);
    let downloader = ModDownloader::new(CatalogConfig::default())?;
    let report = CacheUpdater::new(&downloader, &reporter, options)
        .run(&mut cache, &ids)
        .await?;
    if !report.failed.is_empty() {
        eprintln!(
            "{} {}",
            "Failed:".bold().red(),
            report.failed.iter().map(|(id, _)| id).join(", ")
        );
    }
    Ok(())
}

/// Copies installed mods with no matching cache version into the cache.
pub async fn cache_add_installed(config: &ModManConfig, assume_yes: bool) -> CrateResult<()> {
    let (mut cache, mut mods) = util::open_installed(config, RefreshLevel::LatestOnly)?;
    let reporter = ConsoleReporter::new(assume_yes);

    // Workshop mods may simply be missing from the cache.
    let workshop_ids: Vec<String> = mods
        .uncached_mods()
        .filter(|m| m.info().is_workshop())
        .map(|m| m.id().to_string())
        .collect();
    if !workshop_ids.is_empty() {
        let downloader = ModDownloader::new(CatalogConfig::default())?;
        let options = UpdateOptions {
            missing_cache: MissingCacheAction::Add,
            ..Default::default()
        };
        let report = CacheUpdater::new(&downloader, &reporter, options)
            .run(&mut cache, &workshop_ids)
            .await?;
        if !report.success() {
            return Ok(());
        }
        mods.refresh(&mut cache, InstallRefreshLevel::Full)?;
    }

    let uncached: Vec<(String, String, std::path::PathBuf)> = mods
        .uncached_mods()
        .map(|m| (m.id().to_string(), m.info().to_string(), m.path().to_path_buf()))
        .collect();
    if uncached.is_empty() {
        reporter.text_output("All installed mod versions in cache.");
        return Ok(());
    }
    reporter.text_output(&format!(
        "The currently installed version will be copied to cache for the following mods:\n  {}",
        uncached.iter().map(|(_, label, _)| label).join(" ")
    ));
    if !reporter.confirm("Continue?") {
        reporter.text_output("Abort.");
        return Ok(());
    }

    for (mod_id, label, path) in uncached {
        let version = cache.add_original_version(&mod_id, &path)?;
        info!("Copied {} as {}", label, version.id());
        reporter.text_output(&format!("{} copied {} from installed", label, version));
    }
    cache.save_metadata()?;
    mods.refresh(&mut cache, InstallRefreshLevel::Full)?;
    Ok(())
}
