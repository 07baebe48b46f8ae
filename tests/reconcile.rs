mod common;

use std::fs;

use common::{Fixture, RecordingReporter};
use iimodman::{
    reconcile::{self, SyncAction},
    ErrorKind, ModSpec, SpecMod, SyncOptions, SyncRun, SyncState, VersionTarget,
};

fn spec(text: &str) -> ModSpec {
    let mut target = ModSpec::new();
    target.append_str(text);
    target
}

fn unattended() -> SyncOptions {
    SyncOptions {
        confirm: false,
        ..Default::default()
    }
}

#[test]
fn test_pinned_mod_kept_and_missing_mod_installed() {
    let fixture = Fixture::new();
    fixture.cache_version("modA", "v1", "Mod A");
    fixture.cache_version("modB", "v1", "Mod B");
    fixture.cache_version("modB", "v2", "Mod B");
    let (mut cache, mut mods) = fixture.open();
    mods.install_mod(
        &mut cache,
        &SpecMod::new("modA", VersionTarget::Exact("v1".into())),
    )
    .unwrap();

    let plan = reconcile::plan(&spec("modA::-::ModA\nmodB::v2::ModB\n"), &cache, &mods);
    assert_eq!(plan.kept, vec!["modA".to_string()]);
    assert!(plan.removes.is_empty());
    assert!(plan.updates.is_empty());
    assert!(plan.rejected.is_empty());
    match plan.installs.as_slice() {
        [SyncAction::Install(target)] => {
            assert_eq!(target.id, "modB");
            assert_eq!(target.version, VersionTarget::Exact("v2".into()));
        }
        other => panic!("unexpected installs: {:?}", other),
    }
}

#[test]
fn test_latest_target_updates_older_install() {
    let fixture = Fixture::new();
    fixture.cache_version("modA", "v1", "Mod A");
    fixture.cache_version("modA", "v2", "Mod A");
    let (mut cache, mut mods) = fixture.open();
    mods.install_mod(
        &mut cache,
        &SpecMod::new("modA", VersionTarget::Exact("v1".into())),
    )
    .unwrap();

    let plan = reconcile::plan(&spec("modA::::\n"), &cache, &mods);
    match plan.updates.as_slice() {
        [SyncAction::Update {
            target,
            from_version,
        }] => {
            assert_eq!(target.version, VersionTarget::Exact("v2".into()));
            assert_eq!(from_version.as_deref(), Some("v1"));
        }
        other => panic!("unexpected updates: {:?}", other),
    }
}

#[tokio::test]
async fn test_unbacked_removal_needs_force() {
    let fixture = Fixture::new();
    fixture.loose_install("modX", "Mod X");
    let (mut cache, mut mods) = fixture.open();
    let target = ModSpec::new();

    let plan = reconcile::plan(&target, &cache, &mods);
    assert!(matches!(
        plan.removes.as_slice(),
        [SyncAction::Remove { mod_id, cache_backed: false, .. }] if mod_id == "modX"
    ));

    let reporter = RecordingReporter::new(true);
    let options = SyncOptions {
        confirm: true,
        ..Default::default()
    };
    let report = SyncRun::new(&mut cache, &mut mods, &reporter, options)
        .run(&target)
        .await
        .unwrap();
    assert_eq!(report.state, SyncState::Aborted);
    assert!(report.abort_reason.is_some());
    assert_eq!(report.skipped.len(), 1);
    assert!(reporter.contains("-f to override"));
    assert!(fixture.install_root.join("modX").is_dir());

    let options = SyncOptions {
        force_remove_uncached: true,
        ..unattended()
    };
    let report = SyncRun::new(&mut cache, &mut mods, &reporter, options)
        .run(&target)
        .await
        .unwrap();
    assert!(report.success());
    assert!(!fixture.install_root.join("modX").exists());
    assert!(mods.mods().is_empty());
}

#[tokio::test]
async fn test_backed_removal_unmarks_cache() {
    let fixture = Fixture::new();
    fixture.cache_version("modA", "v1", "Mod A");
    let (mut cache, mut mods) = fixture.open();
    mods.install_mod(&mut cache, &SpecMod::new("modA", VersionTarget::Latest))
        .unwrap();
    assert!(cache.get("modA").unwrap().installed_version().is_some());

    let reporter = RecordingReporter::new(true);
    let report = SyncRun::new(&mut cache, &mut mods, &reporter, unattended())
        .run(&ModSpec::new())
        .await
        .unwrap();
    assert!(report.success());
    assert!(!fixture.install_root.join("modA").exists());
    assert!(cache.get("modA").unwrap().installed_version().is_none());
}

#[tokio::test]
async fn test_missing_version_rejected_and_rest_proceeds() {
    let fixture = Fixture::new();
    fixture.cache_version("modY", "v1", "Mod Y");
    fixture.cache_version("modZ", "v1", "Mod Z");
    let (mut cache, mut mods) = fixture.open();
    let target = spec("modY::v9::\nmodZ::::\n");

    let plan = reconcile::plan(&target, &cache, &mods);
    assert_eq!(plan.rejected.len(), 1);
    assert_eq!(plan.rejected[0].mod_id, "modY");
    assert_eq!(plan.rejected[0].kind, ErrorKind::NotFound);

    let reporter = RecordingReporter::new(true);
    let report = SyncRun::new(&mut cache, &mut mods, &reporter, unattended())
        .run(&target)
        .await
        .unwrap();
    assert!(report.success());
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.rejected.len(), 1);
    assert!(reporter.contains("Skipping modY"));
    assert!(mods.contains("modZ"));
    assert!(!fixture.install_root.join("modY").exists());
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let fixture = Fixture::new();
    fixture.cache_version("modA", "v1", "Mod A");
    fixture.cache_version("modA", "v2", "Mod A");
    fixture.cache_version("modB", "v1", "Mod B");
    let target = spec("# comment\nmodA::::\nmodB:beta:::Mod B\n");

    {
        let (mut cache, mut mods) = fixture.open();
        let reporter = RecordingReporter::new(true);
        let report = SyncRun::new(&mut cache, &mut mods, &reporter, unattended())
            .run(&target)
            .await
            .unwrap();
        assert!(report.success());
        assert_eq!(report.completed.len(), 2);
    }
    assert!(fixture.install_root.join("beta").join("modinfo.txt").is_file());
    assert!(!fixture.install_root.join("modB").exists());

    let (mut cache, mut mods) = fixture.open();
    assert_eq!(mods.get("modB").unwrap().alias(), Some("beta"));
    assert_eq!(mods.get("modA").unwrap().cache_version_id(), Some("v2"));
    assert!(reconcile::plan(&target, &cache, &mods).is_empty());

    let reporter = RecordingReporter::new(false);
    let report = SyncRun::new(&mut cache, &mut mods, &reporter, SyncOptions {
        confirm: true,
        ..Default::default()
    })
    .run(&target)
    .await
    .unwrap();
    assert_eq!(report.state, SyncState::Finished);
    assert!(report.completed.is_empty());
    assert!(reporter.contains("Nothing to do."));
}

#[tokio::test]
async fn test_apply_stops_at_first_failure() {
    let fixture = Fixture::new();
    for id in ["modA", "modB", "modC"] {
        fixture.cache_version(id, "v1", id);
    }
    let foreign = fixture.install_root.join("modB");
    fs::create_dir_all(&foreign).unwrap();
    fs::write(foreign.join("notes.txt"), "keep me").unwrap();
    let (mut cache, mut mods) = fixture.open();

    let reporter = RecordingReporter::new(true);
    let report = SyncRun::new(&mut cache, &mut mods, &reporter, unattended())
        .run(&spec("modA::::\nmodB::::\nmodC::::\n"))
        .await
        .unwrap();

    assert_eq!(report.state, SyncState::Aborted);
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].mod_id(), "modA");
    let (failed, _) = report.failed.as_ref().unwrap();
    assert_eq!(failed.mod_id(), "modB");
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].mod_id(), "modC");
    assert_eq!(fs::read_to_string(foreign.join("notes.txt")).unwrap(), "keep me");
    assert!(!fixture.install_root.join("modC").exists());
}

#[tokio::test]
async fn test_declined_confirmation_changes_nothing() {
    let fixture = Fixture::new();
    fixture.cache_version("modA", "v1", "Mod A");
    let (mut cache, mut mods) = fixture.open();

    let reporter = RecordingReporter::new(false);
    let mut run = SyncRun::new(&mut cache, &mut mods, &reporter, SyncOptions {
        confirm: true,
        ..Default::default()
    });
    let report = run.run(&spec("modA::::\n")).await.unwrap();
    assert_eq!(run.state(), SyncState::Aborted);
    assert_eq!(report.skipped.len(), 1);
    assert!(reporter.contains("Abort."));
    assert!(!fixture.install_root.join("modA").exists());
}

#[test]
fn test_keep_current_with_other_alias_is_rejected() {
    let fixture = Fixture::new();
    fixture.cache_version("modA", "v1", "Mod A");
    let (mut cache, mut mods) = fixture.open();
    mods.install_mod(&mut cache, &SpecMod::new("modA", VersionTarget::Latest))
        .unwrap();

    let plan = reconcile::plan(&spec("modA:other:-::\n"), &cache, &mods);
    assert!(plan.is_empty());
    assert_eq!(plan.rejected.len(), 1);
    assert_eq!(plan.rejected[0].kind, ErrorKind::InvalidInput);
}

#[test]
fn test_exported_spec_reproduces_install() {
    let fixture = Fixture::new();
    fixture.cache_version("modA", "v1", "Mod A");
    fixture.loose_install("local", "Local Mod");
    let (mut cache, mut mods) = fixture.open();
    mods.install_mod(&mut cache, &SpecMod::new("modA", VersionTarget::Latest))
        .unwrap();

    let exported = mods.to_spec(&cache).to_spec_string(true);
    assert!(exported.contains("modA::v1::Mod A [v1]"));
    assert!(exported.contains("local::-::Local Mod"));
    assert!(reconcile::plan(&spec(&exported), &cache, &mods).is_empty());
}
