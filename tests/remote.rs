mod common;

use common::{zip_bytes, Fixture, RecordingReporter};
use iimodman::{
    remote::{CallState, INVISIBLE_INC_APP_ID},
    update::{MissingCacheAction, UpdateMode},
    CacheUpdater, CatalogConfig, ModCache, ModDownloader, ModSpec, RefreshLevel, SyncOptions,
    SyncRun, SyncState, UpdateOptions,
};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const UPDATED: i64 = 1620000000;
const VERSION_ID: &str = "2021-05-03T00_00_00Z";

fn details(server: &MockServer, id: &str, updated: i64) -> serde_json::Value {
    serde_json::json!({
        "response": {
            "result": 1,
            "resultcount": 1,
            "publishedfiledetails": [{
                "publishedfileid": id,
                "result": 1,
                "title": "Remote Mod",
                "description": "Downloaded in tests",
                "file_url": format!("{}/files/mod.zip", server.uri()),
                "filename": "mod.zip",
                "time_updated": updated,
                "consumer_app_id": INVISIBLE_INC_APP_ID
            }]
        }
    })
}

async fn mount_info(server: &MockServer, id: &str, updated: i64) {
    Mock::given(method("POST"))
        .and(path("/info"))
        .and(body_string_contains("itemcount=1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(details(server, id, updated)))
        .mount(server)
        .await;
}

async fn mount_archive(server: &MockServer) {
    let archive = zip_bytes(&[
        ("modinfo.txt", "name = Remote Mod\nversion = 1.2\n"),
        ("scripts\\modinit.lua", "return {}\n"),
    ]);
    Mock::given(method("GET"))
        .and(path("/files/mod.zip"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .mount(server)
        .await;
}

fn downloader(server: &MockServer) -> ModDownloader {
    let config = CatalogConfig::new(&format!("{}/info", server.uri()), INVISIBLE_INC_APP_ID).unwrap();
    ModDownloader::new(config).unwrap()
}

fn open_cache(fixture: &Fixture) -> ModCache {
    let mut cache = ModCache::new(&fixture.cache_root);
    cache.refresh(RefreshLevel::Full).unwrap();
    cache
}

#[tokio::test]
async fn test_info_call_succeeds() {
    let server = MockServer::start().await;
    mount_info(&server, "123", UPDATED).await;
    let downloader = downloader(&server);

    let mut call = downloader.info_call();
    assert!(matches!(call.state(), CallState::Idle));
    let info = call.start("workshop-123").await.result().cloned().unwrap();
    assert_eq!(info.mod_id(), "workshop-123");
    assert_eq!(info.title, "Remote Mod");
    assert_eq!(info.version_id(), VERSION_ID);
    assert!(call.state().is_finished());
}

#[tokio::test]
async fn test_info_call_reports_http_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/info"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let downloader = downloader(&server);

    let mut call = downloader.info_call();
    let state = call.start("123").await;
    assert!(state.is_finished());
    assert!(state.error().is_some());
}

#[tokio::test]
async fn test_download_call_adds_version() {
    let server = MockServer::start().await;
    mount_info(&server, "123", UPDATED).await;
    mount_archive(&server).await;
    let downloader = downloader(&server);
    let fixture = Fixture::new();
    let mut cache = open_cache(&fixture);
    let reporter = RecordingReporter::new(true);

    let info = downloader
        .info_call()
        .start("123")
        .await
        .result()
        .cloned()
        .unwrap();
    let mut call = downloader.download_call();
    let state = call.start(&mut cache, &info, &reporter).await;
    assert_eq!(state.result().map(String::as_str), Some(VERSION_ID));

    let cached = cache.get("workshop-123").unwrap();
    let version = cached.latest_version().unwrap();
    assert_eq!(version.id(), VERSION_ID);
    assert_eq!(version.version_name(), Some("v1.2"));
    assert!(version.path().join("scripts").join("modinit.lua").is_file());
}

#[tokio::test]
async fn test_failed_download_leaves_cache_untouched() {
    let server = MockServer::start().await;
    mount_info(&server, "123", UPDATED).await;
    Mock::given(method("GET"))
        .and(path("/files/mod.zip"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let fixture = Fixture::new();
    let mut cache = open_cache(&fixture);
    let reporter = RecordingReporter::new(true);
    let downloader = downloader(&server);
    let options = UpdateOptions {
        missing_cache: MissingCacheAction::Add,
        ..Default::default()
    };

    let report = CacheUpdater::new(&downloader, &reporter, options)
        .run(&mut cache, &["workshop-123".to_string()])
        .await
        .unwrap();
    assert!(!report.success());
    assert_eq!(report.failed.len(), 1);
    assert!(report.downloaded.is_empty());
    assert!(cache.get("workshop-123").unwrap().versions().is_empty());
    assert!(!cache.version_path("workshop-123", VERSION_ID).exists());
}

#[tokio::test]
async fn test_updater_downloads_then_skips_up_to_date() {
    let server = MockServer::start().await;
    mount_info(&server, "123", UPDATED).await;
    mount_archive(&server).await;
    let fixture = Fixture::new();
    let mut cache = open_cache(&fixture);
    let reporter = RecordingReporter::new(true);
    let downloader = downloader(&server);
    let ids = vec!["workshop-123".to_string(), "local-mod".to_string()];
    let options = UpdateOptions {
        missing_cache: MissingCacheAction::Add,
        confirm: true,
        ..Default::default()
    };

    let report = CacheUpdater::new(&downloader, &reporter, options)
        .run(&mut cache, &ids)
        .await
        .unwrap();
    assert!(report.success());
    assert_eq!(
        report.downloaded,
        vec![("workshop-123".to_string(), VERSION_ID.to_string())]
    );
    assert!(report.skipped.iter().any(|(id, _)| id == "local-mod"));
    assert!(cache.metadata_path().is_file());

    let mut reloaded = open_cache(&fixture);
    assert_eq!(reloaded.get("workshop-123").unwrap().info().name, "Remote Mod");
    let report = CacheUpdater::new(&downloader, &reporter, options)
        .run(&mut reloaded, &ids[..1])
        .await
        .unwrap();
    assert!(report.downloaded.is_empty());
    assert!(report
        .skipped
        .iter()
        .any(|(_, reason)| reason == "Already up to date"));
    assert!(reporter.contains("No mods to update."));
}

#[tokio::test]
async fn test_declined_update_is_aborted() {
    let server = MockServer::start().await;
    mount_info(&server, "123", UPDATED).await;
    mount_archive(&server).await;
    let fixture = Fixture::new();
    let mut cache = open_cache(&fixture);
    let reporter = RecordingReporter::new(false);
    let downloader = downloader(&server);
    let options = UpdateOptions {
        missing_cache: MissingCacheAction::Add,
        confirm: true,
        ..Default::default()
    };

    let report = CacheUpdater::new(&downloader, &reporter, options)
        .run(&mut cache, &["workshop-123".to_string()])
        .await
        .unwrap();
    assert!(report.aborted);
    assert!(reporter.contains("Abort."));
    assert!(cache.get("workshop-123").unwrap().versions().is_empty());
}

#[tokio::test]
async fn test_check_only_marks_available_version() {
    let server = MockServer::start().await;
    mount_info(&server, "123", UPDATED).await;
    let fixture = Fixture::new();
    fixture.cache_version("workshop-123", "2020-01-01T00_00_00Z", "Remote Mod");
    let mut cache = open_cache(&fixture);
    let reporter = RecordingReporter::new(true);
    let downloader = downloader(&server);
    let options = UpdateOptions {
        mode: UpdateMode::CheckOnly,
        ..Default::default()
    };

    let report = CacheUpdater::new(&downloader, &reporter, options)
        .run(&mut cache, &["workshop-123".to_string()])
        .await
        .unwrap();
    assert_eq!(report.updates_available.len(), 1);
    assert!(report.downloaded.is_empty());
    assert!(cache.get("workshop-123").unwrap().has_update_available());

    let reloaded = open_cache(&fixture);
    let cached = reloaded.get("workshop-123").unwrap();
    assert_eq!(
        cached.available_version().map(|t| t.timestamp()),
        Some(UPDATED)
    );
    assert_eq!(cached.versions().len(), 1);
}

fn remote_spec() -> ModSpec {
    let mut target = ModSpec::new();
    target.append_str("workshop-123::::Remote\n");
    target
}

#[tokio::test]
async fn test_declined_sync_downloads_nothing() {
    let server = MockServer::start().await;
    mount_info(&server, "123", UPDATED).await;
    mount_archive(&server).await;
    let downloader = downloader(&server);
    let fixture = Fixture::new();
    let (mut cache, mut mods) = fixture.open();
    let reporter = RecordingReporter::new(false);
    let options = SyncOptions {
        confirm: true,
        fetch_missing: true,
        ..Default::default()
    };

    let mut run = SyncRun::new(&mut cache, &mut mods, &reporter, options).with_downloader(&downloader);
    let report = run.run(&remote_spec()).await.unwrap();
    assert_eq!(run.state(), SyncState::Aborted);
    assert_eq!(report.abort_reason.as_deref(), Some("Declined"));
    assert!(reporter.contains("download and install \"Remote Mod\" [workshop-123]"));
    assert!(reporter.contains("Abort."));
    assert!(!cache.version_path("workshop-123", VERSION_ID).exists());
    assert!(cache.get("workshop-123").map_or(true, |m| m.versions().is_empty()));
    assert!(mods.mods().is_empty());

    let reloaded = open_cache(&fixture);
    assert!(reloaded.get("workshop-123").is_none());
}

#[tokio::test]
async fn test_sync_fetches_then_installs_missing_mod() {
    let server = MockServer::start().await;
    mount_info(&server, "123", UPDATED).await;
    mount_archive(&server).await;
    let downloader = downloader(&server);
    let fixture = Fixture::new();
    let (mut cache, mut mods) = fixture.open();
    let reporter = RecordingReporter::new(true);
    let options = SyncOptions {
        confirm: true,
        fetch_missing: true,
        ..Default::default()
    };

    let report = SyncRun::new(&mut cache, &mut mods, &reporter, options)
        .with_downloader(&downloader)
        .run(&remote_spec())
        .await
        .unwrap();
    assert!(report.success());
    assert!(report.rejected.is_empty());
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].mod_id(), "workshop-123");
    assert!(!reporter.contains("Skipping workshop-123"));

    let installed = mods.get("workshop-123").unwrap();
    assert_eq!(installed.cache_version_id(), Some(VERSION_ID));
    assert!(installed.path().join("scripts").join("modinit.lua").is_file());
    let cached = cache.get("workshop-123").unwrap().installed_version().unwrap();
    assert_eq!(cached.id(), VERSION_ID);
}
