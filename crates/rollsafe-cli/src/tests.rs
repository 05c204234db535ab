use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use rollsafe_core::{ComponentSelection, UpdateErrorKind};
use rollsafe_registry::RegistrySourceKind;
use rollsafe_updater::{BackupRetention, BatchLock};
use serde_json::{json, Value};

use crate::config::{RollsafeConfig, DEFAULT_LISTEN};
use crate::dispatch::selection_from_args;
use crate::render::{format_batch_lines, render_status_line, OutputStyle};
use crate::server::{router, status_for};

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

#[test]
fn default_config_matches_documented_values() {
    let config = RollsafeConfig::default();

    assert_eq!(config.root, PathBuf::from("."));
    assert!(config.registry.sources.is_empty());
    assert_eq!(config.fetch.timeout_secs, 300);
    assert_eq!(config.fetch.min_package_bytes, 32_768);
    assert_eq!(config.fetch.retries, 2);
    assert_eq!(config.health.target, None);
    assert_eq!(config.health.timeout_secs, 10);
    assert_eq!(config.lock.ttl_secs, 600);
    assert_eq!(config.idempotency.ttl_secs, 900);
    assert_eq!(config.backups.max_age_secs, 3_600);
    assert_eq!(config.backups.retention, BackupRetention::Keep);
    assert_eq!(config.preflight.min_free_bytes, 52_428_800);
    assert_eq!(config.cache.ttl_secs, 43_200);
    assert_eq!(config.server.listen, DEFAULT_LISTEN);
}

#[test]
fn config_parses_full_document() {
    let config = RollsafeConfig::from_toml_str(
        r#"
root = "/srv/site"
components_dir = "plugins"

[[registry.sources]]
name = "mirror"
kind = "http"
location = "https://updates.example.test/releases"
priority = 5

[[registry.sources]]
name = "local"
kind = "filesystem"
location = "/srv/releases"
enabled = false

[fetch]
timeout_secs = 60
retries = 0

[health]
target = "http://127.0.0.1:8080/health"

[backups]
retention = "delete-on-success"

[server]
listen = "0.0.0.0:9000"
"#,
    )
    .expect("config must parse");

    assert_eq!(config.root, PathBuf::from("/srv/site"));
    assert_eq!(config.registry.sources.len(), 2);
    assert_eq!(config.registry.sources[0].kind, RegistrySourceKind::Http);
    assert_eq!(config.registry.sources[0].priority, 5);
    assert!(!config.registry.sources[1].enabled);
    assert_eq!(config.fetch.timeout_secs, 60);
    assert_eq!(config.fetch.retries, 0);
    assert_eq!(config.fetch.min_package_bytes, 32_768);
    assert_eq!(config.backups.retention, BackupRetention::DeleteOnSuccess);
    assert_eq!(config.server.listen, "0.0.0.0:9000");
    assert_eq!(
        config.layout().components_dir(),
        Path::new("/srv/site/plugins")
    );

    let options = config.update_options();
    assert_eq!(options.fetch.timeout, Duration::from_secs(60));
    assert_eq!(
        options.health_target.as_deref(),
        Some("http://127.0.0.1:8080/health")
    );
    assert_eq!(options.retention, BackupRetention::DeleteOnSuccess);
}

#[test]
fn config_rejects_unknown_keys_and_bad_sources() {
    let unknown = RollsafeConfig::from_toml_str("[fetch]\ntimeout = 5\n")
        .expect_err("unknown key must fail");
    assert!(format!("{unknown:#}").contains("timeout"));

    let duplicate = RollsafeConfig::from_toml_str(
        r#"
[[registry.sources]]
name = "a"
kind = "filesystem"
location = "/one"

[[registry.sources]]
name = "a"
kind = "filesystem"
location = "/two"
"#,
    )
    .expect_err("duplicate source names must fail");
    assert!(format!("{duplicate:#}").contains("invalid [registry] sources"));
}

#[test]
fn config_load_treats_missing_default_file_as_defaults() {
    let root = test_root();
    let missing = root.join("rollsafe.toml");

    let config = RollsafeConfig::load(&missing, false).expect("missing optional config");
    assert_eq!(config, RollsafeConfig::default());
    assert!(RollsafeConfig::load(&missing, true).is_err());

    fs::create_dir_all(&root).expect("must create root");
    fs::write(&missing, "[lock]\nttl_secs = 30\n").expect("must write config");
    let loaded = RollsafeConfig::load(&missing, true)
        .expect("config must load")
        .with_root_override(Some(root.clone()));
    assert_eq!(loaded.lock.ttl_secs, 30);
    assert_eq!(loaded.root, root);
    assert_eq!(loaded.layout().components_dir(), root.join("components"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn blank_health_target_disables_probe() {
    let config = RollsafeConfig::from_toml_str("[health]\ntarget = \"  \"\n").expect("must parse");
    assert_eq!(config.update_options().health_target, None);
}

#[test]
fn selection_from_args_handles_all_and_empty() {
    assert_eq!(
        selection_from_args(Vec::new(), true).expect("empty plan means all"),
        ComponentSelection::All
    );
    assert!(selection_from_args(Vec::new(), false).is_err());
    assert_eq!(
        selection_from_args(vec!["ALL".to_string()], false).expect("all keyword"),
        ComponentSelection::All
    );
    assert_eq!(
        selection_from_args(vec!["seo".to_string(), "forms".to_string()], false)
            .expect("named components"),
        ComponentSelection::ids(["seo", "forms"])
    );
}

#[test]
fn render_status_line_plain_is_unadorned() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "seo 1.0.0 -> 1.1.0: updated"),
        "seo 1.0.0 -> 1.1.0: updated"
    );
}

#[test]
fn render_status_line_rich_includes_badge() {
    let line = render_status_line(OutputStyle::Rich, "warn", "seo rolled back");
    assert!(line.contains("[WARN]"));
    assert!(line.ends_with(" seo rolled back"));
}

#[test]
fn format_batch_lines_plain_lists_plan_entries() {
    let response: rollsafe_core::BatchResponse = serde_json::from_str(
        r#"{
            "ok": true,
            "dry_run": true,
            "mode": "bulk",
            "updated": [],
            "results": {},
            "plan": {
                "seo": {
                    "component_id": "seo",
                    "ok": true,
                    "action": "would_update",
                    "from_version": "1.0.0",
                    "to_version": "1.1.0",
                    "source": "local",
                    "messages": []
                },
                "forms": {
                    "component_id": "forms",
                    "ok": true,
                    "action": "up_to_date",
                    "from_version": "2.0.0",
                    "to_version": "2.0.0",
                    "messages": []
                }
            }
        }"#,
    )
    .expect("fixture must deserialize");

    assert_eq!(
        format_batch_lines(&response, OutputStyle::Plain),
        vec![
            "seo 1.0.0 -> 1.1.0 (source: local)".to_string(),
            "forms 2.0.0 is up to date".to_string(),
            "1 of 2 component(s) would update".to_string(),
        ]
    );
}

#[test]
fn error_kinds_map_to_http_statuses() {
    assert_eq!(
        status_for(UpdateErrorKind::LockConflict),
        (StatusCode::CONFLICT, "in_progress")
    );
    assert_eq!(
        status_for(UpdateErrorKind::NoValidComponents),
        (StatusCode::BAD_REQUEST, "no_components")
    );
    assert_eq!(
        status_for(UpdateErrorKind::PreflightFailed),
        (StatusCode::SERVICE_UNAVAILABLE, "preflight_failed")
    );
    assert_eq!(
        status_for(UpdateErrorKind::Other),
        (StatusCode::INTERNAL_SERVER_ERROR, "internal")
    );
}

#[tokio::test]
async fn http_dry_run_returns_plan() {
    let root = seeded_root();
    let base = start_server(&root).await;

    let (status, body) = post_json(
        &format!("{base}/updates"),
        json!({ "components": ["seo", "ghost"], "dry_run": true }),
    )
    .await;

    assert_eq!(status, 200, "body: {body}");
    assert_eq!(body["dry_run"], true);
    assert_eq!(body["mode"], "bulk");
    assert_eq!(body["plan"]["seo"]["action"], "would_update");
    assert_eq!(body["plan"]["seo"]["to_version"], "1.1.0");
    assert_eq!(body["plan"]["ghost"]["action"], "not_found");
    assert_eq!(body["results"], json!({}));

    let _ = fs::remove_dir_all(&root);
}

#[tokio::test]
async fn http_rejects_malformed_and_empty_requests() {
    let root = seeded_root();
    let base = start_server(&root).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base}/updates"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .expect("request must complete");
    assert_eq!(response.status().as_u16(), 400);
    let body: Value =
        serde_json::from_str(&response.text().await.expect("body")).expect("json body");
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "invalid_request");

    let (status, body) =
        post_json(&format!("{base}/updates"), json!({ "components": ["ghost"] })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "no_components");

    let _ = fs::remove_dir_all(&root);
}

#[tokio::test]
async fn http_reports_lock_conflict_as_in_progress() {
    let root = seeded_root();
    let base = start_server(&root).await;
    let config = test_config(&root);
    let lock = BatchLock::new(config.layout().batch_lock_path(), 600);
    let guard = lock.acquire("external-batch").expect("must hold lock");

    let (status, body) =
        post_json(&format!("{base}/updates"), json!({ "components": "all" })).await;

    assert_eq!(status, 409);
    assert_eq!(body["error"], "in_progress");
    assert!(body["message"]
        .as_str()
        .expect("message")
        .contains("external-batch"));

    let leftover = root
        .join("upgrade-temp-backup")
        .join("components")
        .join("seo");
    write_file(&leftover.join("main.txt"), "stale copy");
    let (status, body) = post_json(
        &format!("{base}/updates/rescue"),
        json!({ "component": "seo" }),
    )
    .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "in_progress");
    assert_eq!(
        fs::read_to_string(root.join("components").join("seo").join("main.txt"))
            .expect("live file must be untouched"),
        "seo 1.0.0"
    );
    drop(guard);

    let _ = fs::remove_dir_all(&root);
}

#[tokio::test]
async fn http_preflight_failure_blocks_updates() {
    let root = seeded_root();
    fs::write(root.join("upgrade"), "not a directory").expect("must block scratch dir");
    let base = start_server(&root).await;

    let (status, body) = get_json(&format!("{base}/updates/preflight")).await;
    assert_eq!(status, 200);
    assert_eq!(body["ok"], false);
    assert_eq!(body["dirs"]["scratch"]["writable"], false);

    let (status, body) =
        post_json(&format!("{base}/updates"), json!({ "components": ["seo"] })).await;
    assert_eq!(status, 503);
    assert_eq!(body["error"], "preflight_failed");

    let _ = fs::remove_dir_all(&root);
}

#[tokio::test]
async fn http_status_and_rescue() {
    let root = seeded_root();
    let base = start_server(&root).await;

    let (status, body) = get_json(&format!("{base}/updates/status")).await;
    assert_eq!(status, 200);
    assert_eq!(body[0]["component_id"], "seo");
    assert_eq!(body[0]["installed_version"], "1.0.0");
    assert_eq!(body[0]["available_version"], "1.1.0");
    assert_eq!(body[0]["has_update"], true);

    let leftover = root
        .join("upgrade-temp-backup")
        .join("components")
        .join("forms-2.0.0");
    write_file(&leftover.join("main.txt"), "forms");
    let (status, body) = post_json(
        &format!("{base}/updates/rescue"),
        json!({ "component": "forms" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body, json!({ "ok": true, "rescued": true }));
    assert!(root.join("components").join("forms").join("main.txt").is_file());

    let (status, body) = post_json(
        &format!("{base}/updates/rescue"),
        json!({ "component": "ghost" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["rescued"], false);

    let (status, body) = post_json(
        &format!("{base}/updates/rescue"),
        json!({ "component": "../" }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "no_components");

    let _ = fs::remove_dir_all(&root);
}

fn seeded_root() -> PathBuf {
    let root = test_root();
    write_file(
        &root.join("components").join("seo").join("component.toml"),
        "name = \"seo\"\nversion = \"1.0.0\"\n",
    );
    write_file(
        &root.join("components").join("seo").join("main.txt"),
        "seo 1.0.0",
    );
    write_file(
        &root.join("registry").join("seo").join("1.1.0.toml"),
        "version = \"1.1.0\"\npackage = \"seo-1.1.0.zip\"\n",
    );
    root
}

fn test_config(root: &Path) -> RollsafeConfig {
    RollsafeConfig::from_toml_str(&format!(
        r#"
root = "{root}"

[[registry.sources]]
name = "local"
kind = "filesystem"
location = "{registry}"

[preflight]
min_free_bytes = 0
"#,
        root = root.display(),
        registry = root.join("registry").display(),
    ))
    .expect("test config must parse")
}

async fn start_server(root: &Path) -> String {
    let app = router(Arc::new(test_config(root)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test server");
    let addr = listener.local_addr().expect("must read test server address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server must run");
    });
    format!("http://{addr}")
}

async fn post_json(url: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(url)
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .expect("request must complete");
    let status = response.status().as_u16();
    let text = response.text().await.expect("must read body");
    (status, serde_json::from_str(&text).expect("body must be json"))
}

async fn get_json(url: &str) -> (u16, Value) {
    let response = reqwest::get(url).await.expect("request must complete");
    let status = response.status().as_u16();
    let text = response.text().await.expect("must read body");
    (status, serde_json::from_str(&text).expect("body must be json"))
}

fn write_file(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().expect("file parent")).expect("must create parent");
    fs::write(path, contents).expect("must write file");
}

fn test_root() -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let counter = TEST_ROOT_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!(
        "rollsafe-cli-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        counter
    ))
}
