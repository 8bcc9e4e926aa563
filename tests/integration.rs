use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn cardsync_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cardsync");
    path
}

fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let data_root = root.join("data");
    fs::create_dir_all(&data_root).unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[data]
root = "{}"
dataset = "default_cards"

[policy]
compacted_threshold_missed = 2
force_full_threshold_missed = 21
compacted_retention_days = 21

[server]
bind = "127.0.0.1:8787"
max_req_per_minute = 120
"#,
        data_root.display()
    );
    let config_path = config_dir.join("cardsync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, data_root)
}

fn write_source(root: &Path, name: &str, body: &str) -> PathBuf {
    let path = root.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn source_v1() -> &'static str {
    r#"[
        {"id":"aaa","name":"Storm Crow","set":"9ED","collector_number":"100",
         "released_at":"2005-07-29","prices":{"usd":"0.25"},
         "image_uris":{"normal":"https://img.example/crow.jpg"}},
        {"id":"bbb","name":"Counterspell","set":"9ED","collector_number":"60",
         "released_at":"2005-07-29","prices":{"usd":"1.50"}}
    ]"#
}

fn source_v2() -> &'static str {
    // Price change on bbb, ccc appears.
    r#"[
        {"id":"aaa","name":"Storm Crow","set":"9ED","collector_number":"100",
         "released_at":"2005-07-29","prices":{"usd":"0.25"},
         "image_uris":{"normal":"https://img.example/crow.jpg"}},
        {"id":"bbb","name":"Counterspell","set":"9ED","collector_number":"60",
         "released_at":"2005-07-29","prices":{"usd":"1.75"}},
        {"id":"ccc","name":"Shock","set":"9ED","collector_number":"216",
         "released_at":"2005-07-29","prices":{"usd":"0.10"}}
    ]"#
}

fn source_v3() -> &'static str {
    // aaa removed.
    r#"[
        {"id":"bbb","name":"Counterspell","set":"9ED","collector_number":"60",
         "released_at":"2005-07-29","prices":{"usd":"1.75"}},
        {"id":"ccc","name":"Shock","set":"9ED","collector_number":"216",
         "released_at":"2005-07-29","prices":{"usd":"0.10"}}
    ]"#
}

fn run_cardsync(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cardsync_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cardsync binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn build_daily(config_path: &Path, source: &Path, version: &str) -> (String, String, bool) {
    run_cardsync(
        config_path,
        &[
            "build-daily",
            "--source-file",
            source.to_str().unwrap(),
            "--version",
            version,
        ],
    )
}

fn read_manifest(data_root: &Path) -> serde_json::Value {
    let raw = fs::read_to_string(data_root.join("manifest.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn test_build_daily_publishes_manifest() {
    let (tmp, config_path, data_root) = setup_test_env();
    let source = write_source(tmp.path(), "v1.json", source_v1());

    let (stdout, stderr, success) = build_daily(&config_path, &source, "v250101");
    assert!(success, "build-daily failed: stdout={stdout}, stderr={stderr}");

    let summary: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(summary["dataset"], "default_cards");
    assert_eq!(summary["version"], "v250101");
    assert_eq!(summary["rows"], 2);
    assert_eq!(summary["incrementalPatches"], 0);
    assert_eq!(summary["compactedPatches"], 0);

    let manifest = read_manifest(&data_root);
    assert_eq!(manifest["latestVersion"], "v250101");
    assert_eq!(manifest["versions"].as_array().unwrap().len(), 1);
    assert_eq!(manifest["syncPolicy"]["compactedThresholdMissed"], 2);
    assert!(data_root.join("versions/v250101.snapshot.json").exists());
}

#[test]
fn test_build_daily_chain_of_three_versions() {
    let (tmp, config_path, data_root) = setup_test_env();
    let s1 = write_source(tmp.path(), "v1.json", source_v1());
    let s2 = write_source(tmp.path(), "v2.json", source_v2());
    let s3 = write_source(tmp.path(), "v3.json", source_v3());

    assert!(build_daily(&config_path, &s1, "v250101").2);
    assert!(build_daily(&config_path, &s2, "v250102").2);
    let (stdout, stderr, success) = build_daily(&config_path, &s3, "v250103");
    assert!(success, "build-daily failed: stdout={stdout}, stderr={stderr}");

    let summary: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(summary["incrementalPatches"], 2);
    assert_eq!(summary["compactedPatches"], 2);

    let manifest = read_manifest(&data_root);
    assert_eq!(manifest["latestVersion"], "v250103");

    let versions = manifest["versions"].as_array().unwrap();
    assert_eq!(versions.len(), 3);
    assert!(versions[0]["patchFromPrevious"].is_null());
    assert_eq!(
        versions[1]["patchFromPrevious"],
        "patches/v250102.from-v250101.patch.json"
    );
    assert_eq!(
        versions[2]["patchFromPrevious"],
        "patches/v250103.from-v250102.patch.json"
    );
    assert!(data_root
        .join("patches/v250103.from-v250102.patch.json")
        .exists());

    // Compacted shortcuts from both older versions straight to latest.
    let compacted = manifest["compactedPatches"].as_array().unwrap();
    assert_eq!(compacted.len(), 2);
    assert_eq!(compacted[0]["fromVersion"], "v250101");
    assert_eq!(compacted[0]["toVersion"], "v250103");
    assert!(data_root
        .join("compacted/v250103.from-v250101.compacted.json")
        .exists());

    // The v1 -> v2 incremental patch carries the price update and the add.
    let patch: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(data_root.join("patches/v250102.from-v250101.patch.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(patch["added"].as_array().unwrap().len(), 1);
    assert_eq!(patch["added"][0]["id"], "ccc");
    assert_eq!(patch["updated"].as_array().unwrap().len(), 1);
    assert_eq!(patch["updated"][0]["id"], "bbb");
    assert_eq!(patch["removed"].as_array().unwrap().len(), 0);

    // The v2 -> v3 patch records the removal by id only.
    let patch: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(data_root.join("patches/v250103.from-v250102.patch.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(patch["removed"].as_array().unwrap(), &["aaa"]);
}

#[test]
fn test_rebuild_is_deterministic() {
    let (tmp, config_path, data_root) = setup_test_env();
    let s1 = write_source(tmp.path(), "v1.json", source_v1());
    let s2 = write_source(tmp.path(), "v2.json", source_v2());

    assert!(build_daily(&config_path, &s1, "v250101").2);
    assert!(build_daily(&config_path, &s2, "v250102").2);
    let first = read_manifest(&data_root);

    // Re-running the same day rebuilds everything from scratch; hashes must
    // not drift.
    assert!(build_daily(&config_path, &s2, "v250102").2);
    let second = read_manifest(&data_root);

    assert_eq!(first["latestHash"], second["latestHash"]);
    assert_eq!(
        first["versions"][1]["patchHash"],
        second["versions"][1]["patchHash"]
    );
    assert_eq!(
        first["compactedPatches"][0]["patchHash"],
        second["compactedPatches"][0]["patchHash"]
    );
    assert_eq!(second["versions"].as_array().unwrap().len(), 2);
}

#[test]
fn test_duplicate_ids_abort_the_run() {
    let (tmp, config_path, data_root) = setup_test_env();
    let good = write_source(tmp.path(), "good.json", source_v1());
    assert!(build_daily(&config_path, &good, "v250101").2);
    let before = read_manifest(&data_root);

    let dup = write_source(
        tmp.path(),
        "dup.json",
        r#"[{"id":"aaa","name":"One"},{"id":"aaa","name":"Two"}]"#,
    );
    let (stdout, stderr, success) = build_daily(&config_path, &dup, "v250102");
    assert!(!success, "expected failure, got: {stdout}");
    assert!(stderr.contains("Duplicate record id"), "stderr: {stderr}");

    // The previously published manifest is untouched.
    let after = read_manifest(&data_root);
    assert_eq!(before["latestVersion"], after["latestVersion"]);
    assert_eq!(after["versions"].as_array().unwrap().len(), 1);
}

#[test]
fn test_missing_source_fails() {
    let (tmp, config_path, _data_root) = setup_test_env();
    let missing = tmp.path().join("nope.json");
    let (_, stderr, success) = build_daily(&config_path, &missing, "v250101");
    assert!(!success);
    assert!(stderr.contains("Source file not found"), "stderr: {stderr}");
}

#[test]
fn test_ingest_only_writes_snapshot() {
    let (tmp, config_path, _data_root) = setup_test_env();
    let source = write_source(tmp.path(), "v1.json", source_v1());
    let out_dir = tmp.path().join("out");

    let (stdout, stderr, success) = run_cardsync(
        &config_path,
        &[
            "ingest",
            "--source-file",
            source.to_str().unwrap(),
            "--out-dir",
            out_dir.to_str().unwrap(),
            "--version",
            "v250101",
        ],
    );
    assert!(success, "ingest failed: stdout={stdout}, stderr={stderr}");

    let entry: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(entry["version"], "v250101");
    assert_eq!(entry["rowCount"], 2);
    assert_eq!(entry["snapshotPath"], "versions/v250101.snapshot.json");
    assert!(out_dir.join("versions/v250101.snapshot.json").exists());
    // No index update in ingest-only mode.
    assert!(!out_dir.join("versions_index.json").exists());
}

#[test]
fn test_ad_hoc_diff_and_compact() {
    let (tmp, config_path, data_root) = setup_test_env();
    let s1 = write_source(tmp.path(), "v1.json", source_v1());
    let s2 = write_source(tmp.path(), "v2.json", source_v2());
    assert!(build_daily(&config_path, &s1, "v250101").2);
    assert!(build_daily(&config_path, &s2, "v250102").2);

    let (stdout, _, success) = run_cardsync(
        &config_path,
        &[
            "diff",
            "--from-version",
            "v250101",
            "--to-version",
            "v250102",
            "--from-snapshot",
            "versions/v250101.snapshot.json",
            "--to-snapshot",
            "versions/v250102.snapshot.json",
        ],
    );
    assert!(success);
    let summary: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(summary["added"], 1);
    assert_eq!(summary["updated"], 1);
    assert_eq!(summary["removed"], 0);

    let (stdout, _, success) = run_cardsync(
        &config_path,
        &[
            "compact",
            "--from-version",
            "v250101",
            "--to-version",
            "v250102",
            "--from-snapshot",
            "versions/v250101.snapshot.json",
            "--to-snapshot",
            "versions/v250102.snapshot.json",
        ],
    );
    assert!(success);
    let entry: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(entry["fromVersion"], "v250101");
    assert_eq!(
        entry["path"],
        "compacted/v250102.from-v250101.compacted.json"
    );
    assert!(data_root
        .join("compacted/v250102.from-v250101.compacted.json")
        .exists());
}

#[test]
fn test_manifest_rebuild_from_index() {
    let (tmp, config_path, data_root) = setup_test_env();
    let s1 = write_source(tmp.path(), "v1.json", source_v1());
    assert!(build_daily(&config_path, &s1, "v250101").2);

    fs::remove_file(data_root.join("manifest.json")).unwrap();

    let (stdout, stderr, success) = run_cardsync(&config_path, &["manifest"]);
    assert!(success, "manifest failed: stdout={stdout}, stderr={stderr}");
    let summary: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(summary["latestVersion"], "v250101");
    assert!(data_root.join("manifest.json").exists());
}

#[test]
fn test_manifest_rebuild_requires_versions() {
    let (_tmp, config_path, _data_root) = setup_test_env();
    let (_, stderr, success) = run_cardsync(&config_path, &["manifest"]);
    assert!(!success);
    assert!(stderr.contains("at least one version"), "stderr: {stderr}");
}

#[test]
fn test_gzipped_source_is_accepted() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let (tmp, config_path, _data_root) = setup_test_env();
    let gz_path = tmp.path().join("v1.json.gz");
    let file = fs::File::create(&gz_path).unwrap();
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(source_v1().as_bytes()).unwrap();
    encoder.finish().unwrap();

    let (stdout, stderr, success) = build_daily(&config_path, &gz_path, "v250101");
    assert!(success, "build-daily failed: stdout={stdout}, stderr={stderr}");
    let summary: serde_json::Value = serde_json::from_str(stdout.trim()).unwrap();
    assert_eq!(summary["rows"], 2);
}
