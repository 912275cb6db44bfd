use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const SPOT: &str = "spot-0001-test";

fn fbs_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("fbs");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("archive/ds1");
    fs::create_dir_all(files_dir.join("sub")).unwrap();
    fs::write(files_dir.join("blob.bin"), [0xffu8, 0x00, 0xfe, 0x01]).unwrap();
    fs::write(files_dir.join("data.csv"), "a,b\n1,2\n").unwrap();
    fs::write(files_dir.join("notes.txt"), "Flight notes.\n").unwrap();
    fs::write(files_dir.join(".hidden"), "ignored").unwrap();
    fs::write(
        files_dir.join("sub/metadata_tags.json"),
        r#"{"phenomena": [{"standard_name": "air_temperature", "units": "K"}]}"#,
    )
    .unwrap();

    fs::write(
        config_dir.join("spots.txt"),
        format!("{}={}/archive\n", SPOT, root.display()),
    )
    .unwrap();
    fs::write(
        config_dir.join("datasets.ini"),
        format!("[datasets]\nds1 = {}/archive/ds1\n", root.display()),
    )
    .unwrap();

    let config_content = format!(
        r#"[index]
backend = "sqlite"
name = "test-index"
path = "{root}/data/fbs.sqlite"

[scan]
level = 2
batch_size = 2
spot_file = "{root}/config/spots.txt"
datasets_file = "{root}/config/datasets.ini"

[identity]
directory = "none"

[reconcile]
batch_size = 2
page_size = 2
"#,
        root = root.display()
    );

    let config_path = config_dir.join("fbs.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_fbs(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = fbs_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("FBS_LOG")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run fbs binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn make_list(config_path: &Path, root: &Path) -> PathBuf {
    let lists = root.join("lists");
    let (stdout, stderr, success) = run_fbs(
        config_path,
        &["make-list", "ds1", "--out-dir", lists.to_str().unwrap()],
    );
    assert!(success, "make-list failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ds1: 4 files"), "got: {}", stdout);
    lists.join("ds1.txt")
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_fbs(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_fbs(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_scan_dataset_prints_summary() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_fbs(&config_path, &["scan", "--dataset", "ds1"]);
    assert!(success, "scan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains(
            "Dataset: ds1 Indexed: 4 Database errors: 0 Properties errors: 0 Total: 4"
        ),
        "got: {}",
        stdout
    );
}

#[test]
fn test_rescan_is_idempotent() {
    let (tmp, config_path) = setup_test_env();
    let list = make_list(&config_path, tmp.path());

    for _ in 0..2 {
        let (stdout, _, success) =
            run_fbs(&config_path, &["scan", "--file-list", list.to_str().unwrap()]);
        assert!(success);
        assert!(stdout.contains("Indexed: 4"), "got: {}", stdout);
    }

    let (stdout, _, success) = run_fbs(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:   4"), "got: {}", stdout);
    assert!(stdout.contains(SPOT), "got: {}", stdout);
}

#[test]
fn test_unreadable_file_is_counted_not_fatal() {
    let (tmp, config_path) = setup_test_env();
    let list = tmp.path().join("list.txt");
    let present = tmp.path().join("archive/ds1/notes.txt");
    fs::write(
        &list,
        format!("{}\n{}/archive/ds1/gone.nc\n", present.display(), tmp.path().display()),
    )
    .unwrap();

    let (stdout, stderr, success) =
        run_fbs(&config_path, &["scan", "--file-list", list.to_str().unwrap()]);
    assert!(success, "scan failed: stdout={}, stderr={}", stdout, stderr);
    assert!(
        stdout.contains("Indexed: 1 Database errors: 0 Properties errors: 1 Total: 2"),
        "got: {}",
        stdout
    );
}

#[test]
fn test_bad_window_exits_non_zero() {
    let (tmp, config_path) = setup_test_env();
    let list = make_list(&config_path, tmp.path());

    let (stdout, _, success) = run_fbs(
        &config_path,
        &[
            "scan",
            "--file-list",
            list.to_str().unwrap(),
            "--start",
            "3",
            "--count",
            "5",
        ],
    );
    assert!(!success);
    assert!(!stdout.contains("Indexed:"));
}

#[test]
fn test_scan_requires_a_source() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, success) = run_fbs(&config_path, &["scan", "--level", "1"]);
    assert!(!success);
}

#[test]
fn test_reconcile_reports_missing_files() {
    let (tmp, config_path) = setup_test_env();
    let list = make_list(&config_path, tmp.path());

    // Index only the first two of the four sorted paths.
    let (stdout, _, success) = run_fbs(
        &config_path,
        &[
            "scan",
            "--file-list",
            list.to_str().unwrap(),
            "--start",
            "0",
            "--count",
            "2",
        ],
    );
    assert!(success);
    assert!(stdout.contains("Total: 2"), "got: {}", stdout);

    let output = tmp.path().join("missing.txt");
    let (stdout, stderr, success) = run_fbs(
        &config_path,
        &["reconcile", SPOT, "--output", output.to_str().unwrap()],
    );
    assert!(success, "reconcile failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Missing: 2"), "got: {}", stdout);

    let missing = fs::read_to_string(&output).unwrap();
    let ds = tmp.path().join("archive/ds1");
    assert_eq!(
        missing,
        format!(
            "{}\n{}\n",
            ds.join("notes.txt").display(),
            ds.join("sub/metadata_tags.json").display()
        )
    );
}

#[test]
fn test_reconcile_deleted_removes_stale_documents() {
    let (tmp, config_path) = setup_test_env();

    let (_, _, success) = run_fbs(&config_path, &["scan", "--dataset", "ds1"]);
    assert!(success);

    let gone = tmp.path().join("archive/ds1/data.csv");
    fs::remove_file(&gone).unwrap();
    let output = tmp.path().join("deleted.txt");

    let (stdout, stderr, success) = run_fbs(
        &config_path,
        &[
            "reconcile",
            SPOT,
            "--deleted",
            "--dry-run",
            "--output",
            output.to_str().unwrap(),
        ],
    );
    assert!(success, "reconcile failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Deleted: 1"), "got: {}", stdout);
    assert!(!stdout.contains("removed:"));

    let (stdout, _, success) = run_fbs(
        &config_path,
        &["reconcile", SPOT, "--deleted", "--output", output.to_str().unwrap()],
    );
    assert!(success);
    assert!(stdout.contains("removed: 1 failed: 0"), "got: {}", stdout);
    assert_eq!(
        fs::read_to_string(&output).unwrap(),
        format!("{}\n", gone.display())
    );

    let (stdout, _, _) = run_fbs(&config_path, &["stats", "--spot", SPOT]);
    assert!(stdout.contains(&format!("Documents in spot {}: 3", SPOT)), "got: {}", stdout);
}

#[test]
fn test_plan_windows_list() {
    let (tmp, config_path) = setup_test_env();
    make_list(&config_path, tmp.path());

    let lists = tmp.path().join("lists");
    let (stdout, stderr, success) = run_fbs(
        &config_path,
        &["plan", lists.to_str().unwrap(), "--size", "3", "--level", "3"],
    );
    assert!(success, "plan failed: stdout={}, stderr={}", stdout, stderr);
    let commands: Vec<&str> = stdout.lines().collect();
    assert_eq!(commands.len(), 2);
    assert!(commands[0].ends_with("--level 3 --start 0 --count 3"));
    assert!(commands[1].ends_with("--level 3 --start 3 --count 1"));
}

#[test]
fn test_classify_reports_extractor() {
    let (tmp, config_path) = setup_test_env();
    let ds = tmp.path().join("archive/ds1");

    let (stdout, _, success) = run_fbs(
        &config_path,
        &[
            "classify",
            ds.join("sub/metadata_tags.json").to_str().unwrap(),
            ds.join("data.csv").to_str().unwrap(),
            ds.join("blob.bin").to_str().unwrap(),
        ],
    );
    assert!(success);
    let lines: Vec<&str> = stdout.lines().collect();
    assert!(lines[0].ends_with("\tmetadata-tags\tbasename"), "got: {}", stdout);
    assert!(lines[1].ends_with("\tcsv\textension"), "got: {}", stdout);
    // data.csv put `csv` in the directory cache.
    assert!(lines[2].ends_with("\tcsv\tlocality"), "got: {}", stdout);
}

#[test]
fn test_invalid_config_fails() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("bad.toml");
    fs::write(&bad, "[scan]\nlevel = 7\n").unwrap();

    let (_, stderr, success) = run_fbs(&bad, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("scan.level"), "got: {}", stderr);
}
