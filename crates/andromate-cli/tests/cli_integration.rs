use assert_cmd::Command;
use predicates::prelude::*;
use std::path::{Path, PathBuf};

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// The binary with a scratch home directory and no inherited settings.
fn andromate(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("andromate").unwrap();
    cmd.env("HOME", home)
        .env_remove("ANDROMATE_CONFIG")
        .env_remove("ANDROID_SERIAL")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &Path, config: serde_json::Value) -> PathBuf {
    let path = dir.join("config.json");
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    path
}

#[test]
fn test_help_exits_zero() {
    let home = tempfile::tempdir().unwrap();
    andromate(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("andromate"))
        .stdout(predicate::str::contains("proxy"));
}

#[test]
fn test_unknown_subcommand_fails() {
    let home = tempfile::tempdir().unwrap();
    andromate(home.path())
        .arg("teleport")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_config_prints_defaults() {
    let home = tempfile::tempdir().unwrap();
    let assert = andromate(home.path()).arg("config").assert().success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let config: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(config["adb_path"], "adb");
    assert_eq!(config["dump_path"], "/sdcard/window_dump.xml");
    assert_eq!(config["proxy"]["control_origin"], "http://control.charles");
}

#[test]
fn test_config_init_writes_file() {
    let home = tempfile::tempdir().unwrap();
    andromate(home.path())
        .args(["config", "--init"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Wrote"));

    let written = home.path().join(".andromate").join("config.json");
    let config: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(written).unwrap()).unwrap();
    assert_eq!(config["settle_ms"], 300);
}

#[test]
fn test_missing_config_file_is_external_error() {
    let home = tempfile::tempdir().unwrap();
    andromate(home.path())
        .args(["--config", "/nonexistent/andromate.json", "back"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Error:"));
}

#[test]
fn test_missing_adb_is_external_error() {
    let home = tempfile::tempdir().unwrap();
    let config = write_config(home.path(), serde_json::json!({ "adb_path": "/nonexistent/adb" }));

    andromate(home.path())
        .arg("--config")
        .arg(&config)
        .arg("home")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("adb not found"));
}

#[test]
fn test_ocr_locate_from_boxes_file() {
    let home = tempfile::tempdir().unwrap();
    andromate(home.path())
        .args(["ocr", "locate", "K", "--height", "2340", "--boxes-file"])
        .arg(fixture_path("sample.box"))
        .assert()
        .success()
        .stdout("320 1310\n");
}

#[test]
fn test_ocr_locate_json() {
    let home = tempfile::tempdir().unwrap();
    let assert = andromate(home.path())
        .args(["-f", "json", "ocr", "locate", "H", "--height", "2340", "--boxes-file"])
        .arg(fixture_path("sample.box"))
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let located: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(located["x"], 120);
    assert_eq!(located["y"], 110);
    assert_eq!(located["tapped"], false);
}

#[test]
fn test_ocr_locate_missing_character() {
    let home = tempfile::tempdir().unwrap();
    andromate(home.path())
        .args(["ocr", "locate", "Z", "--height", "2340", "--boxes-file"])
        .arg(fixture_path("sample.box"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_ocr_boxes_flips_coordinates() {
    let home = tempfile::tempdir().unwrap();
    andromate(home.path())
        .args(["ocr", "boxes", "--height", "2340", "--boxes-file"])
        .arg(fixture_path("sample.box"))
        .assert()
        .success()
        .stdout(predicate::str::contains("H (100, 140) (140, 80)"))
        .stdout(predicate::str::contains("K (300, 1340) (340, 1280)"));
}

#[test]
fn test_ocr_malformed_boxes_file() {
    let home = tempfile::tempdir().unwrap();
    andromate(home.path())
        .args(["ocr", "boxes", "--height", "2340", "--boxes-file"])
        .arg(fixture_path("malformed.box"))
        .assert()
        .code(3)
        .stderr(predicate::str::contains("malformed box line"));
}

#[test]
fn test_proxy_rewrite_roots() {
    let home = tempfile::tempdir().unwrap();
    let configs = tempfile::tempdir().unwrap();
    let file = configs.path().join("charles.xml");
    std::fs::write(&file, "<dest>/Users/qa/app/body_files_qa/orders/list.json</dest>\n").unwrap();

    andromate(home.path())
        .args(["proxy", "rewrite-roots"])
        .arg(configs.path())
        .arg("/srv/fixtures")
        .assert()
        .success()
        .stdout("1\n");
    assert_eq!(
        std::fs::read_to_string(&file).unwrap(),
        "<dest>/srv/fixtures/orders/list.json</dest>\n"
    );
}

#[test]
fn test_unknown_throttling_preset() {
    let home = tempfile::tempdir().unwrap();
    andromate(home.path())
        .args(["proxy", "throttle", "3g"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Unknown throttling preset '3g'"));
}

#[cfg(unix)]
mod fake_adb {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    const DUMP: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?>
<hierarchy rotation="0">
  <node index="0" text="Sign in" resource-id="com.example:id/login_button" class="android.widget.Button" package="com.example" content-desc="" bounds="[10,20][30,60]" />
</hierarchy>"#;

    /// Installs a shell script standing in for adb that logs its arguments
    /// and serves `DUMP` for `cat`.
    fn install(dir: &Path) -> PathBuf {
        std::fs::write(dir.join("dump.xml"), DUMP).unwrap();
        let script = dir.join("adb");
        std::fs::write(
            &script,
            "#!/bin/sh\nhere=$(dirname \"$0\")\necho \"$*\" >> \"$here/calls.log\"\ncase \"$*\" in\n  *\"shell cat \"*) cat \"$here/dump.xml\" ;;\n  *\"shell wm size\") echo \"Physical size: 1080x2340\" ;;\nesac\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    fn config_for(dir: &Path, adb: &Path) -> PathBuf {
        write_config(
            dir,
            serde_json::json!({
                "adb_path": adb,
                "settle_ms": 0,
                "launch_settle_ms": 0,
                "swipe_settle_ms": 0,
                "poll_interval_ms": 10,
            }),
        )
    }

    fn calls(dir: &Path) -> String {
        std::fs::read_to_string(dir.join("calls.log")).unwrap_or_default()
    }

    #[test]
    fn test_tap_by_id_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let adb = install(dir.path());
        let config = config_for(dir.path(), &adb);

        andromate(dir.path())
            .arg("--config")
            .arg(&config)
            .args(["-s", "emulator-5554", "tap", "login_button"])
            .assert()
            .success();

        let calls = calls(dir.path());
        assert!(calls.contains("-s emulator-5554 shell uiautomator dump /sdcard/window_dump.xml"));
        assert!(calls.contains("-s emulator-5554 shell input tap 20 40"));
    }

    #[test]
    fn test_tap_missing_view_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let adb = install(dir.path());
        let config = config_for(dir.path(), &adb);

        andromate(dir.path())
            .arg("--config")
            .arg(&config)
            .args(["tap", "logout_button"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("logout_button"));
        assert!(!calls(dir.path()).contains("input tap"));
    }

    #[test]
    fn test_find_json() {
        let dir = tempfile::tempdir().unwrap();
        let adb = install(dir.path());
        let config = config_for(dir.path(), &adb);

        let assert = andromate(dir.path())
            .arg("--config")
            .arg(&config)
            .args(["-f", "json", "find", "Sign", "--by", "text"])
            .assert()
            .success();
        let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
        let view: serde_json::Value = serde_json::from_str(&stdout).unwrap();
        assert_eq!(view["id"], "com.example:id/login_button");
        assert_eq!(view["bounds"], "[10,20][30,60]");
    }

    #[test]
    fn test_swipe_up_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let adb = install(dir.path());
        let config = config_for(dir.path(), &adb);

        andromate(dir.path())
            .arg("--config")
            .arg(&config)
            .args(["-q", "swipe", "up"])
            .assert()
            .success()
            .stderr("");
        assert!(calls(dir.path()).contains("shell input touchscreen swipe 540 1170 540 390 200"));
    }
}
