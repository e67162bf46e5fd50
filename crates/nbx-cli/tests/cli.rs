mod common;

use common::{nbx, parse_json};

#[test]
fn info_without_runtime_points_at_install() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = nbx(temp.path()).args(["--json", "info"]).assert().success();
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "ok");
    assert!(payload["details"]["runtime"].is_null());
    assert_eq!(payload["details"]["bundled"]["integrity_ok"], false);
    assert!(payload["details"]["hint"]
        .as_str()
        .is_some_and(|hint| hint.contains("nbx install")));
}

#[test]
fn exec_without_runtime_is_a_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = nbx(temp.path())
        .args(["--json", "exec", "node", "--", "--version"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["reason"], "missing_runtime");
    assert!(payload["message"]
        .as_str()
        .is_some_and(|message| message.starts_with("nbx exec")));
}

#[test]
fn use_rejects_a_missing_binary() {
    let temp = tempfile::tempdir().expect("tempdir");
    let missing = temp.path().join("nowhere").join("node");
    let assert = nbx(temp.path())
        .args(["--json", "use"])
        .arg(&missing)
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["reason"], "invalid_runtime");
    assert!(!temp.path().join("settings.json").exists());
}

#[test]
fn offline_versions_is_a_user_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = nbx(temp.path())
        .args(["--json", "--offline", "versions"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["reason"], "offline");
}

#[test]
fn offline_install_leaves_no_marker() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = nbx(temp.path())
        .env("NBX_ONLINE", "0")
        .args(["--json", "install"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["reason"], "offline");
    assert!(!temp
        .path()
        .join("nodejs")
        .join(".installer_integrity")
        .exists());
}

#[test]
fn invalid_node_version_is_reported_as_config_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let assert = nbx(temp.path())
        .env("NBX_NODE_VERSION", "latest")
        .args(["--json", "info"])
        .assert()
        .code(1);
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["reason"], "invalid_config");
}

#[cfg(unix)]
mod unix {
    use super::common::{nbx, parse_json, write_fake_node};

    #[test]
    fn use_then_exec_runs_the_configured_node() {
        let temp = tempfile::tempdir().expect("tempdir");
        let node = write_fake_node(&temp.path().join("system").join("bin"), "v18.19.1");

        let assert = nbx(temp.path())
            .args(["--json", "use"])
            .arg(&node)
            .assert()
            .success();
        let payload = parse_json(&assert);
        assert_eq!(payload["details"]["version"], "v18.19.1");
        assert!(temp.path().join("settings.json").exists());

        nbx(temp.path())
            .args(["exec", "node", "--", "-e", "1"])
            .assert()
            .success()
            .stdout("argc:2 args:-e 1\n");

        let assert = nbx(temp.path()).args(["--json", "info"]).assert().success();
        let payload = parse_json(&assert);
        assert_eq!(payload["details"]["runtime"]["source"], "configured");
        assert_eq!(payload["details"]["runtime"]["version"], "v18.19.1");
    }

    #[test]
    fn joined_argument_style_passes_one_argument() {
        let temp = tempfile::tempdir().expect("tempdir");
        let node = write_fake_node(&temp.path().join("bin"), "v20.18.0");
        nbx(temp.path())
            .args(["--quiet", "use"])
            .arg(&node)
            .assert()
            .success();

        let assert = nbx(temp.path())
            .env("NBX_ARGUMENT_STYLE", "joined")
            .args(["--json", "exec", "node", "--", "a", "b"])
            .assert()
            .success();
        let payload = parse_json(&assert);
        assert_eq!(payload["details"]["stdout"], "argc:1 args:a b");
    }
}
