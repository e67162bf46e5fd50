#![allow(dead_code)]

use std::path::Path;

use assert_cmd::assert::Assert;
use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;

/// `nbx` isolated from the caller's environment under `home`.
pub fn nbx(home: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("nbx");
    for key in [
        "NBX_SETTINGS",
        "NBX_NODE_VERSION",
        "NBX_NODE_DIST_URL",
        "NBX_ONLINE",
        "NBX_ARGUMENT_STYLE",
        "NBX_KEEP_PROXIES",
    ] {
        cmd.env_remove(key);
    }
    cmd.env("NBX_HOME", home)
        .env("NBX_PROGRESS", "0")
        .env("NO_COLOR", "1");
    cmd
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}

#[cfg(unix)]
pub fn write_fake_node(dir: &Path, version: &str) -> std::path::PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir).expect("create bin dir");
    let node = dir.join("node");
    std::fs::write(
        &node,
        format!("#!/bin/sh\nif [ \"$1\" = --version ]; then echo {version}; else echo \"argc:$# args:$*\"; fi\n"),
    )
    .expect("write node");
    std::fs::set_permissions(&node, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    node
}
