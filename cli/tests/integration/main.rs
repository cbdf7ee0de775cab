//! Integration tests for the vmgr CLI
//!
//! These tests spawn the actual binary against the in-process engine and a
//! throwaway `VMGR_HOME`, so they never touch real infrastructure.

mod reap_command;
mod site_command;

use assert_cmd::Command;
use tempfile::TempDir;

/// `vmgr` on the memory engine with an isolated home directory.
pub fn vmgr(home: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("vmgr"));
    cmd.env("NO_COLOR", "1")
        .env("VMGR_HOME", home.path())
        .env("VMGR_ENGINE", "memory")
        .env_remove("VMGR_CONFIG")
        .env_remove("VMGR_PROJECT")
        .env_remove("RUST_LOG");
    cmd
}

#[allow(clippy::expect_used)]
pub fn home() -> TempDir {
    tempfile::tempdir().expect("temp dir")
}
