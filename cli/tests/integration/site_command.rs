//! `vmgr site` against the memory engine.

#![allow(clippy::expect_used)]

use predicates::prelude::*;

use crate::{home, vmgr};

#[test]
fn test_site_up_prints_website_url() {
    let home = home();
    vmgr(&home)
        .args(["site", "up"])
        .assert()
        .success()
        .stdout(predicate::str::contains("websiteUrl"))
        .stdout(predicate::str::contains("static-site-website-bucket"));
}

#[test]
fn test_site_up_quiet_prints_only_the_url() {
    let home = home();
    let output = vmgr(&home).args(["site", "up", "-q"]).output().expect("run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 1, "got: {stdout}");
    assert!(stdout.trim().starts_with("http://"));
}

#[test]
fn test_site_up_json_lists_units_in_dependency_order() {
    let home = home();
    let output = vmgr(&home).args(["site", "up", "--json"]).output().expect("run");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["action"], "up");
    assert_eq!(value["order"], serde_json::json!(["website", "content"]));
    assert_eq!(
        value["outputs"]["content"]["bucket"],
        "static-site-website-bucket"
    );
}

#[test]
fn test_site_destroy_with_yes_and_remove() {
    let home = home();
    vmgr(&home)
        .args(["site", "destroy", "--yes", "--remove"])
        .assert()
        .success()
        .stdout(predicate::str::contains("destroyed and removed"));
}
