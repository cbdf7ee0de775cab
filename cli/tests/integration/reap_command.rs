//! `vmgr reap` against the memory engine.

use predicates::prelude::*;

use crate::{home, vmgr};

#[test]
fn test_reap_once_with_nothing_expired() {
    let home = home();
    vmgr(&home)
        .args(["reap", "--once"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No expired units"));
}

#[test]
fn test_cron_alias_runs_the_reaper() {
    let home = home();
    vmgr(&home)
        .args(["cron", "--once", "--older-than", "1h"])
        .assert()
        .success();
}

#[test]
fn test_reap_rejects_invalid_threshold() {
    let home = home();
    vmgr(&home)
        .args(["reap", "--once", "--older-than", "soon"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("soon"));
}

#[test]
fn test_reap_rejects_zero_interval() {
    let home = home();
    vmgr(&home)
        .args(["reap", "--interval", "0s"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--interval"));
}

#[test]
fn test_reap_once_json_reports_counts() {
    let home = home();
    vmgr(&home)
        .args(["reap", "--once", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""found": 0"#));
}
