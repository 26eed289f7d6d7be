// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn group_path_expansion() {
    assert_eq!(group_path_of("ui"), vec!["ui"]);
    assert_eq!(group_path_of("ui/panels/detail"), vec!["ui", "ui/panels", "ui/panels/detail"]);
    assert_eq!(group_path_of("/ui//panels/"), vec!["ui", "ui/panels"]);
}

#[test]
fn status_precedence() {
    use NodeStatus::*;
    assert_eq!(group_status([Succeeded, Running, Failed]), Running);
    assert_eq!(group_status([Succeeded, Failed, Pending]), Failed);
    assert_eq!(group_status([Succeeded, Canceled]), Canceled);
    assert_eq!(group_status([Succeeded, Blocked]), Blocked);
    assert_eq!(group_status([Succeeded, Ready]), Pending);
    assert_eq!(group_status([Succeeded, Succeeded]), Succeeded);
    assert_eq!(group_status([]), Pending);
}

#[test]
fn nested_groups_roll_up() {
    use NodeStatus::*;
    let states = derive_group_states([
        (Some("ui/panels"), Succeeded),
        (Some("ui/views"), Failed),
        (Some("api"), Running),
        (None, Pending),
    ]);
    let find = |p: &str| states.iter().find(|g| g.path == p).unwrap();
    assert_eq!(find("ui").status, Failed);
    assert_eq!(find("ui").members, 2);
    assert_eq!(find("ui/panels").status, Succeeded);
    assert_eq!(find("api").status, Running);
    assert!(states.iter().all(|g| g.path != ""));
}
