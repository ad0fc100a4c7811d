use assert_cmd::Command;
use predicates::str::contains;

mod support;

use support::{TestProject, EPIC_V1};

fn epc() -> Command {
    Command::cargo_bin("epc").expect("binary")
}

#[test]
fn epc_help_works() {
    epc()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("Epic decomposition"));
}

#[test]
fn subcommand_help_works() {
    for cmd in ["decompose", "sync", "start", "complete", "status", "reset"] {
        epc().arg(cmd).arg("--help").assert().success();
    }
}

#[test]
fn decompose_start_complete_status_flow() {
    let project = TestProject::init();
    let epic = project.write_epic("epic.md", EPIC_V1);

    epc()
        .current_dir(project.path())
        .args(["decompose", "--feature", "sessions"])
        .arg(&epic)
        .assert()
        .success()
        .stdout(contains("created: 3"));

    // Only task 1 has no dependencies, so it must be selected first
    epc()
        .current_dir(project.path())
        .args(["start", "--feature", "sessions"])
        .assert()
        .success()
        .stdout(contains("Selected task #1"));

    epc()
        .current_dir(project.path())
        .args(["complete", "1", "--feature", "sessions"])
        .assert()
        .success()
        .stdout(contains("now ready: #2"));

    epc()
        .current_dir(project.path())
        .args(["status", "--feature", "sessions"])
        .assert()
        .success()
        .stdout(contains("1/3 tasks"));
}

#[test]
fn start_emits_json_envelope() {
    let project = TestProject::init();
    let epic = project.write_epic("epic.md", EPIC_V1);

    epc()
        .current_dir(project.path())
        .args(["decompose", "--feature", "sessions", "--quiet"])
        .arg(&epic)
        .assert()
        .success();

    let output = epc()
        .current_dir(project.path())
        .args(["--json", "start", "--feature", "sessions", "--dry-run"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&output.get_output().stdout).to_string();
    let envelope: serde_json::Value = serde_json::from_str(&stdout).expect("json envelope");
    assert_eq!(envelope["schema_version"], "epc.v1");
    assert_eq!(envelope["command"], "start");
    assert_eq!(envelope["status"], "success");
    assert_eq!(envelope["data"]["task"]["id"], 1);
}

#[test]
fn sync_assigns_tracker_refs() {
    let project = TestProject::init();
    let epic = project.write_epic("epic.md", EPIC_V1);

    epc()
        .current_dir(project.path())
        .args(["decompose", "--feature", "sessions", "--quiet"])
        .arg(&epic)
        .assert()
        .success();

    epc()
        .current_dir(project.path())
        .args(["sync", "--feature", "sessions"])
        .arg(&epic)
        .assert()
        .success()
        .stdout(contains("tracker issues created: 3"));

    let record = std::fs::read_to_string(
        project.path().join(".epc/sessions/tasks/1.md"),
    )
    .expect("record file");
    assert!(record.contains("external_ref = \"local-1\""));

    // A second sync updates instead of re-creating
    epc()
        .current_dir(project.path())
        .args(["sync", "--feature", "sessions"])
        .arg(&epic)
        .assert()
        .success()
        .stdout(contains("tracker issues created: 0"));
}

#[test]
fn sync_unknown_feature_fails() {
    let project = TestProject::init();
    let epic = project.write_epic("epic.md", EPIC_V1);

    epc()
        .current_dir(project.path())
        .args(["sync", "--feature", "ghost"])
        .arg(&epic)
        .assert()
        .code(2)
        .stderr(contains("Feature not found"));
}

#[test]
fn missing_feature_exits_with_user_error() {
    let project = TestProject::init();

    epc()
        .current_dir(project.path())
        .args(["status", "--feature", "ghost"])
        .assert()
        .code(2)
        .stderr(contains("Feature not found"));
}

#[test]
fn interrupted_run_requires_resume() {
    let project = TestProject::init();
    let epic = project.write_epic("epic.md", EPIC_V1);

    epc()
        .current_dir(project.path())
        .args(["decompose", "--feature", "sessions", "--quiet"])
        .arg(&epic)
        .assert()
        .success();
    epc()
        .current_dir(project.path())
        .args(["start", "--feature", "sessions", "--quiet"])
        .assert()
        .success();

    // A second start without --resume must refuse rather than restart
    epc()
        .current_dir(project.path())
        .args(["start", "--feature", "sessions"])
        .assert()
        .code(2)
        .stderr(contains("--resume"));

    epc()
        .current_dir(project.path())
        .args(["start", "--feature", "sessions", "--resume"])
        .assert()
        .success()
        .stdout(contains("Selected task #1"));

    // Explicit reset clears the pin
    epc()
        .current_dir(project.path())
        .args(["reset", "--feature", "sessions"])
        .assert()
        .success();
    epc()
        .current_dir(project.path())
        .args(["start", "--feature", "sessions"])
        .assert()
        .success();
}

#[test]
fn cyclic_epic_is_policy_blocked() {
    let project = TestProject::init();
    let epic = project.write_epic(
        "epic.md",
        "## Task 1: First\nDepends on: #2\n\n## Task 2: Second\nDepends on: #1\n",
    );

    epc()
        .current_dir(project.path())
        .args(["decompose", "--feature", "sessions"])
        .arg(&epic)
        .assert()
        .code(3)
        .stderr(contains("Dependency cycle detected: 1 -> 2 -> 1"));
}
