//! End-to-end CLI integration tests
//!
//! These tests drive the colony binary with assert_cmd against a throwaway
//! store directory, the way separate agent processes would.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tempfile::TempDir;

/// Helper for setting up CLI test environment
struct CliTestEnvironment {
    temp_dir: TempDir,
}

impl CliTestEnvironment {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    fn colony(&self) -> Command {
        let mut cmd = Command::cargo_bin("colony").unwrap();
        cmd.current_dir(self.temp_dir.path())
            .env("COLONY_ROOT", self.temp_dir.path().join("shared"))
            .env_remove("COLONY_AGENT_ID")
            .env_remove("COLONY_ROLE")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Run with --json and return the parsed outcome
    fn json(&self, args: &[&str]) -> Value {
        let output = self.colony().arg("--json").args(args).output().unwrap();
        serde_json::from_slice(&output.stdout).unwrap()
    }

    fn register(&self, role: &str) -> String {
        let outcome = self.json(&["register", "--role", role]);
        assert_eq!(outcome["success"], true);
        outcome["data"]["id"].as_str().unwrap().to_string()
    }
}

#[test]
fn test_no_subcommand_shows_getting_started() {
    let env = CliTestEnvironment::new();
    env.colony()
        .assert()
        .success()
        .stdout(predicate::str::contains("colony run"))
        .stdout(predicate::str::contains("colony task add"));
}

#[test]
fn test_task_add_then_list() {
    let env = CliTestEnvironment::new();

    env.colony()
        .args(["task", "add", "Fix the flaky test", "--priority", "high", "--tag", "rust"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Added task"));

    env.colony()
        .args(["task", "list", "--status", "pending"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Fix the flaky test"))
        .stdout(predicate::str::contains("HIGH"));
}

#[test]
fn test_register_heartbeat_and_list_agents() {
    let env = CliTestEnvironment::new();
    let agent_id = env.register("reviewer");
    assert!(agent_id.starts_with("agent-"));

    env.colony()
        .args(["--agent", &agent_id, "heartbeat"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Heartbeat recorded"));

    env.colony()
        .arg("agents")
        .assert()
        .success()
        .stdout(predicate::str::contains(agent_id.as_str()))
        .stdout(predicate::str::contains("role=reviewer"));

    env.colony()
        .args(["--agent", &agent_id, "unregister"])
        .assert()
        .success()
        .stdout(predicate::str::contains("unregistered"));

    env.colony()
        .arg("agents")
        .assert()
        .success()
        .stdout(predicate::str::contains("No live agents"));
}

#[test]
fn test_heartbeat_for_unknown_agent_fails_structurally() {
    let env = CliTestEnvironment::new();
    let output = env
        .colony()
        .args(["--json", "--agent", "agent-ghost", "heartbeat"])
        .output()
        .unwrap();

    assert!(!output.status.success());
    let outcome: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(outcome["success"], false);
    assert_eq!(outcome["error_kind"], "not_registered");
}

#[test]
fn test_per_agent_command_requires_agent_id() {
    let env = CliTestEnvironment::new();
    env.colony()
        .args(["send", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("COLONY_AGENT_ID"));
}

#[test]
fn test_direct_message_round_trip() {
    let env = CliTestEnvironment::new();
    let alice = env.register("writer");
    let bob = env.register("reviewer");

    env.colony()
        .args(["--agent", &alice, "send", r#"{"pr": 42}"#, "--to", &bob, "--type", "direct"])
        .assert()
        .success();

    let unread = env.json(&["--agent", &bob, "read", "--mark"]);
    let messages = unread["data"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["from"], alice.as_str());
    assert_eq!(messages[0]["payload"]["pr"], 42);

    let again = env.json(&["--agent", &bob, "read"]);
    assert!(again["data"].as_array().unwrap().is_empty());

    let for_alice = env.json(&["--agent", &alice, "read"]);
    assert!(for_alice["data"].as_array().unwrap().is_empty());
}

#[test]
fn test_lock_contention_between_agents() {
    let env = CliTestEnvironment::new();
    let alice = env.register("writer");
    let bob = env.register("writer");

    env.colony()
        .args(["--agent", &alice, "lock", "acquire", "src/lib.rs"])
        .assert()
        .success();

    let busy = env.json(&["--agent", &bob, "lock", "acquire", "src/lib.rs", "--timeout-ms", "200"]);
    assert_eq!(busy["success"], false);
    assert_eq!(busy["error_kind"], "lock_timeout");

    env.colony()
        .args(["lock", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("src/lib.rs held by"));

    let released = env.json(&["--agent", &alice, "lock", "release", "src/lib.rs"]);
    assert_eq!(released["data"], true);

    let acquired = env.json(&["--agent", &bob, "lock", "acquire", "src/lib.rs", "--timeout-ms", "200"]);
    assert_eq!(acquired["success"], true);
    assert_eq!(acquired["data"]["holder"], bob.as_str());
}

#[test]
fn test_route_assigns_task_to_matching_role() {
    let env = CliTestEnvironment::new();
    let _writer = env.register("writer");
    let reviewer = env.register("reviewer");

    env.colony()
        .args(["task", "add", "Review the parser", "--tag", "reviewer"])
        .assert()
        .success();

    let routed = env.json(&["route"]);
    let decisions = routed["data"].as_array().unwrap();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0]["agent_id"], reviewer.as_str());

    let stats = env.json(&["stats"]);
    assert_eq!(stats["data"]["tasks_by_status"]["in_progress"], 1);
    assert_eq!(stats["data"]["tasks_by_status"]["pending"], 0);

    let inbox = env.json(&["--agent", &reviewer, "read"]);
    assert_eq!(inbox["data"][0]["type"], "task_available");
}

#[test]
fn test_claim_and_complete_task() {
    let env = CliTestEnvironment::new();
    let worker = env.register("worker");

    env.colony().args(["task", "add", "Write docs"]).assert().success();

    let claimed = env.json(&["--agent", &worker, "task", "claim"]);
    let task_id = claimed["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(claimed["data"]["status"], "in_progress");

    env.colony()
        .args(["--agent", &worker, "task", "complete", &task_id, "--note", "done"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));

    let again = env.json(&["task", "complete", &task_id]);
    assert_eq!(again["success"], false);
    assert_eq!(again["error_kind"], "invalid_transition");
}

#[test]
fn test_health_status_and_cleanup() {
    let env = CliTestEnvironment::new();
    env.register("worker");

    env.colony()
        .args(["health", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 healthy"));

    env.colony()
        .args(["health", "cleanup"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No dead agents"));
}

#[test]
fn test_bus_tail_and_forced_rotation() {
    let env = CliTestEnvironment::new();
    let agent = env.register("worker");

    for i in 0..3 {
        env.colony()
            .args(["--agent", &agent, "send", &format!("note {i}")])
            .assert()
            .success();
    }

    let tail = env.json(&["bus", "tail", "-n", "2"]);
    assert_eq!(tail["data"].as_array().unwrap().len(), 2);

    let rotated = env.json(&["bus", "rotate", "--force"]);
    assert_eq!(rotated["data"]["message_count"], 3);

    let archives = env.json(&["bus", "archives"]);
    assert_eq!(archives["data"].as_array().unwrap().len(), 1);

    let after = env.json(&["bus", "tail"]);
    assert!(after["data"].as_array().unwrap().is_empty());
}
