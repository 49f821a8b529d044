//! Integration tests for the `careplan` binary that need no database.

use std::process::Command;

fn careplan() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_careplan"));
    cmd.env_remove("CAREPLAN_USER")
        .env_remove("CAREPLAN_MODEL_COMMAND")
        .env("RUST_LOG", "off");
    cmd
}

#[test]
fn schema_prints_plan_content_schema() {
    let output = careplan().arg("schema").output().expect("run careplan");
    assert!(output.status.success());

    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let properties = &schema["properties"];
    for field in ["clinicalGoals", "clientGoals", "diagnoses", "interventions", "homework", "riskScore"] {
        assert!(properties.get(field).is_some(), "schema lacks {field}");
    }
    assert_eq!(schema["additionalProperties"], false);
}

#[test]
fn suggestion_schema_names_generator_fields() {
    let output = careplan()
        .args(["schema", "--suggestion"])
        .output()
        .expect("run careplan");
    assert!(output.status.success());

    let schema: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let required: Vec<&str> = schema["required"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(required.contains(&"sessionSummary"));
    assert!(required.contains(&"suggestedChanges"));
}

#[test]
fn approve_without_actor_fails_before_touching_the_database() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = careplan()
        .env("XDG_CONFIG_HOME", dir.path())
        // Nothing listens here; the command must fail on the missing actor,
        // not on the connection.
        .args([
            "--database-url",
            "postgresql://127.0.0.1:1/careplan",
            "suggestion",
            "approve",
            "6f1c1c52-3b9e-4c8a-9d57-0c8f1f0d4b1e",
        ])
        .output()
        .expect("run careplan");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--as"), "unexpected stderr: {stderr}");
}
