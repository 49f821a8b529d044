//! CLI handlers for `careplan plan` subcommands.
//!
//! Implements:
//! - `careplan plan create <patient-id> [--file content.json]`
//! - `careplan plan show <plan-id>`     -- current version and content
//! - `careplan plan history <plan-id>`  -- every version, oldest first
//! - `careplan plan edit <plan-id> --file content.json --base-version N`

use anyhow::Result;

use careplan_core::PlanLedger;
use careplan_db::PlanContent;
use careplan_db::models::PlanVersion;

use crate::{PlanCommands, parse_id, read_content, require_actor};

/// Dispatch a `PlanCommands` variant to the appropriate handler.
pub async fn run_plan_command(
    command: PlanCommands,
    ledger: &PlanLedger,
    actor: Option<&str>,
) -> Result<()> {
    match command {
        PlanCommands::Create { patient_id, file } => {
            cmd_create(ledger, &patient_id, file.as_deref(), actor).await
        }
        PlanCommands::Show { plan_id } => cmd_show(ledger, &plan_id).await,
        PlanCommands::History { plan_id } => cmd_history(ledger, &plan_id).await,
        PlanCommands::Edit {
            plan_id,
            file,
            base_version,
            reason,
        } => {
            let editor = require_actor(actor)?;
            cmd_edit(ledger, &plan_id, &file, base_version, editor, reason.as_deref()).await
        }
    }
}

// -----------------------------------------------------------------------
// careplan plan create
// -----------------------------------------------------------------------

async fn cmd_create(
    ledger: &PlanLedger,
    patient_id: &str,
    file: Option<&str>,
    actor: Option<&str>,
) -> Result<()> {
    let patient_id = parse_id(patient_id, "patient")?;
    let content = match file {
        Some(path) => read_content(path)?,
        None => PlanContent::default(),
    };

    let v1 = ledger.create_initial(patient_id, &content, actor).await?;

    println!("Treatment plan created.");
    println!();
    println!("  Plan ID:  {}", v1.treatment_plan_id);
    println!("  Patient:  {patient_id}");
    println!("  Version:  {}", v1.version);
    Ok(())
}

// -----------------------------------------------------------------------
// careplan plan show
// -----------------------------------------------------------------------

async fn cmd_show(ledger: &PlanLedger, plan_id: &str) -> Result<()> {
    let plan_id = parse_id(plan_id, "treatment plan")?;
    let Some(current) = ledger.current_version(plan_id).await? else {
        println!("Treatment plan {plan_id} has no versions.");
        return Ok(());
    };

    print_version_header(&current);
    println!();
    println!("{}", render_content(&current.content)?);
    Ok(())
}

fn render_content(content: &PlanContent) -> Result<String> {
    if content.is_empty() {
        return Ok("(empty plan)".to_string());
    }
    Ok(serde_json::to_string_pretty(content)?)
}

// -----------------------------------------------------------------------
// careplan plan history
// -----------------------------------------------------------------------

async fn cmd_history(ledger: &PlanLedger, plan_id: &str) -> Result<()> {
    let plan_id = parse_id(plan_id, "treatment plan")?;
    let versions = ledger.history(plan_id).await?;

    println!(
        "{:<8} {:<16} {:<20} {:<25} REASON",
        "VERSION", "CHANGE", "BY", "CREATED"
    );
    println!("{}", "-".repeat(90));
    for v in &versions {
        println!("{}", format_history_row(v));
    }
    println!();
    println!("{} version(s)", versions.len());
    Ok(())
}

fn format_history_row(v: &PlanVersion) -> String {
    format!(
        "{:<8} {:<16} {:<20} {:<25} {}",
        v.version,
        v.change_type,
        v.created_by.as_deref().unwrap_or("-"),
        v.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        v.change_reason.as_deref().unwrap_or(""),
    )
}

// -----------------------------------------------------------------------
// careplan plan edit
// -----------------------------------------------------------------------

async fn cmd_edit(
    ledger: &PlanLedger,
    plan_id: &str,
    file: &str,
    base_version: i32,
    editor: &str,
    reason: Option<&str>,
) -> Result<()> {
    let plan_id = parse_id(plan_id, "treatment plan")?;
    let content = read_content(file)?;

    let version = ledger
        .commit_manual_edit(plan_id, &content, base_version, editor, reason)
        .await?;

    println!("Plan {plan_id} updated to version {}.", version.version);
    Ok(())
}

fn print_version_header(v: &PlanVersion) {
    println!("Treatment plan: {}", v.treatment_plan_id);
    println!("  Version:  {}", v.version);
    println!("  Change:   {}", v.change_type);
    if let Some(by) = &v.created_by {
        println!("  By:       {by}");
    }
    if let Some(reason) = &v.change_reason {
        println!("  Reason:   {reason}");
    }
    if let Some(summary) = &v.change_summary {
        println!("  Summary:  {summary}");
    }
    if let Some(id) = v.suggestion_id {
        println!("  From suggestion: {id}");
    }
    println!("  Created:  {}", v.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use careplan_core::store::MemoryStore;

    use super::*;

    #[tokio::test]
    async fn create_then_edit_through_the_ledger() {
        let store = Arc::new(MemoryStore::new());
        let patient = store.insert_patient("Avery").await;
        let ledger = PlanLedger::new(store, 3);
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(&path, r#"{ "homework": "Walk daily" }"#).unwrap();

        run_plan_command(
            PlanCommands::Create {
                patient_id: patient.id.to_string(),
                file: None,
            },
            &ledger,
            Some("dr-lee"),
        )
        .await
        .unwrap();
        let plan = ledger.plan_for_patient(patient.id).await.unwrap();

        let edit = |base_version| PlanCommands::Edit {
            plan_id: plan.id.to_string(),
            file: path.to_str().unwrap().to_string(),
            base_version,
            reason: Some("Adjusted homework".to_string()),
        };
        run_plan_command(edit(1), &ledger, Some("dr-lee")).await.unwrap();

        let err = run_plan_command(edit(1), &ledger, Some("dr-kim"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("version conflict"), "got {err:#}");

        let err = run_plan_command(edit(2), &ledger, None).await.unwrap_err();
        assert!(err.to_string().contains("--as"));

        let history = ledger.history(plan.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].created_by.as_deref(), Some("dr-lee"));
        assert!(format_history_row(&history[1]).contains("manual_edit"));
    }

    #[test]
    fn empty_content_renders_as_a_placeholder() {
        assert_eq!(render_content(&PlanContent::default()).unwrap(), "(empty plan)");

        let content = PlanContent {
            homework: Some("Walk daily".to_string()),
            ..PlanContent::default()
        };
        let rendered = render_content(&content).unwrap();
        assert!(rendered.contains("\"homework\": \"Walk daily\""), "got {rendered}");
    }

    #[tokio::test]
    async fn invalid_ids_are_reported() {
        let ledger = PlanLedger::new(Arc::new(MemoryStore::new()), 3);
        let err = run_plan_command(
            PlanCommands::Show {
                plan_id: "not-a-uuid".to_string(),
            },
            &ledger,
            None,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("invalid treatment plan ID"));
    }
}
