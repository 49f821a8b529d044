//! CLI handlers for `careplan suggestion` subcommands.
//!
//! Implements:
//! - `careplan suggestion analyze <session-id>`   -- classify, generate, store as pending
//! - `careplan suggestion show <id> | --session <session-id>`
//! - `careplan suggestion approve <id>`           -- commit a new plan version
//! - `careplan suggestion reject <id> --reason ...`

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use careplan_core::store::PlanStore;
use careplan_core::{SuggestionWorkflow, WorkflowError};
use careplan_db::models::{PlanSuggestion, SafetyCheckResult};

use crate::config::CareplanConfig;
use crate::{SuggestionCommands, parse_id, require_actor};

/// Checks that need no database: an actor for commands that record one,
/// and a model provider for analysis.
pub fn preflight(
    command: &SuggestionCommands,
    config: &CareplanConfig,
    actor: Option<&str>,
) -> Result<()> {
    match command {
        SuggestionCommands::Analyze { .. } => {
            require_actor(actor)?;
            config.require_model()?;
        }
        SuggestionCommands::Approve { .. } | SuggestionCommands::Reject { .. } => {
            require_actor(actor)?;
        }
        SuggestionCommands::Show { .. } => {}
    }
    Ok(())
}

/// Dispatch a `SuggestionCommands` variant to the appropriate handler.
pub async fn run_suggestion_command(
    command: SuggestionCommands,
    config: &CareplanConfig,
    store: Arc<dyn PlanStore>,
    actor: Option<&str>,
) -> Result<()> {
    preflight(&command, config, actor)?;
    let workflow = config.build_workflow(store);
    run_with_workflow(command, &workflow, actor).await
}

async fn run_with_workflow(
    command: SuggestionCommands,
    workflow: &SuggestionWorkflow,
    actor: Option<&str>,
) -> Result<()> {
    match command {
        SuggestionCommands::Analyze { session_id } => {
            let actor = require_actor(actor)?;
            cmd_analyze(workflow, &session_id, actor).await
        }
        SuggestionCommands::Show {
            suggestion_id,
            session,
        } => cmd_show(workflow, suggestion_id.as_deref(), session.as_deref()).await,
        SuggestionCommands::Approve { suggestion_id } => {
            let actor = require_actor(actor)?;
            cmd_approve(workflow, &suggestion_id, actor).await
        }
        SuggestionCommands::Reject {
            suggestion_id,
            reason,
        } => {
            let actor = require_actor(actor)?;
            cmd_reject(workflow, &suggestion_id, actor, &reason).await
        }
    }
}

// -----------------------------------------------------------------------
// careplan suggestion analyze
// -----------------------------------------------------------------------

async fn cmd_analyze(workflow: &SuggestionWorkflow, session_id: &str, actor: &str) -> Result<()> {
    let session_id = parse_id(session_id, "session")?;

    // Ctrl+C abandons the model call; nothing has been written at that point.
    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    println!("Analysing session {session_id}...");
    let result = workflow
        .create_suggestion_cancellable(session_id, actor, cancel)
        .await;
    watcher.abort();

    match result {
        Ok(created) => {
            if created.created {
                println!("Pending suggestion created.");
            } else {
                println!("Session already has a pending suggestion.");
            }
            println!();
            print_suggestion(&created.suggestion);
            Ok(())
        }
        Err(WorkflowError::SafetyBlocked(verdict)) => {
            print_blocked(&verdict);
            Err(WorkflowError::SafetyBlocked(verdict).into())
        }
        Err(e) => Err(e.into()),
    }
}

// -----------------------------------------------------------------------
// careplan suggestion show
// -----------------------------------------------------------------------

async fn cmd_show(
    workflow: &SuggestionWorkflow,
    suggestion_id: Option<&str>,
    session_id: Option<&str>,
) -> Result<()> {
    let suggestion = match (suggestion_id, session_id) {
        (Some(id), _) => Some(workflow.get_suggestion(parse_id(id, "suggestion")?).await?),
        (None, Some(session)) => {
            workflow
                .get_pending_suggestion(parse_id(session, "session")?)
                .await?
        }
        (None, None) => anyhow::bail!("pass a suggestion ID or --session <SESSION_ID>"),
    };

    match suggestion {
        Some(s) => print_suggestion(&s),
        None => println!("No pending suggestion for that session."),
    }
    Ok(())
}

// -----------------------------------------------------------------------
// careplan suggestion approve / reject
// -----------------------------------------------------------------------

async fn cmd_approve(workflow: &SuggestionWorkflow, suggestion_id: &str, actor: &str) -> Result<()> {
    let id = parse_id(suggestion_id, "suggestion")?;
    let approval = workflow.approve(id, actor).await?;
    println!(
        "Suggestion {id} approved. Plan {} is now at version {}.",
        approval.version.treatment_plan_id, approval.version.version
    );
    Ok(())
}

async fn cmd_reject(
    workflow: &SuggestionWorkflow,
    suggestion_id: &str,
    actor: &str,
    reason: &str,
) -> Result<()> {
    let id = parse_id(suggestion_id, "suggestion")?;
    workflow.reject(id, actor, reason).await?;
    println!("Suggestion {id} rejected.");
    Ok(())
}

// -----------------------------------------------------------------------
// Output
// -----------------------------------------------------------------------

fn print_suggestion(s: &PlanSuggestion) {
    println!("Suggestion: {}", s.id);
    println!("  Status:   {}", s.status());
    println!("  Plan:     {}", s.treatment_plan_id);
    println!("  Session:  {}", s.session_id);
    println!(
        "  Safety:   {} risk{}",
        s.safety.risk_level,
        format_flags(&s.safety.risk_flags)
    );
    if let Some(by) = s.review.reviewed_by() {
        println!("  Reviewed by: {by}");
    }
    if let Some(notes) = s.review.therapist_notes() {
        println!("  Notes:    {notes}");
    }
    println!();
    println!("Summary:");
    println!("  {}", s.session_summary);
    if let Some(notes) = &s.progress_notes {
        println!();
        println!("Progress notes:");
        println!("  {notes}");
    }
    println!();
    println!("Suggested plan:");
    match serde_json::to_string_pretty(&s.suggested_changes) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("  (unprintable: {e})"),
    }
}

fn print_blocked(verdict: &SafetyCheckResult) {
    eprintln!("Generation blocked by the safety check.");
    eprintln!("  Risk level: {}", verdict.risk_level);
    if !verdict.risk_flags.is_empty() {
        eprintln!("  Flags:      {}", verdict.risk_flags.join(", "));
    }
    if let Some(reasoning) = &verdict.reasoning {
        eprintln!("  Reasoning:  {reasoning}");
    }
    eprintln!("Review the session manually before updating the plan.");
}

fn format_flags(flags: &[String]) -> String {
    if flags.is_empty() {
        String::new()
    } else {
        format!(" ({})", flags.join(", "))
    }
}
