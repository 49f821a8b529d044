//! Prompt construction for suggestion generation.

use std::fmt::Write;

use careplan_db::PlanContent;

use super::PatientHistory;
use crate::transcript;

/// System instructions for the documentation assistant.
pub fn build_system_prompt() -> String {
    let mut prompt = String::from(
        "You are a clinical documentation assistant supporting a licensed therapist.\n\
         From the session transcript, draft:\n\
         - sessionSummary: a concise clinical summary of the session.\n\
         - progressNotes: optional notes on progress toward existing goals.\n\
         - suggestedChanges: the complete proposed treatment plan content after this session.\n\n\
         Rules:\n\
         - Carry forward existing goals and diagnoses unless the session gives a reason to change them.\n\
         - Only propose diagnoses the transcript supports; mark sensitive ones hiddenFromClient.\n\
         - Phrase clientGoals in plain language addressed to the client.\n\
         - riskScore is 0 (none) to 10 (imminent).\n\
         - A therapist reviews everything you produce before it takes effect.\n",
    );
    prompt.push_str("\nRespond with a single JSON object only.");
    prompt
}

/// User-turn content: the current plan and patient history, then the
/// transcript under analysis.
pub fn build_context_prompt(
    transcript: &str,
    current_plan: Option<&PlanContent>,
    history: Option<&PatientHistory>,
    excerpt_chars: usize,
) -> String {
    let mut out = String::new();

    match (current_plan, history) {
        (None, None) => {
            out.push_str(
                "## Context\n\
                 This is a new client with no treatment plan on file. Draft an initial plan \
                 suitable for a general adult outpatient psychotherapy setting.\n\n",
            );
        }
        _ => {
            out.push_str("## Context\n");
            if let Some(version) = history.and_then(|h| h.current_version) {
                let _ = writeln!(out, "Current plan version: {version}");
            }
            match current_plan {
                Some(plan) => write_plan_summary(&mut out, plan),
                None => out.push_str("No treatment plan content on file yet.\n"),
            }
            if let Some(prior) = history.and_then(|h| h.prior_transcript.as_deref()) {
                let _ = write!(
                    out,
                    "\n### Previous session (excerpt)\n{}\n",
                    transcript::tail_excerpt(prior, excerpt_chars)
                );
            }
            out.push('\n');
        }
    }

    let _ = write!(out, "## Session transcript\n{transcript}\n");
    out
}

fn write_plan_summary(out: &mut String, plan: &PlanContent) {
    if plan.clinical_goals.is_empty() {
        out.push_str("Clinical goals: none recorded\n");
    } else {
        out.push_str("Clinical goals:\n");
        for goal in &plan.clinical_goals {
            let _ = writeln!(out, "- {} [{}]", goal.description, goal.status);
        }
    }
    if !plan.client_goals.is_empty() {
        out.push_str("Client goals:\n");
        for goal in &plan.client_goals {
            let _ = writeln!(out, "- {}", goal.description);
        }
    }
    if !plan.diagnoses.is_empty() {
        out.push_str("Diagnoses:\n");
        for d in &plan.diagnoses {
            match &d.code {
                Some(code) => {
                    let _ = writeln!(out, "- {code}: {}", d.description);
                }
                None => {
                    let _ = writeln!(out, "- {}", d.description);
                }
            }
        }
    }
    if let Some(homework) = &plan.homework {
        let _ = writeln!(out, "Homework: {homework}");
    }
    match plan.risk_score {
        Some(score) => {
            let _ = writeln!(out, "Current risk score: {score}/10");
        }
        None => out.push_str("Current risk score: not assessed\n"),
    }
    // Full content, so the model can carry forward what it does not change.
    if let Ok(json) = serde_json::to_string_pretty(plan) {
        let _ = write!(out, "\nCurrent plan content (JSON):\n{json}\n");
    }
}
