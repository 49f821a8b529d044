//! The validated shape of treatment plan content.
//!
//! [`PlanContent`] is shared by plan versions and suggestions. It is stored
//! as JSONB, handed to the generation provider as a JSON Schema, and always
//! validated before it is persisted.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum number of entries in any collection field.
pub const MAX_ITEMS: usize = 50;
/// Maximum length, in characters, of any text field.
pub const MAX_TEXT_CHARS: usize = 4000;
/// Inclusive upper bound of [`PlanContent::risk_score`].
pub const MAX_RISK_SCORE: u8 = 10;

/// Errors raised while decoding or validating plan content.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("plan content is not valid JSON for the schema: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("plan content failed validation: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Progress marker on a clinical goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    #[default]
    NotStarted,
    InProgress,
    Achieved,
    Discontinued,
}

impl fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Achieved => "achieved",
            Self::Discontinued => "discontinued",
        };
        f.write_str(s)
    }
}

/// A clinician-facing treatment goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClinicalGoal {
    pub description: String,
    /// Free-form target, e.g. `"2025-09"` or `"within 8 sessions"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_date: Option<String>,
    #[serde(default)]
    pub status: GoalStatus,
}

/// A goal phrased for the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClientGoal {
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Diagnosis {
    /// Classification code such as an ICD-10 identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub description: String,
    /// Plain-language summary that may be shown to the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_summary: Option<String>,
    /// Keep this diagnosis out of client-facing views.
    #[serde(default)]
    pub hidden_from_client: bool,
}

/// Treatment plan content.
///
/// Every field defaults to empty so that partial content such as
/// `{"homework": "Practice breathing"}` is a valid value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanContent {
    #[serde(default)]
    pub clinical_goals: Vec<ClinicalGoal>,
    #[serde(default)]
    pub client_goals: Vec<ClientGoal>,
    #[serde(default)]
    pub diagnoses: Vec<Diagnosis>,
    #[serde(default)]
    pub interventions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homework: Option<String>,
    /// Clinician-assessed risk, 0 (none) to 10 (imminent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 0, max = 10))]
    pub risk_score: Option<u8>,
}

impl PlanContent {
    /// Decode and validate content from an untyped JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Self, ContentError> {
        let content: Self = serde_json::from_value(value)?;
        content.validate()?;
        Ok(content)
    }

    /// Decode and validate content from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ContentError> {
        let content: Self = serde_json::from_str(s)?;
        content.validate()?;
        Ok(content)
    }

    /// Check every field against the content rules, collecting all
    /// violations rather than stopping at the first.
    pub fn validate(&self) -> Result<(), ContentError> {
        let mut problems = Vec::new();

        check_len(&mut problems, "clinicalGoals", self.clinical_goals.len());
        for (i, goal) in self.clinical_goals.iter().enumerate() {
            check_required_text(&mut problems, &format!("clinicalGoals[{i}].description"), &goal.description);
            if let Some(target) = &goal.target_date {
                check_optional_text(&mut problems, &format!("clinicalGoals[{i}].targetDate"), target);
            }
        }

        check_len(&mut problems, "clientGoals", self.client_goals.len());
        for (i, goal) in self.client_goals.iter().enumerate() {
            check_required_text(&mut problems, &format!("clientGoals[{i}].description"), &goal.description);
        }

        check_len(&mut problems, "diagnoses", self.diagnoses.len());
        for (i, diagnosis) in self.diagnoses.iter().enumerate() {
            check_required_text(&mut problems, &format!("diagnoses[{i}].description"), &diagnosis.description);
            if let Some(code) = &diagnosis.code {
                check_optional_text(&mut problems, &format!("diagnoses[{i}].code"), code);
            }
            if let Some(summary) = &diagnosis.patient_summary {
                check_optional_text(&mut problems, &format!("diagnoses[{i}].patientSummary"), summary);
            }
        }

        check_len(&mut problems, "interventions", self.interventions.len());
        for (i, intervention) in self.interventions.iter().enumerate() {
            check_required_text(&mut problems, &format!("interventions[{i}]"), intervention);
        }

        if let Some(homework) = &self.homework {
            check_required_text(&mut problems, "homework", homework);
        }

        if let Some(score) = self.risk_score {
            if score > MAX_RISK_SCORE {
                problems.push(format!("riskScore must be between 0 and {MAX_RISK_SCORE}, got {score}"));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ContentError::Invalid(problems))
        }
    }

    /// Whether the content carries nothing at all.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// JSON Schema describing this type, as handed to generation providers.
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(PlanContent);
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }
}

fn check_len(problems: &mut Vec<String>, field: &str, len: usize) {
    if len > MAX_ITEMS {
        problems.push(format!("{field} has {len} entries (max {MAX_ITEMS})"));
    }
}

fn check_required_text(problems: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        problems.push(format!("{field} must not be blank"));
    }
    check_optional_text(problems, field, value);
}

fn check_optional_text(problems: &mut Vec<String>, field: &str, value: &str) {
    let chars = value.chars().count();
    if chars > MAX_TEXT_CHARS {
        problems.push(format!("{field} is {chars} characters (max {MAX_TEXT_CHARS})"));
    }
}
