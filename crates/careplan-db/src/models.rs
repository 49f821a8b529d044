use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

use crate::content::PlanContent;
use crate::error::StoreError;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Provenance tag on a plan version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Initial,
    ManualEdit,
    SessionUpdate,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::ManualEdit => "manual_edit",
            Self::SessionUpdate => "session_update",
        };
        f.write_str(s)
    }
}

impl FromStr for ChangeType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "manual_edit" => Ok(Self::ManualEdit),
            "session_update" => Ok(Self::SessionUpdate),
            other => Err(ParseEnumError::new("change type", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Flat review status of a suggestion, as stored in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuggestionStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

impl FromStr for SuggestionStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(ParseEnumError::new("suggestion status", other)),
        }
    }
}

// ---------------------------------------------------------------------------

/// Risk tier reported by the safety classifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, sqlx::Type,
)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(s)
    }
}

impl FromStr for RiskLevel {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(ParseEnumError::new("risk level", other)),
        }
    }
}

/// Error returned when parsing an unknown enum string.
#[derive(Debug, Clone)]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_owned(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.kind, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

// ---------------------------------------------------------------------------
// Safety
// ---------------------------------------------------------------------------

/// Risk assessment that gates whether plan content may be generated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SafetyCheckResult {
    pub safe_to_generate: bool,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub risk_flags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl SafetyCheckResult {
    /// A passing low-risk result.
    pub fn low() -> Self {
        Self {
            safe_to_generate: true,
            risk_level: RiskLevel::Low,
            risk_flags: Vec::new(),
            reasoning: None,
        }
    }

    /// A blocking high-risk result carrying a single flag.
    pub fn blocked(flag: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            safe_to_generate: false,
            risk_level: RiskLevel::High,
            risk_flags: vec![flag.into()],
            reasoning: Some(reasoning.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Review state machine
// ---------------------------------------------------------------------------

/// Review state of a suggestion.
///
/// `Pending` is the only state with outgoing transitions; `Approved` and
/// `Rejected` are terminal and carry the reviewer and timestamp, so an
/// approved suggestion without a reviewer cannot be constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ReviewState {
    Pending,
    Approved {
        reviewed_by: String,
        reviewed_at: DateTime<Utc>,
    },
    Rejected {
        reviewed_by: String,
        reviewed_at: DateTime<Utc>,
        therapist_notes: String,
    },
}

impl ReviewState {
    pub fn status(&self) -> SuggestionStatus {
        match self {
            Self::Pending => SuggestionStatus::Pending,
            Self::Approved { .. } => SuggestionStatus::Approved,
            Self::Rejected { .. } => SuggestionStatus::Rejected,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Transition `Pending -> Approved`. Any other source state returns the
    /// current status unchanged as the error.
    pub fn approve(
        &self,
        reviewer: &str,
        at: DateTime<Utc>,
    ) -> Result<ReviewState, SuggestionStatus> {
        match self {
            Self::Pending => Ok(Self::Approved {
                reviewed_by: reviewer.to_owned(),
                reviewed_at: at,
            }),
            other => Err(other.status()),
        }
    }

    /// Transition `Pending -> Rejected`.
    pub fn reject(
        &self,
        reviewer: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<ReviewState, SuggestionStatus> {
        match self {
            Self::Pending => Ok(Self::Rejected {
                reviewed_by: reviewer.to_owned(),
                reviewed_at: at,
                therapist_notes: reason.to_owned(),
            }),
            other => Err(other.status()),
        }
    }

    pub fn reviewed_by(&self) -> Option<&str> {
        match self {
            Self::Pending => None,
            Self::Approved { reviewed_by, .. } | Self::Rejected { reviewed_by, .. } => {
                Some(reviewed_by)
            }
        }
    }

    pub fn reviewed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Pending => None,
            Self::Approved { reviewed_at, .. } | Self::Rejected { reviewed_at, .. } => {
                Some(*reviewed_at)
            }
        }
    }

    pub fn therapist_notes(&self) -> Option<&str> {
        match self {
            Self::Rejected {
                therapist_notes, ..
            } => Some(therapist_notes),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// A recorded therapy session. The patient link and transcript are both
/// optional: sessions can exist before they are assigned or transcribed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub patient_id: Option<Uuid>,
    pub transcript: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Session {
    /// The transcript, if present and not blank.
    pub fn usable_transcript(&self) -> Option<&str> {
        self.transcript.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Per-patient aggregate root. Carries identity only; content lives in
/// [`PlanVersion`] rows.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TreatmentPlan {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// An immutable, sequentially numbered snapshot of plan content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PlanVersion {
    pub id: Uuid,
    pub treatment_plan_id: Uuid,
    pub version: i32,
    #[sqlx(json)]
    pub content: PlanContent,
    pub change_type: ChangeType,
    pub change_reason: Option<String>,
    pub change_summary: Option<String>,
    pub suggestion_id: Option<Uuid>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A proposed plan update awaiting (or past) human review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSuggestion {
    pub id: Uuid,
    pub treatment_plan_id: Uuid,
    pub session_id: Uuid,
    pub session_summary: String,
    pub progress_notes: Option<String>,
    pub suggested_changes: PlanContent,
    #[serde(flatten)]
    pub review: ReviewState,
    /// Classifier verdict recorded when the suggestion was generated.
    pub safety: SafetyCheckResult,
    pub transcript_sha256: String,
    pub created_at: DateTime<Utc>,
}

impl PlanSuggestion {
    pub fn status(&self) -> SuggestionStatus {
        self.review.status()
    }
}

/// Flat `plan_suggestions` row; converted into [`PlanSuggestion`] so the
/// review columns are checked against the status.
#[derive(Debug, Clone, FromRow)]
pub struct SuggestionRow {
    pub id: Uuid,
    pub treatment_plan_id: Uuid,
    pub session_id: Uuid,
    pub session_summary: String,
    pub progress_notes: Option<String>,
    pub suggested_changes: Json<PlanContent>,
    pub status: SuggestionStatus,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub therapist_notes: Option<String>,
    pub safety_risk_level: RiskLevel,
    pub safety_flags: Json<Vec<String>>,
    pub safety_reasoning: Option<String>,
    pub transcript_sha256: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<SuggestionRow> for PlanSuggestion {
    type Error = StoreError;

    fn try_from(row: SuggestionRow) -> Result<Self, Self::Error> {
        let review = match (row.status, row.reviewed_by, row.reviewed_at) {
            (SuggestionStatus::Pending, None, None) => ReviewState::Pending,
            (SuggestionStatus::Approved, Some(reviewed_by), Some(reviewed_at)) => {
                ReviewState::Approved {
                    reviewed_by,
                    reviewed_at,
                }
            }
            (SuggestionStatus::Rejected, Some(reviewed_by), Some(reviewed_at)) => {
                let therapist_notes = row.therapist_notes.ok_or_else(|| {
                    StoreError::invalid_row(row.id, "rejected suggestion has no therapist notes")
                })?;
                ReviewState::Rejected {
                    reviewed_by,
                    reviewed_at,
                    therapist_notes,
                }
            }
            (status, _, _) => {
                return Err(StoreError::invalid_row(
                    row.id,
                    format!("review columns do not match status {status}"),
                ));
            }
        };

        let risk_level = row.safety_risk_level;
        Ok(Self {
            id: row.id,
            treatment_plan_id: row.treatment_plan_id,
            session_id: row.session_id,
            session_summary: row.session_summary,
            progress_notes: row.progress_notes,
            suggested_changes: row.suggested_changes.0,
            review,
            safety: SafetyCheckResult {
                safe_to_generate: risk_level != RiskLevel::High,
                risk_level,
                risk_flags: row.safety_flags.0,
                reasoning: row.safety_reasoning,
            },
            transcript_sha256: row.transcript_sha256,
            created_at: row.created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn suggestion_row(status: SuggestionStatus) -> SuggestionRow {
        SuggestionRow {
            id: Uuid::new_v4(),
            treatment_plan_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            session_summary: "Discussed sleep".to_string(),
            progress_notes: None,
            suggested_changes: Json(PlanContent::default()),
            status,
            reviewed_at: None,
            reviewed_by: None,
            therapist_notes: None,
            safety_risk_level: RiskLevel::Low,
            safety_flags: Json(vec![]),
            safety_reasoning: None,
            transcript_sha256: "00".repeat(32),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn enum_strings_roundtrip() {
        for v in [ChangeType::Initial, ChangeType::ManualEdit, ChangeType::SessionUpdate] {
            assert_eq!(v.to_string().parse::<ChangeType>().unwrap(), v);
        }
        for v in [
            SuggestionStatus::Pending,
            SuggestionStatus::Approved,
            SuggestionStatus::Rejected,
        ] {
            assert_eq!(v.to_string().parse::<SuggestionStatus>().unwrap(), v);
        }
        for v in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
            assert_eq!(v.to_string().parse::<RiskLevel>().unwrap(), v);
        }
    }

    #[test]
    fn enum_parse_rejects_unknown() {
        let err = "severe".parse::<RiskLevel>().unwrap_err();
        assert_eq!(err.to_string(), "invalid risk level: \"severe\"");
    }

    #[test]
    fn api_casing_is_screaming() {
        let json = serde_json::to_value(ChangeType::SessionUpdate).unwrap();
        assert_eq!(json, "SESSION_UPDATE");
        let risk: RiskLevel = serde_json::from_str("\"HIGH\"").unwrap();
        assert_eq!(risk, RiskLevel::High);
    }

    #[test]
    fn review_state_transitions_are_one_way() {
        let now = Utc::now();
        let approved = ReviewState::Pending.approve("dr-lee", now).unwrap();
        assert_eq!(approved.status(), SuggestionStatus::Approved);
        assert_eq!(approved.reviewed_by(), Some("dr-lee"));

        assert_eq!(
            approved.reject("dr-lee", "late", now).unwrap_err(),
            SuggestionStatus::Approved
        );
        assert_eq!(approved.approve("dr-lee", now).unwrap_err(), SuggestionStatus::Approved);

        let rejected = ReviewState::Pending
            .reject("dr-lee", "Not clinically relevant", now)
            .unwrap();
        assert_eq!(rejected.therapist_notes(), Some("Not clinically relevant"));
        assert_eq!(rejected.approve("dr-lee", now).unwrap_err(), SuggestionStatus::Rejected);
    }

    #[test]
    fn review_state_serializes_flat() {
        let state = ReviewState::Rejected {
            reviewed_by: "dr-lee".to_string(),
            reviewed_at: Utc::now(),
            therapist_notes: "Not clinically relevant".to_string(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "REJECTED");
        assert_eq!(json["reviewedBy"], "dr-lee");
        assert_eq!(json["therapistNotes"], "Not clinically relevant");
    }

    #[test]
    fn pending_row_converts() {
        let suggestion = PlanSuggestion::try_from(suggestion_row(SuggestionStatus::Pending)).unwrap();
        assert!(suggestion.review.is_pending());
        assert!(suggestion.safety.safe_to_generate);
    }

    #[test]
    fn approved_row_without_reviewer_is_rejected() {
        let err = PlanSuggestion::try_from(suggestion_row(SuggestionStatus::Approved)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidRow { .. }), "got {err:?}");
    }

    #[test]
    fn rejected_row_requires_notes() {
        let mut row = suggestion_row(SuggestionStatus::Rejected);
        row.reviewed_by = Some("dr-lee".to_string());
        row.reviewed_at = Some(Utc::now());
        assert!(PlanSuggestion::try_from(row.clone()).is_err());

        row.therapist_notes = Some("Not clinically relevant".to_string());
        let suggestion = PlanSuggestion::try_from(row).unwrap();
        assert_eq!(suggestion.status(), SuggestionStatus::Rejected);
    }

    #[test]
    fn blank_transcript_is_not_usable() {
        let session = Session {
            id: Uuid::new_v4(),
            patient_id: None,
            transcript: Some("   ".to_string()),
            recorded_at: Utc::now(),
        };
        assert_eq!(session.usable_transcript(), None);
    }
}
