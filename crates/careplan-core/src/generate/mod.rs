//! Drafting plan updates from a session transcript.
//!
//! The generator knows nothing about persistence or review: it turns a
//! transcript plus context into a validated [`GeneratedSuggestion`] or an
//! error. Output that does not match the schema is an error, never a
//! partial success.

pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use careplan_db::PlanContent;
use careplan_db::content::MAX_TEXT_CHARS;

use crate::provider::{ModelProvider, ObjectRequest};

/// What the generator knows about the patient beyond the current plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatientHistory {
    /// Number of the plan version the suggestion will be based on.
    pub current_version: Option<i32>,
    /// Transcript of the most recent earlier session.
    pub prior_transcript: Option<String>,
}

/// A drafted plan update, before it becomes a suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GeneratedSuggestion {
    pub session_summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_notes: Option<String>,
    pub suggested_changes: PlanContent,
}

impl GeneratedSuggestion {
    /// Decode provider output and check it against the content rules.
    pub fn from_json(value: serde_json::Value) -> Result<Self, GenerationError> {
        let generated: Self = serde_json::from_value(value)
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;
        generated.validate()?;
        Ok(generated)
    }

    /// JSON Schema handed to the provider alongside the prompt.
    pub fn json_schema() -> serde_json::Value {
        let schema = schemars::schema_for!(GeneratedSuggestion);
        serde_json::to_value(schema).unwrap_or(serde_json::Value::Null)
    }

    pub fn validate(&self) -> Result<(), GenerationError> {
        if self.session_summary.trim().is_empty() {
            return Err(GenerationError::Malformed(
                "sessionSummary must not be blank".to_string(),
            ));
        }
        let too_long = |s: &str| s.chars().count() > MAX_TEXT_CHARS;
        if too_long(&self.session_summary)
            || self.progress_notes.as_deref().is_some_and(too_long)
        {
            return Err(GenerationError::Malformed(format!(
                "summary text exceeds {MAX_TEXT_CHARS} characters"
            )));
        }
        self.suggested_changes
            .validate()
            .map_err(|e| GenerationError::Malformed(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("generation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("generation provider failed: {0:#}")]
    Provider(anyhow::Error),

    #[error("generated output does not match the schema: {0}")]
    Malformed(String),
}

/// Produces a suggested change set for a transcript.
#[async_trait]
pub trait SuggestionGenerator: Send + Sync {
    async fn generate(
        &self,
        transcript: &str,
        current_plan: Option<&PlanContent>,
        history: Option<&PatientHistory>,
    ) -> Result<GeneratedSuggestion, GenerationError>;
}

// Compile-time assertion: SuggestionGenerator must be usable as `dyn SuggestionGenerator`.
const _: () = {
    fn _assert_object_safe(_: &dyn SuggestionGenerator) {}
};

/// Generator backed by a [`ModelProvider`].
pub struct ModelSuggestionGenerator {
    provider: Arc<dyn ModelProvider>,
    timeout: Duration,
    excerpt_chars: usize,
}

impl ModelSuggestionGenerator {
    pub fn new(provider: Arc<dyn ModelProvider>, timeout: Duration, excerpt_chars: usize) -> Self {
        Self {
            provider,
            timeout,
            excerpt_chars,
        }
    }
}

#[async_trait]
impl SuggestionGenerator for ModelSuggestionGenerator {
    async fn generate(
        &self,
        transcript: &str,
        current_plan: Option<&PlanContent>,
        history: Option<&PatientHistory>,
    ) -> Result<GeneratedSuggestion, GenerationError> {
        let request = ObjectRequest {
            schema_name: "GeneratedSuggestion".to_string(),
            schema: GeneratedSuggestion::json_schema(),
            system: prompt::build_system_prompt(),
            prompt: prompt::build_context_prompt(
                transcript,
                current_plan,
                history,
                self.excerpt_chars,
            ),
        };

        let value = tokio::time::timeout(self.timeout, self.provider.generate_object(&request))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout))?
            .map_err(GenerationError::Provider)?;

        match GeneratedSuggestion::from_json(value) {
            Ok(generated) => {
                debug!(provider = self.provider.name(), "suggestion generated");
                Ok(generated)
            }
            Err(e) => {
                warn!(provider = self.provider.name(), error = %e, "discarding invalid generator output");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;
    use serde_json::json;

    use super::*;

    /// Replies with a fixed value and records the last request.
    struct Recording {
        reply: serde_json::Value,
        seen: Mutex<Option<ObjectRequest>>,
    }

    #[async_trait]
    impl ModelProvider for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn generate_object(&self, request: &ObjectRequest) -> Result<serde_json::Value> {
            *self.seen.lock().unwrap() = Some(request.clone());
            Ok(self.reply.clone())
        }
    }

    fn generator(reply: serde_json::Value) -> (Arc<Recording>, ModelSuggestionGenerator) {
        let provider = Arc::new(Recording {
            reply,
            seen: Mutex::new(None),
        });
        let generator =
            ModelSuggestionGenerator::new(provider.clone(), Duration::from_secs(5), 4000);
        (provider, generator)
    }

    #[tokio::test]
    async fn valid_output_is_returned() {
        let (provider, generator) = generator(json!({
            "sessionSummary": "Discussed breathing techniques.",
            "suggestedChanges": { "homework": "Practice breathing" }
        }));
        let generated = generator.generate("transcript", None, None).await.unwrap();
        assert_eq!(
            generated.suggested_changes.homework.as_deref(),
            Some("Practice breathing")
        );
        let request = provider.seen.lock().unwrap().clone().unwrap();
        assert_eq!(request.schema_name, "GeneratedSuggestion");
        assert!(request.prompt.contains("new client"));
    }

    #[tokio::test]
    async fn schema_mismatch_is_an_error() {
        let (_, generator) = generator(json!({
            "sessionSummary": "ok",
            "suggestedChanges": { "mood": "better" }
        }));
        let err = generator.generate("transcript", None, None).await.unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn invalid_content_is_an_error() {
        let (_, generator) = generator(json!({
            "sessionSummary": "ok",
            "suggestedChanges": { "riskScore": 11 }
        }));
        let err = generator.generate("transcript", None, None).await.unwrap_err();
        assert!(err.to_string().contains("riskScore"), "got {err}");
    }

    #[tokio::test]
    async fn blank_summary_is_an_error() {
        let (_, generator) = generator(json!({
            "sessionSummary": "  ",
            "suggestedChanges": {}
        }));
        assert!(generator.generate("transcript", None, None).await.is_err());
    }

    #[tokio::test]
    async fn history_is_passed_into_the_prompt() {
        let (provider, generator) = generator(json!({
            "sessionSummary": "Follow-up.",
            "suggestedChanges": {}
        }));
        let plan = PlanContent {
            homework: Some("Sleep diary".to_string()),
            ..PlanContent::default()
        };
        let history = PatientHistory {
            current_version: Some(2),
            prior_transcript: Some("last week we talked about sleep".to_string()),
        };
        generator
            .generate("transcript", Some(&plan), Some(&history))
            .await
            .unwrap();
        let prompt = provider.seen.lock().unwrap().clone().unwrap().prompt;
        assert!(prompt.contains("Homework: Sleep diary"));
        assert!(prompt.contains("last week we talked about sleep"));
    }
}
