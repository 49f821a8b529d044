//! Safety gate run on every transcript before any plan content is generated.
//!
//! Classification fails closed: a timeout, provider error, or malformed
//! verdict is reported as `safeToGenerate=false, riskLevel=HIGH`. The
//! [`SafetyClassifier`] contract is infallible for that reason; there is no
//! error a caller could mistake for "go ahead".

pub mod lexicon;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use careplan_db::models::{RiskLevel, SafetyCheckResult};

use crate::provider::{ModelProvider, ObjectRequest};
use crate::transcript;

pub use lexicon::{RiskLexicon, RiskTerm, ScreenResult};

/// Flag attached when the classifier could not produce a verdict.
pub const FLAG_CLASSIFIER_UNAVAILABLE: &str = "classifier_unavailable";
/// Flag attached when asked to classify an empty transcript.
pub const FLAG_EMPTY_TRANSCRIPT: &str = "empty_transcript";

const SYSTEM_PROMPT: &str = "You are a clinical safety reviewer for a psychotherapy practice. \
Read the session transcript and decide whether it is safe for an assistant to draft \
treatment plan updates from it. Mark safeToGenerate=false and riskLevel=HIGH for any \
indication of imminent risk to the client or others: active suicidal ideation, a stated \
plan or means, recent self-harm, threats of violence, or abuse requiring mandated \
reporting. Use MEDIUM for elevated but non-imminent concerns. List each concern as a \
short snake_case riskFlag and explain your reasoning briefly.";

/// Scores a transcript for risk.
#[async_trait]
pub trait SafetyClassifier: Send + Sync {
    async fn classify(&self, transcript: &str) -> SafetyCheckResult;
}

/// Classifier backed by a [`ModelProvider`], preceded by a lexical screen.
pub struct ModelSafetyClassifier {
    provider: Arc<dyn ModelProvider>,
    lexicon: RiskLexicon,
    timeout: Duration,
}

impl ModelSafetyClassifier {
    pub fn new(provider: Arc<dyn ModelProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            lexicon: RiskLexicon::default(),
            timeout,
        }
    }

    pub fn with_lexicon(mut self, lexicon: RiskLexicon) -> Self {
        self.lexicon = lexicon;
        self
    }

    fn request(transcript: &str) -> ObjectRequest {
        let schema = schemars::schema_for!(SafetyCheckResult);
        ObjectRequest {
            schema_name: "SafetyCheckResult".to_string(),
            schema: serde_json::to_value(schema).unwrap_or(serde_json::Value::Null),
            system: SYSTEM_PROMPT.to_string(),
            prompt: format!("Session transcript:\n\n{transcript}"),
        }
    }

    async fn model_verdict(&self, transcript: &str) -> SafetyCheckResult {
        let request = Self::request(transcript);
        match tokio::time::timeout(self.timeout, self.provider.generate_object(&request)).await {
            Ok(Ok(value)) => match serde_json::from_value::<SafetyCheckResult>(value) {
                Ok(verdict) => verdict,
                Err(e) => {
                    warn!(provider = self.provider.name(), error = %e, "malformed classifier output; failing closed");
                    SafetyCheckResult::blocked(
                        FLAG_CLASSIFIER_UNAVAILABLE,
                        format!("classifier returned malformed output: {e}"),
                    )
                }
            },
            Ok(Err(e)) => {
                warn!(provider = self.provider.name(), error = %format!("{e:#}"), "classifier call failed; failing closed");
                SafetyCheckResult::blocked(
                    FLAG_CLASSIFIER_UNAVAILABLE,
                    format!("classifier call failed: {e:#}"),
                )
            }
            Err(_) => {
                warn!(provider = self.provider.name(), timeout_secs = self.timeout.as_secs(), "classifier timed out; failing closed");
                SafetyCheckResult::blocked(
                    FLAG_CLASSIFIER_UNAVAILABLE,
                    format!("classifier timed out after {}s", self.timeout.as_secs()),
                )
            }
        }
    }
}

#[async_trait]
impl SafetyClassifier for ModelSafetyClassifier {
    async fn classify(&self, transcript: &str) -> SafetyCheckResult {
        if transcript.trim().is_empty() {
            return SafetyCheckResult::blocked(FLAG_EMPTY_TRANSCRIPT, "transcript is empty");
        }

        let screen = self.lexicon.screen(transcript);
        let verdict = merge(screen, self.model_verdict(transcript).await);

        info!(
            transcript_sha256 = %transcript::digest(transcript),
            risk_level = %verdict.risk_level,
            safe_to_generate = verdict.safe_to_generate,
            flags = ?verdict.risk_flags,
            "transcript classified"
        );
        verdict
    }
}

/// Combine the lexical screen with the model verdict and normalise.
///
/// The level is the higher of the two, flags are the union, and a `HIGH`
/// level always means `safeToGenerate=false`.
pub fn merge(screen: ScreenResult, verdict: SafetyCheckResult) -> SafetyCheckResult {
    let risk_level = verdict.risk_level.max(screen.level);

    let mut risk_flags = verdict.risk_flags;
    for flag in screen.flags {
        if !risk_flags.contains(&flag) {
            risk_flags.push(flag);
        }
    }

    SafetyCheckResult {
        safe_to_generate: verdict.safe_to_generate && risk_level != RiskLevel::High,
        risk_level,
        risk_flags,
        reasoning: verdict.reasoning,
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};
    use serde_json::json;

    use super::*;

    enum Behaviour {
        Reply(serde_json::Value),
        Fail,
        Hang,
    }

    struct FakeProvider(Behaviour);

    #[async_trait]
    impl ModelProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate_object(&self, request: &ObjectRequest) -> Result<serde_json::Value> {
            assert_eq!(request.schema_name, "SafetyCheckResult");
            match &self.0 {
                Behaviour::Reply(v) => Ok(v.clone()),
                Behaviour::Fail => bail!("connection reset"),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }
    }

    fn classifier(behaviour: Behaviour) -> ModelSafetyClassifier {
        ModelSafetyClassifier::new(Arc::new(FakeProvider(behaviour)), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn model_low_risk_passes() {
        let c = classifier(Behaviour::Reply(json!({
            "safeToGenerate": true,
            "riskLevel": "LOW",
            "riskFlags": []
        })));
        let r = c.classify("We practised grounding exercises.").await;
        assert!(r.safe_to_generate);
        assert_eq!(r.risk_level, RiskLevel::Low);
    }

    #[tokio::test]
    async fn model_high_risk_blocks() {
        let c = classifier(Behaviour::Reply(json!({
            "safeToGenerate": false,
            "riskLevel": "HIGH",
            "riskFlags": ["suicidal_ideation"],
            "reasoning": "Client described a plan."
        })));
        let r = c.classify("transcript").await;
        assert!(!r.safe_to_generate);
        assert_eq!(r.risk_level, RiskLevel::High);
        assert_eq!(r.reasoning.as_deref(), Some("Client described a plan."));
    }

    #[tokio::test]
    async fn provider_error_fails_closed() {
        let r = classifier(Behaviour::Fail).classify("transcript").await;
        assert!(!r.safe_to_generate);
        assert_eq!(r.risk_level, RiskLevel::High);
        assert_eq!(r.risk_flags, vec![FLAG_CLASSIFIER_UNAVAILABLE]);
    }

    #[tokio::test]
    async fn timeout_fails_closed() {
        let r = classifier(Behaviour::Hang).classify("transcript").await;
        assert!(!r.safe_to_generate);
        assert_eq!(r.risk_level, RiskLevel::High);
        assert!(r.reasoning.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn malformed_output_fails_closed() {
        let r = classifier(Behaviour::Reply(json!({ "verdict": "fine" })))
            .classify("transcript")
            .await;
        assert!(!r.safe_to_generate);
        assert_eq!(r.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn inconsistent_high_but_safe_is_normalised() {
        let r = classifier(Behaviour::Reply(json!({
            "safeToGenerate": true,
            "riskLevel": "HIGH"
        })))
        .classify("transcript")
        .await;
        assert!(!r.safe_to_generate);
    }

    #[tokio::test]
    async fn lexical_hit_overrides_lenient_model() {
        let r = classifier(Behaviour::Reply(json!({
            "safeToGenerate": true,
            "riskLevel": "LOW"
        })))
        .classify("Client: honestly I want to die most mornings.")
        .await;
        assert!(!r.safe_to_generate);
        assert_eq!(r.risk_level, RiskLevel::High);
        assert!(r.risk_flags.contains(&"suicidal_ideation".to_string()));
    }

    #[tokio::test]
    async fn empty_lexicon_leaves_the_model_verdict_alone() {
        let r = classifier(Behaviour::Reply(json!({
            "safeToGenerate": true,
            "riskLevel": "LOW"
        })))
        .with_lexicon(RiskLexicon::empty())
        .classify("Client: honestly I want to die most mornings.")
        .await;
        assert!(r.safe_to_generate);
        assert!(r.risk_flags.is_empty());
    }

    #[tokio::test]
    async fn empty_transcript_is_blocked_without_calling_model() {
        // Fail would also block, but with a different flag.
        let r = classifier(Behaviour::Fail).classify("   ").await;
        assert_eq!(r.risk_flags, vec![FLAG_EMPTY_TRANSCRIPT]);
    }

    #[test]
    fn merge_unions_flags() {
        let screen = ScreenResult {
            level: RiskLevel::Medium,
            flags: vec!["hopelessness".to_string(), "self_harm".to_string()],
        };
        let verdict = SafetyCheckResult {
            safe_to_generate: true,
            risk_level: RiskLevel::Low,
            risk_flags: vec!["self_harm".to_string()],
            reasoning: None,
        };
        let merged = merge(screen, verdict);
        assert!(merged.safe_to_generate);
        assert_eq!(merged.risk_level, RiskLevel::Medium);
        assert_eq!(merged.risk_flags, vec!["self_harm", "hopelessness"]);
    }
}
