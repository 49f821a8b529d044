//! The contract a generation provider must satisfy.
//!
//! The classifier and the generator never talk to a model vendor directly.
//! They hand an [`ObjectRequest`] (instructions plus the JSON Schema of the
//! object they expect back) to a [`ModelProvider`] and validate whatever
//! comes back themselves.
//!
//! ```text
//! SafetyClassifier ----+
//!                      |  ObjectRequest { system, prompt, schema }
//! SuggestionGenerator -+--------------------------------------------> ModelProvider
//!                                                                        |
//!                      <---------------- serde_json::Value --------------+
//! ```

pub mod command;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use command::CommandProvider;

/// A request for a single structured object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRequest {
    /// Name of the expected object, e.g. `"SafetyCheckResult"`.
    pub schema_name: String,
    /// JSON Schema the returned object must satisfy.
    pub schema: serde_json::Value,
    /// System instructions.
    pub system: String,
    /// User-turn content.
    pub prompt: String,
}

/// Adapter interface for structured-output model calls.
///
/// Implementations may take minutes to answer. Callers bound each call with
/// a timeout and may drop the future to cancel it, so implementations must
/// release their resources on drop.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable name for logs (e.g. `"command:/usr/local/bin/llm"`).
    fn name(&self) -> &str;

    /// Produce one JSON object for the request.
    ///
    /// Returning a value does not imply it matches the schema; callers
    /// validate.
    async fn generate_object(&self, request: &ObjectRequest) -> Result<serde_json::Value>;
}

/// Stand-in used when no provider is configured. Every call fails, so the
/// classifier reports itself unavailable and analysis is blocked.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredProvider;

#[async_trait]
impl ModelProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn generate_object(&self, _request: &ObjectRequest) -> Result<serde_json::Value> {
        anyhow::bail!("no model provider is configured")
    }
}

// Compile-time assertion: ModelProvider must be usable as `dyn ModelProvider`.
const _: () = {
    fn _assert_object_safe(_: &dyn ModelProvider) {}
};
