//! Tunables for classification, generation, and committing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Workflow configuration.
///
/// Deserializes from the `[workflow]` table of the CLI config file; every
/// field is optional there and falls back to [`WorkflowConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Upper bound on a single classifier call.
    pub classifier_timeout_secs: u64,
    /// Upper bound on a single generator call. Generation can take minutes.
    pub generation_timeout_secs: u64,
    /// How many times an approval is retried after losing a version race.
    pub max_commit_retries: u32,
    /// Characters of the previous session transcript included in the
    /// generation context.
    pub prior_excerpt_chars: usize,
}

impl WorkflowConfig {
    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_secs.max(1))
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs.max(1))
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            classifier_timeout_secs: 120,
            generation_timeout_secs: 300,
            max_commit_retries: 3,
            prior_excerpt_chars: 4000,
        }
    }
}
