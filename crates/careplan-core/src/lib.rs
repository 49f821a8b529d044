//! Safety-gated treatment plan suggestions and the plan version ledger.

pub mod config;
pub mod error;
pub mod generate;
pub mod ledger;
pub mod provider;
pub mod safety;
pub mod store;
pub mod transcript;
pub mod workflow;

pub use config::WorkflowConfig;
pub use error::{WorkflowError, WorkflowResult};
pub use ledger::PlanLedger;
pub use workflow::{CreatedSuggestion, SuggestionWorkflow};
