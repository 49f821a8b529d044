//! Persistence for treatment plans, their version ledger, and suggestions.

pub mod config;
pub mod content;
pub mod error;
pub mod models;
pub mod pool;
pub mod queries;

pub use content::{ContentError, PlanContent};
pub use error::{StoreError, StoreResult};
