pub mod patients;
pub mod plans;
pub mod sessions;
pub mod suggestions;
