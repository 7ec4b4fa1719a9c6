pub mod agents;
pub mod health;
pub mod reports;
pub mod stats;
