//! Financial Report Orchestrator
//!
//! Turns a natural-language request about financial sales data into a
//! report:
//! - Plans an ordered sequence of capability invocations
//! - Asks one clarification question when the request is too vague
//! - Runs each step against a shared, attributed context store
//! - Keeps going past failed steps whose outputs nobody needs
//! - Packages narrative, metrics, visuals and a data preview
//!
//! UNIFIED LOOP:
//! REQUEST → PLAN → {CLARIFY | EXECUTE → AGGREGATE}

pub mod agent;
pub mod aggregate;
pub mod api;
pub mod capabilities;
pub mod clarification;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod gemini;
pub mod models;
pub mod planner;
pub mod runner;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::Result;

// Re-export common types
pub use agent::Orchestrator;
pub use config::OrchestratorConfig;
pub use models::*;
