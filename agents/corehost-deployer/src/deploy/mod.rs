//! Deployment lifecycle
//!
//! Stages of a hosted agent deployment, the record they share, and the
//! orchestrator that runs them in order.

pub mod cleanup;
pub mod events;
pub mod invoke;
pub mod launch;
pub mod orchestrator;
pub mod poll;
pub mod provision;
pub mod record;
pub mod store;
