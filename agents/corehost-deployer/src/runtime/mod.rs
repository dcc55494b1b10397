//! Runtime module
//!
//! This module provides abstraction over the managed runtime service
//! (identities, workloads, agent invocation) through a set of service traits.

pub mod adapter;
pub mod http;
pub mod memory;
