//! HTTP Control Plane Module
//!
//! Provides the REST implementation of the service traits.

pub mod adapter;
pub mod protocol;

pub use adapter::HttpControlPlane;
