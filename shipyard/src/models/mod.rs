//! Data models

pub mod artifact;
pub mod bundle;
pub mod deployment;
pub mod snapshot;
pub mod workflow;
