//! Auto-retry module

pub mod classifier;
pub mod coordinator;
