//! In-memory caches

pub mod workflow;
