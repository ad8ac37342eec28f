//! HTTP clients for the remote services

pub mod bundler;
pub mod client;
pub mod compiler;
pub mod flags;
pub mod host;
