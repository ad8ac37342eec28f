//! Shipyard Library
//!
//! Deployment orchestration for generated full-stack projects: backend
//! compilation and install, frontend bundling, phased asset upload and
//! automatic retries.

pub mod app;
pub mod cache;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod limiter;
pub mod logs;
pub mod models;
pub mod retry;
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;
