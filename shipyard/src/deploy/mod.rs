//! Deployment module

pub mod assets;
pub mod attempt;
pub mod fsm;
pub mod guard;
pub mod orchestrator;
pub mod smart;
pub mod upload;
