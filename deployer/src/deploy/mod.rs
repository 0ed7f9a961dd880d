//! Deployment module

pub mod compose;
pub mod docker;
pub mod fsm;
pub mod input;
pub mod orchestrator;
pub mod structure;
pub mod transfer;
