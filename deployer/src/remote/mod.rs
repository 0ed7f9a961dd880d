//! Remote devices and command execution

pub mod client;
pub mod command;
pub mod device;
