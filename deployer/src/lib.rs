//! Ajime Deployer Library
//!
//! Discovers edge devices on the local network and deploys a distributed
//! service onto them over SSH.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod remote;
pub mod scanner;
pub mod storage;
pub mod utils;
pub mod workers;
