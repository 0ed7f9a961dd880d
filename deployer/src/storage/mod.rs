//! Persisted configuration and credentials

pub mod credentials;
pub mod settings;
