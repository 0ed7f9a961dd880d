//! Application configuration options

use std::collections::HashMap;
use std::path::PathBuf;

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::storage::settings::Settings;

/// Settings file read when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "deploy.json";

/// Parse `--key=value` and `--flag` arguments. Anything else is ignored.
pub fn parse_args<I>(args: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = String>,
{
    let mut cli_args = HashMap::new();
    for arg in args {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }
    cli_args
}

/// Command line overrides
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOptions {
    pub config_file: Option<PathBuf>,
    pub credentials_file: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
    pub watch: bool,
}

impl CliOptions {
    pub fn from_args(cli_args: &HashMap<String, String>) -> Result<Self, DeployError> {
        let log_level = cli_args
            .get("log-level")
            .map(|level| level.parse::<LogLevel>())
            .transpose()
            .map_err(DeployError::ConfigError)?;

        Ok(Self {
            config_file: cli_args.get("config").map(PathBuf::from),
            credentials_file: cli_args.get("credentials").map(PathBuf::from),
            log_level,
            watch: cli_args.get("watch").is_some_and(|v| v != "false"),
        })
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }
}

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub settings: Settings,
}

impl AppOptions {
    /// Read the settings file and apply the command line overrides on top.
    pub async fn load(cli: &CliOptions) -> Result<Self, DeployError> {
        let path = cli.config_path();
        let settings = File::new(&path)
            .read_json::<Settings>()
            .await
            .map_err(|e| {
                DeployError::ConfigError(format!(
                    "Unable to read settings file {}: {}",
                    path.display(),
                    e
                ))
            })?;
        Ok(Self::with_overrides(settings, cli))
    }

    pub fn with_overrides(mut settings: Settings, cli: &CliOptions) -> Self {
        if let Some(credentials_file) = &cli.credentials_file {
            settings.credentials_file = Some(credentials_file.clone());
        }
        if let Some(log_level) = &cli.log_level {
            settings.log_level = log_level.clone();
        }
        if cli.watch {
            settings.watch.enabled = true;
        }
        Self { settings }
    }
}
