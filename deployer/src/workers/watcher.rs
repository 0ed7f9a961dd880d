//! Local change watcher
//!
//! Polls the input's local files and fires a redeploy once they have
//! changed and then stayed quiet for the debounce period.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{Duration, UNIX_EPOCH};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::storage::settings::WatchSettings;
use crate::utils::sha256_hash;

/// Watcher worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// File or directory to watch
    pub path: PathBuf,

    /// Directory names left out of the fingerprint
    pub ignored_dirs: Vec<String>,

    /// Polling interval
    pub poll_interval: Duration,

    /// Quiet time required after the last change
    pub debounce: Duration,
}

impl Options {
    pub fn new(path: impl Into<PathBuf>, settings: &WatchSettings) -> Self {
        Self {
            path: path.into(),
            ignored_dirs: Vec::new(),
            poll_interval: Duration::from_secs(settings.poll_interval_secs.max(1)),
            debounce: Duration::from_secs(settings.debounce_secs),
        }
    }
}

/// Hash of the path, size and modification time of every watched file.
pub async fn fingerprint(path: &Path, ignored_dirs: &[&str]) -> Result<String, DeployError> {
    let metadata = fs::metadata(path).await?;
    let files = if metadata.is_dir() {
        Dir::new(path).list_files_recursive(ignored_dirs).await?
    } else {
        vec![path.to_path_buf()]
    };

    let mut summary = String::new();
    for file in files {
        let metadata = fs::metadata(&file).await?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let relative = file.strip_prefix(path).unwrap_or(&file);
        summary.push_str(&format!("{}:{}:{}\n", relative.display(), metadata.len(), modified));
    }
    Ok(sha256_hash(summary.as_bytes()))
}

/// Run the watcher worker
pub async fn run<S, F, C, R>(
    options: &Options,
    mut on_change: C,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
    C: FnMut() -> R,
    R: Future<Output = ()>,
{
    info!("Watching {} for changes...", options.path.display());
    let ignored: Vec<&str> = options.ignored_dirs.iter().map(String::as_str).collect();

    let mut last = match fingerprint(&options.path, &ignored).await {
        Ok(hash) => Some(hash),
        Err(e) => {
            warn!("Unable to fingerprint {}: {}", options.path.display(), e);
            None
        }
    };
    let mut quiet: Option<Duration> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Watcher shutting down...");
                return;
            }
            _ = sleep_fn(options.poll_interval) => {}
        }

        let current = match fingerprint(&options.path, &ignored).await {
            Ok(hash) => hash,
            Err(e) => {
                warn!("Unable to fingerprint {}: {}", options.path.display(), e);
                continue;
            }
        };

        if last.as_deref() != Some(current.as_str()) {
            debug!("Change detected in {}", options.path.display());
            last = Some(current);
            quiet = Some(Duration::ZERO);
            continue;
        }

        if let Some(elapsed) = quiet {
            let elapsed = elapsed + options.poll_interval;
            if elapsed >= options.debounce {
                info!("Changes settled, redeploying...");
                quiet = None;
                on_change().await;
            } else {
                quiet = Some(elapsed);
            }
        }
    }
}
