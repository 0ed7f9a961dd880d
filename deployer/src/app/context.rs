//! Orchestrator context passed to every deployment pass

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, info_span, Span};

use crate::utils::generate_uuid;

/// Per-pass logging handle and start time
#[derive(Debug, Clone)]
pub struct DeployContext {
    /// Identifies the pass in the structured log
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    started: Instant,
    span: Span,
}

impl DeployContext {
    /// Start a new deployment pass
    pub fn start() -> Self {
        let run_id = generate_uuid();
        let span = info_span!("deployment", run_id = %run_id);
        Self {
            run_id,
            started_at: Utc::now(),
            started: Instant::now(),
            span,
        }
    }

    /// Span every log line of the pass is recorded under
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Time since the pass started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Log the end of the pass and return its duration
    pub fn finish(&self) -> Duration {
        let elapsed = self.elapsed();
        self.span.in_scope(|| {
            info!(
                milestone = true,
                "Deployment pass started at {} finished in {:.1}s",
                self.started_at.to_rfc3339(),
                elapsed.as_secs_f64()
            );
        });
        elapsed
    }
}
