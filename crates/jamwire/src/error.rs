//! Failure taxonomy for routing operations.
//!
//! Component operations fail fast with a specific kind; the session
//! orchestrator is the only place that decides whether a failure aborts
//! setup (always) or is merely recorded (always, during teardown).

use std::fmt;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The audio server cannot be reached. Fatal: no routing is possible.
    #[error("audio server unreachable: {0}")]
    ServerUnavailable(String),

    /// A requested virtual node never became visible in the graph.
    #[error("virtual sink '{name}' did not appear within {timeout:?}")]
    NodeCreationTimeout { name: String, timeout: Duration },

    /// The input port is exclusively claimed by an existing link.
    #[error("input port '{input}' is exclusively claimed; cannot link from '{output}'")]
    LinkConflict { output: String, input: String },

    /// Any other server rejection of a link request.
    #[error("link {output} -> {input} rejected: {reason}")]
    LinkFailed {
        output: String,
        input: String,
        reason: String,
    },

    /// A producer process started but its output node never showed up.
    #[error("source matching {pattern} never appeared within {timeout:?}")]
    SourceNeverAppeared { pattern: String, timeout: Duration },

    /// A producer process could not be spawned at all.
    #[error("failed to start producer '{label}': {reason}")]
    ProducerSpawnFailed { label: String, reason: String },
}

/// One failed teardown step. Recorded, never escalated - teardown keeps
/// going regardless.
#[derive(Debug)]
pub struct TeardownFailure {
    pub step: String,
    pub error: String,
}

impl fmt::Display for TeardownFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

/// Outcome of a teardown pass.
#[derive(Debug, Default)]
pub struct TeardownReport {
    pub failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    pub fn clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn record(&mut self, step: impl Into<String>, error: impl fmt::Display) {
        let step = step.into();
        let error = error.to_string();
        tracing::warn!(%step, %error, "teardown step failed, continuing");
        self.failures.push(TeardownFailure { step, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_collects_without_escalating() {
        let mut report = TeardownReport::default();
        assert!(report.clean());

        report.record("unlink a -> b", "no such link");
        report.record("destroy sink", "module vanished");

        assert!(!report.clean());
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].step, "unlink a -> b");
        assert_eq!(
            report.failures[1].to_string(),
            "destroy sink: module vanished"
        );
    }
}
