//! External source processes.
//!
//! Some sources don't exist until a producer process runs (a phone-mirror
//! bridge, for instance). Starting the process gives no guarantee about
//! its audio node: the bootstrapper polls fresh snapshots until a matching
//! node appears or the timeout expires, and a producer whose node never
//! appears must be stopped by the caller - no leaked children.

use std::process::Stdio;
use std::time::Duration;

use jamgraph::{Node, Pattern};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::RouteError;
use crate::server::AudioServer;

/// How long a producer gets to register its output node.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const DISCOVERY_POLL_INTERVAL: Duration = Duration::from_millis(250);
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Invocation of an auxiliary source process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerSpec {
    /// Display label for logs and errors.
    pub label: String,
    /// argv; the first element is the program.
    pub command: Vec<String>,
    /// Pattern the producer's output node is expected to match.
    pub node_pattern: Pattern,
    pub discovery_timeout: Duration,
}

/// A running producer owned by the session.
#[derive(Debug)]
pub struct ProducerHandle {
    label: String,
    child: Child,
}

/// Spawn a producer. The child is killed if the handle is dropped without
/// a proper stop, so a panicking session can't leak it.
pub fn start(spec: &ProducerSpec) -> Result<ProducerHandle, RouteError> {
    let (program, args) = spec
        .command
        .split_first()
        .ok_or_else(|| RouteError::ProducerSpawnFailed {
            label: spec.label.clone(),
            reason: "empty command".to_string(),
        })?;
    let child = Command::new(program)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RouteError::ProducerSpawnFailed {
            label: spec.label.clone(),
            reason: e.to_string(),
        })?;
    info!(label = %spec.label, pid = child.id(), "started producer");
    Ok(ProducerHandle {
        label: spec.label.clone(),
        child,
    })
}

/// Poll snapshots until a node matching `pattern` appears.
pub async fn await_output_node(
    server: &dyn AudioServer,
    pattern: &Pattern,
    timeout: Duration,
) -> Result<Node, RouteError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let graph = server.snapshot().await?;
        if let Some(node) = pattern.find_first(&graph) {
            debug!(%pattern, node = %node.name, "producer node appeared");
            return Ok(node.clone());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(RouteError::SourceNeverAppeared {
                pattern: pattern.to_string(),
                timeout,
            });
        }
        tokio::time::sleep(DISCOVERY_POLL_INTERVAL).await;
    }
}

impl ProducerHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Graceful-then-forced stop: SIGTERM, bounded wait, SIGKILL.
    pub async fn stop(mut self) {
        terminate_child(&self.label, &mut self.child, STOP_GRACE).await;
    }
}

/// Terminate a child the polite way first, so it can flush and close its
/// streams, then force it.
pub async fn terminate_child(label: &str, child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        return; // already reaped
    };
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(label, %status, "child exited"),
        Ok(Err(e)) => warn!(label, error = %e, "wait for child failed"),
        Err(_) => {
            warn!(label, "child ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                warn!(label, error = %e, "kill failed");
            }
        }
    }
}
