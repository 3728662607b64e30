//! `pw-record` children, one per capture target.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use jamwire::producer::terminate_child;
use tokio::process::{Child, Command};
use tracing::info;

const STOP_GRACE: Duration = Duration::from_secs(2);

/// A running capture of one target node.
pub struct Recorder {
    name: String,
    path: PathBuf,
    child: Child,
}

/// Spawn `pw-record` against a target.
pub fn start(name: &str, target: &str, path: PathBuf) -> Result<Recorder> {
    let child = Command::new("pw-record")
        .arg("--target")
        .arg(target)
        .arg(&path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("spawning pw-record for '{name}'"))?;
    info!(name, target, path = %path.display(), "recording");
    Ok(Recorder {
        name: name.to_string(),
        path,
        child,
    })
}

impl Recorder {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Stop the capture and hand back its label and output path.
    pub async fn stop(mut self) -> (String, PathBuf) {
        terminate_child(&self.name, &mut self.child, STOP_GRACE).await;
        (self.name, self.path)
    }
}
