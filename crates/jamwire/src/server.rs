//! Command seam to the audio server.
//!
//! Everything the session does to the server goes through the
//! `AudioServer` trait: graph snapshots on the read side, module/link/gain
//! requests on the write side. The production backend reads through the
//! PipeWire registry and writes through the stock CLI surface (`pactl`,
//! `pw-link`); tests substitute an in-memory implementation.

use std::fmt;

use async_trait::async_trait;
use jamgraph::{Graph, Inspector};
use tokio::process::Command;
use tracing::debug;

use crate::error::RouteError;

/// Handle for a loaded null-sink module; unloading it destroys the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleId(pub u32);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    /// The identical pair was already linked. Success, not an error.
    AlreadyLinked,
}

#[async_trait]
pub trait AudioServer: Send + Sync {
    /// Current object graph. Eventually consistent - never cache a
    /// snapshot across operations.
    async fn snapshot(&self) -> Result<Graph, RouteError>;

    /// Load a null-sink module. The node appears asynchronously; callers
    /// confirm visibility with fresh snapshots before using it.
    async fn load_null_sink(&self, name: &str, channels: u32) -> Result<ModuleId, RouteError>;

    /// Unload a module. Already-gone modules are a no-op.
    async fn unload_module(&self, id: ModuleId) -> Result<(), RouteError>;

    /// Link two ports by qualified name (`node:port`).
    async fn connect_ports(&self, output: &str, input: &str) -> Result<LinkOutcome, RouteError>;

    /// Remove a link. Absence is success: the desired end state holds.
    async fn disconnect_ports(&self, output: &str, input: &str) -> Result<(), RouteError>;

    /// Set a sink's volume, 0.0..=1.0.
    async fn set_sink_gain(&self, sink: &str, gain: f32) -> Result<(), RouteError>;

    /// Set a capture source's volume, 0.0..=1.0.
    async fn set_source_gain(&self, source: &str, gain: f32) -> Result<(), RouteError>;

    /// Name of the current default sink, if the server reports one.
    async fn default_sink(&self) -> Result<Option<String>, RouteError>;
}

/// Production backend against a live PipeWire instance.
pub struct PwCliServer;

impl PwCliServer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PwCliServer {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(program: &str, args: &[&str]) -> Result<std::process::Output, RouteError> {
    debug!(%program, ?args, "server command");
    Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| RouteError::ServerUnavailable(format!("{program}: {e}")))
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Gain as the whole percentage `pactl` expects.
fn percent(gain: f32) -> u32 {
    (gain.clamp(0.0, 1.0) * 100.0).round() as u32
}

#[async_trait]
impl AudioServer for PwCliServer {
    async fn snapshot(&self) -> Result<Graph, RouteError> {
        // The registry loop is !Send; run it off the async runtime.
        tokio::task::spawn_blocking(|| Inspector::new().snapshot())
            .await
            .map_err(|e| RouteError::ServerUnavailable(format!("snapshot task: {e}")))?
            .map_err(|e| RouteError::ServerUnavailable(e.to_string()))
    }

    async fn load_null_sink(&self, name: &str, channels: u32) -> Result<ModuleId, RouteError> {
        let sink_name = format!("sink_name={name}");
        let channel_count = format!("channels={channels}");
        let props = format!("sink_properties=device.description={name}");
        let output = run(
            "pactl",
            &[
                "load-module",
                "module-null-sink",
                &sink_name,
                &channel_count,
                &props,
            ],
        )
        .await?;
        if !output.status.success() {
            return Err(RouteError::ServerUnavailable(stderr_of(&output)));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let id = stdout.trim().parse().map_err(|_| {
            RouteError::ServerUnavailable(format!(
                "unexpected load-module reply: {}",
                stdout.trim()
            ))
        })?;
        Ok(ModuleId(id))
    }

    async fn unload_module(&self, id: ModuleId) -> Result<(), RouteError> {
        let output = run("pactl", &["unload-module", &id.to_string()]).await?;
        let stderr = stderr_of(&output);
        if output.status.success() || stderr.contains("No such") {
            Ok(())
        } else {
            Err(RouteError::ServerUnavailable(stderr))
        }
    }

    async fn connect_ports(&self, output: &str, input: &str) -> Result<LinkOutcome, RouteError> {
        let result = run("pw-link", &[output, input]).await?;
        if result.status.success() {
            return Ok(LinkOutcome::Created);
        }
        let stderr = stderr_of(&result);
        if stderr.contains("File exists") {
            Ok(LinkOutcome::AlreadyLinked)
        } else if stderr.contains("busy") {
            Err(RouteError::LinkConflict {
                output: output.to_string(),
                input: input.to_string(),
            })
        } else {
            Err(RouteError::LinkFailed {
                output: output.to_string(),
                input: input.to_string(),
                reason: stderr,
            })
        }
    }

    async fn disconnect_ports(&self, output: &str, input: &str) -> Result<(), RouteError> {
        let result = run("pw-link", &["-d", output, input]).await?;
        let stderr = stderr_of(&result);
        if result.status.success() || stderr.contains("No such") || stderr.contains("not found") {
            Ok(())
        } else {
            Err(RouteError::LinkFailed {
                output: output.to_string(),
                input: input.to_string(),
                reason: stderr,
            })
        }
    }

    async fn set_sink_gain(&self, sink: &str, gain: f32) -> Result<(), RouteError> {
        let volume = format!("{}%", percent(gain));
        let output = run("pactl", &["set-sink-volume", sink, &volume]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RouteError::ServerUnavailable(stderr_of(&output)))
        }
    }

    async fn set_source_gain(&self, source: &str, gain: f32) -> Result<(), RouteError> {
        let volume = format!("{}%", percent(gain));
        let output = run("pactl", &["set-source-volume", source, &volume]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(RouteError::ServerUnavailable(stderr_of(&output)))
        }
    }

    async fn default_sink(&self) -> Result<Option<String>, RouteError> {
        let output = run("pactl", &["get-default-sink"]).await?;
        if !output.status.success() {
            return Ok(None);
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!name.is_empty()).then_some(name))
    }
}
