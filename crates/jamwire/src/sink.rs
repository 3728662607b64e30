//! Virtual sink lifecycle.
//!
//! The mixing point is a null-sink module. Creation is idempotent: an
//! existing node with the requested name is reused and never destroyed by
//! this session. Creation is asynchronous at the server, so a freshly
//! loaded sink is confirmed by polling snapshots until the node and its
//! input ports are visible.

use std::time::Duration;

use jamgraph::PortDirection;
use tracing::{info, warn};

use crate::error::RouteError;
use crate::server::{AudioServer, ModuleId};

/// Channel count for the mix. Mono sources fan out to both channels.
pub const MIX_CHANNELS: u32 = 2;

/// How long a freshly loaded sink gets to show up in the graph.
pub const CREATE_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);
const CREATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The session's mixing sink.
#[derive(Debug, Clone)]
pub struct VirtualSink {
    pub name: String,
    pub node_id: u32,
    /// Destroy token; only present for sinks this session loaded.
    pub module_id: Option<ModuleId>,
    /// Whether this session created the sink. Reused sinks are never
    /// destroyed at teardown.
    pub created: bool,
}

/// Find or create the virtual sink named `name`.
pub async fn ensure_virtual_sink(
    server: &dyn AudioServer,
    name: &str,
) -> Result<VirtualSink, RouteError> {
    let graph = server.snapshot().await?;
    if let Some(node) = graph.node_by_name(name) {
        info!(name, id = node.id, "virtual sink already exists, reusing");
        return Ok(VirtualSink {
            name: name.to_string(),
            node_id: node.id,
            module_id: None,
            created: false,
        });
    }

    let module_id = server.load_null_sink(name, MIX_CHANNELS).await?;

    let deadline = tokio::time::Instant::now() + CREATE_CONFIRM_TIMEOUT;
    loop {
        let graph = server.snapshot().await?;
        if let Some(node) = graph.node_by_name(name) {
            // The node can appear before its ports do; both must exist
            // before anything links against it.
            if !graph.ports_of(node.id, PortDirection::In).is_empty() {
                info!(name, id = node.id, module = %module_id, "created virtual sink");
                return Ok(VirtualSink {
                    name: name.to_string(),
                    node_id: node.id,
                    module_id: Some(module_id),
                    created: true,
                });
            }
        }
        if tokio::time::Instant::now() >= deadline {
            // Don't leak the half-created module.
            if let Err(e) = server.unload_module(module_id).await {
                warn!(name, error = %e, "could not unload module after confirm timeout");
            }
            return Err(RouteError::NodeCreationTimeout {
                name: name.to_string(),
                timeout: CREATE_CONFIRM_TIMEOUT,
            });
        }
        tokio::time::sleep(CREATE_POLL_INTERVAL).await;
    }
}

/// Destroy a sink this session created. No-op for reused sinks and for
/// sinks that are already gone.
pub async fn destroy_virtual_sink(
    server: &dyn AudioServer,
    sink: &VirtualSink,
) -> Result<(), RouteError> {
    if !sink.created {
        return Ok(());
    }
    match sink.module_id {
        Some(id) => {
            info!(name = %sink.name, module = %id, "destroying virtual sink");
            server.unload_module(id).await
        }
        None => Ok(()),
    }
}
