//! Point-to-point link management.
//!
//! The controller tracks every link it creates, in creation order, and is
//! the only component allowed to remove them. Pre-existing links are never
//! tracked and never destroyed. `link_all` either fully wires a set of
//! sources or leaves nothing behind: on a partial failure it unwinds every
//! link the call created before propagating the error.

use std::sync::Arc;

use jamgraph::{Graph, Node, PortDirection};
use tracing::{debug, info, warn};

use crate::error::{RouteError, TeardownReport};
use crate::server::{AudioServer, LinkOutcome};

/// A link this session created, identified by the qualified port-name
/// pair the server accepts for disconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedLink {
    pub output: String,
    pub input: String,
}

pub struct LinkController {
    server: Arc<dyn AudioServer>,
    owned: Vec<OwnedLink>,
}

impl LinkController {
    pub fn new(server: Arc<dyn AudioServer>) -> Self {
        Self {
            server,
            owned: Vec::new(),
        }
    }

    /// Links created by this session, in creation order.
    pub fn owned(&self) -> &[OwnedLink] {
        &self.owned
    }

    /// Create a link. Linking an already-linked identical pair succeeds
    /// without taking ownership of the pre-existing link.
    pub async fn link(&mut self, output: &str, input: &str) -> Result<OwnedLink, RouteError> {
        let link = OwnedLink {
            output: output.to_string(),
            input: input.to_string(),
        };
        match self.server.connect_ports(output, input).await? {
            LinkOutcome::Created => {
                debug!(%output, %input, "linked");
                self.owned.push(link.clone());
            }
            LinkOutcome::AlreadyLinked => {
                debug!(%output, %input, "already linked, leaving as found");
            }
        }
        Ok(link)
    }

    /// Remove a link. Absence is success.
    pub async fn unlink(&mut self, link: &OwnedLink) -> Result<(), RouteError> {
        self.server
            .disconnect_ports(&link.output, &link.input)
            .await?;
        self.owned.retain(|l| l != link);
        Ok(())
    }

    /// Wire every output port of each source to the channel-appropriate
    /// input ports of `sink`. Mono outputs fan out to both channels;
    /// stereo outputs map left-to-left and right-to-right.
    ///
    /// All-or-nothing: any failure unwinds the links this call created,
    /// then propagates.
    pub async fn link_all(
        &mut self,
        graph: &Graph,
        sources: &[&Node],
        sink: &Node,
    ) -> Result<Vec<OwnedLink>, RouteError> {
        let sink_inputs = graph.ports_of(sink.id, PortDirection::In);
        let mut created = Vec::new();

        for source in sources {
            for out_port in graph.ports_of(source.id, PortDirection::Out) {
                for in_port in &sink_inputs {
                    if !out_port.channel.pairs_with(&in_port.channel) {
                        continue;
                    }
                    let (Some(output), Some(input)) = (
                        graph.qualified_port_name(out_port),
                        graph.qualified_port_name(in_port),
                    ) else {
                        continue;
                    };
                    match self.server.connect_ports(&output, &input).await {
                        Ok(LinkOutcome::Created) => {
                            debug!(%output, %input, "linked");
                            let link = OwnedLink { output, input };
                            self.owned.push(link.clone());
                            created.push(link);
                        }
                        Ok(LinkOutcome::AlreadyLinked) => {
                            debug!(%output, %input, "already linked, leaving as found");
                        }
                        Err(e) => {
                            warn!(error = %e, unwinding = created.len(), "link failed, unwinding");
                            self.unwind(&created).await;
                            return Err(e);
                        }
                    }
                }
            }
        }

        info!(source_count = sources.len(), sink = %sink.name, links = created.len(), "sources wired to sink");
        Ok(created)
    }

    /// Disconnect existing links from `source`'s outputs to `target`'s
    /// inputs that this session did not create - the auto-links a session
    /// manager wires up for new streams. These are intentionally not
    /// restored at teardown; the session manager recreates them for any
    /// new stream.
    pub async fn unpatch_between(
        &mut self,
        graph: &Graph,
        source: &Node,
        target: &Node,
    ) -> Result<usize, RouteError> {
        let mut removed = 0;
        for existing in &graph.links {
            if existing.output_node_id != source.id || existing.input_node_id != target.id {
                continue;
            }
            let (Some(out_port), Some(in_port)) = (
                graph.port_by_id(existing.output_port_id),
                graph.port_by_id(existing.input_port_id),
            ) else {
                continue;
            };
            let (Some(output), Some(input)) = (
                graph.qualified_port_name(out_port),
                graph.qualified_port_name(in_port),
            ) else {
                continue;
            };
            self.server.disconnect_ports(&output, &input).await?;
            debug!(%output, %input, "unpatched auto-created link");
            removed += 1;
        }
        if removed > 0 {
            info!(source = %source.name, target = %target.name, removed, "unpatched auto-links");
        }
        Ok(removed)
    }

    /// Remove every owned link in reverse creation order. Best-effort:
    /// failures are recorded and the pass continues.
    pub async fn unlink_all_reverse(&mut self, report: &mut TeardownReport) {
        while let Some(link) = self.owned.pop() {
            if let Err(e) = self
                .server
                .disconnect_ports(&link.output, &link.input)
                .await
            {
                report.record(format!("unlink {} -> {}", link.output, link.input), e);
            } else {
                debug!(output = %link.output, input = %link.input, "unlinked");
            }
        }
    }

    async fn unwind(&mut self, created: &[OwnedLink]) {
        for link in created.iter().rev() {
            if let Err(e) = self
                .server
                .disconnect_ports(&link.output, &link.input)
                .await
            {
                warn!(output = %link.output, input = %link.input, error = %e, "unwind step failed");
            }
            self.owned.retain(|l| l != link);
        }
    }
}
