//! Live graph snapshots via the PipeWire registry.
//!
//! Runs a short-lived main loop, accumulates registry globals into a
//! `Graph`, and quits on a timer. The loop objects are `!Send`, so callers
//! on async runtimes should take snapshots on a blocking task.

use anyhow::{Context as _, Result};
use pipewire::{
    context::ContextRc, main_loop::MainLoopRc, registry::GlobalObject, types::ObjectType,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Once;
use std::time::Duration;

use crate::types::{ChannelTag, Graph, LinkInfo, Node, NodeClass, Port, PortDirection};

static PIPEWIRE_INIT: Once = Once::new();

/// How long the registry is given to enumerate before the loop quits.
const ENUMERATION_WINDOW: Duration = Duration::from_millis(100);

/// One-shot reader of the live object graph.
pub struct Inspector;

impl Inspector {
    pub fn new() -> Self {
        PIPEWIRE_INIT.call_once(|| {
            pipewire::init();
        });
        Self
    }

    /// Enumerate nodes, ports, and links as of this instant.
    ///
    /// Eventually consistent: no locking against the server, and the result
    /// can be stale by the time it is acted on.
    pub fn snapshot(&self) -> Result<Graph> {
        let graph = Rc::new(RefCell::new(Graph::default()));

        let mainloop = MainLoopRc::new(None).context("failed to create PipeWire main loop")?;
        let context = ContextRc::new(&mainloop, None).context("failed to create PipeWire context")?;
        let core = context
            .connect_rc(None)
            .context("failed to connect to PipeWire")?;
        let registry = core
            .get_registry_rc()
            .context("failed to get PipeWire registry")?;

        let graph_clone = graph.clone();
        let _listener = registry
            .add_listener_local()
            .global(move |global| {
                collect_global(&graph_clone, global);
            })
            .register();

        let mainloop_weak = mainloop.downgrade();
        let timer = mainloop.loop_().add_timer(move |_| {
            if let Some(mainloop) = mainloop_weak.upgrade() {
                mainloop.quit();
            }
        });
        timer
            .update_timer(Some(ENUMERATION_WINDOW), None)
            .into_result()
            .context("failed to arm enumeration timer")?;

        mainloop.run();

        let result = graph.borrow().clone();
        tracing::debug!(
            nodes = result.nodes.len(),
            ports = result.ports.len(),
            links = result.links.len(),
            "graph snapshot"
        );
        Ok(result)
    }
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_global<P: AsRef<pipewire::spa::utils::dict::DictRef>>(
    graph: &Rc<RefCell<Graph>>,
    global: &GlobalObject<P>,
) {
    let props = match &global.props {
        Some(p) => p.as_ref(),
        None => return,
    };

    match global.type_ {
        ObjectType::Node => {
            let media_class = props.get(*pipewire::keys::MEDIA_CLASS).map(String::from);
            let class = NodeClass::from_props(
                media_class.as_deref(),
                props.get("node.virtual"),
                props.get("factory.name"),
            );
            let node = Node {
                id: global.id,
                name: props
                    .get(*pipewire::keys::NODE_NAME)
                    .map(String::from)
                    .unwrap_or_else(|| format!("node-{}", global.id)),
                description: props.get(*pipewire::keys::NODE_DESCRIPTION).map(String::from),
                media_class,
                media_role: props.get(*pipewire::keys::MEDIA_ROLE).map(String::from),
                class,
            };
            graph.borrow_mut().nodes.push(node);
        }
        ObjectType::Port => {
            let node_id = props
                .get(*pipewire::keys::NODE_ID)
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let direction = match props.get(*pipewire::keys::PORT_DIRECTION) {
                Some("in") => PortDirection::In,
                _ => PortDirection::Out,
            };
            let name = props
                .get(*pipewire::keys::PORT_NAME)
                .map(String::from)
                .unwrap_or_else(|| format!("port-{}", global.id));
            let channel = props
                .get(*pipewire::keys::AUDIO_CHANNEL)
                .map(ChannelTag::from_channel_prop)
                .unwrap_or_else(|| ChannelTag::from_port_name(&name));
            let port = Port {
                id: global.id,
                node_id,
                name,
                direction,
                channel,
            };
            graph.borrow_mut().ports.push(port);
        }
        ObjectType::Link => {
            let parse = |key: &str| props.get(key).and_then(|s| s.parse().ok()).unwrap_or(0);
            let link = LinkInfo {
                id: global.id,
                output_node_id: parse(*pipewire::keys::LINK_OUTPUT_NODE),
                output_port_id: parse(*pipewire::keys::LINK_OUTPUT_PORT),
                input_node_id: parse(*pipewire::keys::LINK_INPUT_NODE),
                input_port_id: parse(*pipewire::keys::LINK_INPUT_PORT),
            };
            graph.borrow_mut().links.push(link);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Needs a running PipeWire instance; prints what it finds rather than
    // asserting on machine-specific state.
    #[test]
    #[ignore]
    fn test_live_snapshot() {
        let inspector = Inspector::new();
        match inspector.snapshot() {
            Ok(graph) => {
                println!(
                    "{} nodes, {} ports, {} links",
                    graph.nodes.len(),
                    graph.ports.len(),
                    graph.links.len()
                );
                for node in &graph.nodes {
                    println!("  [{}] {} ({})", node.id, node.name, node.class);
                }
            }
            Err(e) => println!("snapshot failed (no server?): {e}"),
        }
    }
}
