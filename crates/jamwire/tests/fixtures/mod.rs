//! In-memory audio server for exercising the routing stack without a
//! live PipeWire instance.
//!
//! Keeps a real `Graph` that mutations edit, so the code under test sees
//! the same eventually-consistent picture it would get from the server:
//! loaded sinks materialize on a later snapshot, links appear and
//! disappear, and gain changes are recorded per target for assertions.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use jamgraph::{ChannelTag, Graph, LinkInfo, Node, NodeClass, Port, PortDirection};
use jamwire::{AudioServer, LinkOutcome, ModuleId, RouteError};

/// Scripted failure for a connect request.
#[derive(Debug, Clone)]
pub enum ConnectFailure {
    Conflict,
    Rejected(String),
}

struct PendingSink {
    module_id: u32,
    name: String,
    /// Snapshot count at which the sink becomes visible; `u32::MAX`
    /// never materializes.
    appear_at: u32,
}

#[derive(Default)]
struct State {
    graph: Graph,
    pending_sinks: Vec<PendingSink>,
    modules: HashMap<u32, String>,
    sink_gains: HashMap<String, Vec<f32>>,
    source_gains: HashMap<String, Vec<f32>>,
    default_sink: Option<String>,
    fail_connect_output_contains: Vec<(String, ConnectFailure)>,
    snapshot_count: u32,
    /// Extra snapshots before a loaded sink becomes visible.
    sink_appear_delay: u32,
    never_materialize: bool,
    unloads: Vec<u32>,
}

pub struct FakeServer {
    state: Mutex<State>,
    next_id: AtomicU32,
}

impl FakeServer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                sink_appear_delay: 1,
                ..State::default()
            }),
            next_id: AtomicU32::new(1),
        }
    }

    fn id(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn add_node(
        &self,
        state: &mut State,
        name: &str,
        class: NodeClass,
        media_class: &str,
        ports: &[(&str, PortDirection, ChannelTag)],
    ) -> u32 {
        let node_id = self.id();
        state.graph.nodes.push(Node {
            id: node_id,
            name: name.to_string(),
            description: Some(name.to_string()),
            media_class: Some(media_class.to_string()),
            media_role: None,
            class,
        });
        for (port_name, direction, channel) in ports {
            state.graph.ports.push(Port {
                id: self.id(),
                node_id,
                name: port_name.to_string(),
                direction: *direction,
                channel: channel.clone(),
            });
        }
        node_id
    }

    // === graph builders ===

    pub fn add_mono_source(&self, name: &str) -> u32 {
        let mut state = self.state.lock().unwrap();
        self.add_node(
            &mut state,
            name,
            NodeClass::Source,
            "Audio/Source",
            &[("capture_MONO", PortDirection::Out, ChannelTag::Mono)],
        )
    }

    pub fn add_stereo_source(&self, name: &str) -> u32 {
        let mut state = self.state.lock().unwrap();
        self.add_node(
            &mut state,
            name,
            NodeClass::Source,
            "Audio/Source",
            &[
                ("capture_FL", PortDirection::Out, ChannelTag::Left),
                ("capture_FR", PortDirection::Out, ChannelTag::Right),
            ],
        )
    }

    /// A playback stream node like a producer registers.
    pub fn add_stream_node(&self, name: &str) -> u32 {
        let mut state = self.state.lock().unwrap();
        self.add_node(
            &mut state,
            name,
            NodeClass::Other,
            "Stream/Output/Audio",
            &[
                ("output_FL", PortDirection::Out, ChannelTag::Left),
                ("output_FR", PortDirection::Out, ChannelTag::Right),
            ],
        )
    }

    pub fn add_hardware_sink(&self, name: &str) -> u32 {
        let mut state = self.state.lock().unwrap();
        self.add_node(
            &mut state,
            name,
            NodeClass::Sink,
            "Audio/Sink",
            &[
                ("playback_FL", PortDirection::In, ChannelTag::Left),
                ("playback_FR", PortDirection::In, ChannelTag::Right),
            ],
        )
    }

    /// A virtual sink that some other session created earlier.
    pub fn add_virtual_sink(&self, name: &str) -> u32 {
        let mut state = self.state.lock().unwrap();
        self.add_null_sink_node(&mut state, name)
    }

    fn add_null_sink_node(&self, state: &mut State, name: &str) -> u32 {
        self.add_node(
            state,
            name,
            NodeClass::Virtual,
            "Audio/Sink",
            &[
                ("playback_FL", PortDirection::In, ChannelTag::Left),
                ("playback_FR", PortDirection::In, ChannelTag::Right),
                ("monitor_FL", PortDirection::Out, ChannelTag::Left),
                ("monitor_FR", PortDirection::Out, ChannelTag::Right),
            ],
        )
    }

    pub fn set_default_sink(&self, name: &str) {
        self.state.lock().unwrap().default_sink = Some(name.to_string());
    }

    /// Pre-existing link, e.g. one a session manager auto-created.
    pub fn add_link_by_names(&self, output: &str, input: &str) {
        let mut state = self.state.lock().unwrap();
        let out_port = state
            .graph
            .resolve_port(output)
            .expect("output port exists")
            .clone();
        let in_port = state
            .graph
            .resolve_port(input)
            .expect("input port exists")
            .clone();
        let id = self.id();
        state.graph.links.push(LinkInfo {
            id,
            output_node_id: out_port.node_id,
            output_port_id: out_port.id,
            input_node_id: in_port.node_id,
            input_port_id: in_port.id,
        });
    }

    /// Remove a link behind the session's back.
    pub fn remove_link_by_names(&self, output: &str, input: &str) {
        let mut state = self.state.lock().unwrap();
        let Some(out_id) = state.graph.resolve_port(output).map(|p| p.id) else {
            return;
        };
        let Some(in_id) = state.graph.resolve_port(input).map(|p| p.id) else {
            return;
        };
        state
            .graph
            .links
            .retain(|l| !(l.output_port_id == out_id && l.input_port_id == in_id));
    }

    // === behavior knobs ===

    /// Extra snapshots before a loaded sink becomes visible (default 1).
    pub fn delay_sink_appearance(&self, extra_snapshots: u32) {
        self.state.lock().unwrap().sink_appear_delay = extra_snapshots;
    }

    /// Loaded sinks never show up in the graph.
    pub fn never_materialize_sinks(&self) {
        self.state.lock().unwrap().never_materialize = true;
    }

    /// Fail connects whose output port name contains `fragment`.
    pub fn fail_connect_from(&self, fragment: &str, failure: ConnectFailure) {
        self.state
            .lock()
            .unwrap()
            .fail_connect_output_contains
            .push((fragment.to_string(), failure));
    }

    // === inspection ===

    /// Current graph without counting as a snapshot poll.
    pub fn graph_now(&self) -> Graph {
        self.state.lock().unwrap().graph.clone()
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().unwrap().graph.links.len()
    }

    /// Current links as qualified name pairs.
    pub fn links_now(&self) -> Vec<(String, String)> {
        let state = self.state.lock().unwrap();
        state
            .graph
            .links
            .iter()
            .filter_map(|l| {
                let out = state.graph.port_by_id(l.output_port_id)?;
                let inp = state.graph.port_by_id(l.input_port_id)?;
                Some((
                    state.graph.qualified_port_name(out)?,
                    state.graph.qualified_port_name(inp)?,
                ))
            })
            .collect()
    }

    pub fn node_exists(&self, name: &str) -> bool {
        self.state.lock().unwrap().graph.node_by_name(name).is_some()
    }

    pub fn sink_gain_history(&self, name: &str) -> Vec<f32> {
        self.state
            .lock()
            .unwrap()
            .sink_gains
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn source_gain_history(&self, name: &str) -> Vec<f32> {
        self.state
            .lock()
            .unwrap()
            .source_gains
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear_gain_history(&self) {
        let mut state = self.state.lock().unwrap();
        state.sink_gains.clear();
        state.source_gains.clear();
    }

    /// Module ids that were successfully unloaded.
    pub fn unloads(&self) -> Vec<u32> {
        self.state.lock().unwrap().unloads.clone()
    }

    /// Loaded modules still waiting to materialize.
    pub fn pending_sink_count(&self) -> usize {
        self.state.lock().unwrap().pending_sinks.len()
    }
}

#[async_trait]
impl AudioServer for FakeServer {
    async fn snapshot(&self) -> Result<Graph, RouteError> {
        let mut state = self.state.lock().unwrap();
        state.snapshot_count += 1;
        let now = state.snapshot_count;
        let due: Vec<PendingSink> = {
            let mut due = Vec::new();
            let mut keep = Vec::new();
            for pending in state.pending_sinks.drain(..) {
                if pending.appear_at <= now {
                    due.push(pending);
                } else {
                    keep.push(pending);
                }
            }
            state.pending_sinks = keep;
            due
        };
        for pending in due {
            self.add_null_sink_node(&mut state, &pending.name);
            state.modules.insert(pending.module_id, pending.name);
        }
        Ok(state.graph.clone())
    }

    async fn load_null_sink(&self, name: &str, _channels: u32) -> Result<ModuleId, RouteError> {
        let mut state = self.state.lock().unwrap();
        let module_id = self.id();
        let appear_at = if state.never_materialize {
            u32::MAX
        } else {
            state.snapshot_count + state.sink_appear_delay
        };
        state.pending_sinks.push(PendingSink {
            module_id,
            name: name.to_string(),
            appear_at,
        });
        Ok(ModuleId(module_id))
    }

    async fn unload_module(&self, id: ModuleId) -> Result<(), RouteError> {
        let mut state = self.state.lock().unwrap();
        state.pending_sinks.retain(|p| p.module_id != id.0);
        let Some(name) = state.modules.remove(&id.0) else {
            // Already gone is a no-op, like the real server.
            return Ok(());
        };
        let Some(node_id) = state.graph.node_by_name(&name).map(|n| n.id) else {
            return Ok(());
        };
        state.graph.nodes.retain(|n| n.id != node_id);
        state.graph.ports.retain(|p| p.node_id != node_id);
        state
            .graph
            .links
            .retain(|l| l.output_node_id != node_id && l.input_node_id != node_id);
        state.unloads.push(id.0);
        Ok(())
    }

    async fn connect_ports(&self, output: &str, input: &str) -> Result<LinkOutcome, RouteError> {
        let mut state = self.state.lock().unwrap();

        for (fragment, failure) in &state.fail_connect_output_contains {
            if output.contains(fragment.as_str()) {
                return Err(match failure {
                    ConnectFailure::Conflict => RouteError::LinkConflict {
                        output: output.to_string(),
                        input: input.to_string(),
                    },
                    ConnectFailure::Rejected(reason) => RouteError::LinkFailed {
                        output: output.to_string(),
                        input: input.to_string(),
                        reason: reason.clone(),
                    },
                });
            }
        }

        let (out_port, in_port) = {
            let out_port = state.graph.resolve_port(output).cloned();
            let in_port = state.graph.resolve_port(input).cloned();
            match (out_port, in_port) {
                (Some(o), Some(i)) => (o, i),
                _ => {
                    return Err(RouteError::LinkFailed {
                        output: output.to_string(),
                        input: input.to_string(),
                        reason: "no such port".to_string(),
                    })
                }
            }
        };
        if out_port.direction != PortDirection::Out || in_port.direction != PortDirection::In {
            return Err(RouteError::LinkFailed {
                output: output.to_string(),
                input: input.to_string(),
                reason: "direction mismatch".to_string(),
            });
        }
        if state.graph.linked(out_port.id, in_port.id) {
            return Ok(LinkOutcome::AlreadyLinked);
        }
        let id = self.id();
        state.graph.links.push(LinkInfo {
            id,
            output_node_id: out_port.node_id,
            output_port_id: out_port.id,
            input_node_id: in_port.node_id,
            input_port_id: in_port.id,
        });
        Ok(LinkOutcome::Created)
    }

    async fn disconnect_ports(&self, output: &str, input: &str) -> Result<(), RouteError> {
        let mut state = self.state.lock().unwrap();
        let out_id = state.graph.resolve_port(output).map(|p| p.id);
        let in_id = state.graph.resolve_port(input).map(|p| p.id);
        if let (Some(out_id), Some(in_id)) = (out_id, in_id) {
            state
                .graph
                .links
                .retain(|l| !(l.output_port_id == out_id && l.input_port_id == in_id));
        }
        // Missing ports or links mean the end state already holds.
        Ok(())
    }

    async fn set_sink_gain(&self, sink: &str, gain: f32) -> Result<(), RouteError> {
        self.state
            .lock()
            .unwrap()
            .sink_gains
            .entry(sink.to_string())
            .or_default()
            .push(gain);
        Ok(())
    }

    async fn set_source_gain(&self, source: &str, gain: f32) -> Result<(), RouteError> {
        self.state
            .lock()
            .unwrap()
            .source_gains
            .entry(source.to_string())
            .or_default()
            .push(gain);
        Ok(())
    }

    async fn default_sink(&self) -> Result<Option<String>, RouteError> {
        Ok(self.state.lock().unwrap().default_sink.clone())
    }
}
