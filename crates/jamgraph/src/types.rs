//! Snapshot types for the PipeWire object graph.
//!
//! A `Graph` is a point-in-time view of nodes, ports, and links as reported
//! by the server. It is never cached across operations: the graph is shared
//! mutable state owned by the server, and identities can go stale the moment
//! another client patches something.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a node derived from its `media.class` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeClass {
    /// Capture endpoint (`Audio/Source`)
    Source,
    /// Playback endpoint (`Audio/Sink`)
    Sink,
    /// Software-created sink (null-sink modules and other virtual devices)
    Virtual,
    /// Anything else (MIDI bridges, streams, monitors)
    Other,
}

impl NodeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Sink => "sink",
            Self::Virtual => "virtual",
            Self::Other => "other",
        }
    }

    /// Derive the class from node properties.
    ///
    /// Null sinks report `Audio/Sink` like hardware does; the `node.virtual`
    /// property (or the null-sink factory name) tells them apart.
    pub fn from_props(
        media_class: Option<&str>,
        virtual_prop: Option<&str>,
        factory_name: Option<&str>,
    ) -> Self {
        let is_virtual =
            virtual_prop == Some("true") || factory_name == Some("support.null-audio-sink");
        match media_class {
            Some("Audio/Source") => Self::Source,
            Some("Audio/Sink") if is_virtual => Self::Virtual,
            Some("Audio/Sink") => Self::Sink,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for NodeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    In,
    Out,
}

/// Channel assignment of a port.
///
/// Read from the `audio.channel` property when present, otherwise parsed
/// from the port-name suffix (`capture_FL`, `playback_MONO`, ...). The
/// suffix rules deliberately require `_MONO`/`MONO` exactly so that names
/// like `monitor_FL` don't register as mono.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelTag {
    Mono,
    Left,
    Right,
    Other(String),
}

impl ChannelTag {
    /// Parse an `audio.channel` property value (`FL`, `FR`, `MONO`, ...).
    pub fn from_channel_prop(value: &str) -> Self {
        match value {
            "MONO" => Self::Mono,
            "FL" => Self::Left,
            "FR" => Self::Right,
            other => Self::Other(other.to_string()),
        }
    }

    /// Parse the channel from a port name suffix.
    pub fn from_port_name(name: &str) -> Self {
        let upper = name.to_uppercase();
        if upper.ends_with("_MONO") || upper == "MONO" {
            Self::Mono
        } else if upper.ends_with("_FL") || upper.ends_with("_L") {
            Self::Left
        } else if upper.ends_with("_FR") || upper.ends_with("_R") {
            Self::Right
        } else {
            let suffix = name.rsplit('_').next().unwrap_or(name);
            Self::Other(suffix.to_string())
        }
    }

    /// Whether an output port with this tag should be wired to an input
    /// port with `input`'s tag. Mono fans out to every channel; stereo maps
    /// left-to-left and right-to-right; unknown tags pair only with equals.
    pub fn pairs_with(&self, input: &ChannelTag) -> bool {
        match (self, input) {
            (Self::Mono, _) | (_, Self::Mono) => true,
            (Self::Left, Self::Left) | (Self::Right, Self::Right) => true,
            (Self::Other(a), Self::Other(b)) => a == b,
            _ => false,
        }
    }
}

/// A node in the graph. Owned by the audio server; this is a reference,
/// valid only as long as the snapshot that produced it is acted on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub name: String,
    pub description: Option<String>,
    pub media_class: Option<String>,
    pub media_role: Option<String>,
    pub class: NodeClass,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Port {
    pub id: u32,
    pub node_id: u32,
    pub name: String,
    pub direction: PortDirection,
    pub channel: ChannelTag,
}

/// An existing link between two ports, as reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkInfo {
    pub id: u32,
    pub output_node_id: u32,
    pub output_port_id: u32,
    pub input_node_id: u32,
    pub input_port_id: u32,
}

/// Point-in-time view of the object graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub ports: Vec<Port>,
    pub links: Vec<LinkInfo>,
}

impl Graph {
    pub fn node_by_id(&self, id: u32) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Exact-name lookup. Node names are unique per server instance.
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Ports of a node in enumeration order, filtered by direction.
    pub fn ports_of(&self, node_id: u32, direction: PortDirection) -> Vec<&Port> {
        self.ports
            .iter()
            .filter(|p| p.node_id == node_id && p.direction == direction)
            .collect()
    }

    pub fn port_by_id(&self, id: u32) -> Option<&Port> {
        self.ports.iter().find(|p| p.id == id)
    }

    /// Fully-qualified port name (`node:port`), the form `pw-link` accepts.
    pub fn qualified_port_name(&self, port: &Port) -> Option<String> {
        self.node_by_id(port.node_id)
            .map(|n| format!("{}:{}", n.name, port.name))
    }

    /// Resolve a `node:port` name back to a port in this snapshot.
    pub fn resolve_port(&self, qualified: &str) -> Option<&Port> {
        let (node_name, port_name) = qualified.rsplit_once(':')?;
        let node = self.node_by_name(node_name)?;
        self.ports
            .iter()
            .find(|p| p.node_id == node.id && p.name == port_name)
    }

    /// Whether a link between the two ports currently exists.
    pub fn linked(&self, output_port_id: u32, input_port_id: u32) -> bool {
        self.links
            .iter()
            .any(|l| l.output_port_id == output_port_id && l.input_port_id == input_port_id)
    }
}
