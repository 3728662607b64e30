//! jamgraph: read-only view of the PipeWire object graph.
//!
//! The read half of patchjam's routing stack. Provides snapshot types
//! (`Graph`, `Node`, `Port`, `LinkInfo`), a live `Inspector` that
//! enumerates the registry, and a declarative `Pattern` matcher for
//! selecting nodes out of a snapshot. Everything here is side-effect free;
//! mutations live in jamwire.

pub mod matcher;
pub mod pipewire;
pub mod types;

pub use matcher::Pattern;
pub use pipewire::Inspector;
pub use types::{ChannelTag, Graph, LinkInfo, Node, NodeClass, Port, PortDirection};
