//! jamwire: session lifecycle and routing manager.
//!
//! Owns the ephemeral routing a recording/monitoring session needs on a
//! PipeWire desktop: a virtual mixing sink, links from a variable set of
//! sources into it, a link from the mix to an output for monitoring, and
//! click-free gain ramps around start and stop. Everything the session
//! creates is tracked and destroyed on every exit path - normal
//! completion, interrupt, or setup failure - leaving the server's graph
//! as it was found.
//!
//! The write path goes through the `AudioServer` trait; the read path is
//! jamgraph snapshots behind the same trait. The `Session` orchestrator
//! is the only stateful component; sinks, links, ramps, and producers are
//! services it sequences.

pub mod config;
pub mod error;
pub mod links;
pub mod producer;
pub mod ramp;
pub mod server;
pub mod session;
pub mod sink;

pub use config::{OutputTarget, SessionConfig, SourceSpec};
pub use error::{RouteError, TeardownFailure, TeardownReport};
pub use links::{LinkController, OwnedLink};
pub use producer::{ProducerHandle, ProducerSpec};
pub use ramp::{GainCurve, RampTargets};
pub use server::{AudioServer, LinkOutcome, ModuleId, PwCliServer};
pub use session::{
    start_session, Session, SessionEnd, SessionHandle, SessionOutcome, SessionState, StopHandle,
};
pub use sink::{destroy_virtual_sink, ensure_virtual_sink, VirtualSink};
