//! Session configuration.

use std::time::Duration;

use jamgraph::{NodeClass, Pattern};

use crate::producer::{ProducerSpec, DEFAULT_DISCOVERY_TIMEOUT};
use crate::ramp::DEFAULT_STEP_INTERVAL;

/// Where the mix is routed for live monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OutputTarget {
    /// The server's current default sink.
    #[default]
    Default,
    /// The first sink whose name matches a fragment.
    Pattern(String),
    /// No monitoring; the mix is only consumed by recorders.
    None,
}

/// One source role the session attaches to the mix.
///
/// A missing match is a normal condition - the role is skipped, not an
/// error. Sources that only exist while a producer process runs carry the
/// producer invocation with them.
#[derive(Debug, Clone)]
pub struct SourceSpec {
    /// Role tag, e.g. "synth" or "mic".
    pub role: String,
    /// How to find the source node.
    pub pattern: Pattern,
    /// Process to start before looking for the node.
    pub producer: Option<ProducerSpec>,
    /// Whether the ramper drives this source's own volume along with the
    /// sink. Hardware capture devices want this; producer streams ride
    /// the sink volume alone.
    pub manage_volume: bool,
}

impl SourceSpec {
    /// The hardware role: a USB audio interface's capture device.
    pub fn synth() -> Self {
        Self {
            role: "synth".to_string(),
            pattern: Pattern::name("alsa_input.usb").with_class(NodeClass::Source),
            producer: None,
            manage_volume: true,
        }
    }

    /// The phone-mic role, bridged by scrcpy.
    pub fn mic() -> Self {
        Self {
            role: "mic".to_string(),
            pattern: Pattern::name("scrcpy"),
            producer: Some(ProducerSpec {
                label: "scrcpy".to_string(),
                command: ["scrcpy", "--no-video", "--audio-source=mic", "--audio-codec=raw"]
                    .map(String::from)
                    .to_vec(),
                node_pattern: Pattern::name("scrcpy"),
                discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            }),
            manage_volume: false,
        }
    }
}

/// Full session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the virtual mixing sink.
    pub sink_name: String,
    pub sources: Vec<SourceSpec>,
    pub output_target: OutputTarget,
    pub ramp_duration: Duration,
    /// How long to hold the session active; `None` runs until a stop is
    /// requested.
    pub duration: Option<Duration>,
    /// Disconnect session-manager auto-links from producer streams to the
    /// default sink, so their audio flows only through the mix.
    pub unpatch_auto_links: bool,
    /// Wake interval of the ramp step loop.
    pub ramp_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sink_name: "record_mix".to_string(),
            sources: vec![SourceSpec::synth(), SourceSpec::mic()],
            output_target: OutputTarget::Default,
            ramp_duration: Duration::from_millis(500),
            duration: Some(Duration::from_secs(30)),
            unpatch_auto_links: true,
            ramp_interval: DEFAULT_STEP_INTERVAL,
        }
    }
}
