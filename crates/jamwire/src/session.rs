//! Session lifecycle orchestration.
//!
//! The session is the sole owner of routing state: the virtual sink, the
//! owned links, the producer processes, and the current gain. Lifecycle:
//!
//! ```text
//! Idle -> SettingUp -> Active -> TearingDown -> Closed
//! ```
//!
//! `Failed` is terminal and reachable only before any resource exists;
//! once something was created, every exit path goes through `TearingDown`.
//! Teardown runs at most once, is best-effort and exhaustive, and removes
//! owned objects in reverse creation order.
//!
//! Cancellation is cooperative: two tokens, one for a graceful stop and
//! one set by a second stop request, observed by whichever operation is
//! currently suspended (ramp loop, duration wait, producer watch). There
//! is no non-local exit that could skip cleanup.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use jamgraph::{NodeClass, Pattern};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{OutputTarget, SessionConfig};
use crate::error::{RouteError, TeardownReport};
use crate::links::{LinkController, OwnedLink};
use crate::producer::{self, ProducerHandle};
use crate::ramp::{ramp, GainCurve, RampTargets};
use crate::server::AudioServer;
use crate::sink::{destroy_virtual_sink, ensure_virtual_sink, VirtualSink, CREATE_CONFIRM_TIMEOUT};

const PRODUCER_WATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Settle time before looking for links the session manager auto-created
/// for a fresh producer stream.
const AUTO_LINK_SETTLE: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    SettingUp,
    Active,
    TearingDown,
    Closed,
    /// Setup failed before any resource was created.
    Failed,
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// Ran its configured duration.
    Completed,
    /// Stopped early: by request, or because an owned producer died.
    Interrupted,
    /// Setup failed. Teardown of whatever had been created still ran.
    Failed(RouteError),
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub end: SessionEnd,
    pub teardown: TeardownReport,
}

impl SessionOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self.end, SessionEnd::Failed(_)) && self.teardown.clean()
    }
}

pub struct Session {
    server: Arc<dyn AudioServer>,
    config: SessionConfig,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    sink: Option<VirtualSink>,
    links: LinkController,
    producers: Vec<ProducerHandle>,
    managed_sources: Vec<String>,
    gain: f32,
    torn_down: bool,
    stop: CancellationToken,
    force: CancellationToken,
}

impl Session {
    pub fn new(server: Arc<dyn AudioServer>, config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            links: LinkController::new(server.clone()),
            server,
            config,
            state: SessionState::Idle,
            state_tx,
            sink: None,
            producers: Vec::new(),
            managed_sources: Vec::new(),
            gain: 0.0,
            torn_down: false,
            stop: CancellationToken::new(),
            force: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn force_token(&self) -> CancellationToken {
        self.force.clone()
    }

    pub fn owned_links(&self) -> &[OwnedLink] {
        self.links.owned()
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    fn set_state(&mut self, state: SessionState) {
        debug!(from = ?self.state, to = ?state, "session state");
        self.state = state;
        self.state_tx.send_replace(state);
    }

    /// Run the full lifecycle to completion.
    pub async fn run(&mut self) -> SessionOutcome {
        match self.set_up().await {
            Ok(()) => {
                let end = if self.stop.is_cancelled() {
                    info!("stop was requested during setup");
                    SessionEnd::Interrupted
                } else {
                    self.set_state(SessionState::Active);
                    self.hold().await
                };
                let teardown = self.tear_down().await;
                SessionOutcome { end, teardown }
            }
            Err(e) => {
                warn!(error = %e, "setup failed");
                if self.has_resources() {
                    let teardown = self.tear_down().await;
                    SessionOutcome {
                        end: SessionEnd::Failed(e),
                        teardown,
                    }
                } else {
                    self.set_state(SessionState::Failed);
                    SessionOutcome {
                        end: SessionEnd::Failed(e),
                        teardown: TeardownReport::default(),
                    }
                }
            }
        }
    }

    async fn set_up(&mut self) -> Result<(), RouteError> {
        self.set_state(SessionState::SettingUp);

        // The mixing point first; everything else hangs off it.
        let sink = ensure_virtual_sink(self.server.as_ref(), &self.config.sink_name).await?;
        self.sink = Some(sink);

        // Muted until ramp-in. Sources get muted as they're adopted below.
        self.server
            .set_sink_gain(&self.config.sink_name, 0.0)
            .await?;
        self.gain = 0.0;

        // Start every producer, then wait for each output node. Startup
        // order doesn't matter; each discovery has its own timeout, and a
        // producer whose node never shows up is stopped by teardown.
        for spec in &self.config.sources {
            if let Some(producer_spec) = &spec.producer {
                self.producers.push(producer::start(producer_spec)?);
            }
        }
        for spec in &self.config.sources {
            if let Some(producer_spec) = &spec.producer {
                producer::await_output_node(
                    self.server.as_ref(),
                    &producer_spec.node_pattern,
                    producer_spec.discovery_timeout,
                )
                .await?;
            }
        }
        if !self.producers.is_empty() && self.config.unpatch_auto_links {
            // Give the session manager a moment to wire its auto-links so
            // the unpatch below actually sees them.
            tokio::time::sleep(AUTO_LINK_SETTLE).await;
        }

        let graph = self.server.snapshot().await?;
        let sink_node = graph
            .node_by_name(&self.config.sink_name)
            .cloned()
            .ok_or_else(|| RouteError::NodeCreationTimeout {
                name: self.config.sink_name.clone(),
                timeout: CREATE_CONFIRM_TIMEOUT,
            })?;
        let default_sink_name = self.server.default_sink().await?;

        // Sources -> mix.
        for spec in &self.config.sources {
            let candidates = spec.pattern.find(&graph);
            let Some(&node) = candidates.first() else {
                info!(role = %spec.role, pattern = %spec.pattern, "no source matches role, skipping");
                continue;
            };
            if candidates.len() > 1 {
                debug!(role = %spec.role, count = candidates.len(), "multiple matches, taking the first");
            }
            info!(role = %spec.role, source = %node.name, "attaching source");
            if spec.manage_volume {
                self.server.set_source_gain(&node.name, 0.0).await?;
                self.managed_sources.push(node.name.clone());
            }
            if self.config.unpatch_auto_links && spec.producer.is_some() {
                if let Some(default_node) = default_sink_name
                    .as_deref()
                    .and_then(|name| graph.node_by_name(name))
                {
                    self.links
                        .unpatch_between(&graph, node, default_node)
                        .await?;
                }
            }
            self.links.link_all(&graph, &[node], &sink_node).await?;
        }

        // Mix -> output. An unresolvable target disables monitoring but
        // doesn't fail the session; the mix is still recordable.
        let output_node = match &self.config.output_target {
            OutputTarget::None => None,
            OutputTarget::Default => match &default_sink_name {
                Some(name) => graph.node_by_name(name).cloned(),
                None => {
                    info!("server reports no default sink, monitoring disabled");
                    None
                }
            },
            OutputTarget::Pattern(fragment) => {
                let found = Pattern::name(fragment.as_str())
                    .with_class(NodeClass::Sink)
                    .find_first(&graph)
                    .cloned();
                if found.is_none() {
                    info!(%fragment, "no sink matches output target, monitoring disabled");
                }
                found
            }
        };
        if let Some(output_node) = output_node {
            if output_node.id == sink_node.id {
                warn!("output target resolves to the mix itself, monitoring disabled");
            } else {
                info!(output = %output_node.name, "monitoring mix on output");
                self.links
                    .link_all(&graph, &[&sink_node], &output_node)
                    .await?;
            }
        }

        // Ramp in. A stop request collapses the ramp to its terminal
        // value and is honored right after setup returns.
        let targets = self.ramp_targets();
        self.gain = ramp(
            self.server.as_ref(),
            &targets,
            GainCurve::rising(self.config.ramp_duration),
            self.config.ramp_interval,
            &self.stop,
        )
        .await?;
        info!(links = self.links.owned().len(), "session routing live");
        Ok(())
    }

    /// Wait out the active phase: the configured duration, a stop
    /// request, or an owned producer dying - whichever comes first.
    async fn hold(&mut self) -> SessionEnd {
        let stop = self.stop.clone();
        match self.config.duration {
            Some(duration) => {
                info!(?duration, "session active");
                tokio::select! {
                    _ = tokio::time::sleep(duration) => SessionEnd::Completed,
                    _ = stop.cancelled() => SessionEnd::Interrupted,
                    label = Self::watch_producers(&mut self.producers) => {
                        warn!(producer = %label, "producer exited unexpectedly, stopping session");
                        SessionEnd::Interrupted
                    }
                }
            }
            None => {
                info!("session active until stopped");
                tokio::select! {
                    _ = stop.cancelled() => SessionEnd::Interrupted,
                    label = Self::watch_producers(&mut self.producers) => {
                        warn!(producer = %label, "producer exited unexpectedly, stopping session");
                        SessionEnd::Interrupted
                    }
                }
            }
        }
    }

    async fn watch_producers(producers: &mut [ProducerHandle]) -> String {
        if producers.is_empty() {
            return std::future::pending::<String>().await;
        }
        loop {
            tokio::time::sleep(PRODUCER_WATCH_INTERVAL).await;
            for producer in producers.iter_mut() {
                if !producer.is_alive() {
                    return producer.label().to_string();
                }
            }
        }
    }

    /// Tear down everything this session created: ramp out (collapsed to
    /// one step by a forced stop), unlink owned links in reverse creation
    /// order, destroy the sink if owned, stop owned producers. Every step
    /// runs regardless of earlier failures; failures are recorded in the
    /// report. Safe to call more than once - later calls are no-ops.
    pub async fn tear_down(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            debug!("teardown already ran");
            return report;
        }
        self.torn_down = true;
        self.set_state(SessionState::TearingDown);

        if self.gain > 0.0 {
            let targets = self.ramp_targets();
            match ramp(
                self.server.as_ref(),
                &targets,
                GainCurve::falling(self.config.ramp_duration),
                self.config.ramp_interval,
                &self.force,
            )
            .await
            {
                Ok(gain) => self.gain = gain,
                Err(e) => report.record("ramp out", e),
            }
        }

        self.links.unlink_all_reverse(&mut report).await;

        if let Some(sink) = self.sink.take() {
            if let Err(e) = destroy_virtual_sink(self.server.as_ref(), &sink).await {
                report.record(format!("destroy sink {}", sink.name), e);
            }
        }

        for producer in self.producers.drain(..) {
            producer.stop().await;
        }

        self.set_state(SessionState::Closed);
        if report.clean() {
            info!("teardown complete");
        } else {
            warn!(failures = report.failures.len(), "teardown finished with failures");
        }
        report
    }

    fn has_resources(&self) -> bool {
        self.sink.is_some() || !self.links.owned().is_empty() || !self.producers.is_empty()
    }

    fn ramp_targets(&self) -> RampTargets {
        RampTargets {
            sink: self.sink.as_ref().map(|s| s.name.clone()),
            sources: self.managed_sources.clone(),
        }
    }
}

/// Requests a stop from outside the session task. The first request asks
/// for a graceful ramp-out; a second one collapses the ramp-out to a
/// single step. Idempotent beyond that.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stop: CancellationToken,
    force: CancellationToken,
}

impl StopHandle {
    pub fn request_stop(&self) {
        if self.stop.is_cancelled() {
            if !self.force.is_cancelled() {
                info!("second stop request, forcing shutdown");
            }
            self.force.cancel();
        } else {
            info!("stop requested");
            self.stop.cancel();
        }
    }

    /// Skip straight to the forced path.
    pub fn force_stop(&self) {
        self.stop.cancel();
        self.force.cancel();
    }
}

/// A session running on its own task.
pub struct SessionHandle {
    stopper: StopHandle,
    state_rx: watch::Receiver<SessionState>,
    task: JoinHandle<SessionOutcome>,
}

/// Spawn a session and drive it to completion in the background.
pub fn start_session(server: Arc<dyn AudioServer>, config: SessionConfig) -> SessionHandle {
    let mut session = Session::new(server, config);
    let stopper = StopHandle {
        stop: session.stop_token(),
        force: session.force_token(),
    };
    let state_rx = session.subscribe_state();
    let task = tokio::spawn(async move { session.run().await });
    SessionHandle {
        stopper,
        state_rx,
        task,
    }
}

impl SessionHandle {
    /// A cloneable stop requester, e.g. for a signal task.
    pub fn stopper(&self) -> StopHandle {
        self.stopper.clone()
    }

    pub fn request_stop(&self) {
        self.stopper.request_stop();
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Wait until the session reaches `Active` or dies trying. Returns
    /// the state that settled it.
    pub async fn wait_active(&mut self) -> SessionState {
        loop {
            let state = *self.state_rx.borrow();
            match state {
                SessionState::Active
                | SessionState::TearingDown
                | SessionState::Closed
                | SessionState::Failed => return state,
                SessionState::Idle | SessionState::SettingUp => {}
            }
            if self.state_rx.changed().await.is_err() {
                return *self.state_rx.borrow();
            }
        }
    }

    /// Wait for the lifecycle to finish and collect the outcome.
    pub async fn await_completion(self) -> anyhow::Result<SessionOutcome> {
        self.task.await.context("session task died")
    }
}
