//! Time-based gain ramps.
//!
//! A ramp is a pure curve sampled by a cooperative step loop: wake, apply
//! gain, sleep. Link creation and teardown never happen inside a ramp; the
//! orchestrator sequences them around it.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RouteError;
use crate::server::AudioServer;

/// Elapsed time to gain, linear between exact endpoints.
///
/// `sample(ZERO)` is exactly `from`, any elapsed at or past `duration` is
/// exactly `to`, and samples are monotonic in the ramp's direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainCurve {
    pub from: f32,
    pub to: f32,
    pub duration: Duration,
}

impl GainCurve {
    pub fn rising(duration: Duration) -> Self {
        Self {
            from: 0.0,
            to: 1.0,
            duration,
        }
    }

    pub fn falling(duration: Duration) -> Self {
        Self {
            from: 1.0,
            to: 0.0,
            duration,
        }
    }

    pub fn sample(&self, elapsed: Duration) -> f32 {
        if self.duration.is_zero() || elapsed >= self.duration {
            return self.to;
        }
        if elapsed.is_zero() {
            return self.from;
        }
        let t = elapsed.as_secs_f32() / self.duration.as_secs_f32();
        self.from + (self.to - self.from) * t
    }
}

/// What a ramp drives: the mix sink and any managed capture sources, all
/// moved together so nothing pops relative to the rest of the mix.
#[derive(Debug, Clone, Default)]
pub struct RampTargets {
    pub sink: Option<String>,
    pub sources: Vec<String>,
}

/// Default wake interval for ramp steps.
pub const DEFAULT_STEP_INTERVAL: Duration = Duration::from_millis(25);

/// Drive `curve` against the targets, blocking until the terminal value
/// has been applied. The terminal value is always the final application,
/// exactly once. Cancellation jumps straight to the terminal value -
/// shutdown latency wins over smoothness on a forced exit.
///
/// Returns the last gain applied (always `curve.to`).
pub async fn ramp(
    server: &dyn AudioServer,
    targets: &RampTargets,
    curve: GainCurve,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<f32, RouteError> {
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(from = curve.from, to = curve.to, ?curve.duration, "ramp start");
    loop {
        if cancel.is_cancelled() {
            debug!(to = curve.to, "ramp cancelled, jumping to terminal gain");
            apply(server, targets, curve.to).await?;
            return Ok(curve.to);
        }
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(to = curve.to, "ramp cancelled, jumping to terminal gain");
                apply(server, targets, curve.to).await?;
                return Ok(curve.to);
            }
            _ = ticker.tick() => {
                let elapsed = started.elapsed();
                let gain = curve.sample(elapsed);
                apply(server, targets, gain).await?;
                if elapsed >= curve.duration {
                    debug!(gain, "ramp complete");
                    return Ok(gain);
                }
            }
        }
    }
}

async fn apply(
    server: &dyn AudioServer,
    targets: &RampTargets,
    gain: f32,
) -> Result<(), RouteError> {
    if let Some(sink) = &targets.sink {
        server.set_sink_gain(sink, gain).await?;
    }
    for source in &targets.sources {
        server.set_source_gain(source, gain).await?;
    }
    Ok(())
}
