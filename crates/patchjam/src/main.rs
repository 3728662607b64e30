//! patchjam - ephemeral PipeWire routing for multi-source takes.
//!
//! Sets up a virtual mixing sink, wires a synth interface and/or a phone
//! mic into it, fades in, records or monitors, fades out, and removes
//! every routing object it created on the way out - on normal exit and
//! on interrupt alike.

mod config;
mod recorder;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jamgraph::{NodeClass, Pattern};
use jamwire::{
    start_session, AudioServer, OutputTarget, PwCliServer, SessionConfig, SessionEnd,
    SessionOutcome, SessionState, StopHandle,
};
use owo_colors::OwoColorize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use config::FileConfig;

/// Ephemeral PipeWire routing for multi-source recording.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.config/patchjam/config.toml, then
    /// ./patchjam.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set up the mix and record it (and each source) to WAV files
    Record {
        /// Recording duration in seconds
        #[arg(short, long, default_value_t = 30.0)]
        duration: f64,

        /// Output directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Attach only the synth role
        #[arg(long, conflicts_with = "mic_only")]
        synth_only: bool,

        /// Attach only the mic role
        #[arg(long)]
        mic_only: bool,

        /// Record only the mixed output, not the individual sources
        #[arg(long)]
        mix_only: bool,

        /// Don't route the mix to an output (silent recording)
        #[arg(long)]
        no_monitor: bool,

        /// Route the mix to a specific sink instead of the default
        #[arg(long)]
        output_sink: Option<String>,
    },

    /// Route sources through the mix to the output until interrupted
    Monitor {
        /// Attach only the synth role
        #[arg(long, conflicts_with = "mic_only")]
        synth_only: bool,

        /// Attach only the mic role
        #[arg(long)]
        mic_only: bool,

        /// Route the mix to a specific sink instead of the default
        #[arg(long)]
        output_sink: Option<String>,
    },

    /// List audio sources and sinks
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let file_config = config::load(cli.config.as_deref())?;
    let server: Arc<dyn AudioServer> = Arc::new(PwCliServer::new());

    match cli.command {
        Commands::List => list_devices(server.as_ref()).await,
        Commands::Monitor {
            synth_only,
            mic_only,
            output_sink,
        } => {
            let session_config = build_session_config(
                &file_config,
                synth_only,
                mic_only,
                output_sink,
                false,
                None,
            );
            monitor(server, session_config).await
        }
        Commands::Record {
            duration,
            output,
            synth_only,
            mic_only,
            mix_only,
            no_monitor,
            output_sink,
        } => {
            let session_config = build_session_config(
                &file_config,
                synth_only,
                mic_only,
                output_sink,
                no_monitor,
                Some(duration),
            );
            let output_dir = output.unwrap_or_else(|| file_config.output_dir.clone());
            record(server, session_config, output_dir, mix_only).await
        }
    }
}

fn build_session_config(
    file: &FileConfig,
    synth_only: bool,
    mic_only: bool,
    output_sink: Option<String>,
    no_monitor: bool,
    duration_secs: Option<f64>,
) -> SessionConfig {
    let sources = if synth_only {
        vec![file.synth_spec()]
    } else if mic_only {
        vec![file.mic_spec()]
    } else {
        vec![file.synth_spec(), file.mic_spec()]
    };
    let output_target = if no_monitor {
        OutputTarget::None
    } else if let Some(sink) = output_sink {
        OutputTarget::Pattern(sink)
    } else {
        OutputTarget::Default
    };
    SessionConfig {
        sink_name: file.sink_name.clone(),
        sources,
        output_target,
        ramp_duration: Duration::from_secs_f64(file.ramp_duration),
        duration: duration_secs.map(Duration::from_secs_f64),
        unpatch_auto_links: file.unpatch_auto_links,
        ..SessionConfig::default()
    }
}

/// First interrupt asks for a graceful stop; the second forces the
/// ramp-out to collapse. SIGTERM behaves like an interrupt.
fn spawn_stop_on_signals(stopper: StopHandle) {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "could not install SIGTERM handler");
                return;
            }
        };
        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_err() {
                        return;
                    }
                    stopper.request_stop();
                }
                _ = sigterm.recv() => {
                    stopper.request_stop();
                }
            }
        }
    });
}

async fn list_devices(server: &dyn AudioServer) -> Result<()> {
    let graph = server.snapshot().await?;

    println!("{}", "Sources".bold());
    for node in Pattern::default().with_class(NodeClass::Source).find(&graph) {
        println!("  {}", node.name.green());
        if let Some(desc) = &node.description {
            println!("    {}", desc.dimmed());
        }
    }

    println!();
    println!("{}", "Sinks".bold());
    for node in graph
        .nodes
        .iter()
        .filter(|n| matches!(n.class, NodeClass::Sink | NodeClass::Virtual))
    {
        println!("  {}", node.name.cyan());
        if let Some(desc) = &node.description {
            println!("    {}", desc.dimmed());
        }
    }
    Ok(())
}

async fn monitor(server: Arc<dyn AudioServer>, session_config: SessionConfig) -> Result<()> {
    println!("Setting up audio routing...");
    let mut handle = start_session(server, session_config);
    spawn_stop_on_signals(handle.stopper());

    if handle.wait_active().await == SessionState::Active {
        println!(
            "{}",
            "Monitoring. Press Ctrl+C to stop (twice to force).".bold()
        );
    }

    let outcome = handle.await_completion().await?;
    report_outcome(&outcome)
}

async fn record(
    server: Arc<dyn AudioServer>,
    session_config: SessionConfig,
    output_dir: PathBuf,
    mix_only: bool,
) -> Result<()> {
    println!("Setting up audio routing...");
    let sink_name = session_config.sink_name.clone();
    let source_patterns: Vec<(String, Pattern)> = session_config
        .sources
        .iter()
        .map(|s| (s.role.clone(), s.pattern.clone()))
        .collect();

    let mut handle = start_session(server.clone(), session_config);
    spawn_stop_on_signals(handle.stopper());

    if handle.wait_active().await != SessionState::Active {
        let outcome = handle.await_completion().await?;
        return report_outcome(&outcome);
    }

    // Routing is live; resolve the record targets against the graph as
    // it is now and start one capture per target.
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();

    let mut targets: Vec<(String, String)> =
        vec![("mix".to_string(), format!("{sink_name}.monitor"))];
    if !mix_only {
        let graph = server.snapshot().await?;
        for (role, pattern) in &source_patterns {
            if let Some(node) = pattern.find_first(&graph) {
                targets.push((role.clone(), node.name.clone()));
            }
        }
    }

    let mut recorders = Vec::new();
    for (name, target) in &targets {
        let path = output_dir.join(format!("{timestamp}_{name}.wav"));
        match recorder::start(name, target, path) {
            Ok(rec) => recorders.push(rec),
            Err(e) => warn!(name = %name, error = %e, "could not start recorder"),
        }
    }

    if recorders.is_empty() {
        warn!("nothing to record, stopping session");
        handle.request_stop();
    } else {
        println!(
            "Recording {} target(s). Press Ctrl+C to stop early.",
            recorders.len()
        );
    }

    let outcome = handle.await_completion().await?;

    if !recorders.is_empty() {
        println!();
        println!("{}", "Saved:".bold());
        for rec in recorders {
            let (name, path) = rec.stop().await;
            match std::fs::metadata(&path) {
                Ok(meta) => println!(
                    "  {}: {} ({:.1} KiB)",
                    name.green(),
                    path.display(),
                    meta.len() as f64 / 1024.0
                ),
                Err(_) => println!("  {}: {} (missing)", name.yellow(), path.display()),
            }
        }
    }

    report_outcome(&outcome)
}

fn report_outcome(outcome: &SessionOutcome) -> Result<()> {
    for failure in &outcome.teardown.failures {
        eprintln!("  {} {failure}", "cleanup:".yellow());
    }
    match &outcome.end {
        SessionEnd::Completed => {
            println!("{}", "Done.".green());
            Ok(())
        }
        SessionEnd::Interrupted => {
            println!("{}", "Stopped.".green());
            Ok(())
        }
        SessionEnd::Failed(e) => Err(anyhow::anyhow!(
            "{e} - cleanup ran, no routing objects were left behind"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file_config() {
        let file = FileConfig::default();

        let config = build_session_config(&file, true, false, None, false, Some(12.0));
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].role, "synth");
        assert_eq!(config.output_target, OutputTarget::Default);
        assert_eq!(config.duration, Some(Duration::from_secs(12)));

        let config = build_session_config(&file, false, true, None, true, None);
        assert_eq!(config.sources[0].role, "mic");
        assert_eq!(config.output_target, OutputTarget::None);
        assert_eq!(config.duration, None);

        let config =
            build_session_config(&file, false, false, Some("headphones".to_string()), false, None);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(
            config.output_target,
            OutputTarget::Pattern("headphones".to_string())
        );
    }
}
