//! pvlive command line.
//!
//! Runs either end of the insitu link over TCP, and inspects serialized
//! undo sets.
//!
//! Configuration is layered: an optional JSON file (`--config`), then the
//! `PVLIVE_HOST`, `PVLIVE_PORT` and `PVLIVE_RANK` environment variables,
//! then command-line flags. Log verbosity follows `RUST_LOG`.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use pvlive_core::{InMemoryProxyManager, PropertyValue, ProxyManager, StateLoader};
use pvlive_insitu::{LinkConfig, LinkError, LinkState, LiveInsituLink, ProcessType, TcpNetwork};
use pvlive_undo::UndoRedoStateLoader;

/// ParaView Live insitu link tools.
#[derive(Parser)]
#[command(name = "pvlive", about = "ParaView Live insitu link tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for a simulation and serve its remote calls until it leaves.
    Visualize {
        /// Port to listen on.
        #[arg(short, long)]
        port: Option<u16>,

        /// JSON link configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Run a demo simulation that streams its pipeline to a visualization.
    Simulate {
        /// Host the visualization runs on.
        #[arg(long)]
        host: Option<String>,

        /// Port the visualization listens on.
        #[arg(short, long)]
        port: Option<u16>,

        /// Number of time steps.
        #[arg(short, long, default_value_t = 10)]
        steps: u32,

        /// Pause between time steps, in milliseconds.
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,

        /// JSON link configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Print a JSON summary of a serialized undo set.
    InspectUndo {
        /// File holding an `<UndoSet>` document.
        file: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Visualize { port, config } => {
            match load_config(ProcessType::Visualization, config.as_deref(), None, port) {
                Ok(config) => report(run_visualize(config).await),
                Err(err) => report(Err(err)),
            }
        }
        Commands::Simulate {
            host,
            port,
            steps,
            interval_ms,
            config,
        } => match load_config(ProcessType::Simulation, config.as_deref(), host, port) {
            Ok(config) => {
                let interval = Duration::from_millis(interval_ms);
                report(run_simulate(config, steps, interval).await)
            }
            Err(err) => report(Err(err)),
        },
        Commands::InspectUndo { file } => run_inspect_undo(&file),
    };
    process::exit(exit_code);
}

fn report(result: Result<(), LinkError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    }
}

/// File, then environment, then flags.
fn load_config(
    process_type: ProcessType,
    file: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<LinkConfig, LinkError> {
    let mut config = match file {
        Some(path) => LinkConfig::from_json_file(path)?,
        None => LinkConfig::default(),
    }
    .apply_env()?;
    config.process_type = process_type;
    if let Some(host) = host {
        config.hostname = host;
    }
    if let Some(port) = port {
        config.port = port;
    }
    Ok(config)
}

const POLL: Duration = Duration::from_secs(1);

async fn run_visualize(config: LinkConfig) -> Result<(), LinkError> {
    let network = TcpNetwork::new(config.handshake_timeout());
    let mut pm = InMemoryProxyManager::new();
    let mut link = LiveInsituLink::new(config, network);
    link.initialize(&pm).await?;

    let mut served = false;
    loop {
        if !link.is_connected() {
            if served {
                break;
            }
            if link.process_events(POLL).await? {
                served = true;
                match link.insitu_state()? {
                    Some(state) => {
                        let summary = StateLoader::load_state(&mut pm, &state)?;
                        tracing::info!(
                            proxies = summary.created.len(),
                            registrations = summary.registered.len(),
                            "loaded simulation pipeline"
                        );
                    }
                    None => tracing::warn!("connected without a pipeline state"),
                }
            }
            continue;
        }
        if let Some(call) = link.process_rmis(POLL).await? {
            tracing::info!(?call, "served remote call");
        }
    }

    let state = link.state();
    tracing::info!(?state, "simulation left");
    let summary = json!({
        "state": state,
        "registered_rmis": link.registered_rmis(),
        "last_post_process_time": link.last_post_process_time(),
        "proxies": pm.proxy_count(),
    });
    println!("{summary}");
    Ok(())
}

/// Sphere feeding a shrink filter.
fn demo_pipeline(pm: &mut InMemoryProxyManager) -> Result<(), LinkError> {
    let sphere = pm.create_registered("sources", "Sphere1", "sources", "SphereSource")?;
    pm.set_property(sphere, "Radius", PropertyValue::scalar(0.5))?;
    let shrink = pm.create_registered("sources", "Shrink1", "filters", "ShrinkFilter")?;
    pm.set_property(shrink, "Input", PropertyValue::proxy(sphere))?;
    pm.set_property(shrink, "ShrinkFactor", PropertyValue::scalar(0.5))?;
    Ok(())
}

async fn run_simulate(config: LinkConfig, steps: u32, interval: Duration) -> Result<(), LinkError> {
    let network = TcpNetwork::new(config.handshake_timeout());
    let mut pm = InMemoryProxyManager::new();
    demo_pipeline(&mut pm)?;

    let mut link = LiveInsituLink::new(config, network);
    link.initialize(&pm).await?;
    if link.state() != LinkState::Connected {
        tracing::info!("visualization not reachable yet; running offline");
    }

    for step in 0..steps {
        let time = f64::from(step) * 0.1;
        let outcome = link.simulation_update(&mut pm, time).await?;
        link.simulation_post_process(time).await?;
        tracing::info!(step, time, ?outcome, "time step");
        tokio::time::sleep(interval).await;
    }
    link.drop_connection().await;
    Ok(())
}

/// Exit codes: 0 = success, 1 = unreadable set, 3 = I/O error.
fn run_inspect_undo(path: &Path) -> i32 {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("Error: failed to read '{}': {}", path.display(), err);
            return 3;
        }
    };
    let set = match UndoRedoStateLoader::load_undo_set_str(&text) {
        Ok(set) => set,
        Err(err) => {
            eprintln!("Error: '{}' is not a valid undo set: {}", path.display(), err);
            return 1;
        }
    };

    let elements: Vec<_> = set.iter().map(|e| e.summary()).collect();
    let summary = json!({
        "label": set.label(),
        "elements": elements,
        "sessions": set.sessions(),
    });
    match serde_json::to_string_pretty(&summary) {
        Ok(text) => {
            println!("{text}");
            0
        }
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    }
}
