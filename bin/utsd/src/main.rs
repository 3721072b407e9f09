//! ---
//! uts_section: "01-core-functionality"
//! uts_subsection: "binary"
//! uts_type: "source"
//! uts_scope: "code"
//! uts_description: "Binary entrypoint for the UTS daemon."
//! uts_version: "v0.0.0-prealpha"
//! uts_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use uts_common::config::AppConfig;
use uts_common::logging::init_tracing;
use uts_engine::{BusEvent, Coordinator, StopEvent, StopName, TransitEvent, TransitPayload};
use uts_simgen::PassengerGenerator;

#[derive(Debug, Parser)]
#[command(author, version, about = "UTS daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the simulation")]
    Run,
    #[command(about = "Validate the configuration and exit")]
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.dev.toml"));

    let loaded = AppConfig::load_with_source(&candidates)?;
    let config = loaded.config;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Validate => {
            println!("Configuration OK: {}", loaded.source.display());
            println!("Stops: {}", config.network.stops.join(", "));
            println!("Buses: {}", config.network.buses.len());
        }
        Commands::Run => {
            init_tracing("utsd", &config.logging)?;
            info!(config_path = %loaded.source.display(), "configuration loaded");
            run_daemon(config).await?;
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let stop_names: Vec<StopName> = config
        .network
        .stops
        .iter()
        .map(|name| StopName::from(name.as_str()))
        .collect();
    let coordinator = Arc::new(Coordinator::new(stop_names, config.timing));

    // Presenter first, so the startup events of the seeded fleet are shown.
    let (shutdown, _) = broadcast::channel::<()>(1);
    let delivered = Arc::new(AtomicU64::new(0));
    let presenter = spawn_presenter(
        coordinator.subscribe(),
        shutdown.subscribe(),
        Arc::clone(&delivered),
    );

    for bus in &config.network.buses {
        let route: Vec<StopName> = bus
            .route
            .iter()
            .map(|name| StopName::from(name.as_str()))
            .collect();
        coordinator.add_bus_at(route, bus.capacity, bus.start_index)?;
    }

    let generator = Arc::new(PassengerGenerator::new(
        config.generator.clone(),
        Arc::clone(&coordinator),
    ));
    if generator.config().enabled {
        generator.start();
    } else {
        info!("passenger generator disabled by configuration");
    }

    info!(
        stops = config.network.stops.len(),
        buses = config.network.buses.len(),
        "daemon running; waiting for termination signal"
    );
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    generator.stop();
    generator.join().await;
    coordinator.shutdown().await;

    let _ = shutdown.send(());
    let _ = presenter.await;
    info!(
        delivered = delivered.load(Ordering::Relaxed),
        "simulation finished"
    );

    Ok(())
}

/// Read-only consumer turning the event stream into log lines. Falling
/// behind only costs it events, never engine progress.
fn spawn_presenter(
    mut events: broadcast::Receiver<TransitEvent>,
    mut shutdown: broadcast::Receiver<()>,
    delivered: Arc<AtomicU64>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                received = events.recv() => match received {
                    Ok(event) => render_event(&event, &delivered),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "presenter lagged behind the event stream");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

fn render_event(event: &TransitEvent, delivered: &AtomicU64) {
    match &event.payload {
        TransitPayload::Bus(bus_event) => match bus_event {
            BusEvent::ArrivedAtStop { bus, stop } => {
                info!(bus = %bus.label, stop = %stop, "bus arrived");
            }
            BusEvent::Departing { bus, stop } => {
                info!(bus = %bus.label, stop = %stop, "bus departing; boarding open");
            }
            BusEvent::DepartedFromStop { bus, stop } => {
                info!(bus = %bus.label, stop = %stop, "bus departed");
            }
            BusEvent::PositionChanged { .. } => {}
            BusEvent::PassengerBoarded { bus, passenger } => {
                info!(bus = %bus.label, passenger = %passenger, "passenger boarded");
            }
            BusEvent::PassengerDisembarked {
                bus,
                stop,
                passenger,
            } => {
                delivered.fetch_add(1, Ordering::Relaxed);
                info!(bus = %bus.label, stop = %stop, passenger = %passenger, "passenger delivered");
            }
            BusEvent::BusFull { bus, stop } => {
                info!(bus = %bus.label, stop = %stop, "bus is full");
            }
            BusEvent::BusRemoved { bus } => {
                info!(bus = %bus.label, "bus removed from route");
            }
        },
        TransitPayload::Stop(StopEvent::BusArrived { stop, bus }) => {
            info!(stop = %stop, bus = %bus.label, "stop registered bus");
        }
    }
}
