//! ---
//! uts_section: "03-passenger-generation"
//! uts_subsection: "module"
//! uts_type: "source"
//! uts_scope: "code"
//! uts_description: "Background task minting random passengers into stop queues."
//! uts_version: "v0.0.0-prealpha"
//! uts_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use uts_common::config::GeneratorConfig;
use uts_engine::{Coordinator, Passenger, StopName};

const SHUTDOWN_CHANNEL_CAPACITY: usize = 4;

/// Background collaborator that mints passengers at random intervals and
/// hands them to the coordinator's intake. It never touches stops or
/// buses directly.
pub struct PassengerGenerator {
    config: GeneratorConfig,
    coordinator: Arc<Coordinator>,
    shutdown: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PassengerGenerator {
    pub fn new(config: GeneratorConfig, coordinator: Arc<Coordinator>) -> Self {
        let (shutdown, _) = broadcast::channel(SHUTDOWN_CHANNEL_CAPACITY);
        Self {
            config,
            coordinator,
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Spawn the generation loop. Calling `start` on a generator that is
    /// already running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        // Subscribe before spawning so a stop() racing the spawn is not lost.
        let shutdown = self.shutdown.subscribe();
        let generator = Arc::clone(self);
        *task = Some(tokio::spawn(async move {
            generator.run(shutdown).await;
        }));
        info!(
            min_ms = self.config.min_interval.as_millis() as u64,
            max_ms = self.config.max_interval.as_millis() as u64,
            seed = self.config.seed,
            "passenger generator started"
        );
    }

    /// Request the generation loop to wind down.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    /// Await the generation task, if one was started.
    pub async fn join(&self) {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let stops = self.coordinator.stop_names();
        if stops.len() < 2 {
            warn!(
                stops = stops.len(),
                "not enough stops to generate passengers"
            );
            return;
        }
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        loop {
            let pause = next_interval(&mut rng, &self.config);
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(pause) => {}
            }
            let (origin, passenger) = mint_passenger(&mut rng, &stops);
            debug!(
                passenger = %passenger,
                origin = %origin,
                "generated passenger"
            );
            if let Err(err) = self.coordinator.enqueue_passenger(&origin, passenger) {
                warn!(%err, "dropping generated passenger");
            }
        }
        info!("passenger generator stopped");
    }
}

impl std::fmt::Debug for PassengerGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassengerGenerator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Pick the pause before the next passenger, inclusive of both bounds.
pub fn next_interval(rng: &mut impl Rng, config: &GeneratorConfig) -> Duration {
    let min = config.min_interval.as_millis() as u64;
    let max = config.max_interval.as_millis() as u64;
    Duration::from_millis(rng.gen_range(min..=max))
}

/// Mint a passenger waiting at a random origin, with a destination that is
/// always a different stop. Requires at least two stops.
pub fn mint_passenger(rng: &mut impl Rng, stops: &[StopName]) -> (StopName, Passenger) {
    let origin_index = rng.gen_range(0..stops.len());
    // Draw from the remaining stops so origin and destination never match.
    let mut destination_index = rng.gen_range(0..stops.len() - 1);
    if destination_index >= origin_index {
        destination_index += 1;
    }
    let name = format!("Passenger {}", rng.gen_range(0..1000));
    (
        stops[origin_index].clone(),
        Passenger::new(name, stops[destination_index].clone()),
    )
}
