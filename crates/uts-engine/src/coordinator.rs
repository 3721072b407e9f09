//! ---
//! uts_section: "02-simulation-engine"
//! uts_subsection: "module"
//! uts_type: "source"
//! uts_scope: "code"
//! uts_description: "Transit simulation core: buses, stops, passengers, coordination."
//! uts_version: "v0.0.0-prealpha"
//! uts_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use uts_common::config::TimingConfig;

use crate::bus::{Bus, BusId, BusObserver};
use crate::events::{BusEvent, TransitEvent};
use crate::passenger::Passenger;
use crate::stop::{Stop, StopName};
use crate::{EngineError, Result};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Owns the stop registry and the bus registry, and wires every bus's
/// lifecycle notifications to stop membership updates and the boarding
/// protocol.
///
/// This is the seam between the engine and its collaborators: passenger
/// generation only ever calls [`Coordinator::enqueue_passenger`];
/// presentation only ever subscribes via [`Coordinator::subscribe`] and
/// reads bus/stop state.
pub struct Coordinator {
    timing: TimingConfig,
    stops: IndexMap<StopName, Arc<Stop>>,
    buses: Mutex<Vec<Arc<Bus>>>,
    wiring: Arc<StopWiring>,
    events: broadcast::Sender<TransitEvent>,
}

impl Coordinator {
    pub fn new(stop_names: impl IntoIterator<Item = StopName>, timing: TimingConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let mut stops = IndexMap::new();
        for name in stop_names {
            stops
                .entry(name.clone())
                .or_insert_with(|| Arc::new(Stop::new(name, events.clone())));
        }
        let wiring = Arc::new(StopWiring {
            stops: stops.clone(),
        });
        Self {
            timing,
            stops,
            buses: Mutex::new(Vec::new()),
            wiring,
            events,
        }
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Subscribe to the read-only event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TransitEvent> {
        self.events.subscribe()
    }

    pub fn stop(&self, name: &StopName) -> Option<Arc<Stop>> {
        self.stops.get(name).cloned()
    }

    pub fn stops(&self) -> Vec<Arc<Stop>> {
        self.stops.values().cloned().collect()
    }

    pub fn stop_names(&self) -> Vec<StopName> {
        self.stops.keys().cloned().collect()
    }

    pub fn buses(&self) -> Vec<Arc<Bus>> {
        self.buses.lock().clone()
    }

    pub fn bus(&self, id: BusId) -> Option<Arc<Bus>> {
        self.buses.lock().iter().find(|b| b.id() == id).cloned()
    }

    /// Derived view over the registry, recomputed on demand.
    pub fn moving_buses(&self) -> Vec<Arc<Bus>> {
        self.buses
            .lock()
            .iter()
            .filter(|b| b.is_moving())
            .cloned()
            .collect()
    }

    /// Create a bus on `route`, seat it at the first stop, wire its
    /// lifecycle events, and start its movement task. Labels run `A1,
    /// A2, …` in creation order.
    pub fn add_bus(&self, route: Vec<StopName>, capacity: usize) -> Result<Arc<Bus>> {
        self.add_bus_at(route, capacity, 0)
    }

    /// Like [`Coordinator::add_bus`], but seeds the bus at `start_index`
    /// on its route rather than at the first stop.
    pub fn add_bus_at(
        &self,
        route: Vec<StopName>,
        capacity: usize,
        start_index: usize,
    ) -> Result<Arc<Bus>> {
        if route.len() < 2 {
            return Err(EngineError::DegenerateRoute(route.len()));
        }
        if capacity == 0 {
            return Err(EngineError::ZeroCapacity);
        }
        if start_index >= route.len() {
            return Err(EngineError::StartIndexOutOfRange {
                index: start_index,
                len: route.len(),
            });
        }
        for name in &route {
            if !self.stops.contains_key(name) {
                return Err(EngineError::UnknownStop(name.clone()));
            }
        }

        let mut buses = self.buses.lock();
        let label = format!("A{}", buses.len() + 1);
        let bus = Arc::new(
            Bus::new(
                label,
                capacity,
                route.clone(),
                self.timing,
                self.events.clone(),
            )
            .with_start_index(start_index),
        );
        let observer: Arc<dyn BusObserver> = self.wiring.clone();
        bus.register_observer(observer);

        // Seat the bus at its starting stop before the loop begins; the
        // initial ArrivedAtStop then finds it already registered.
        if let Some(first) = self.stops.get(&route[start_index]) {
            first.add_bus(&bus.info());
        }

        buses.push(bus.clone());
        drop(buses);

        bus.start();
        info!(bus = %bus.label(), route = %bus.route_description(), capacity, "bus added to route");
        Ok(bus)
    }

    /// Intake used by the passenger-generation collaborator.
    pub fn enqueue_passenger(&self, stop: &StopName, passenger: Passenger) -> Result<()> {
        let target = self
            .stops
            .get(stop)
            .ok_or_else(|| EngineError::UnknownStop(stop.clone()))?;
        target.enqueue_passenger(passenger);
        Ok(())
    }

    /// Take a bus out of the simulation, if it is stationary. Returns
    /// whether the bus was removed; mid-transit requests are no-ops.
    pub fn remove_bus(&self, id: BusId) -> bool {
        let Some(bus) = self.bus(id) else {
            return false;
        };
        if !bus.remove_from_route() {
            return false;
        }
        self.buses.lock().retain(|b| b.id() != id);
        true
    }

    /// Cancel every bus task and await the unwinds. Cancelling one bus
    /// never affects the others beyond this orderly teardown.
    pub async fn shutdown(&self) {
        let buses = self.buses.lock().clone();
        for bus in &buses {
            bus.stop();
        }
        for bus in &buses {
            bus.join().await;
        }
        self.buses.lock().clear();
        info!("coordinator shutdown complete");
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("stops", &self.stops.len())
            .field("buses", &self.buses.lock().len())
            .finish_non_exhaustive()
    }
}

/// Synchronous wiring between bus lifecycle events and stop state:
/// arrivals register presence, departures and removals clear it, and the
/// departure window drives the boarding protocol.
struct StopWiring {
    stops: IndexMap<StopName, Arc<Stop>>,
}

impl BusObserver for StopWiring {
    fn on_event(&self, bus: &Bus, event: &BusEvent) {
        match event {
            BusEvent::ArrivedAtStop { stop, .. } => {
                if let Some(target) = self.stops.get(stop) {
                    target.add_bus(&bus.info());
                }
            }
            BusEvent::DepartedFromStop { .. } | BusEvent::BusRemoved { .. } => {
                // Remove from whichever stop currently lists the bus.
                for target in self.stops.values() {
                    target.remove_bus(&bus.id());
                }
            }
            BusEvent::Departing { stop, .. } => {
                let Some(target) = self.stops.get(stop) else {
                    return;
                };
                let window = bus.capacity().saturating_sub(bus.onboard_count());
                if window == 0 {
                    return;
                }
                for passenger in target.dequeue_eligible(bus.route(), stop, window) {
                    if let Err(passenger) = bus.board(passenger) {
                        warn!(bus = %bus.label(), stop = %stop, passenger = %passenger, "boarding rejected; passenger keeps waiting");
                        target.enqueue_passenger(passenger);
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<StopName> {
        list.iter().map(|n| StopName::from(*n)).collect()
    }

    fn test_coordinator() -> Coordinator {
        Coordinator::new(names(&["Central", "North", "South"]), TimingConfig::default())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn add_bus_rejects_degenerate_route() {
        let coordinator = test_coordinator();
        let err = coordinator
            .add_bus(names(&["Central"]), 5)
            .expect_err("single-stop route");
        assert!(matches!(err, EngineError::DegenerateRoute(1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn add_bus_rejects_unknown_stop() {
        let coordinator = test_coordinator();
        let err = coordinator
            .add_bus(names(&["Central", "Nowhere"]), 5)
            .expect_err("unknown stop");
        assert!(matches!(err, EngineError::UnknownStop(name) if name.as_str() == "Nowhere"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn add_bus_rejects_zero_capacity() {
        let coordinator = test_coordinator();
        let err = coordinator
            .add_bus(names(&["Central", "North"]), 0)
            .expect_err("zero capacity");
        assert!(matches!(err, EngineError::ZeroCapacity));
        coordinator.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn buses_are_labelled_in_creation_order() {
        let coordinator = test_coordinator();
        let a1 = coordinator
            .add_bus(names(&["Central", "North"]), 5)
            .expect("first bus");
        let a2 = coordinator
            .add_bus(names(&["Central", "South"]), 5)
            .expect("second bus");
        assert_eq!(a1.label(), "A1");
        assert_eq!(a2.label(), "A2");
        assert_eq!(coordinator.moving_buses().len(), 2);
        coordinator.shutdown().await;
        assert!(coordinator.moving_buses().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn new_bus_is_seated_at_its_first_stop() {
        let coordinator = test_coordinator();
        let bus = coordinator
            .add_bus(names(&["North", "South"]), 5)
            .expect("bus");
        let stop = coordinator.stop(&StopName::from("North")).expect("stop");
        assert_eq!(stop.present_buses(), vec![bus.id()]);
        coordinator.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bus_can_be_seeded_mid_route() {
        let coordinator = test_coordinator();
        let bus = coordinator
            .add_bus_at(names(&["Central", "North", "South"]), 5, 1)
            .expect("bus");
        assert_eq!(bus.current_stop().as_str(), "North");
        let stop = coordinator.stop(&StopName::from("North")).expect("stop");
        assert_eq!(stop.present_buses(), vec![bus.id()]);
        coordinator.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn add_bus_at_rejects_start_beyond_route() {
        let coordinator = test_coordinator();
        let err = coordinator
            .add_bus_at(names(&["Central", "North"]), 5, 2)
            .expect_err("start index beyond route");
        assert!(matches!(
            err,
            EngineError::StartIndexOutOfRange { index: 2, len: 2 }
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn enqueue_passenger_rejects_unknown_stop() {
        let coordinator = test_coordinator();
        let result = coordinator.enqueue_passenger(
            &StopName::from("Nowhere"),
            Passenger::new("p1", StopName::from("Central")),
        );
        assert!(matches!(result, Err(EngineError::UnknownStop(_))));
    }
}
