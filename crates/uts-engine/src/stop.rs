//! ---
//! uts_section: "02-simulation-engine"
//! uts_subsection: "module"
//! uts_type: "source"
//! uts_scope: "code"
//! uts_description: "Transit simulation core: buses, stops, passengers, coordination."
//! uts_version: "v0.0.0-prealpha"
//! uts_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::fmt;

use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::bus::{BusId, BusInfo};
use crate::events::{StopEvent, TransitEvent};
use crate::passenger::Passenger;

/// Name of a stop; stops compare by value, one instance exists per name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StopName(String);

impl StopName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StopName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StopName {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for StopName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug)]
struct StopInner {
    waiting: VecDeque<Passenger>,
    present: IndexSet<BusId>,
}

/// A transit stop: the waiting-passenger queue and the set of buses
/// currently present.
///
/// The inner state is the only engine state touched by more than one bus
/// task, so every operation takes the stop's lock for its full duration;
/// in particular [`Stop::dequeue_eligible`] claims passengers as a single
/// atomic step relative to other callers.
#[derive(Debug)]
pub struct Stop {
    name: StopName,
    events: broadcast::Sender<TransitEvent>,
    inner: Mutex<StopInner>,
}

impl Stop {
    pub fn new(name: StopName, events: broadcast::Sender<TransitEvent>) -> Self {
        Self {
            name,
            events,
            inner: Mutex::new(StopInner {
                waiting: VecDeque::new(),
                present: IndexSet::new(),
            }),
        }
    }

    pub fn name(&self) -> &StopName {
        &self.name
    }

    /// Register a bus as present. Idempotent; emits `BusArrived` only on
    /// the first insertion. Returns whether the bus was newly added.
    pub fn add_bus(&self, bus: &BusInfo) -> bool {
        let newly_added = {
            let mut inner = self.inner.lock();
            inner.present.insert(bus.id)
        };
        if newly_added {
            debug!(stop = %self.name, bus = %bus.label, "bus registered at stop");
            let _ = self.events.send(TransitEvent::stop(StopEvent::BusArrived {
                stop: self.name.clone(),
                bus: bus.clone(),
            }));
        }
        newly_added
    }

    /// Deregister a bus. Removes if present; callers observe departures via
    /// bus events, so no notification is emitted here.
    pub fn remove_bus(&self, bus: &BusId) -> bool {
        let mut inner = self.inner.lock();
        inner.present.shift_remove(bus)
    }

    /// Append a passenger to the waiting queue. Arrival order is preserved
    /// so boarding stays first-come-first-served among eligible riders.
    pub fn enqueue_passenger(&self, passenger: Passenger) {
        debug!(stop = %self.name, passenger = %passenger, "passenger waiting");
        let mut inner = self.inner.lock();
        inner.waiting.push_back(passenger);
    }

    /// Claim up to `max` waiting passengers, in queue order, whose
    /// destination lies on `route` and is not `exclude` (a bus never boards
    /// a rider bound for the very stop it is departing from).
    ///
    /// The removal happens under the stop lock as one atomic step: two
    /// buses departing this stop concurrently can never claim the same
    /// passenger.
    pub fn dequeue_eligible(
        &self,
        route: &[StopName],
        exclude: &StopName,
        max: usize,
    ) -> Vec<Passenger> {
        let mut inner = self.inner.lock();
        let mut claimed = Vec::new();
        let mut remaining = VecDeque::with_capacity(inner.waiting.len());
        while let Some(passenger) = inner.waiting.pop_front() {
            let eligible = claimed.len() < max
                && passenger.destination() != exclude
                && route.contains(passenger.destination());
            if eligible {
                claimed.push(passenger);
            } else {
                remaining.push_back(passenger);
            }
        }
        inner.waiting = remaining;
        claimed
    }

    /// Number of passengers currently waiting.
    pub fn waiting_count(&self) -> usize {
        self.inner.lock().waiting.len()
    }

    /// Buses currently registered at this stop, in arrival order.
    pub fn present_buses(&self) -> Vec<BusId> {
        self.inner.lock().present.iter().copied().collect()
    }
}

impl fmt::Display for Stop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stop {}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::passenger::Passenger;

    fn test_stop(name: &str) -> Stop {
        let (events, _) = broadcast::channel(64);
        Stop::new(StopName::from(name), events)
    }

    fn route(names: &[&str]) -> Vec<StopName> {
        names.iter().map(|n| StopName::from(*n)).collect()
    }

    #[test]
    fn add_bus_is_idempotent_and_notifies_once() {
        let (events, mut rx) = broadcast::channel(64);
        let stop = Stop::new(StopName::from("Central"), events);
        let bus = BusInfo::for_tests("A1");

        assert!(stop.add_bus(&bus));
        assert!(!stop.add_bus(&bus));
        assert_eq!(stop.present_buses(), vec![bus.id]);

        let event = rx.try_recv().expect("one arrival event");
        assert_eq!(event.kind(), "stop");
        assert!(rx.try_recv().is_err(), "no duplicate arrival event");
    }

    #[test]
    fn remove_bus_clears_presence() {
        let stop = test_stop("Central");
        let bus = BusInfo::for_tests("A1");
        stop.add_bus(&bus);
        assert!(stop.remove_bus(&bus.id));
        assert!(!stop.remove_bus(&bus.id));
        assert!(stop.present_buses().is_empty());
    }

    #[test]
    fn dequeue_respects_queue_order_route_and_exclusion() {
        let stop = test_stop("Central");
        stop.enqueue_passenger(Passenger::new("p1", StopName::from("North")));
        stop.enqueue_passenger(Passenger::new("p2", StopName::from("Elsewhere")));
        stop.enqueue_passenger(Passenger::new("p3", StopName::from("Central")));
        stop.enqueue_passenger(Passenger::new("p4", StopName::from("South")));

        let claimed = stop.dequeue_eligible(
            &route(&["Central", "North", "South"]),
            &StopName::from("Central"),
            10,
        );
        let names: Vec<_> = claimed.iter().map(|p| p.name().to_owned()).collect();
        assert_eq!(names, vec!["p1", "p4"]);
        // Off-route and own-stop passengers keep waiting.
        assert_eq!(stop.waiting_count(), 2);
    }

    #[test]
    fn dequeue_honours_max_count() {
        let stop = test_stop("Central");
        for i in 0..5 {
            stop.enqueue_passenger(Passenger::new(format!("p{i}"), StopName::from("North")));
        }
        let claimed = stop.dequeue_eligible(
            &route(&["Central", "North"]),
            &StopName::from("Central"),
            2,
        );
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].name(), "p0");
        assert_eq!(claimed[1].name(), "p1");
        assert_eq!(stop.waiting_count(), 3);
    }

    #[test]
    fn concurrent_dequeues_never_double_assign() {
        let stop = Arc::new(test_stop("Central"));
        let total = 200;
        for i in 0..total {
            stop.enqueue_passenger(Passenger::new(format!("p{i}"), StopName::from("North")));
        }

        let shared_route = route(&["Central", "North"]);
        let mut handles = Vec::new();
        for _ in 0..4 {
            let stop = Arc::clone(&stop);
            let shared_route = shared_route.clone();
            handles.push(std::thread::spawn(move || {
                let mut claimed = Vec::new();
                loop {
                    let batch =
                        stop.dequeue_eligible(&shared_route, &StopName::from("Central"), 7);
                    if batch.is_empty() {
                        break;
                    }
                    claimed.extend(batch);
                }
                claimed
            }));
        }

        let mut seen = std::collections::HashSet::new();
        let mut count = 0usize;
        for handle in handles {
            for passenger in handle.join().expect("worker finishes") {
                assert!(seen.insert(passenger.id()), "passenger claimed twice");
                count += 1;
            }
        }
        assert_eq!(count, total, "every eligible passenger claimed exactly once");
        assert_eq!(stop.waiting_count(), 0);
    }
}
