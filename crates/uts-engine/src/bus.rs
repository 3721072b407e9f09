//! ---
//! uts_section: "02-simulation-engine"
//! uts_subsection: "module"
//! uts_type: "source"
//! uts_scope: "code"
//! uts_description: "Transit simulation core: buses, stops, passengers, coordination."
//! uts_version: "v0.0.0-prealpha"
//! uts_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use uts_common::config::TimingConfig;

use crate::events::{BusEvent, TransitEvent};
use crate::passenger::Passenger;
use crate::stop::StopName;

/// Instance identity of a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(Uuid);

impl BusId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for BusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.simple().fmt(f)
    }
}

/// Compact bus snapshot attached to event notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusInfo {
    pub id: BusId,
    pub label: String,
}

impl fmt::Display for BusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

#[cfg(test)]
impl BusInfo {
    pub(crate) fn for_tests(label: &str) -> Self {
        Self {
            id: BusId::generate(),
            label: label.to_owned(),
        }
    }
}

/// Travel direction along the route line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Display arrow used by presentation layers.
    pub fn symbol(&self) -> &'static str {
        match self {
            Direction::Forward => "→",
            Direction::Backward => "←",
        }
    }
}

/// Phase of the per-bus movement state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementPhase {
    /// Stationary at a stop; boarding allowed, removal safe.
    AtStop,
    /// Departure window open; boarding still allowed, about to leave.
    Departing,
    /// Between stops; progress advancing, removal unsafe.
    InTransit,
    /// Terminal: the movement task was cancelled.
    Stopped,
}

impl MovementPhase {
    /// Whether the bus is safely stationary at a stop.
    pub fn is_stationary(&self) -> bool {
        matches!(self, MovementPhase::AtStop | MovementPhase::Departing)
    }
}

/// Observer invoked synchronously at every bus event emission point, in
/// registration order, before the event is forwarded to the broadcast
/// stream. The coordinator's stop wiring lives behind this seam.
pub trait BusObserver: Send + Sync {
    fn on_event(&self, bus: &Bus, event: &BusEvent);
}

#[derive(Debug)]
struct BusState {
    current_index: usize,
    direction: Direction,
    phase: MovementPhase,
    progress: f64,
    onboard: Vec<Passenger>,
    moving: bool,
}

/// A bus bound to a route, owning the cancellable movement task that runs
/// the travel state machine.
///
/// All fields other than `onboard` are mutated only by the bus's own task;
/// `onboard` is additionally touched by [`Bus::board`], which the departure
/// window wiring invokes from within that same task.
pub struct Bus {
    id: BusId,
    label: String,
    capacity: usize,
    route: Vec<StopName>,
    timing: TimingConfig,
    events: broadcast::Sender<TransitEvent>,
    observers: Mutex<Vec<Arc<dyn BusObserver>>>,
    state: Mutex<BusState>,
    shutdown: broadcast::Sender<()>,
    drive_task: Mutex<Option<JoinHandle<()>>>,
}

impl Bus {
    pub fn new(
        label: impl Into<String>,
        capacity: usize,
        route: Vec<StopName>,
        timing: TimingConfig,
        events: broadcast::Sender<TransitEvent>,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(4);
        Self {
            id: BusId::generate(),
            label: label.into(),
            capacity,
            route,
            timing,
            events,
            observers: Mutex::new(Vec::new()),
            state: Mutex::new(BusState {
                current_index: 0,
                direction: Direction::Forward,
                phase: MovementPhase::AtStop,
                progress: 0.0,
                onboard: Vec::new(),
                moving: false,
            }),
            shutdown,
            drive_task: Mutex::new(None),
        }
    }

    /// Place the bus at a different starting position on its route.
    pub fn with_start_index(self, index: usize) -> Self {
        {
            let mut state = self.state.lock();
            state.current_index = index.min(self.route.len().saturating_sub(1));
        }
        self
    }

    pub fn id(&self) -> BusId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn route(&self) -> &[StopName] {
        &self.route
    }

    /// Human-readable route line, e.g. `Central → North → South`.
    pub fn route_description(&self) -> String {
        self.route
            .iter()
            .map(StopName::as_str)
            .collect::<Vec<_>>()
            .join(" → ")
    }

    pub fn info(&self) -> BusInfo {
        BusInfo {
            id: self.id,
            label: self.label.clone(),
        }
    }

    pub fn current_index(&self) -> usize {
        self.state.lock().current_index
    }

    pub fn current_stop(&self) -> StopName {
        let state = self.state.lock();
        self.route[state.current_index].clone()
    }

    pub fn direction(&self) -> Direction {
        self.state.lock().direction
    }

    pub fn direction_symbol(&self) -> &'static str {
        self.direction().symbol()
    }

    pub fn phase(&self) -> MovementPhase {
        self.state.lock().phase
    }

    /// Progress towards the next stop in `[0, 1)`.
    pub fn progress(&self) -> f64 {
        self.state.lock().progress
    }

    pub fn onboard_count(&self) -> usize {
        self.state.lock().onboard.len()
    }

    pub fn is_moving(&self) -> bool {
        self.state.lock().moving
    }

    /// Register an observer for synchronous event dispatch. Must happen
    /// before [`Bus::start`] for the wiring to see the initial arrival.
    pub fn register_observer(&self, observer: Arc<dyn BusObserver>) {
        self.observers.lock().push(observer);
    }

    /// Begin the travel cycle on an independent cancellable task.
    ///
    /// No-op if the bus is already moving or the route is too short to
    /// drive; starting twice never spawns a second loop.
    pub fn start(self: &Arc<Self>) {
        if self.route.len() < 2 {
            warn!(bus = %self.label, stops = self.route.len(), "route too short to drive");
            return;
        }
        {
            let mut state = self.state.lock();
            if state.moving {
                debug!(bus = %self.label, "already moving; start ignored");
                return;
            }
            state.moving = true;
            state.phase = MovementPhase::AtStop;
            state.progress = 0.0;
        }
        // Subscribe before spawning so a stop() issued right after start()
        // is still observed by the task.
        let shutdown = self.shutdown.subscribe();
        let bus = Arc::clone(self);
        let handle = tokio::spawn(async move { bus.drive(shutdown).await });
        *self.drive_task.lock() = Some(handle);
    }

    /// Request cancellation of the travel task. The task observes the
    /// signal at its next suspension point; progress resets to zero and a
    /// position update is signalled immediately.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            state.moving = false;
            state.phase = MovementPhase::Stopped;
            state.progress = 0.0;
        }
        let _ = self.shutdown.send(());
        self.emit(BusEvent::PositionChanged {
            bus: self.info(),
            progress: 0.0,
        });
    }

    /// Await the movement task after a cancellation request.
    pub async fn join(&self) {
        let handle = self.drive_task.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!(bus = %self.label, error = %err, "movement task join error");
            }
        }
    }

    /// Board a passenger during a stationary phase.
    ///
    /// Fails by handing the passenger back when the bus is mid-transit,
    /// already full, or the destination is not on this route; the caller
    /// leaves the passenger waiting. On success `PassengerBoarded` is
    /// emitted, plus `BusFull` once if capacity is now reached.
    pub fn board(&self, passenger: Passenger) -> std::result::Result<(), Passenger> {
        let (info, now_full, stop) = {
            let mut state = self.state.lock();
            if !state.phase.is_stationary() {
                return Err(passenger);
            }
            if state.onboard.len() >= self.capacity {
                return Err(passenger);
            }
            if !self.route.contains(passenger.destination()) {
                return Err(passenger);
            }
            let info = passenger.info();
            state.onboard.push(passenger);
            (
                info,
                state.onboard.len() >= self.capacity,
                self.route[state.current_index].clone(),
            )
        };
        self.emit(BusEvent::PassengerBoarded {
            bus: self.info(),
            passenger: info,
        });
        if now_full {
            self.emit(BusEvent::BusFull {
                bus: self.info(),
                stop,
            });
        }
        Ok(())
    }

    /// Whether the bus may be taken out of the simulation right now.
    /// Never true between `DepartedFromStop` and the next `ArrivedAtStop`.
    pub fn can_be_removed(&self) -> bool {
        self.state.lock().phase.is_stationary()
    }

    /// Cancel the travel task and emit `BusRemoved`. No-op unless the bus
    /// is stationary; removing a bus mid-transit would strand its
    /// passengers. The phase check and the transition to `Stopped` form
    /// one critical section, so a departure racing the removal can never
    /// slip the bus into transit after the check passed. Returns whether
    /// the bus was removed.
    pub fn remove_from_route(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !state.phase.is_stationary() {
                debug!(bus = %self.label, phase = ?state.phase, "removal refused while not stationary");
                return false;
            }
            state.moving = false;
            state.phase = MovementPhase::Stopped;
            state.progress = 0.0;
        }
        let _ = self.shutdown.send(());
        self.emit(BusEvent::PositionChanged {
            bus: self.info(),
            progress: 0.0,
        });
        self.emit(BusEvent::BusRemoved { bus: self.info() });
        true
    }

    fn emit(&self, event: BusEvent) {
        let observers = self.observers.lock().clone();
        for observer in &observers {
            observer.on_event(self, &event);
        }
        let _ = self.events.send(TransitEvent::bus(event));
    }

    /// Move the cycle into `phase`, unless a stop or removal already put
    /// the bus into `Stopped`; the drive loop bails out on `false`. The
    /// check shares the critical section with the transition, mirroring
    /// [`Bus::remove_from_route`] from the other side.
    fn begin_phase(&self, phase: MovementPhase) -> bool {
        let mut state = self.state.lock();
        if state.phase == MovementPhase::Stopped {
            return false;
        }
        state.phase = phase;
        true
    }

    fn advance_progress(&self, progress: f64) -> bool {
        let mut state = self.state.lock();
        if state.phase == MovementPhase::Stopped {
            return false;
        }
        state.progress = progress;
        true
    }

    /// Bounce traversal: flip direction at either end of the line instead
    /// of wrapping, so a route of length ≥ 2 never stalls. Also settles the
    /// arrival state (progress zeroed, phase back to `AtStop`) so the
    /// subsequent `ArrivedAtStop` reflects the final position. Returns
    /// `None` once the bus has been stopped or removed.
    fn advance_to_next_stop(&self) -> Option<StopName> {
        let mut state = self.state.lock();
        if state.phase == MovementPhase::Stopped {
            return None;
        }
        match state.direction {
            Direction::Forward => {
                state.current_index += 1;
                if state.current_index >= self.route.len() {
                    state.direction = Direction::Backward;
                    state.current_index = self.route.len() - 2;
                }
            }
            Direction::Backward => {
                if state.current_index == 0 {
                    state.direction = Direction::Forward;
                    state.current_index = 1;
                } else {
                    state.current_index -= 1;
                }
            }
        }
        state.progress = 0.0;
        state.phase = MovementPhase::AtStop;
        Some(self.route[state.current_index].clone())
    }

    /// Take every onboard passenger whose destination is `stop`, in no
    /// particular order.
    fn take_passengers_for(&self, stop: &StopName) -> Vec<Passenger> {
        let mut state = self.state.lock();
        let (leaving, staying): (Vec<Passenger>, Vec<Passenger>) = state
            .onboard
            .drain(..)
            .partition(|p| p.destination() == stop);
        state.onboard = staying;
        leaving
    }

    /// Cancellable sleep; returns `false` when cancellation was observed.
    async fn pause(&self, delay: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
        tokio::select! {
            _ = shutdown.recv() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// The seven-step travel cycle. Strictly sequential within one bus:
    /// every suspension point doubles as a cancellation checkpoint, so a
    /// stop request unwinds the task within one delay step.
    async fn drive(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        debug!(bus = %self.label, route = %self.route_description(), "movement task started");

        // Initial arrival, with the longer dwell that seeds boarding
        // before any movement.
        if !self.begin_phase(MovementPhase::AtStop) {
            return;
        }
        self.emit(BusEvent::ArrivedAtStop {
            bus: self.info(),
            stop: self.current_stop(),
        });
        if !self.pause(self.timing.initial_dwell, &mut shutdown).await {
            return;
        }

        loop {
            // Departure window: the wiring pulls eligible passengers in
            // response to this signal while the bus holds position.
            let stop = self.current_stop();
            if !self.begin_phase(MovementPhase::Departing) {
                return;
            }
            self.emit(BusEvent::Departing {
                bus: self.info(),
                stop: stop.clone(),
            });
            if !self.pause(self.timing.pre_departure, &mut shutdown).await {
                return;
            }

            // Leave the stop.
            if !self.begin_phase(MovementPhase::InTransit) {
                return;
            }
            self.emit(BusEvent::DepartedFromStop {
                bus: self.info(),
                stop,
            });

            // Transit: discrete progress steps from 0 to just-under-1.
            let steps = self.timing.transit_step_count;
            for step in 0..steps {
                if !self
                    .pause(self.timing.transit_step_delay, &mut shutdown)
                    .await
                {
                    return;
                }
                let progress = f64::from(step) / f64::from(steps);
                if !self.advance_progress(progress) {
                    return;
                }
                self.emit(BusEvent::PositionChanged {
                    bus: self.info(),
                    progress,
                });
            }

            // Arrival at the next stop on the line.
            let Some(stop) = self.advance_to_next_stop() else {
                return;
            };
            self.emit(BusEvent::ArrivedAtStop {
                bus: self.info(),
                stop: stop.clone(),
            });
            self.emit(BusEvent::PositionChanged {
                bus: self.info(),
                progress: 0.0,
            });

            // Alight everyone whose destination this is.
            for passenger in self.take_passengers_for(&stop) {
                debug!(bus = %self.label, stop = %stop, passenger = %passenger, "passenger disembarked");
                self.emit(BusEvent::PassengerDisembarked {
                    bus: self.info(),
                    stop: stop.clone(),
                    passenger: passenger.info(),
                });
            }

            if !self.pause(self.timing.dwell, &mut shutdown).await {
                return;
            }
        }
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("route", &self.route)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus {} ({})", self.label, self.route_description())
    }
}
