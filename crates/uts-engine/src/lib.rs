//! ---
//! uts_section: "02-simulation-engine"
//! uts_subsection: "module"
//! uts_type: "source"
//! uts_scope: "code"
//! uts_description: "Transit simulation core: buses, stops, passengers, coordination."
//! uts_version: "v0.0.0-prealpha"
//! uts_owner: "tbd"
//! ---
pub mod bus;
pub mod coordinator;
pub mod events;
pub mod passenger;
pub mod stop;

/// Shared result type for engine construction operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised when composing a simulation. Runtime constraint violations
/// (full bus, wrong phase) are expressed as no-ops or boolean failure
/// instead; a failing operation only affects the bus, passenger, or stop
/// involved.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A route with fewer than two stops cannot move.
    #[error("route must contain at least two stops, got {0}")]
    DegenerateRoute(usize),
    /// A route or intake referenced a stop the network does not know.
    #[error("unknown stop '{0}'")]
    UnknownStop(StopName),
    /// A bus cannot be created without room for passengers.
    #[error("bus capacity must be positive")]
    ZeroCapacity,
    /// A bus cannot be seeded beyond the end of its route.
    #[error("start index {index} outside route of {len} stops")]
    StartIndexOutOfRange { index: usize, len: usize },
}

pub use bus::{Bus, BusId, BusInfo, BusObserver, Direction, MovementPhase};
pub use coordinator::Coordinator;
pub use events::{BusEvent, StopEvent, TransitEvent, TransitPayload};
pub use passenger::{Passenger, PassengerId, PassengerInfo};
pub use stop::{Stop, StopName};
