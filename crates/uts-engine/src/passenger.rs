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

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stop::StopName;

/// Instance identity of a passenger. Two passengers with the same name and
/// destination remain distinct entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PassengerId(Uuid);

impl PassengerId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PassengerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.simple().fmt(f)
    }
}

/// A rider waiting at a stop or travelling on a bus.
///
/// Deliberately not `Clone`: a passenger is owned by exactly one container
/// at a time (a stop's waiting queue or a bus's onboard set) and moves
/// between them on boarding and alighting.
#[derive(Debug)]
pub struct Passenger {
    id: PassengerId,
    name: String,
    destination: StopName,
}

impl Passenger {
    pub fn new(name: impl Into<String>, destination: StopName) -> Self {
        Self {
            id: PassengerId::generate(),
            name: name.into(),
            destination,
        }
    }

    pub fn id(&self) -> PassengerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn destination(&self) -> &StopName {
        &self.destination
    }

    /// Cheap display snapshot carried on emitted events.
    pub fn info(&self) -> PassengerInfo {
        PassengerInfo {
            id: self.id,
            name: self.name.clone(),
            destination: self.destination.clone(),
        }
    }
}

impl fmt::Display for Passenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (to {})", self.name, self.destination)
    }
}

/// Snapshot of a passenger attached to event notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassengerInfo {
    pub id: PassengerId,
    pub name: String,
    pub destination: StopName,
}

impl fmt::Display for PassengerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (to {})", self.name, self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passengers_are_distinct_instances() {
        let a = Passenger::new("Ada", StopName::from("North"));
        let b = Passenger::new("Ada", StopName::from("North"));
        assert_ne!(a.id(), b.id());
        assert_eq!(a.name(), b.name());
        assert_eq!(a.destination(), b.destination());
    }

    #[test]
    fn info_snapshot_preserves_identity() {
        let p = Passenger::new("Ada", StopName::from("North"));
        let info = p.info();
        assert_eq!(info.id, p.id());
        assert_eq!(info.destination, *p.destination());
    }
}
