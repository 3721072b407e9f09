//! ---
//! uts_section: "02-simulation-engine"
//! uts_subsection: "module"
//! uts_type: "source"
//! uts_scope: "code"
//! uts_description: "Transit simulation core: buses, stops, passengers, coordination."
//! uts_version: "v0.0.0-prealpha"
//! uts_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::BusInfo;
use crate::passenger::PassengerInfo;
use crate::stop::StopName;

/// Notification envelope broadcast to read-only consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitEvent {
    /// Timestamp when the event was emitted.
    pub timestamp: DateTime<Utc>,
    /// Actual payload carried by the event.
    pub payload: TransitPayload,
}

impl TransitEvent {
    pub fn bus(event: BusEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            payload: TransitPayload::Bus(event),
        }
    }

    pub fn stop(event: StopEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            payload: TransitPayload::Stop(event),
        }
    }

    /// Convenience accessor returning the payload kind as a static string.
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            TransitPayload::Bus(_) => "bus",
            TransitPayload::Stop(_) => "stop",
        }
    }
}

/// Payload classification for the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum TransitPayload {
    /// Lifecycle event emitted by a bus.
    Bus(BusEvent),
    /// Event emitted by a stop.
    Stop(StopEvent),
}

/// Bus lifecycle notifications, emitted at the protocol points of the
/// movement state machine. Every event reflects a fully-settled state:
/// `ArrivedAtStop` fires only after the stop index and progress are
/// updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusEvent {
    /// The bus is stationary at `stop` and boarding is allowed.
    ArrivedAtStop { bus: BusInfo, stop: StopName },
    /// The departure window is open: waiting passengers may board now.
    Departing { bus: BusInfo, stop: StopName },
    /// The bus left `stop` and is in transit.
    DepartedFromStop { bus: BusInfo, stop: StopName },
    /// Granular position update used purely for display interpolation.
    PositionChanged { bus: BusInfo, progress: f64 },
    /// A passenger boarded during the departure window.
    PassengerBoarded { bus: BusInfo, passenger: PassengerInfo },
    /// A passenger reached their destination and left the bus.
    PassengerDisembarked {
        bus: BusInfo,
        stop: StopName,
        passenger: PassengerInfo,
    },
    /// Boarding filled the bus to capacity.
    BusFull { bus: BusInfo, stop: StopName },
    /// The bus was taken off its route and will emit nothing further.
    BusRemoved { bus: BusInfo },
}

impl BusEvent {
    /// The bus that emitted this event.
    pub fn bus(&self) -> &BusInfo {
        match self {
            BusEvent::ArrivedAtStop { bus, .. }
            | BusEvent::Departing { bus, .. }
            | BusEvent::DepartedFromStop { bus, .. }
            | BusEvent::PositionChanged { bus, .. }
            | BusEvent::PassengerBoarded { bus, .. }
            | BusEvent::PassengerDisembarked { bus, .. }
            | BusEvent::BusFull { bus, .. }
            | BusEvent::BusRemoved { bus } => bus,
        }
    }
}

/// Stop notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StopEvent {
    /// A bus registered its presence at the stop.
    BusArrived { stop: StopName, bus: BusInfo },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_events_serialize_with_tagged_shape() {
        let event = TransitEvent::bus(BusEvent::PositionChanged {
            bus: BusInfo::for_tests("A1"),
            progress: 0.25,
        });
        let json = serde_json::to_value(&event).expect("serializes");
        assert_eq!(json["payload"]["kind"], "bus");
        assert_eq!(json["payload"]["data"]["event"], "position_changed");
        assert_eq!(json["payload"]["data"]["progress"], 0.25);

        let back: TransitEvent = serde_json::from_value(json).expect("deserializes");
        assert_eq!(back, event);
    }

    #[test]
    fn event_kind_labels() {
        let bus = BusInfo::for_tests("A1");
        let arrived = TransitEvent::stop(StopEvent::BusArrived {
            stop: StopName::from("Central"),
            bus: bus.clone(),
        });
        assert_eq!(arrived.kind(), "stop");
        let removed = TransitEvent::bus(BusEvent::BusRemoved { bus });
        assert_eq!(removed.kind(), "bus");
    }
}
