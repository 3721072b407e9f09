//! ---
//! uts_section: "02-simulation-engine"
//! uts_subsection: "tests"
//! uts_type: "source"
//! uts_scope: "test"
//! uts_description: "End-to-end scenarios for the movement state machine and boarding protocol."
//! uts_version: "v0.0.0-prealpha"
//! uts_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::timeout;

use uts_common::config::TimingConfig;
use uts_engine::{
    BusEvent, Coordinator, Direction, Passenger, StopName, TransitEvent, TransitPayload,
};

fn fast_timing() -> TimingConfig {
    TimingConfig {
        initial_dwell: Duration::from_millis(60),
        dwell: Duration::from_millis(60),
        pre_departure: Duration::from_millis(30),
        transit_step_count: 5,
        transit_step_delay: Duration::from_millis(4),
    }
}

fn names(list: &[&str]) -> Vec<StopName> {
    list.iter().map(|n| StopName::from(*n)).collect()
}

/// Wait until a bus event matching `pred` shows up on the stream.
async fn wait_for_bus_event<F>(
    rx: &mut broadcast::Receiver<TransitEvent>,
    deadline: Duration,
    mut pred: F,
) -> Option<BusEvent>
where
    F: FnMut(&BusEvent) -> bool,
{
    timeout(deadline, async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let TransitPayload::Bus(inner) = event.payload {
                        if pred(&inner) {
                            return inner;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    std::future::pending::<()>().await;
                }
            }
        }
    })
    .await
    .ok()
}

fn drain_bus_events(rx: &mut broadcast::Receiver<TransitEvent>) -> Vec<BusEvent> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => {
                if let TransitPayload::Bus(inner) = event.payload {
                    out.push(inner);
                }
            }
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    out
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_bus_delivers_passenger_between_two_stops() {
    let coordinator = Coordinator::new(names(&["X", "Y"]), fast_timing());
    let mut rx = coordinator.subscribe();

    coordinator
        .enqueue_passenger(&StopName::from("X"), Passenger::new("P1", StopName::from("Y")))
        .expect("stop exists");

    let bus = coordinator
        .add_bus(names(&["X", "Y"]), 2)
        .expect("bus added");

    let boarded = wait_for_bus_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, BusEvent::PassengerBoarded { .. })
    })
    .await
    .expect("P1 boards before first departure");
    if let BusEvent::PassengerBoarded { passenger, .. } = boarded {
        assert_eq!(passenger.name, "P1");
    }
    assert_eq!(
        coordinator
            .stop(&StopName::from("X"))
            .expect("stop X")
            .waiting_count(),
        0
    );

    let dropped = wait_for_bus_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, BusEvent::PassengerDisembarked { .. })
    })
    .await
    .expect("P1 delivered after one transit");
    if let BusEvent::PassengerDisembarked { stop, passenger, .. } = dropped {
        assert_eq!(stop.as_str(), "Y");
        assert_eq!(passenger.name, "P1");
    }
    assert_eq!(bus.onboard_count(), 0);
    assert_eq!(bus.current_stop().as_str(), "Y");

    // The following leg bounces back: arrival at X with direction flipped.
    wait_for_bus_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, BusEvent::ArrivedAtStop { stop, .. } if stop.as_str() == "X")
    })
    .await
    .expect("bus bounces back to X");
    assert_eq!(bus.direction(), Direction::Backward);
    assert_eq!(bus.current_index(), 0);

    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_bus_boards_in_queue_order_and_signals_full_once() {
    let coordinator = Coordinator::new(names(&["X", "Y"]), fast_timing());
    let mut rx = coordinator.subscribe();
    let mut all_events = coordinator.subscribe();

    let x = StopName::from("X");
    coordinator
        .enqueue_passenger(&x, Passenger::new("first", StopName::from("Y")))
        .expect("stop exists");
    coordinator
        .enqueue_passenger(&x, Passenger::new("second", StopName::from("Y")))
        .expect("stop exists");

    coordinator
        .add_bus(names(&["X", "Y"]), 1)
        .expect("bus added");

    wait_for_bus_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, BusEvent::DepartedFromStop { stop, .. } if stop.as_str() == "X")
    })
    .await
    .expect("departure window closes");

    let events = drain_bus_events(&mut all_events);
    let boarded: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            BusEvent::PassengerBoarded { passenger, .. } => Some(passenger.name.clone()),
            _ => None,
        })
        .collect();
    let full_count = events
        .iter()
        .filter(|e| matches!(e, BusEvent::BusFull { .. }))
        .count();

    assert_eq!(boarded, vec!["first"], "exactly one boards, in queue order");
    assert_eq!(full_count, 1, "BusFull fires once");
    assert_eq!(
        coordinator.stop(&x).expect("stop X").waiting_count(),
        1,
        "the second passenger keeps waiting"
    );

    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn passenger_bound_for_departure_stop_is_never_boarded() {
    let coordinator = Coordinator::new(names(&["X", "Y"]), fast_timing());
    let mut rx = coordinator.subscribe();
    let mut all_events = coordinator.subscribe();

    let x = StopName::from("X");
    coordinator
        .enqueue_passenger(&x, Passenger::new("homebody", x.clone()))
        .expect("stop exists");

    coordinator
        .add_bus(names(&["X", "Y"]), 5)
        .expect("bus added");

    wait_for_bus_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, BusEvent::DepartedFromStop { stop, .. } if stop.as_str() == "X")
    })
    .await
    .expect("departure window closes");

    assert!(drain_bus_events(&mut all_events)
        .iter()
        .all(|e| !matches!(e, BusEvent::PassengerBoarded { .. })));
    assert_eq!(coordinator.stop(&x).expect("stop X").waiting_count(), 1);

    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn route_traversal_ping_pongs_across_the_line() {
    let coordinator = Coordinator::new(names(&["A", "B", "C"]), fast_timing());
    let mut rx = coordinator.subscribe();

    coordinator
        .add_bus(names(&["A", "B", "C"]), 5)
        .expect("bus added");

    let mut visited = Vec::new();
    while visited.len() < 7 {
        let event = wait_for_bus_event(&mut rx, Duration::from_secs(5), |e| {
            matches!(e, BusEvent::ArrivedAtStop { .. })
        })
        .await
        .expect("arrival within budget");
        if let BusEvent::ArrivedAtStop { stop, .. } = event {
            visited.push(stop.as_str().to_owned());
        }
    }

    assert_eq!(visited, vec!["A", "B", "C", "B", "A", "B", "C"]);
    coordinator.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_system_conserves_passengers() {
    let coordinator = Coordinator::new(names(&["A", "B", "C"]), fast_timing());
    let mut rx = coordinator.subscribe();

    let total = 6usize;
    let seeds = [
        ("A", "B"),
        ("A", "C"),
        ("B", "A"),
        ("B", "C"),
        ("C", "A"),
        ("C", "B"),
    ];
    for (i, (origin, dest)) in seeds.iter().enumerate() {
        coordinator
            .enqueue_passenger(
                &StopName::from(*origin),
                Passenger::new(format!("p{i}"), StopName::from(*dest)),
            )
            .expect("stop exists");
    }

    let first = coordinator
        .add_bus(names(&["A", "B", "C"]), 3)
        .expect("first bus");
    let second = coordinator
        .add_bus(names(&["C", "B", "A"]), 3)
        .expect("second bus");

    tokio::time::sleep(Duration::from_millis(500)).await;
    coordinator.shutdown().await;

    // With every task joined, each passenger is in exactly one place:
    // still waiting at a stop, onboard a halted bus, or delivered (one
    // PassengerDisembarked each).
    let waiting: usize = coordinator.stops().iter().map(|s| s.waiting_count()).sum();
    let onboard = first.onboard_count() + second.onboard_count();
    let delivered = drain_bus_events(&mut rx)
        .iter()
        .filter(|e| matches!(e, BusEvent::PassengerDisembarked { .. }))
        .count();

    assert_eq!(
        waiting + onboard + delivered,
        total,
        "waiting={waiting} onboard={onboard} delivered={delivered}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removal_is_refused_mid_transit_and_allowed_at_stops() {
    let timing = TimingConfig {
        initial_dwell: Duration::from_millis(40),
        dwell: Duration::from_millis(300),
        pre_departure: Duration::from_millis(100),
        transit_step_count: 50,
        transit_step_delay: Duration::from_millis(10),
    };
    let coordinator = Coordinator::new(names(&["X", "Y"]), timing);
    let mut rx = coordinator.subscribe();

    let bus = coordinator
        .add_bus(names(&["X", "Y"]), 5)
        .expect("bus added");

    wait_for_bus_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, BusEvent::DepartedFromStop { .. })
    })
    .await
    .expect("bus leaves X");

    // Strictly between DepartedFromStop and the next ArrivedAtStop the
    // bus must refuse removal.
    assert!(!bus.can_be_removed());
    assert!(!coordinator.remove_bus(bus.id()));
    assert!(bus.is_moving());

    wait_for_bus_event(&mut rx, Duration::from_secs(2), |e| {
        matches!(e, BusEvent::ArrivedAtStop { stop, .. } if stop.as_str() == "Y")
    })
    .await
    .expect("bus reaches Y");

    assert!(bus.can_be_removed());
    assert!(coordinator.remove_bus(bus.id()));
    assert!(!bus.is_moving());
    assert!(coordinator.buses().is_empty());
    assert!(
        coordinator
            .stop(&StopName::from("Y"))
            .expect("stop Y")
            .present_buses()
            .is_empty(),
        "removal clears stop presence"
    );

    bus.join().await;
}
