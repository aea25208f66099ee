//! Property tests for the fleet registry's dispatch invariants (spec.md §8,
//! I1 port uniqueness and I2 no dispatch observes a removed worker).

use std::sync::Arc;
use std::thread;

use autoscale_proxy::fleet::Fleet;
use proptest::prelude::*;

proptest! {
    /// I1: however many adds and removals are interleaved, the fleet never
    /// holds a duplicate port.
    #[test]
    fn port_uniqueness_holds_under_any_add_remove_sequence(
        ops in prop::collection::vec(prop::sample::select(vec!["add", "remove"]), 1..200),
        ports in prop::collection::vec(8000u16..8100u16, 1..200),
    ) {
        let fleet = Fleet::new();
        let mut next_port = 0usize;
        for op in ops {
            match op {
                "add" => {
                    let port = ports[next_port % ports.len()];
                    next_port += 1;
                    let _ = fleet.add(port);
                }
                _ => {
                    fleet.remove_last();
                }
            }
            let snapshot = fleet.snapshot();
            let mut sorted = snapshot.clone();
            sorted.sort_unstable();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), snapshot.len());
        }
    }

    /// I2: concurrent dispatch never returns a port that is not (or was
    /// never) in the fleet, even while another thread is adding/removing.
    #[test]
    fn dispatch_never_returns_a_port_outside_the_fleets_history(
        initial in prop::collection::vec(8000u16..8050u16, 1..10),
    ) {
        let fleet = Arc::new(Fleet::new());
        let mut valid_ports: Vec<u16> = initial.clone();
        valid_ports.sort_unstable();
        valid_ports.dedup();
        for &port in &valid_ports {
            let _ = fleet.add(port);
        }

        let writer_fleet = fleet.clone();
        let extra_ports: Vec<u16> = (8050..8060).collect();
        let all_valid: Vec<u16> = valid_ports.iter().copied().chain(extra_ports.iter().copied()).collect();
        let writer = thread::spawn(move || {
            for &port in &extra_ports {
                let _ = writer_fleet.add(port);
            }
            for _ in 0..3 {
                writer_fleet.remove_last();
            }
        });

        for _ in 0..500 {
            if let Some(port) = fleet.pick_next() {
                prop_assert!(all_valid.contains(&port));
            }
        }

        writer.join().unwrap();
    }
}
