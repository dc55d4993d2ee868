// tests/property/registry_test.rs

//! Registry bookkeeping under arbitrary add/remove sequences.

use crate::test_helpers::{identity, test_connection};
use eventgate::connection::{Connection, ConnectionIdentity, Registry};
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Add(u8, u8),
    Remove(u8, u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..8, 0u8..3).prop_map(|(id, group)| Op::Add(id, group)),
        (0u8..8, 0u8..3).prop_map(|(id, group)| Op::Remove(id, group)),
    ]
}

fn ident(id: u8, group: u8) -> ConnectionIdentity {
    identity(&format!("user-{id}"), &format!("group-{group}"))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_group_counts_match_registered_connections(
        ops in prop::collection::vec(op(), 1..100),
        ceiling in 1usize..12,
    ) {
        let registry = Registry::new(ceiling);
        let mut model: HashMap<ConnectionIdentity, Arc<Connection>> = HashMap::new();
        let mut sinks = Vec::new();

        for op in ops {
            match op {
                Op::Add(id, group) => {
                    let key = ident(id, group);
                    let (conn, rx) = test_connection(key.clone());
                    sinks.push(rx);
                    let result = registry.add(&conn);
                    if model.contains_key(&key) || model.len() >= ceiling {
                        prop_assert!(result.is_err());
                    } else {
                        prop_assert!(result.is_ok());
                        model.insert(key, conn);
                    }
                }
                Op::Remove(id, group) => {
                    let key = ident(id, group);
                    prop_assert_eq!(registry.remove(&key), model.remove(&key).is_some());
                }
            }

            let counts = registry.total_connections_per_group();
            prop_assert_eq!(counts.values().sum::<usize>(), registry.len());
            prop_assert_eq!(registry.len(), model.len());
            prop_assert!(registry.len() <= ceiling);
            prop_assert!(counts.values().all(|&c| c > 0));

            let mut expected: HashMap<String, usize> = HashMap::new();
            for key in model.keys() {
                *expected.entry(key.group.clone()).or_insert(0) += 1;
            }
            prop_assert_eq!(counts, expected);
        }
    }
}
