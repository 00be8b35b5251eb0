// tests/property/validator_soundness_test.rs

//! Validator soundness: a cluster that passes validation actually satisfies
//! the invariants, and clusters constructed to violate one rule are always
//! caught.

use crate::common::single_stripe_cluster;
use nomad_config::core::model::cluster::FailoverPriority;
use nomad_config::core::model::validator::validate_cluster;
use proptest::prelude::*;
use std::collections::HashSet;
use std::time::Duration;

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_passing_clusters_satisfy_the_invariants(
        node_count in 1_usize..6,
        voters in 0_u32..4,
        use_consistency in proptest::bool::ANY,
        reconnect_secs in 1_u64..600,
        lease_secs in 1_u64..600,
        offheap_sizes in prop::collection::vec(0_u64..10_000, 0..4),
    ) {
        let members: Vec<(String, u16)> = (0..node_count)
            .map(|i| (format!("node-{i}"), 9410 + (i as u16) * 100))
            .collect();
        let member_refs: Vec<(&str, u16)> =
            members.iter().map(|(n, p)| (n.as_str(), *p)).collect();
        let mut cluster = single_stripe_cluster("generated", &member_refs);
        if use_consistency {
            cluster.failover_priority = FailoverPriority::Consistency { voters };
        }
        cluster.client_reconnect_window = Duration::from_secs(reconnect_secs);
        cluster.client_lease_duration = Duration::from_secs(lease_secs);
        for (i, size) in offheap_sizes.iter().enumerate() {
            cluster.offheap_resources.insert(format!("region-{i}"), *size);
        }

        if validate_cluster(&cluster).is_ok() {
            // Re-check every structural invariant from first principles.
            prop_assert!(!cluster.name.trim().is_empty());

            let addresses: HashSet<String> =
                cluster.nodes().map(|n| n.address().to_string()).collect();
            prop_assert_eq!(addresses.len(), cluster.node_count());

            for stripe in &cluster.stripes {
                let names: HashSet<&str> =
                    stripe.nodes.iter().map(|n| n.name.as_str()).collect();
                prop_assert_eq!(names.len(), stripe.nodes.len());
            }

            if let FailoverPriority::Consistency { voters } = cluster.failover_priority {
                prop_assert_eq!((2 * voters as usize + cluster.node_count()) % 2, 1);
            }

            prop_assert!(cluster.offheap_resources.values().all(|size| *size > 0));
            prop_assert!(cluster.client_lease_duration <= cluster.client_reconnect_window);
            prop_assert!(!cluster.client_reconnect_window.is_zero());
        }
    }

    #[test]
    fn test_zero_offheap_never_passes(size_index in 0_usize..3) {
        let mut cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
        for i in 0..3 {
            let size = if i == size_index { 0 } else { 1024 };
            cluster.offheap_resources.insert(format!("region-{i}"), size);
        }
        prop_assert!(validate_cluster(&cluster).is_err());
    }

    #[test]
    fn test_duplicate_addresses_never_pass(node_count in 2_usize..6) {
        let members: Vec<(String, u16)> = (0..node_count)
            .map(|i| (format!("node-{i}"), 9410))
            .collect();
        let member_refs: Vec<(&str, u16)> =
            members.iter().map(|(n, p)| (n.as_str(), *p)).collect();
        let cluster = single_stripe_cluster("c", &member_refs);
        prop_assert!(validate_cluster(&cluster).is_err());
    }

    #[test]
    fn test_lease_longer_than_window_never_passes(
        reconnect_secs in 1_u64..300,
        excess in 1_u64..300,
    ) {
        let mut cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
        cluster.client_reconnect_window = Duration::from_secs(reconnect_secs);
        cluster.client_lease_duration = Duration::from_secs(reconnect_secs + excess);
        prop_assert!(validate_cluster(&cluster).is_err());
    }
}
