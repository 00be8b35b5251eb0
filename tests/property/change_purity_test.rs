// tests/property/change_purity_test.rs

//! Change purity: `apply` is deterministic, leaves its input untouched, and
//! a multi-change behaves exactly like its children applied in order.

use crate::common::single_stripe_cluster;
use nomad_config::core::change::setting_change::SettingChange;
use nomad_config::core::change::NomadChange;
use nomad_config::core::model::applicability::Applicability;
use nomad_config::core::model::setting::Setting;
use proptest::prelude::*;

fn child_strategy() -> impl Strategy<Value = SettingChange> {
    prop_oneof![
        ("[a-z]{1,8}", 1_u64..1_000_000).prop_map(|(key, size)| {
            SettingChange::set(
                Applicability::cluster(),
                Setting::OffheapResources,
                Some(&key),
                &size.to_string(),
            )
        }),
        ("[a-z]{1,8}", "[a-z0-9]{1,12}").prop_map(|(key, value)| {
            SettingChange::set(
                Applicability::cluster(),
                Setting::TcProperties,
                Some(&key),
                &value,
            )
        }),
        "[a-z]{1,8}".prop_map(|key| {
            SettingChange::unset(Applicability::cluster(), Setting::OffheapResources, Some(&key))
        }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_apply_is_deterministic(children in prop::collection::vec(child_strategy(), 1..6)) {
        let cluster = single_stripe_cluster("c", &[("node-1", 9410), ("node-2", 9510)]);
        let change = NomadChange::MultiSetting { changes: children };
        if change.can_apply(Some(&cluster)).is_ok() {
            let once = change.apply(Some(&cluster)).unwrap();
            let twice = change.apply(Some(&cluster)).unwrap();
            prop_assert_eq!(&once, &twice);
        }
    }

    #[test]
    fn test_apply_leaves_input_untouched(children in prop::collection::vec(child_strategy(), 1..6)) {
        let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
        let pristine = cluster.clone();
        let change = NomadChange::MultiSetting { changes: children };
        let _ = change.apply(Some(&cluster));
        prop_assert_eq!(cluster, pristine);
    }

    #[test]
    fn test_multi_change_equals_sequential_children(
        children in prop::collection::vec(child_strategy(), 1..6),
    ) {
        let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
        let multi = NomadChange::MultiSetting { changes: children.clone() };

        let sequential = children.iter().try_fold(cluster.clone(), |acc, child| child.apply(&acc));
        match (multi.apply(Some(&cluster)), sequential) {
            (Ok(a), Ok(b)) => prop_assert_eq!(a, b),
            (Err(_), Err(_)) => {}
            (a, b) => {
                prop_assert!(false, "multi and sequential application disagree: {:?} vs {:?}", a, b);
            }
        }
    }

    #[test]
    fn test_set_then_unset_restores_offheap(key in "[a-z]{1,8}", size in 1_u64..1_000_000) {
        let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
        let change = NomadChange::MultiSetting {
            changes: vec![
                SettingChange::set(
                    Applicability::cluster(),
                    Setting::OffheapResources,
                    Some(&key),
                    &size.to_string(),
                ),
                SettingChange::unset(
                    Applicability::cluster(),
                    Setting::OffheapResources,
                    Some(&key),
                ),
            ],
        };
        let result = change.apply(Some(&cluster)).unwrap();
        prop_assert_eq!(result.offheap_resources, cluster.offheap_resources);
    }
}
