// tests/property/roundtrip_test.rs

//! Wire-format round-trips: every V2 document decodes back to the change it
//! was encoded from, and V1 documents re-encode losslessly as V2.

use nomad_config::core::change::codec;
use nomad_config::core::change::setting_change::{SettingChange, SettingOperation};
use nomad_config::core::change::NomadChange;
use nomad_config::core::model::applicability::Applicability;
use nomad_config::core::model::setting::Setting;
use nomad_config::core::model::uid::Uid;
use proptest::prelude::*;
use serde_json::json;

fn applicability_strategy() -> impl Strategy<Value = Applicability> {
    prop_oneof![
        Just(Applicability::cluster()),
        any::<u8>().prop_map(|_| Applicability::stripe(Uid::generate())),
        any::<u8>().prop_map(|_| Applicability::node(Uid::generate(), Uid::generate())),
    ]
}

fn setting_change_strategy() -> impl Strategy<Value = SettingChange> {
    let scalar = (applicability_strategy(), "[a-z][a-z0-9-]{0,20}").prop_map(|(_, name)| {
        SettingChange::set(Applicability::cluster(), Setting::ClusterName, None, &name)
    });
    let map = (
        applicability_strategy(),
        "[a-z][a-z0-9]{0,10}",
        "[a-zA-Z0-9/_.-]{1,30}",
    )
        .prop_map(|(applicability, key, value)| {
            SettingChange::set(applicability, Setting::TcProperties, Some(&key), &value)
        });
    let offheap = (1_u64..1_000_000, "[a-z]{1,8}").prop_map(|(size, key)| {
        SettingChange::set(
            Applicability::cluster(),
            Setting::OffheapResources,
            Some(&key),
            &size.to_string(),
        )
    });
    let unset = (applicability_strategy(), "[a-z]{1,8}").prop_map(|(applicability, key)| {
        SettingChange::unset(applicability, Setting::NodeLoggers, Some(&key))
    });
    prop_oneof![scalar, map, offheap, unset]
}

fn change_strategy() -> impl Strategy<Value = NomadChange> {
    prop_oneof![
        setting_change_strategy().prop_map(NomadChange::Setting),
        prop::collection::vec(setting_change_strategy(), 1..5)
            .prop_map(|changes| NomadChange::MultiSetting { changes }),
        (1_u32..4).prop_map(|from| NomadChange::FormatUpgrade { from, to: from + 1 }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 100,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_v2_encode_decode_round_trip(change in change_strategy()) {
        let encoded = codec::encode(&change).unwrap();
        prop_assert_eq!(encoded["version"].as_str(), Some("v2"));
        let decoded = codec::decode(&encoded).unwrap();
        prop_assert_eq!(decoded, change);
    }

    #[test]
    fn test_v2_string_round_trip(change in change_strategy()) {
        let encoded = codec::encode_string(&change).unwrap();
        prop_assert_eq!(codec::decode_str(&encoded).unwrap(), change);
    }

    #[test]
    fn test_v1_documents_reencode_as_v2(
        stripe_id in 1_usize..10,
        node_name in "[a-z][a-z0-9-]{0,15}",
        value in "[a-zA-Z0-9/_-]{1,20}",
    ) {
        let document = json!({
            "version": "v1",
            "type": "setting",
            "applicability": {
                "scope": "node",
                "stripe-id": stripe_id,
                "node-name": node_name,
            },
            "setting": "node-backup-dir",
            "operation": "set",
            "value": value,
        });
        let decoded = codec::decode(&document).unwrap();
        let reencoded = codec::encode(&decoded).unwrap();
        prop_assert_eq!(reencoded["version"].as_str(), Some("v2"));
        prop_assert_eq!(codec::decode(&reencoded).unwrap(), decoded);
    }

    #[test]
    fn test_operations_survive_round_trip(
        set in proptest::bool::ANY,
        key in "[a-z]{1,8}",
    ) {
        let change = if set {
            SettingChange::set(Applicability::cluster(), Setting::OffheapResources, Some(&key), "1024")
        } else {
            SettingChange::unset(Applicability::cluster(), Setting::OffheapResources, Some(&key))
        };
        let round_tripped = codec::decode(&codec::encode(&NomadChange::Setting(change.clone())).unwrap()).unwrap();
        prop_assert!(matches!(round_tripped, NomadChange::Setting(_)));
        let NomadChange::Setting(decoded) = round_tripped else {
            unreachable!();
        };
        prop_assert_eq!(decoded.operation, change.operation);
        prop_assert_eq!(decoded.operation == SettingOperation::Set, set);
    }
}
