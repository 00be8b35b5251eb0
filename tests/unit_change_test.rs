// tests/unit_change_test.rs

mod common;

use common::{activation, single_stripe_cluster, test_node};
use nomad_config::core::change::setting_change::{SettingChange, SettingOperation};
use nomad_config::core::change::NomadChange;
use nomad_config::core::errors::NomadError;
use nomad_config::core::model::applicability::Applicability;
use nomad_config::core::model::setting::Setting;

#[test]
fn test_activation_requires_empty_state() {
    let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
    let change = activation(&cluster);

    change.can_apply(None).unwrap();
    assert_eq!(change.apply(None).unwrap(), cluster);

    let already = change.can_apply(Some(&cluster));
    assert!(matches!(already, Err(NomadError::ChangeUnapplicable(_))));
}

#[test]
fn test_non_activation_changes_require_a_committed_cluster() {
    let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
    let change = NomadChange::Setting(SettingChange::set(
        Applicability::cluster(),
        Setting::ClusterName,
        None,
        "renamed",
    ));
    assert!(change.can_apply(None).is_err());
    assert!(change.can_apply(Some(&cluster)).is_ok());
}

#[test]
fn test_setting_change_applies_value() {
    let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
    let stripe_uid = cluster.stripes[0].uid;
    let node_uid = cluster.stripes[0].nodes[0].uid;

    let change = NomadChange::Setting(SettingChange::set(
        Applicability::node(stripe_uid, node_uid),
        Setting::NodeBackupDir,
        None,
        "/backup",
    ));
    let next = change.apply(Some(&cluster)).unwrap();
    assert_eq!(
        next.node_by_uid(stripe_uid, node_uid).unwrap().backup_dir,
        Some("/backup".into())
    );
    // The input cluster is untouched.
    assert_eq!(cluster.stripes[0].nodes[0].backup_dir, None);
}

#[test]
fn test_setting_change_rejects_configuration_only_settings() {
    let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
    let change = NomadChange::Setting(SettingChange::set(
        Applicability::node(cluster.stripes[0].uid, cluster.stripes[0].nodes[0].uid),
        Setting::NodePort,
        None,
        "9999",
    ));
    assert!(matches!(
        change.can_apply(Some(&cluster)),
        Err(NomadError::ChangeUnapplicable(_))
    ));
}

#[test]
fn test_multi_change_is_atomic_over_its_children() {
    let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
    let stripe_uid = cluster.stripes[0].uid;
    let node_uid = cluster.stripes[0].nodes[0].uid;

    let good = SettingChange::set(
        Applicability::node(stripe_uid, node_uid),
        Setting::TcProperties,
        Some("foo"),
        "bar",
    );
    let bad = SettingChange::set(
        Applicability::cluster(),
        Setting::OffheapResources,
        Some("main"),
        "not-a-size",
    );

    let multi = NomadChange::MultiSetting {
        changes: vec![good.clone(), bad],
    };
    assert!(multi.can_apply(Some(&cluster)).is_err());

    let multi_ok = NomadChange::MultiSetting {
        changes: vec![
            good,
            SettingChange::set(
                Applicability::cluster(),
                Setting::OffheapResources,
                Some("main"),
                "512MB",
            ),
        ],
    };
    let next = multi_ok.apply(Some(&cluster)).unwrap();
    assert_eq!(
        next.stripes[0].nodes[0].tc_properties.get("foo"),
        Some(&"bar".to_string())
    );
    assert_eq!(
        next.offheap_resources.get("main"),
        Some(&(512 * 1024 * 1024))
    );
}

#[test]
fn test_multi_change_children_see_prior_transformations() {
    let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
    // The second child unsets what the first one just set; this only
    // resolves if children apply in order.
    let multi = NomadChange::MultiSetting {
        changes: vec![
            SettingChange::set(
                Applicability::cluster(),
                Setting::OffheapResources,
                Some("main"),
                "1GB",
            ),
            SettingChange::unset(
                Applicability::cluster(),
                Setting::OffheapResources,
                Some("main"),
            ),
        ],
    };
    let next = multi.apply(Some(&cluster)).unwrap();
    assert!(next.offheap_resources.is_empty());
}

#[test]
fn test_empty_multi_change_rejected() {
    let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
    let multi = NomadChange::MultiSetting { changes: vec![] };
    assert!(multi.can_apply(Some(&cluster)).is_err());
}

#[test]
fn test_node_addition_and_removal() {
    let cluster = single_stripe_cluster("c", &[("node-1", 9410), ("node-2", 9510)]);
    let stripe_uid = cluster.stripes[0].uid;

    let fresh = test_node("node-3", 9610).clone_for_attachment(&cluster.stripes[0].nodes[0]);
    let addition = NomadChange::NodeAddition {
        stripe_uid,
        node: Box::new(fresh),
    };
    let grown = addition.apply(Some(&cluster)).unwrap();
    assert_eq!(grown.node_count(), 3);

    let removal = NomadChange::NodeRemoval {
        stripe_uid,
        address: "localhost:9610".parse().unwrap(),
    };
    let shrunk = removal.apply(Some(&grown)).unwrap();
    assert_eq!(shrunk.node_count(), 2);

    // Removing an unknown address is unapplicable.
    assert!(removal.can_apply(Some(&shrunk)).is_err());
}

#[test]
fn test_node_removal_keeps_last_node() {
    let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
    let removal = NomadChange::NodeRemoval {
        stripe_uid: cluster.stripes[0].uid,
        address: "localhost:9410".parse().unwrap(),
    };
    assert!(matches!(
        removal.can_apply(Some(&cluster)),
        Err(NomadError::ChangeUnapplicable(_))
    ));
}

#[test]
fn test_format_upgrade_is_a_semantic_noop() {
    let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
    let upgrade = NomadChange::FormatUpgrade { from: 1, to: 2 };
    assert_eq!(upgrade.apply(Some(&cluster)).unwrap(), cluster);
    assert!(upgrade.can_apply(None).is_err());

    let backwards = NomadChange::FormatUpgrade { from: 2, to: 2 };
    assert!(backwards.can_apply(Some(&cluster)).is_err());
}

#[test]
fn test_runtime_applicability_classification() {
    let backup = NomadChange::Setting(SettingChange {
        applicability: Applicability::cluster(),
        setting: Setting::NodeBackupDir,
        operation: SettingOperation::Set,
        key: None,
        value: Some("/backup".to_string()),
    });
    assert!(backup.is_runtime_applicable());

    let log_dir = NomadChange::Setting(SettingChange {
        applicability: Applicability::cluster(),
        setting: Setting::NodeLogDir,
        operation: SettingOperation::Set,
        key: None,
        value: Some("/logs".to_string()),
    });
    assert!(!log_dir.is_runtime_applicable());

    let mixed = NomadChange::MultiSetting {
        changes: vec![
            SettingChange::set(Applicability::cluster(), Setting::NodeBackupDir, None, "/b"),
            SettingChange::set(Applicability::cluster(), Setting::NodeLogDir, None, "/l"),
        ],
    };
    assert!(!mixed.is_runtime_applicable());
}

#[test]
fn test_change_summaries_name_what_they_do() {
    let cluster = single_stripe_cluster("c", &[("node-1", 9410)]);
    assert!(activation(&cluster).summary().contains("activate"));
    let change = NomadChange::Setting(SettingChange::set(
        Applicability::cluster(),
        Setting::OffheapResources,
        Some("main"),
        "1GB",
    ));
    let summary = change.summary();
    assert!(summary.contains("offheap-resources"));
    assert!(summary.contains("main"));
}
