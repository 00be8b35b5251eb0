// tests/property/server_linearizability_test.rs

//! Single-server linearizability: any interleaving of protocol messages
//! leaves the server in the state a serial model predicts, and the mutative
//! counter moves exactly on accepted mutating messages.

use crate::common::{activation, single_stripe_cluster};
use nomad_config::core::change::setting_change::SettingChange;
use nomad_config::core::change::NomadChange;
use nomad_config::core::model::applicability::Applicability;
use nomad_config::core::model::setting::Setting;
use nomad_config::core::nomad::messages::{
    CommitMessage, PrepareMessage, RollbackMessage, ServerMode, TakeoverMessage,
};
use nomad_config::core::nomad::server::NomadServer;
use nomad_config::core::storage::repository::NomadRepository;
use proptest::prelude::*;
use tempfile::TempDir;

#[derive(Debug, Clone, Copy)]
enum Op {
    Discover,
    PrepareGood,
    PrepareStaleCounter,
    CommitGood,
    CommitWrongVersion,
    RollbackGood,
    Takeover,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Discover),
        Just(Op::PrepareGood),
        Just(Op::PrepareStaleCounter),
        Just(Op::CommitGood),
        Just(Op::CommitWrongVersion),
        Just(Op::RollbackGood),
        Just(Op::Takeover),
    ]
}

/// The serial reference model of the mode machine.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Model {
    mode: ServerMode,
    v: u64,
    h: u64,
    m: u64,
}

fn next_change(step: usize, model: &Model) -> NomadChange {
    if model.v == 0 {
        activation(&single_stripe_cluster("c", &[("node-1", 9410)]))
    } else {
        NomadChange::Setting(SettingChange::set(
            Applicability::cluster(),
            Setting::TcProperties,
            Some(&format!("key-{step}")),
            "value",
        ))
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 40,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_server_matches_serial_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let dir = TempDir::new().unwrap();
        let repository = NomadRepository::open(dir.path()).unwrap();
        let mut server = NomadServer::open(&repository, "node-1").unwrap();
        let mut model = Model { mode: ServerMode::Accepting, v: 0, h: 0, m: 0 };

        for (step, op) in ops.into_iter().enumerate() {
            let m_before = server.discover().mutative_message_count;
            prop_assert_eq!(m_before, model.m);

            let accepted = match op {
                Op::Discover => {
                    let discover = server.discover();
                    prop_assert_eq!(discover.mode, model.mode);
                    prop_assert_eq!(discover.current_version, model.v);
                    prop_assert_eq!(discover.highest_version, model.h);
                    continue;
                }
                Op::PrepareGood => {
                    let response = server.prepare(&PrepareMessage {
                        expected_mutative_message_count: model.m,
                        new_version: model.h + 1,
                        change: next_change(step, &model),
                    });
                    let expect_accept = model.mode == ServerMode::Accepting;
                    prop_assert_eq!(response.is_accepted(), expect_accept);
                    if expect_accept {
                        model.mode = ServerMode::Prepared;
                        model.h += 1;
                    }
                    expect_accept
                }
                Op::PrepareStaleCounter => {
                    let response = server.prepare(&PrepareMessage {
                        expected_mutative_message_count: model.m + 17,
                        new_version: model.h + 1,
                        change: next_change(step, &model),
                    });
                    prop_assert!(!response.is_accepted());
                    false
                }
                Op::CommitGood => {
                    let (response, committed) = server.commit(&CommitMessage {
                        expected_mutative_message_count: model.m,
                        version: model.h,
                    });
                    let expect_accept = model.mode == ServerMode::Prepared;
                    prop_assert_eq!(response.is_accepted(), expect_accept);
                    prop_assert_eq!(committed.is_some(), expect_accept);
                    if expect_accept {
                        model.mode = ServerMode::Accepting;
                        model.v = model.h;
                    }
                    expect_accept
                }
                Op::CommitWrongVersion => {
                    let (response, committed) = server.commit(&CommitMessage {
                        expected_mutative_message_count: model.m,
                        version: model.h + 7,
                    });
                    prop_assert!(!response.is_accepted());
                    prop_assert!(committed.is_none());
                    false
                }
                Op::RollbackGood => {
                    let response = server.rollback(&RollbackMessage {
                        expected_mutative_message_count: model.m,
                        version: model.h,
                    });
                    let expect_accept = model.mode == ServerMode::Prepared;
                    prop_assert_eq!(response.is_accepted(), expect_accept);
                    if expect_accept {
                        model.mode = ServerMode::Accepting;
                    }
                    expect_accept
                }
                Op::Takeover => {
                    let response = server.takeover(&TakeoverMessage {
                        expected_mutative_message_count: model.m,
                        host: "host".to_string(),
                        user: "user".to_string(),
                    });
                    prop_assert!(response.is_accepted());
                    true
                }
            };

            // Counter monotonicity: accepted mutating messages bump m by
            // exactly one; rejected ones leave it untouched.
            if accepted {
                model.m += 1;
            }
            prop_assert_eq!(server.discover().mutative_message_count, model.m);
            prop_assert_eq!(server.mode(), model.mode);
            prop_assert_eq!(server.current_version(), model.v);
            prop_assert_eq!(server.highest_version(), model.h);
        }

        // Durability: a crash-and-recover reproduces the same state.
        drop(server);
        drop(repository);
        let repository = NomadRepository::open(dir.path()).unwrap();
        let recovered = NomadServer::open(&repository, "node-1").unwrap();
        prop_assert_eq!(recovered.mode(), model.mode);
        prop_assert_eq!(recovered.current_version(), model.v);
        prop_assert_eq!(recovered.highest_version(), model.h);
        prop_assert_eq!(recovered.discover().mutative_message_count, model.m);
    }
}
