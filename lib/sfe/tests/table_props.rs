// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Random create/destroy/packet sequences checked against a set.

use std::collections::BTreeSet;

use itertools::Itertools;
use proptest::prelude::*;
use sfe_test_utils::*;

const LIMIT: u32 = 8;
const PORTS: u16 = 16;

#[derive(Clone, Debug)]
enum Op {
    Create(u16),
    Destroy(u16),
    Packet(u16),
    Sync,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (1..=PORTS).prop_map(Op::Create),
        2 => (1..=PORTS).prop_map(Op::Destroy),
        3 => (1..=PORTS).prop_map(Op::Packet),
        1 => Just(Op::Sync),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]
    #[test]
    fn engine_tracks_model(
        ops in prop::collection::vec(op(), 1..64),
        hash_shift in 1u8..6,
    ) {
        let cfg = Sfe6Config {
            hash_shift,
            max_connections: LIMIT,
            ..Default::default()
        };
        let (sfe, _log) = test_engine(cfg);
        let base = snat_conn(Protocol::UDP);
        let mut model = BTreeSet::new();

        for op in ops {
            match op {
                Op::Create(port) => {
                    let req = with_client_port(&base, port);
                    let res = sfe.create_connection(&req);
                    if model.contains(&port) {
                        prop_assert_eq!(
                            res,
                            Err(SfeError::Collision(req.key()))
                        );
                    } else if model.len() == LIMIT as usize {
                        prop_assert_eq!(res, Err(SfeError::MaxCapacity(LIMIT)));
                    } else {
                        prop_assert!(res.is_ok());
                        model.insert(port);
                    }
                }

                Op::Destroy(port) => {
                    let key = with_client_port(&base, port).key();
                    let expected = if model.remove(&port) {
                        DestroyResult::Destroyed
                    } else {
                        DestroyResult::Miss
                    };
                    prop_assert_eq!(sfe.destroy_connection(&key), expected);
                }

                Op::Packet(port) => {
                    let pkt =
                        udp6(CLIENT_IP, SERVER_IP, port, SERVER_PORT, &[0; 8]);
                    let res = sfe.process_packet(&lan(), RxPacket::new(&pkt));
                    prop_assert_eq!(res.is_forward(), model.contains(&port));
                }

                Op::Sync => {
                    sfe.sync_now();
                    prop_assert_eq!(sfe.active_len(), 0);
                }
            }

            sfe.validate();
            prop_assert_eq!(sfe.num_connections() as usize, model.len());
        }

        let ports = sfe
            .dump_connections()
            .into_iter()
            .map(|c| c.src.port)
            .sorted()
            .collect::<Vec<_>>();
        prop_assert_eq!(ports, model.into_iter().collect::<Vec<_>>());
    }
}
