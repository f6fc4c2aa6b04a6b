// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Common routines for integration tests.

// This type of pedantry is more trouble than it's worth here.
#![allow(dead_code)]

pub mod conn;
pub mod pkt;
pub mod record;

// Let's make our lives easier and pub use a bunch of stuff.
pub use sfe::api::ConnKey;
pub use sfe::api::ConnectionCreate;
pub use sfe::api::ConnectionSync;
pub use sfe::api::CreateFlags;
pub use sfe::api::DestroyResult;
pub use sfe::api::ExceptionEvent;
pub use sfe::api::Ipv6Addr;
pub use sfe::api::LinkKind;
pub use sfe::api::MacAddr;
pub use sfe::api::NetDev;
pub use sfe::api::Protocol;
pub use sfe::api::Sfe6Config;
pub use sfe::api::SfeError;
pub use sfe::api::SyncReason;
pub use sfe::api::TcpTrackInit;
pub use sfe::engine::ProcessResult;
pub use sfe::engine::RxPacket;
pub use sfe::engine::Sfe6;
pub use sfe::engine::conn::Direction;
pub use sfe::provider::ExecCtx;
pub use sfe::provider::LogLevel;
pub use sfe::provider::MemLog;
pub use std::sync::Arc;

pub use conn::*;
pub use pkt::*;
pub use record::*;

/// An engine with no sync timer, logging into the returned [`MemLog`].
pub fn test_engine(cfg: Sfe6Config) -> (Sfe6, Arc<MemLog>) {
    let log = Arc::new(MemLog::default());
    let ectx = Arc::new(ExecCtx { log: Box::new(log.clone()) });
    let cfg = Sfe6Config { sync_interval_ms: 0, ..cfg };
    let sfe = Sfe6::new(cfg, ectx).expect("failed to create engine");
    (sfe, log)
}

/// Unwrap a forward result, with a useful message when it isn't one.
#[track_caller]
pub fn expect_forward(res: ProcessResult) -> sfe::engine::Forward {
    match res {
        ProcessResult::Forward(fwd) => fwd,
        ProcessResult::Exception(ev) => panic!("expected forward, got {ev}"),
    }
}

/// Assert that processing produced the given exception.
#[track_caller]
pub fn expect_exception(res: ProcessResult, ev: ExceptionEvent) {
    match res {
        ProcessResult::Exception(got) => assert_eq!(got, ev),
        ProcessResult::Forward(fwd) => {
            panic!("expected {ev}, got forward via {}", fwd.xmit_dev)
        }
    }
}
