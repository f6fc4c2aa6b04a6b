// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

pub use sfe_api::*;

pub use crate::engine::ProcessResult;
pub use crate::engine::RxPacket;
pub use crate::engine::cookie::FlowCookieOffload;
pub use crate::engine::flow_table::ConnId;
pub use crate::engine::sync::SyncRuleCallback;
