// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Callbacks which remember what they were given.

use sfe::api::ConnKey;
use sfe::api::ConnectionSync;
use sfe::api::SyncReason;
use sfe::engine::cookie::FlowCookieOffload;
use sfe::engine::sync::SyncRuleCallback;
use std::sync::Mutex;

/// Collects every sync record delivered.
#[derive(Default)]
pub struct SyncRecorder {
    recs: Mutex<Vec<ConnectionSync>>,
}

impl SyncRecorder {
    pub fn take(&self) -> Vec<ConnectionSync> {
        std::mem::take(&mut *self.recs.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.recs.lock().unwrap().len()
    }

    /// The records delivered with `reason`, leaving the others.
    pub fn with_reason(&self, reason: SyncReason) -> Vec<ConnectionSync> {
        self.recs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.reason == reason)
            .cloned()
            .collect()
    }
}

impl SyncRuleCallback for SyncRecorder {
    fn sync(&self, rec: &ConnectionSync) {
        self.recs.lock().unwrap().push(rec.clone());
    }
}

/// A flow cookie offload that accepts (or refuses) everything and
/// keeps a log of each call.
#[derive(Default)]
pub struct CookieRecorder {
    pub refuse: bool,
    calls: Mutex<Vec<(ConnKey, u16)>>,
}

impl CookieRecorder {
    pub fn refusing() -> Self {
        Self { refuse: true, ..Default::default() }
    }

    pub fn calls(&self) -> Vec<(ConnKey, u16)> {
        self.calls.lock().unwrap().clone()
    }
}

impl FlowCookieOffload for CookieRecorder {
    fn set_flow_cookie(&self, tuple: &ConnKey, cookie: u16) -> bool {
        self.calls.lock().unwrap().push((*tuple, cookie));
        // Clearing always succeeds.
        cookie == 0 || !self.refuse
    }
}
