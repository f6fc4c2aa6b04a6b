// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Hardware flow cookies.
//!
//! Some NICs can tag received packets with a small integer ("flow
//! cookie") programmed per 5-tuple. When an offload is registered,
//! every new match is offered a cookie; packets arriving with that
//! cookie can skip the hash lookup. Cookies are purely an
//! accelerator: a match without one, or a packet whose cookie points
//! at the wrong match, simply takes the hash path.

use super::flow_table::MatchId;
use crate::ddi::time::MILLIS;
use crate::ddi::time::Moment;
use alloc::vec::Vec;
use sfe_api::ConnKey;

/// The number of cookie slots. Cookie 0 means "no cookie" and is
/// never handed out.
pub const FLOW_COOKIE_SIZE: usize = 2048;
pub const FLOW_COOKIE_MASK: u32 = (FLOW_COOKIE_SIZE as u32) - 1;

/// A released cookie is not reused for this many milliseconds, so
/// packets still in flight with the old cookie don't land on the new
/// owner.
pub const FLOW_COOKIE_REUSE_MS: u64 = MILLIS;

/// Programs flow cookies into hardware.
pub trait FlowCookieOffload: Send + Sync {
    /// Associate `cookie` with the 5-tuple, or clear the association
    /// when `cookie` is zero. Return `false` if the hardware refused.
    fn set_flow_cookie(&self, tuple: &ConnKey, cookie: u16) -> bool;
}

#[derive(Clone, Copy, Debug, Default)]
struct CookieEntry {
    owner: Option<MatchId>,
    released: Option<Moment>,
}

/// Why a cookie could not be assigned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CookieAssign {
    Assigned(u16),
    /// Every slot is taken or was released too recently.
    NoneFree,
    /// The offload refused the cookie.
    Refused,
}

pub struct FlowCookieTable {
    // Empty when cookies are disabled.
    entries: Vec<CookieEntry>,
}

impl FlowCookieTable {
    pub fn new(enabled: bool) -> Self {
        let entries = if enabled {
            vec![CookieEntry::default(); FLOW_COOKIE_SIZE]
        } else {
            Vec::new()
        };
        Self { entries }
    }

    pub fn is_enabled(&self) -> bool {
        !self.entries.is_empty()
    }

    /// The match a packet's cookie points at, if any.
    pub fn lookup(&self, cookie: u32) -> Option<MatchId> {
        self.entries
            .get((cookie & FLOW_COOKIE_MASK) as usize)
            .and_then(|e| e.owner)
    }

    /// Offer the first eligible cookie to the offload and, if it is
    /// accepted, record `id` as its owner.
    pub fn assign(
        &mut self,
        id: MatchId,
        tuple: &ConnKey,
        offload: &dyn FlowCookieOffload,
        now: Moment,
    ) -> CookieAssign {
        let Some(idx) = self.entries.iter().skip(1).position(|e| {
            e.owner.is_none()
                && e.released.is_none_or(|r| {
                    now.delta_as_millis(r) > FLOW_COOKIE_REUSE_MS
                })
        }) else {
            return CookieAssign::NoneFree;
        };

        // Skipped slot 0 above.
        let idx = idx + 1;
        let cookie = idx as u16;
        if !offload.set_flow_cookie(tuple, cookie) {
            return CookieAssign::Refused;
        }

        self.entries[idx].owner = Some(id);
        CookieAssign::Assigned(cookie)
    }

    /// Give a cookie back and clear it in hardware.
    pub fn release(
        &mut self,
        cookie: u16,
        tuple: &ConnKey,
        offload: Option<&dyn FlowCookieOffload>,
        now: Moment,
    ) {
        let Some(e) = self.entries.get_mut(cookie as usize) else {
            return;
        };

        e.owner = None;
        e.released = Some(now);

        if let Some(offload) = offload {
            // Clearing is best effort; the slot is already free.
            let _ = offload.set_flow_cookie(tuple, 0);
        }
    }

    pub fn in_use(&self) -> usize {
        self.entries.iter().filter(|e| e.owner.is_some()).count()
    }
}
