// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types shared between the shortcut forwarding engine and its
//! consumers: addresses, exception reasons, statistics, sync and dump
//! records, configuration and errors.

#![no_std]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

#[macro_use]
extern crate alloc;

pub mod cmd;
pub mod dev;
pub mod exception;
pub mod ip;
pub mod mac;
pub mod stat;
pub mod sync;

pub use cmd::*;
pub use dev::*;
pub use exception::*;
pub use ip::*;
pub use mac::*;
pub use stat::*;
pub use sync::*;

/// The overall version of the API. Anytime a record layout or the
/// exception enumeration changes, this number should increment so that
/// consumers of sync records and dumps can detect a mismatch.
pub const API_VERSION: u64 = 1;
