// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! An IPv6 shortcut forwarding engine.
//!
//! Connections the slow path has already classified are installed as a
//! pair of matches, one per direction. Packets hitting a match are
//! described as a [`Forward`](engine::Forward) for the transmit path;
//! everything else comes back as an
//! [`ExceptionEvent`](api::ExceptionEvent) for the slow path to deal
//! with.

#![allow(clippy::len_without_is_empty)]
#![deny(unreachable_patterns)]
#![deny(unused_must_use)]

extern crate alloc;

pub mod api;
pub mod ddi;
pub mod engine;
pub mod print;
pub mod provider;
