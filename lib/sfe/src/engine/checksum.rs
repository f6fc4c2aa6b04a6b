// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! Types for calculating and incrementally updating the internet
//! checksum.
//!
//! # Checksums and Endianness
//!
//! The internet checksum is a sequence of two bytes, not a logical
//! integer. To implement the one's complement sum we treat each pair of
//! bytes as a native 16-bit integer (`{to,from}_ne_bytes()`), both for
//! the data being summed and for the checksum field itself. On a
//! little-endian machine this logically flips every word, but since the
//! result is stored back the same way it lands in network order. See
//! RFC 1071 §1.B.
//!
//! # Incremental update
//!
//! The fast path never recomputes a transport checksum. When a match is
//! created we know exactly which bytes a rewrite replaces (an address
//! and a port) and what they become, so the difference can be folded
//! into a single 16-bit [`CsumAdjust`] up front. Applying it to the
//! checksum field in a packet is one add and a carry fold (RFC 1624,
//! `HC' = HC + m + ~m'` in header form).
//!
//! # Relevant RFCs
//!
//! * 1071 Computing the Internet Checksum
//!
//! * 1624 Computation of the Internet Checksum via Incremental Update

/// A rolling one's complement checksum calculation.
///
/// Carries are accumulated in the upper half and only folded when the
/// finalized sum is needed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Checksum {
    inner: u32,
}

impl Checksum {
    /// Creates a new checksum counter.
    pub fn new() -> Self {
        Self::from(0)
    }

    /// Update the sum by adding the contents of `bytes`.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_add(self.inner, bytes);
    }

    /// Create a new rolling checksum, starting with the passed in
    /// `bytes`.
    pub fn compute(bytes: &[u8]) -> Self {
        Self { inner: csum_add(0, bytes) }
    }

    /// Update the sum by subtracting the contents of `bytes`.
    pub fn sub_bytes(&mut self, bytes: &[u8]) {
        self.inner = csum_sub(self.inner, bytes);
    }

    /// Finalize the sum by adding up all the accumulated carries and
    /// returning the resulting value as a `u16`.
    pub fn finalize(&mut self) -> u16 {
        while (self.inner >> 16) != 0 {
            self.inner = (self.inner >> 16) + (self.inner & 0xFFFF);
        }

        (self.inner & 0xFFFF) as u16
    }

    /// Finalize and return the bytes to store in a header checksum
    /// field.
    pub fn header_bytes(&mut self) -> [u8; 2] {
        (!self.finalize()).to_ne_bytes()
    }
}

impl From<u32> for Checksum {
    fn from(csum: u32) -> Self {
        Self { inner: csum }
    }
}

impl core::ops::Add for Checksum {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self { inner: self.inner.wrapping_add(other.inner) }
    }
}

impl core::ops::AddAssign for Checksum {
    fn add_assign(&mut self, other: Self) {
        self.inner = self.inner.wrapping_add(other.inner);
    }
}

/// A precomputed checksum delta for replacing one run of bytes with
/// another of the same length.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CsumAdjust {
    inner: u16,
}

impl CsumAdjust {
    /// Compute the delta for overwriting `old` with `new`.
    ///
    /// Multiple fields (say, an address and a port) are adjusted at
    /// once by passing them as consecutive pairs to
    /// [`CsumAdjust::compute_pairs`].
    pub fn compute(old: &[u8], new: &[u8]) -> Self {
        Self::compute_pairs(&[(old, new)])
    }

    pub fn compute_pairs(pairs: &[(&[u8], &[u8])]) -> Self {
        let mut csum = Checksum::new();
        for (old, new) in pairs {
            debug_assert_eq!(old.len(), new.len());
            csum.add_bytes(old);
            csum.sub_bytes(new);
        }
        Self { inner: csum.finalize() }
    }

    /// Apply the delta to the checksum field bytes of a header.
    #[inline]
    pub fn apply(&self, hc: [u8; 2]) -> [u8; 2] {
        let mut sum = u16::from_ne_bytes(hc) as u32 + self.inner as u32;
        sum = (sum & 0xFFFF) + (sum >> 16);
        (sum as u16).to_ne_bytes()
    }

    pub fn raw(&self) -> u16 {
        self.inner
    }
}

fn csum_add(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        // See the module-level comment about why it's important to
        // convert using native-endian.
        csum += u16::from_ne_bytes([pair[0], pair[1]]) as u32;
    }

    if let [last] = chunks.remainder() {
        csum += u16::from_ne_bytes([*last, 0]) as u32;
    }

    csum
}

fn csum_sub(mut csum: u32, bytes: &[u8]) -> u32 {
    let mut chunks = bytes.chunks_exact(2);
    for pair in &mut chunks {
        csum += (!u16::from_ne_bytes([pair[0], pair[1]])) as u32;
    }

    if let [last] = chunks.remainder() {
        csum += (!u16::from_ne_bytes([*last, 0])) as u32;
    }

    csum
}
