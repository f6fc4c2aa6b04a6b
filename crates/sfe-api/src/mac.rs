// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

use alloc::string::String;
use core::fmt;
use core::str::FromStr;
use serde::Deserialize;
use serde::Serialize;

/// The link-layer address written into forwarded frames.
#[derive(Clone, Copy, Deserialize, Eq, PartialEq, Serialize)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const ZERO: Self = Self([0; 6]);

    pub const fn from_const(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

impl FromStr for MacAddr {
    type Err = String;

    /// Parse six colon-separated hex octets.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for b in bytes.iter_mut() {
            let part = parts.next().ok_or_else(|| format!("short: {s}"))?;
            *b = u8::from_str_radix(part, 16)
                .map_err(|_| format!("bad octet: {part}"))?;
        }

        match parts.next() {
            Some(_) => Err(format!("long: {s}")),
            None => Ok(Self(bytes)),
        }
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn parse_and_display() {
        let mac: MacAddr = "a8:40:25:00:00:63".parse().unwrap();
        assert_eq!(mac.bytes(), [0xa8, 0x40, 0x25, 0x00, 0x00, 0x63]);
        assert_eq!(mac.to_string(), "A8:40:25:00:00:63");
        assert_eq!(mac, MacAddr::from_const(mac.bytes()));
        assert!("a8:40:25".parse::<MacAddr>().is_err());
        assert!("a8:40:25:00:00:63:01".parse::<MacAddr>().is_err());
        assert!("zz:40:25:00:00:63".parse::<MacAddr>().is_err());
    }
}
