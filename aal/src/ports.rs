// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Identifies a logical port: the physical connector it lives in and the first
/// channel (lane) it occupies within that connector.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize, JsonSchema,
)]
pub struct PortHdl {
    pub connector: Connector,
    pub channel: u8,
}

impl PortHdl {
    pub fn new(connector: Connector, channel: u8) -> Self {
        PortHdl { connector, channel }
    }

    pub fn is_cpu(&self) -> bool {
        self.connector == Connector::CPU
    }

    /// Can this handle be packed without colliding with another?
    pub fn is_packable(&self) -> bool {
        match self.connector {
            Connector::CPU => true,
            Connector::QSFP(port) => port <= MAX_QSFP,
        }
    }
}

/// The highest connector number that fits in a packed handle.  0xff is
/// reserved for the CPU port.
pub const MAX_QSFP: u32 = 0xfe;

// The packed form is 16 bits wide: the connector number in the upper byte
// (0xff for the CPU port) and the channel in the lower byte.  Only handles for
// which `is_packable()` holds survive the round trip.
impl From<&PortHdl> for u64 {
    fn from(hdl: &PortHdl) -> Self {
        let connector = match hdl.connector {
            Connector::CPU => 0xff,
            Connector::QSFP(port) => u64::from(port & 0xff),
        };
        (connector << 8) | u64::from(hdl.channel)
    }
}

impl From<PortHdl> for u64 {
    fn from(hdl: PortHdl) -> Self {
        (&hdl).into()
    }
}

impl From<u64> for PortHdl {
    fn from(packed: u64) -> Self {
        let channel = (packed & 0xff) as u8;
        let connector = match (packed >> 8) & 0xff {
            0xff => Connector::CPU,
            x => Connector::QSFP(x as u32),
        };
        PortHdl { connector, channel }
    }
}

impl Ord for PortHdl {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.connector, self.channel).cmp(&(other.connector, other.channel))
    }
}

impl PartialOrd for PortHdl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PortHdl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.connector {
            Connector::CPU => write!(f, "CPU"),
            Connector::QSFP(port) => write!(f, "{}:{}", port, self.channel),
        }
    }
}

impl FromStr for PortHdl {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = "invalid port name";

        if s == "CPU" {
            return Ok(PortHdl::new(Connector::CPU, 0));
        }
        let (port, channel) = s.split_once(':').ok_or(err)?;
        let port = port.parse::<u32>().map_err(|_| err)?;
        let channel = channel.parse::<u8>().map_err(|_| err)?;
        let hdl = PortHdl::new(Connector::QSFP(port), channel);
        if !hdl.is_packable() {
            return Err(err);
        }
        Ok(hdl)
    }
}

/// A physical connector on the switch.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub enum Connector {
    QSFP(u32),
    CPU,
}

impl fmt::Display for Connector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Connector::QSFP(x) => write!(f, "QSFP({x})"),
            Connector::CPU => write!(f, "CPU"),
        }
    }
}
