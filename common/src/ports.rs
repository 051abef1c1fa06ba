// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Speed of a link, as configured or as resolved by autonegotiation.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    PartialOrd,
    Ord,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub enum PortSpeed {
    /// No speed, used when two link partners share no technology.
    #[default]
    Speed0G,
    Speed1G,
    Speed2_5G,
    Speed5G,
    Speed10G,
    Speed25G,
    Speed40G,
    Speed50G,
    Speed100G,
    Speed200G,
    Speed400G,
}

impl PortSpeed {
    /// Link speed in megabits per second.
    pub const fn mbps(&self) -> u32 {
        match self {
            PortSpeed::Speed0G => 0,
            PortSpeed::Speed1G => 1_000,
            PortSpeed::Speed2_5G => 2_500,
            PortSpeed::Speed5G => 5_000,
            PortSpeed::Speed10G => 10_000,
            PortSpeed::Speed25G => 25_000,
            PortSpeed::Speed40G => 40_000,
            PortSpeed::Speed50G => 50_000,
            PortSpeed::Speed100G => 100_000,
            PortSpeed::Speed200G => 200_000,
            PortSpeed::Speed400G => 400_000,
        }
    }
}

impl fmt::Display for PortSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpeed::Speed0G => write!(f, "0G"),
            PortSpeed::Speed1G => write!(f, "1G"),
            PortSpeed::Speed2_5G => write!(f, "2.5G"),
            PortSpeed::Speed5G => write!(f, "5G"),
            PortSpeed::Speed10G => write!(f, "10G"),
            PortSpeed::Speed25G => write!(f, "25G"),
            PortSpeed::Speed40G => write!(f, "40G"),
            PortSpeed::Speed50G => write!(f, "50G"),
            PortSpeed::Speed100G => write!(f, "100G"),
            PortSpeed::Speed200G => write!(f, "200G"),
            PortSpeed::Speed400G => write!(f, "400G"),
        }
    }
}

/// Error-correction scheme carried by a link.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    Eq,
    Hash,
    PartialEq,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub enum PortFec {
    /// No forward error correction.
    #[default]
    None,
    /// BASE-R (clause 74) Firecode FEC.
    Firecode,
    /// Reed-Solomon (clause 91/108) FEC.
    Rs,
}

impl fmt::Display for PortFec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortFec::None => write!(f, "none"),
            PortFec::Firecode => write!(f, "firecode"),
            PortFec::Rs => write!(f, "rs"),
        }
    }
}
