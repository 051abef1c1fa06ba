// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Clause 73 autonegotiation: the advertisement a port sends, the codewords
//! that carry it on the wire, and the resolution of the highest common
//! denominator (HCD) mode from the local and remote advertisements.
//!
//! The base page carries the IEEE technology abilities A0..A18.  The speeds
//! defined by the 25G/50G Ethernet Consortium are carried in a pair of
//! OUI-tagged next pages that follow it.

use std::fmt;
use std::ops::BitAnd;
use std::ops::BitOr;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use strum::IntoEnumIterator;

use common::ports::PortFec;
use common::ports::PortSpeed;

mod codec;
mod hcd;

pub use codec::decode;
pub use codec::encode;
pub use hcd::resolve;
pub use hcd::resolve_from_next_page;
pub use hcd::resolve_pages;

/// The OUI assigned to the 25G/50G Ethernet Consortium.
pub const CONSORTIUM_OUI: u32 = 0x6A737D;

/// Where a technology's ability bit lives on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageBit {
    /// Bit of the base page
    Base(u32),
    /// Bit of the consortium's unformatted next page
    NextPage(u32),
}

/// How the FEC mode for a technology is negotiated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FecBand {
    /// No FEC can be negotiated
    None,
    /// 10GBASE-KR and 40G: clause 74 ability/request bits F0 and F1
    BaseR,
    /// 25G and the speeds that share its field layout: bits F2 and F3
    Rs25G,
    /// Always RS, with nothing to negotiate
    RsOnly,
    /// Consortium modes: the FEC quad of the unformatted next page
    Consortium,
}

/// Every technology that can be advertised.  The discriminant of each variant
/// is its bit position in `AnSpeeds`: the IEEE abilities occupy the position
/// of their A-number, and the consortium abilities sit above them.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum Technology {
    #[strum(serialize = "1000BASE-KX")]
    Base1GKx = 0,
    #[strum(serialize = "10GBASE-KX4")]
    Base10GKx4 = 1,
    #[strum(serialize = "10GBASE-KR")]
    Base10GKr = 2,
    #[strum(serialize = "40GBASE-KR4")]
    Base40GKr4 = 3,
    #[strum(serialize = "40GBASE-CR4")]
    Base40GCr4 = 4,
    #[strum(serialize = "100GBASE-CR10")]
    Base100GCr10 = 5,
    #[strum(serialize = "100GBASE-KP4")]
    Base100GKp4 = 6,
    #[strum(serialize = "100GBASE-KR4")]
    Base100GKr4 = 7,
    #[strum(serialize = "100GBASE-CR4")]
    Base100GCr4 = 8,
    #[strum(serialize = "25GBASE-KR-S/CR-S")]
    Base25GKrS = 9,
    #[strum(serialize = "25GBASE-KR/CR")]
    Base25GKr = 10,
    #[strum(serialize = "2.5GBASE-KX")]
    Base2_5GKx = 11,
    #[strum(serialize = "5GBASE-KR")]
    Base5GKr = 12,
    #[strum(serialize = "50GBASE-KR/CR")]
    Base50GKr = 13,
    #[strum(serialize = "100GBASE-KR2/CR2")]
    Base100GKr2 = 14,
    #[strum(serialize = "200GBASE-KR4/CR4")]
    Base200GKr4 = 15,
    #[strum(serialize = "100GBASE-KR1/CR1")]
    Base100GKr1 = 16,
    #[strum(serialize = "200GBASE-KR2/CR2")]
    Base200GKr2 = 17,
    #[strum(serialize = "400GBASE-KR4/CR4")]
    Base400GKr4 = 18,
    #[strum(serialize = "25GBASE-KR1")]
    Consortium25GKr1 = 20,
    #[strum(serialize = "25GBASE-CR1")]
    Consortium25GCr1 = 21,
    #[strum(serialize = "50GBASE-KR2")]
    Consortium50GKr2 = 22,
    #[strum(serialize = "50GBASE-CR2")]
    Consortium50GCr2 = 23,
    #[strum(serialize = "400GBASE-CR8")]
    Consortium400GCr8 = 24,
}

impl Technology {
    /// Bit position of this technology in `AnSpeeds`.
    pub const fn bit(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    pub fn from_bit(bit: u32) -> Option<Self> {
        Technology::iter().find(|t| t.bit() == bit)
    }

    /// Is this one of the abilities carried in the consortium next pages?
    pub fn is_consortium(self) -> bool {
        matches!(self.page_bit(), PageBit::NextPage(_))
    }

    pub fn page_bit(self) -> PageBit {
        use Technology::*;
        match self {
            Consortium25GKr1 => PageBit::NextPage(20),
            Consortium25GCr1 => PageBit::NextPage(21),
            Consortium50GKr2 => PageBit::NextPage(24),
            Consortium50GCr2 => PageBit::NextPage(25),
            Consortium400GCr8 => PageBit::NextPage(28),
            base => PageBit::Base(21 + base.bit()),
        }
    }

    pub fn speed(self) -> PortSpeed {
        use Technology::*;
        match self {
            Base1GKx => PortSpeed::Speed1G,
            Base2_5GKx => PortSpeed::Speed2_5G,
            Base5GKr => PortSpeed::Speed5G,
            Base10GKx4 | Base10GKr => PortSpeed::Speed10G,
            Base25GKrS | Base25GKr | Consortium25GKr1 | Consortium25GCr1 => {
                PortSpeed::Speed25G
            }
            Base40GKr4 | Base40GCr4 => PortSpeed::Speed40G,
            Base50GKr | Consortium50GKr2 | Consortium50GCr2 => {
                PortSpeed::Speed50G
            }
            Base100GCr10 | Base100GKp4 | Base100GKr4 | Base100GCr4
            | Base100GKr2 | Base100GKr1 => PortSpeed::Speed100G,
            Base200GKr4 | Base200GKr2 => PortSpeed::Speed200G,
            Base400GKr4 | Consortium400GCr8 => PortSpeed::Speed400G,
        }
    }

    pub fn lane_count(self) -> u8 {
        use Technology::*;
        match self {
            Base100GCr10 => 10,
            Consortium400GCr8 => 8,
            Base10GKx4 | Base40GKr4 | Base40GCr4 | Base100GKp4
            | Base100GKr4 | Base100GCr4 | Base200GKr4 | Base400GKr4 => 4,
            Base100GKr2 | Base200GKr2 | Consortium50GKr2
            | Consortium50GCr2 => 2,
            _ => 1,
        }
    }

    pub fn fec_band(self) -> FecBand {
        use Technology::*;
        match self {
            Base1GKx | Base2_5GKx | Base5GKr | Base10GKx4 | Base100GCr10 => {
                FecBand::None
            }
            Base10GKr | Base40GKr4 | Base40GCr4 => FecBand::BaseR,
            Base100GKp4 => FecBand::RsOnly,
            Base25GKrS | Base25GKr | Base50GKr | Base100GKr4 | Base100GCr4
            | Base100GKr2 | Base100GKr1 | Base200GKr4 | Base200GKr2
            | Base400GKr4 => FecBand::Rs25G,
            Consortium25GKr1 | Consortium25GCr1 | Consortium50GKr2
            | Consortium50GCr2 | Consortium400GCr8 => FecBand::Consortium,
        }
    }

    /// Resolution priority: when both partners share more than one
    /// technology, the one with the highest priority wins.
    pub fn priority(self) -> u8 {
        use Technology::*;
        match self {
            Base1GKx => 1,
            Base2_5GKx => 2,
            Base5GKr => 3,
            Base10GKx4 => 4,
            Base10GKr => 5,
            Base25GKrS => 6,
            Base25GKr => 7,
            Base40GKr4 => 8,
            Base40GCr4 => 9,
            Base50GKr => 10,
            Base100GCr10 => 11,
            Base100GKp4 => 12,
            Base100GKr4 => 13,
            Base100GCr4 => 14,
            Base100GKr2 => 15,
            Base100GKr1 => 16,
            Base200GKr4 => 17,
            Base200GKr2 => 18,
            Base400GKr4 => 19,
            Consortium25GKr1 => 1,
            Consortium25GCr1 => 2,
            Consortium50GKr2 => 3,
            Consortium50GCr2 => 4,
            Consortium400GCr8 => 5,
        }
    }

    /// The copper (or backplane) counterpart of this technology, if the two
    /// are advertised as separate abilities.  At most one of a pair may be
    /// advertised.
    pub fn exclusive_with(self) -> Option<Technology> {
        use Technology::*;
        match self {
            Base40GKr4 => Some(Base40GCr4),
            Base40GCr4 => Some(Base40GKr4),
            Base100GKr4 => Some(Base100GCr4),
            Base100GCr4 => Some(Base100GKr4),
            Consortium25GKr1 => Some(Consortium25GCr1),
            Consortium25GCr1 => Some(Consortium25GKr1),
            Consortium50GKr2 => Some(Consortium50GCr2),
            Consortium50GCr2 => Some(Consortium50GKr2),
            _ => None,
        }
    }
}

impl fmt::Display for Technology {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// Both bitsets are plain `u32` wrappers with the same set operations.
macro_rules! bitset {
    ($name:ident) => {
        impl $name {
            pub const fn empty() -> Self {
                $name(0)
            }

            pub const fn bits(&self) -> u32 {
                self.0
            }

            pub const fn is_empty(&self) -> bool {
                self.0 == 0
            }

            pub const fn contains(&self, other: $name) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(&self, other: $name) -> bool {
                self.0 & other.0 != 0
            }

            pub fn insert(&mut self, other: $name) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: $name) {
                self.0 &= !other.0;
            }
        }

        impl BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl BitAnd for $name {
            type Output = $name;
            fn bitand(self, rhs: $name) -> $name {
                $name(self.0 & rhs.0)
            }
        }
    };
}

/// The set of technologies a port advertises.  Bit `n` is set for the
/// `Technology` whose discriminant is `n`.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct AnSpeeds(pub u32);
bitset!(AnSpeeds);

impl AnSpeeds {
    /// Bits that don't correspond to any technology.
    pub const UNDEFINED: AnSpeeds = AnSpeeds(!Self::all().0);

    const fn all() -> AnSpeeds {
        // A0..A18, then the five consortium abilities at 20..24
        AnSpeeds(0x0007_ffff | (0x1f << 20))
    }

    pub const fn of(t: Technology) -> AnSpeeds {
        AnSpeeds(1 << t.bit())
    }

    pub fn has(&self, t: Technology) -> bool {
        self.contains(Self::of(t))
    }

    /// The technologies in this set, in bit order.
    pub fn technologies(&self) -> impl Iterator<Item = Technology> + '_ {
        Technology::iter().filter(|t| self.has(*t))
    }

    /// Does this set include any ability carried in the next pages?
    pub fn has_consortium(&self) -> bool {
        self.technologies().any(Technology::is_consortium)
    }
}

impl FromIterator<Technology> for AnSpeeds {
    fn from_iter<I: IntoIterator<Item = Technology>>(iter: I) -> Self {
        let mut speeds = AnSpeeds::empty();
        for t in iter {
            speeds.insert(AnSpeeds::of(t));
        }
        speeds
    }
}

/// FEC abilities and requests a port advertises.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct AnFec(pub u32);
bitset!(AnFec);

impl AnFec {
    /// F0: 10G/40G BASE-R FEC ability
    pub const BASE_R_ABILITY: AnFec = AnFec(1 << 0);
    /// F1: 10G/40G BASE-R FEC requested
    pub const BASE_R_REQUEST: AnFec = AnFec(1 << 1);
    /// F2: 25G RS-FEC requested
    pub const RS_REQUEST_25G: AnFec = AnFec(1 << 2);
    /// F3: 25G BASE-R FEC requested
    pub const BASE_R_REQUEST_25G: AnFec = AnFec(1 << 3);
    /// Consortium F1: clause 91 RS-FEC ability
    pub const CONSORTIUM_RS_ABILITY: AnFec = AnFec(1 << 4);
    /// Consortium F2: clause 74 BASE-R FEC ability
    pub const CONSORTIUM_BASE_R_ABILITY: AnFec = AnFec(1 << 5);
    /// Consortium F3: clause 91 RS-FEC requested
    pub const CONSORTIUM_RS_REQUEST: AnFec = AnFec(1 << 6);
    /// Consortium F4: clause 74 BASE-R FEC requested
    pub const CONSORTIUM_BASE_R_REQUEST: AnFec = AnFec(1 << 7);

    pub const CONSORTIUM: AnFec = AnFec(0xf0);
    pub const UNDEFINED: AnFec = AnFec(!0xff);
}

/// Pause abilities, carried in bits C0 and C1 of the base page.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct AnPause {
    /// C0: symmetric pause, honoring received pause frames
    pub rx: bool,
    /// C1: asymmetric pause, sending pause frames
    pub tx: bool,
}

/// Everything a port advertises to its link partner.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct AutonegAdvertisement {
    pub speeds: AnSpeeds,
    pub pause: AnPause,
    pub fec: AnFec,
    /// Must be set if, and only if, a consortium speed or FEC option is
    /// advertised.
    pub consortium_oui: u32,
}

impl AutonegAdvertisement {
    /// Does this advertisement need the consortium next pages?
    pub fn needs_next_pages(&self) -> bool {
        self.speeds.has_consortium() || self.fec.intersects(AnFec::CONSORTIUM)
    }
}

/// One 48-bit autonegotiation page.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct Codeword(pub u64);

impl Codeword {
    pub const BITS: u32 = 48;
    const MASK: u64 = (1 << Self::BITS) - 1;

    pub fn new(raw: u64) -> Self {
        Codeword(raw & Self::MASK)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub fn bit(&self, bit: u32) -> bool {
        self.0 & (1 << bit) != 0
    }

    pub fn set_bit(&mut self, bit: u32, on: bool) {
        if on {
            self.0 |= 1 << bit;
        } else {
            self.0 &= !(1 << bit);
        }
    }

    /// Extract the `width`-bit field starting at bit `lo`.
    pub fn field(&self, lo: u32, width: u32) -> u64 {
        (self.0 >> lo) & ((1 << width) - 1)
    }

    pub fn set_field(&mut self, lo: u32, width: u32, value: u64) {
        let mask = ((1 << width) - 1) << lo;
        self.0 = (self.0 & !mask) | ((value << lo) & mask);
    }
}

impl fmt::Display for Codeword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#014x}", self.0)
    }
}

/// The mode both link partners agreed upon.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Deserialize,
    Serialize,
    JsonSchema,
)]
pub struct HcdResult {
    /// `Speed0G` if the partners share no technology
    pub speed: PortSpeed,
    pub lane_count: u8,
    pub fec: PortFec,
}

impl HcdResult {
    /// No common technology.
    pub const NONE: HcdResult = HcdResult {
        speed: PortSpeed::Speed0G,
        lane_count: 0,
        fec: PortFec::None,
    };

    pub fn is_none(&self) -> bool {
        self.speed == PortSpeed::Speed0G
    }
}

impl fmt::Display for HcdResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}x{} fec:{}", self.speed, self.lane_count, self.fec)
        }
    }
}
