// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The canonical set of per-port MAC (RMON) counters.

use std::ops::Index;
use std::ops::IndexMut;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use strum::EnumCount;
use strum::IntoEnumIterator;

/// The MAC counters maintained for every port, in canonical order.  The
/// discriminant of each variant is its index in a `CounterSet`.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::EnumCount,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum RmonCounter {
    FramesRxOk = 0,
    FramesRxAll,
    FramesRxWithFcsError,
    FramesRxWithAnyError,
    OctetsRxInGoodFrames,
    OctetsRx,
    FramesRxWithUnicastAddresses,
    FramesRxWithMulticastAddresses,
    FramesRxWithBroadcastAddresses,
    FramesRxOfTypePause,
    FramesRxWithLengthError,
    FramesRxUndersized,
    FramesRxOversized,
    FragmentsRx,
    JabberRx,
    PriorityPauseFrames,
    CrcErrorStomped,
    FrameTooLong,
    RxVlanFramesGood,
    FramesDroppedBufferFull,
    FramesRxLengthLt64,
    FramesRxLengthEq64,
    FramesRxLength65_127,
    FramesRxLength128_255,
    FramesRxLength256_511,
    FramesRxLength512_1023,
    FramesRxLength1024_1518,
    FramesRxLength1519_2047,
    FramesRxLength2048_4095,
    FramesRxLength4096_8191,
    FramesRxLength8192_9215,
    FramesRxLength9216,
    FramesTxOk,
    FramesTxAll,
    FramesTxWithError,
    OctetsTxWithoutError,
    OctetsTxTotal,
    FramesTxUnicast,
    FramesTxMulticast,
    FramesTxBroadcast,
    FramesTxPause,
    FramesTxPriPause,
    FramesTxVlan,
    FramesTxLengthLt64,
    FramesTxLengthEq64,
    FramesTxLength65_127,
    FramesTxLength128_255,
    FramesTxLength256_511,
    FramesTxLength512_1023,
    FramesTxLength1024_1518,
    FramesTxLength1519_2047,
    FramesTxLength2048_4095,
    FramesTxLength4096_8191,
    FramesTxLength8192_9215,
    FramesTxLength9216,
    Pri0FramesTx,
    Pri1FramesTx,
    Pri2FramesTx,
    Pri3FramesTx,
    Pri4FramesTx,
    Pri5FramesTx,
    Pri6FramesTx,
    Pri7FramesTx,
    Pri0FramesRx,
    Pri1FramesRx,
    Pri2FramesRx,
    Pri3FramesRx,
    Pri4FramesRx,
    Pri5FramesRx,
    Pri6FramesRx,
    Pri7FramesRx,
    TxPri0Pause1UsCount,
    TxPri1Pause1UsCount,
    TxPri2Pause1UsCount,
    TxPri3Pause1UsCount,
    TxPri4Pause1UsCount,
    TxPri5Pause1UsCount,
    TxPri6Pause1UsCount,
    TxPri7Pause1UsCount,
    RxPri0Pause1UsCount,
    RxPri1Pause1UsCount,
    RxPri2Pause1UsCount,
    RxPri3Pause1UsCount,
    RxPri4Pause1UsCount,
    RxPri5Pause1UsCount,
    RxPri6Pause1UsCount,
    RxPri7Pause1UsCount,
    RxStandardPause1UsCount,
    FramesTruncated,
}

/// Number of counters in a `CounterSet`.
pub const RMON_COUNTER_COUNT: usize = RmonCounter::COUNT;

impl RmonCounter {
    /// Index of this counter within a `CounterSet`.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Look a counter up by its index in a `CounterSet`.
    pub fn from_index(idx: usize) -> Option<Self> {
        RmonCounter::iter().nth(idx)
    }

    /// The name used when reporting this counter.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Is this a transmit-side counter?
    pub fn is_tx(self) -> bool {
        let i = self.index();
        (Self::FramesTxOk.index()..=Self::Pri7FramesTx.index()).contains(&i)
            || (Self::TxPri0Pause1UsCount.index()
                ..=Self::TxPri7Pause1UsCount.index())
                .contains(&i)
    }
}

/// A full set of MAC counters for a single port, indexed by `RmonCounter`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct CounterSet(Vec<u64>);

impl Default for CounterSet {
    fn default() -> Self {
        CounterSet(vec![0; RMON_COUNTER_COUNT])
    }
}

impl CounterSet {
    /// A set with every counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a set from values in canonical order.  Returns `None` if the
    /// number of values doesn't match the number of counters.
    pub fn from_values(values: Vec<u64>) -> Option<Self> {
        if values.len() == RMON_COUNTER_COUNT {
            Some(CounterSet(values))
        } else {
            None
        }
    }

    pub fn values(&self) -> &[u64] {
        &self.0
    }

    /// Reset every counter to zero.
    pub fn zero(&mut self) {
        self.0.iter_mut().for_each(|v| *v = 0);
    }

    /// Add another set into this one, counter by counter.  Counters saturate
    /// rather than wrap.
    pub fn accumulate(&mut self, other: &CounterSet) {
        for (a, b) in self.0.iter_mut().zip(other.0.iter()) {
            *a = a.saturating_add(*b);
        }
    }

    /// Return the counter-by-counter sum of two sets.
    pub fn sum(&self, other: &CounterSet) -> CounterSet {
        let mut out = self.clone();
        out.accumulate(other);
        out
    }

    /// Iterate over `(counter, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (RmonCounter, u64)> + '_ {
        RmonCounter::iter().zip(self.0.iter().copied())
    }
}

impl Index<RmonCounter> for CounterSet {
    type Output = u64;

    fn index(&self, ctr: RmonCounter) -> &u64 {
        &self.0[ctr.index()]
    }
}

impl IndexMut<RmonCounter> for CounterSet {
    fn index_mut(&mut self, ctr: RmonCounter) -> &mut u64 {
        &mut self.0[ctr.index()]
    }
}
