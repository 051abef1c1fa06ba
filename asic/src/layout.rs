// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The layouts in which each chip generation delivers a port's counters by
//! DMA, and their conversion to canonical order.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use strum::IntoEnumIterator;

use aal::AsicError;
use aal::AsicResult;
use common::counters::CounterSet;
use common::counters::RmonCounter;
use common::counters::RMON_COUNTER_COUNT;

const SLOT_BYTES: usize = 8;

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum DmaLayout {
    /// One little-endian 64-bit word per counter, in canonical order.
    #[default]
    Tofino1,
    /// Transmit counters first, then receive counters.  Each counter is a
    /// pair of little-endian 32-bit words, low word first.
    Tofino2,
}

impl DmaLayout {
    pub const fn buffer_len(&self) -> usize {
        RMON_COUNTER_COUNT * SLOT_BYTES
    }

    // The counter held in each slot of the buffer.
    fn slots(&self) -> Vec<RmonCounter> {
        match self {
            DmaLayout::Tofino1 => RmonCounter::iter().collect(),
            DmaLayout::Tofino2 => RmonCounter::iter()
                .filter(|c| c.is_tx())
                .chain(RmonCounter::iter().filter(|c| !c.is_tx()))
                .collect(),
        }
    }

    fn encode_slot(&self, value: u64) -> [u8; SLOT_BYTES] {
        match self {
            DmaLayout::Tofino1 => value.to_le_bytes(),
            DmaLayout::Tofino2 => {
                let mut slot = [0u8; SLOT_BYTES];
                slot[..4].copy_from_slice(&(value as u32).to_le_bytes());
                let hi = (value >> 32) as u32;
                slot[4..].copy_from_slice(&hi.to_le_bytes());
                slot
            }
        }
    }

    fn decode_slot(&self, slot: &[u8]) -> u64 {
        let word = |b: &[u8]| u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
        match self {
            DmaLayout::Tofino1 => {
                let mut bytes = [0u8; SLOT_BYTES];
                bytes.copy_from_slice(slot);
                u64::from_le_bytes(bytes)
            }
            DmaLayout::Tofino2 => {
                let lo = u64::from(word(&slot[..4]));
                lo | (u64::from(word(&slot[4..])) << 32)
            }
        }
    }

    /// Lay the counters out as the hardware would.
    pub fn encode(&self, counters: &CounterSet) -> Vec<u8> {
        self.slots()
            .into_iter()
            .flat_map(|c| self.encode_slot(counters[c]))
            .collect()
    }

    /// Convert a DMA buffer to canonical order.
    pub fn decode(&self, raw: &[u8]) -> AsicResult<CounterSet> {
        if raw.len() != self.buffer_len() {
            return Err(AsicError::HwCommFail(format!(
                "dma buffer is {} bytes, expected {}",
                raw.len(),
                self.buffer_len()
            )));
        }
        let mut counters = CounterSet::new();
        for (slot, counter) in raw.chunks_exact(SLOT_BYTES).zip(self.slots()) {
            counters[counter] = self.decode_slot(slot);
        }
        Ok(counters)
    }
}
