// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use rand::random;
use serde::Deserialize;
use serde::Serialize;
use slog::Logger;

use aal::AsicError;
use aal::AsicResult;

/// Chaos that happens according to a probability.
#[derive(Default, Debug, Serialize, Deserialize, Copy, Clone, PartialEq)]
pub struct Chaos {
    /// A probability between 0.0 and 1.0
    pub value: f64,
}

impl Chaos {
    pub fn new(value: f64) -> AsicResult<Self> {
        if !(0.0..=1.0).contains(&value) {
            return Err(AsicError::InvalidArg(format!(
                "probability {value} out of range"
            )));
        }
        Ok(Chaos { value })
    }

    /// Chaos that always strikes.
    pub fn always() -> Self {
        Chaos { value: 1.0 }
    }

    /// Return a chaos error according to the underlying probability value.
    pub fn unfurled(&self, log: &Logger, message: &str) -> AsicResult<()> {
        if self.value > 0.0 && self.value >= random::<f64>() {
            slog::error!(log, "chaos error: {}", message);
            return Err(AsicError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// Chaos values for each operation of the faux device.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct FauxChaos {
    pub read_status: Chaos,
    pub read_counter: Chaos,
    pub request_dma: Chaos,
    pub clear: Chaos,
}

impl FauxChaos {
    /// The same probability of failure for every operation.
    pub fn uniform(v: f64) -> AsicResult<Self> {
        let c = Chaos::new(v)?;
        Ok(FauxChaos {
            read_status: c,
            read_counter: c,
            request_dma: c,
            clear: c,
        })
    }
}
