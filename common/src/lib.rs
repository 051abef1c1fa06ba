// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Types and helpers shared by every crate in the link-management stack.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

pub mod counters;
pub mod logging;
pub mod ports;

/// Return the current wall-clock time in nanoseconds since the epoch.  Used to
/// stamp statistics snapshots handed to subscribers.
pub fn timestamp_ns() -> u64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_nanos() as u64,
        Err(_) => 0,
    }
}
