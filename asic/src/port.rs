// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The registry of ports on a device, and the mutable state kept for each.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

use aal::AsicError;
use aal::AsicResult;
use aal::PortHdl;

use crate::autoneg::Codeword;
use crate::link::PortLinkState;
use crate::stats::PortStats;

/// The most recent autonegotiation exchange on a port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AutonegPages {
    pub local: Vec<Codeword>,
    /// Replaced on every negotiation round
    pub remote: Vec<Codeword>,
}

/// Everything that changes about a port.  Link and counter state share a
/// lock, so a snapshot of the two is never torn.
#[derive(Default)]
pub struct PortState {
    pub link: PortLinkState,
    pub stats: PortStats,
    pub autoneg: AutonegPages,
}

pub(crate) struct Port {
    pub hdl: PortHdl,
    state: Mutex<PortState>,
    // Held from reading the physical status until the sample is applied, so
    // that concurrent samples land in the order they were read.
    sampling: Mutex<()>,
    // Held while link events for this port are delivered, so that they reach
    // the subscriber in the order they were detected.
    delivery: Mutex<()>,
}

impl Port {
    fn new(hdl: PortHdl, state: PortState) -> Self {
        Port {
            hdl,
            state: Mutex::new(state),
            sampling: Mutex::new(()),
            delivery: Mutex::new(()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap()
    }

    pub fn lock_sampling(&self) -> MutexGuard<'_, ()> {
        self.sampling.lock().unwrap()
    }

    pub fn lock_delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap()
    }
}

/// Maps port handles to their state.  A port's state lives from `add()` to
/// `remove()`.
#[derive(Default)]
pub(crate) struct PortRegistry {
    ports: Mutex<BTreeMap<PortHdl, Arc<Port>>>,
}

impl PortRegistry {
    pub fn add(&self, hdl: PortHdl, state: PortState) -> AsicResult<()> {
        if !hdl.is_packable() {
            return Err(AsicError::InvalidArg(format!(
                "port {hdl} is out of range"
            )));
        }
        let mut ports = self.ports.lock().unwrap();
        if ports.contains_key(&hdl) {
            return Err(AsicError::InvalidArg(format!(
                "port {hdl} already exists"
            )));
        }
        ports.insert(hdl, Arc::new(Port::new(hdl, state)));
        Ok(())
    }

    pub fn remove(&self, hdl: PortHdl) -> AsicResult<()> {
        self.ports
            .lock()
            .unwrap()
            .remove(&hdl)
            .map(|_| ())
            .ok_or_else(|| no_such_port(hdl))
    }

    pub fn get(&self, hdl: PortHdl) -> AsicResult<Arc<Port>> {
        self.ports
            .lock()
            .unwrap()
            .get(&hdl)
            .cloned()
            .ok_or_else(|| no_such_port(hdl))
    }

    /// All ports, in handle order.
    pub fn all(&self) -> Vec<Arc<Port>> {
        self.ports.lock().unwrap().values().cloned().collect()
    }
}

fn no_such_port(hdl: PortHdl) -> AsicError {
    AsicError::InvalidArg(format!("no such port: {hdl}"))
}
