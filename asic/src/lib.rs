// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The link-management core of the switch port driver.  A `Device` tracks
//! the operational state of each of its ports, negotiates their mode with the
//! link partner, and keeps their MAC counters exact across hardware clears.
//! Everything specific to a hardware generation lives behind the traits in
//! `aal`, supplied to the device as a `Backend`.

use std::sync::Arc;
use std::sync::Mutex;

use slog::o;

use aal::AsicResult;
use aal::CounterSource;
use aal::LinkActions;
use aal::LinkSubscriber;
use aal::PhysicalStatusSource;
use aal::PortHdl;

pub mod autoneg;
pub mod config;
pub mod faux;
pub mod layout;
pub mod link;
pub mod monitor;
pub mod port;
pub mod stats;

use config::LinkConfig;
use config::MonitoringMode;
use monitor::IrqFlag;
use port::PortRegistry;
use port::PortState;

/// The per-generation collaborators a device is built on.
#[derive(Clone)]
pub struct Backend {
    pub phys: Arc<dyn PhysicalStatusSource>,
    pub counters: Arc<dyn CounterSource>,
    pub actions: Arc<dyn LinkActions>,
}

/// One switch ASIC and the ports configured on it.
pub struct Device {
    log: slog::Logger,
    dev_id: u32,
    config: LinkConfig,
    backend: Backend,
    subscriber: Mutex<Option<Arc<dyn LinkSubscriber>>>,
    ports: PortRegistry,
    irq: Arc<IrqFlag>,
}

impl Device {
    pub fn new(
        log: &slog::Logger,
        dev_id: u32,
        config: LinkConfig,
        backend: Backend,
    ) -> Self {
        let log = log.new(o!("unit" => "asic", "dev_id" => dev_id));
        slog::info!(log, "device created";
            "monitoring_mode" => %config.monitoring_mode);
        Device {
            log,
            dev_id,
            config,
            backend,
            subscriber: Mutex::new(None),
            ports: PortRegistry::default(),
            irq: Arc::new(IrqFlag::default()),
        }
    }

    pub fn dev_id(&self) -> u32 {
        self.dev_id
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn monitoring_mode(&self) -> MonitoringMode {
        self.config.monitoring_mode
    }

    /// The flag the hardware interrupt handler raises to wake the bottom
    /// half.
    pub fn irq_flag(&self) -> Arc<IrqFlag> {
        self.irq.clone()
    }

    /// Register the subscriber told about link up and down events, replacing
    /// any earlier one.
    pub fn register_link_subscriber(
        &self,
        subscriber: Arc<dyn LinkSubscriber>,
    ) {
        *self.subscriber.lock().unwrap() = Some(subscriber);
    }

    pub(crate) fn subscriber(&self) -> Option<Arc<dyn LinkSubscriber>> {
        self.subscriber.lock().unwrap().clone()
    }

    /// Start tracking a port.  It begins down and administratively disabled.
    pub fn port_add(&self, port: PortHdl) -> AsicResult<()> {
        let mut state = PortState::default();
        state.link.monitoring_mode = self.config.monitoring_mode;
        state.link.error_hold_threshold = self.config.error_hold_threshold;
        self.ports.add(port, state)?;
        slog::debug!(self.log, "port added"; "port" => %port);
        Ok(())
    }

    /// Stop tracking a port.  Any DMA read outstanding on it is abandoned.
    pub fn port_remove(&self, port: PortHdl) -> AsicResult<()> {
        self.ports.remove(port)?;
        slog::debug!(self.log, "port removed"; "port" => %port);
        Ok(())
    }

    pub fn ports(&self) -> Vec<PortHdl> {
        self.ports.all().iter().map(|p| p.hdl).collect()
    }
}
