// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A simulated device, for testing and for bringing up the software without
//! hardware.  The test drives each port's physical status and counters
//! directly, and may inject failures into any operation.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::Mutex;

use slog::debug;
use slog::o;
use slog::Logger;

use aal::AsicError;
use aal::AsicResult;
use aal::CounterSource;
use aal::DmaCompletion;
use aal::LinkActions;
use aal::LinkState;
use aal::MsgId;
use aal::PhysicalStatus;
use aal::PhysicalStatusSource;
use aal::PortHdl;
use common::counters::CounterSet;
use common::counters::RmonCounter;

use crate::layout::DmaLayout;
use crate::monitor::IrqFlag;
use crate::Backend;

mod chaos;
pub use chaos::Chaos;
pub use chaos::FauxChaos;

#[derive(Debug, Default)]
struct FauxPort {
    status: PhysicalStatus,
    counters: CounterSet,
}

pub struct FauxAsic {
    log: Logger,
    layout: DmaLayout,
    chaos: Mutex<FauxChaos>,
    ports: Mutex<BTreeMap<PortHdl, FauxPort>>,
    dma_tx: Mutex<Option<mpsc::Sender<DmaCompletion>>>,
    hold_dma: AtomicBool,
    held: Mutex<Vec<DmaCompletion>>,
    link_actions: Mutex<Vec<(PortHdl, LinkState)>>,
    irq: Mutex<Option<Arc<IrqFlag>>>,
}

impl FauxAsic {
    pub fn new(log: &Logger, layout: DmaLayout) -> Self {
        FauxAsic {
            log: log.new(o!(
                "unit" => "faux",
                "layout" => format!("{layout:?}")
            )),
            layout,
            chaos: Mutex::new(FauxChaos::default()),
            ports: Mutex::new(BTreeMap::new()),
            dma_tx: Mutex::new(None),
            hold_dma: AtomicBool::new(false),
            held: Mutex::new(Vec::new()),
            link_actions: Mutex::new(Vec::new()),
            irq: Mutex::new(None),
        }
    }

    /// A backend for a device, with every collaborator provided by `faux`.
    pub fn backend(faux: &Arc<FauxAsic>) -> Backend {
        Backend {
            phys: faux.clone(),
            counters: faux.clone(),
            actions: faux.clone(),
        }
    }

    pub fn set_chaos(&self, chaos: FauxChaos) {
        *self.chaos.lock().unwrap() = chaos;
    }

    /// Raise this flag whenever a port's status changes, as the link
    /// interrupt would.
    pub fn attach_irq(&self, irq: Arc<IrqFlag>) {
        *self.irq.lock().unwrap() = Some(irq);
    }

    pub fn set_status(&self, port: PortHdl, status: PhysicalStatus) {
        let changed = {
            let mut ports = self.ports.lock().unwrap();
            let p = ports.entry(port).or_default();
            let changed = p.status != status;
            p.status = status;
            changed
        };
        if changed {
            if let Some(irq) = self.irq.lock().unwrap().as_ref() {
                irq.raise();
            }
        }
    }

    /// Count traffic on a port.
    pub fn add_traffic(&self, port: PortHdl, counter: RmonCounter, n: u64) {
        let mut ports = self.ports.lock().unwrap();
        let c = &mut ports.entry(port).or_default().counters[counter];
        *c = c.wrapping_add(n);
    }

    /// The values currently held in the port's hardware counters.
    pub fn hw_counters(&self, port: PortHdl) -> CounterSet {
        self.ports
            .lock()
            .unwrap()
            .get(&port)
            .map(|p| p.counters.clone())
            .unwrap_or_default()
    }

    /// Reset a port's hardware counters, as a port reconfiguration would.
    pub fn reset_counters(&self, port: PortHdl) {
        if let Some(p) = self.ports.lock().unwrap().get_mut(&port) {
            p.counters.zero();
        }
    }

    /// While held, DMA completions are queued rather than delivered.
    pub fn hold_dma(&self, hold: bool) {
        self.hold_dma.store(hold, Ordering::Release);
    }

    /// Deliver any held DMA completions.  Returns how many were sent.
    pub fn release_dma(&self) -> AsicResult<usize> {
        let held: Vec<DmaCompletion> =
            self.held.lock().unwrap().drain(..).collect();
        let n = held.len();
        for completion in held {
            self.deliver(completion)?;
        }
        Ok(n)
    }

    /// The link actions run so far, in order.
    pub fn link_actions(&self) -> Vec<(PortHdl, LinkState)> {
        self.link_actions.lock().unwrap().clone()
    }

    fn deliver(&self, completion: DmaCompletion) -> AsicResult<()> {
        let tx = self.dma_tx.lock().unwrap();
        let Some(tx) = tx.as_ref() else {
            return Err(AsicError::NotReady("no dma handler registered".into()));
        };
        tx.send(completion).map_err(|_| {
            AsicError::HwCommFail("dma completion channel closed".into())
        })
    }

    fn record_action(&self, port: PortHdl, state: LinkState) {
        debug!(self.log, "link {} actions", state; "port" => %port);
        self.link_actions.lock().unwrap().push((port, state));
    }
}

impl PhysicalStatusSource for FauxAsic {
    fn read(&self, port: PortHdl) -> AsicResult<PhysicalStatus> {
        let chaos = self.chaos.lock().unwrap().read_status;
        chaos.unfurled(&self.log, "read physical status")?;
        Ok(self
            .ports
            .lock()
            .unwrap()
            .get(&port)
            .map(|p| p.status)
            .unwrap_or_default())
    }
}

impl CounterSource for FauxAsic {
    fn read_one(&self, port: PortHdl, counter: RmonCounter) -> AsicResult<u64> {
        let chaos = self.chaos.lock().unwrap().read_counter;
        chaos.unfurled(&self.log, "read counter")?;
        Ok(self.hw_counters(port)[counter])
    }

    fn request_dma(&self, port: PortHdl, msg_id: MsgId) -> AsicResult<()> {
        let chaos = self.chaos.lock().unwrap().request_dma;
        chaos.unfurled(&self.log, "request dma")?;
        if self.dma_tx.lock().unwrap().is_none() {
            return Err(AsicError::NotReady("no dma handler registered".into()));
        }

        let completion = DmaCompletion {
            msg_id,
            raw: self.layout.encode(&self.hw_counters(port)),
            timestamp_ns: common::timestamp_ns(),
        };
        if self.hold_dma.load(Ordering::Acquire) {
            self.held.lock().unwrap().push(completion);
            Ok(())
        } else {
            self.deliver(completion)
        }
    }

    fn decode_dma(&self, raw: &[u8]) -> AsicResult<CounterSet> {
        self.layout.decode(raw)
    }

    fn clear(&self, port: PortHdl) -> AsicResult<()> {
        let chaos = self.chaos.lock().unwrap().clear;
        chaos.unfurled(&self.log, "clear counters")?;
        self.reset_counters(port);
        Ok(())
    }

    fn register_dma_handler(
        &self,
        tx: mpsc::Sender<DmaCompletion>,
    ) -> AsicResult<()> {
        *self.dma_tx.lock().unwrap() = Some(tx);
        Ok(())
    }
}

impl LinkActions for FauxAsic {
    fn link_up_actions(&self, port: PortHdl) -> AsicResult<()> {
        self.record_action(port, LinkState::Up);
        Ok(())
    }

    fn link_down_actions(&self, port: PortHdl) -> AsicResult<()> {
        self.record_action(port, LinkState::Down);
        Ok(())
    }
}
