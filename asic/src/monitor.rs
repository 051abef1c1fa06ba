// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The execution contexts that drive a device: the poll thread, the
//! interrupt hand-off and its bottom half, and the DMA completion
//! dispatcher.

use std::marker::PhantomData;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::Arc;
use std::sync::OnceLock;
use std::thread;
use std::thread::JoinHandle;
use std::thread::Thread;
use std::time::Duration;

use slog::debug;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;

use aal::AsicError;
use aal::AsicResult;
use aal::DmaCompletion;

use crate::config::MonitoringMode;
use crate::Device;

/// Evidence that the holder is running in a context that may block and run
/// arbitrary subscriber code: the poll thread, the interrupt bottom half, or
/// an ordinary caller's thread.  Interrupt handlers must never create one.
///
/// The token can't be sent to another thread.
pub struct Deferred {
    _not_send: PhantomData<*const ()>,
}

impl Deferred {
    pub fn enter() -> Self {
        Deferred {
            _not_send: PhantomData,
        }
    }
}

/// Hand-off from the interrupt handler to the bottom half.  Raising the flag
/// never blocks and never takes a lock, so it is the one operation that is
/// safe to call from an interrupt handler.
#[derive(Debug, Default)]
pub struct IrqFlag {
    raised: AtomicBool,
    bottom_half: OnceLock<Thread>,
}

impl IrqFlag {
    /// Note that an interrupt has occurred, and wake the bottom half.
    pub fn raise(&self) {
        if self
            .raised
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Some(t) = self.bottom_half.get() {
                t.unpark();
            }
        }
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.raised
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }

    fn set_bottom_half(&self, t: Thread) {
        let _ = self.bottom_half.set(t);
    }
}

impl Device {
    /// Sample every port, then deliver any pending events.  Ports whose
    /// status can't be read are skipped until the next pass.
    pub fn scan_ports(&self, ctx: &Deferred) {
        for port in self.ports() {
            if let Err(e) = self.sample_and_update(port) {
                debug!(self.log, "skipping port";
                    "port" => %port, "error" => %e);
                continue;
            }
            if let Err(e) = self.issue_pending_callbacks(ctx, port) {
                // The port was removed out from under us.
                debug!(self.log, "delivery failed";
                    "port" => %port, "error" => %e);
            }
        }
    }

    /// Run the interrupt bottom half: if an interrupt has been raised since
    /// the last call, scan the ports.  Returns whether a scan ran.
    pub fn service_interrupt(&self, ctx: &Deferred) -> bool {
        if !self.irq.take() {
            return false;
        }
        self.scan_ports(ctx);
        true
    }
}

/// The threads running on behalf of a device.  Dropping a monitor without
/// calling `stop()` leaves the threads running.
pub struct Monitor {
    log: Logger,
    shutdown: Arc<AtomicBool>,
    wake: Vec<Thread>,
    handles: Vec<JoinHandle<()>>,
}

impl Monitor {
    /// Start the link monitor for the device's monitoring mode, and the DMA
    /// completion dispatcher.
    pub fn start(dev: Arc<Device>) -> AsicResult<Monitor> {
        let log = dev.log.new(o!("unit" => "monitor"));
        let shutdown = Arc::new(AtomicBool::new(false));
        let interval = dev.config.poll_interval();

        let (tx, rx) = mpsc::channel();
        dev.backend.counters.register_dma_handler(tx)?;

        let link = {
            let dev = dev.clone();
            let log = log.clone();
            let shutdown = shutdown.clone();
            match dev.monitoring_mode() {
                MonitoringMode::Polled => spawn("link-poll", move || {
                    poll_loop(&log, &dev, &shutdown, interval)
                })?,
                MonitoringMode::Interrupt => spawn("link-irq", move || {
                    bottom_half_loop(&log, &dev, &shutdown, interval)
                })?,
            }
        };
        if dev.monitoring_mode() == MonitoringMode::Interrupt {
            dev.irq.set_bottom_half(link.thread().clone());
        }

        let dma = {
            let log = log.clone();
            let shutdown = shutdown.clone();
            spawn("stats-dma", move || {
                dma_loop(&log, &dev, &shutdown, &rx, interval)
            })?
        };

        info!(log, "monitor started");
        Ok(Monitor {
            log,
            shutdown,
            wake: vec![link.thread().clone(), dma.thread().clone()],
            handles: vec![link, dma],
        })
    }

    /// Stop the threads and wait for them to exit.
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::Release);
        for t in &self.wake {
            t.unpark();
        }
        for h in self.handles {
            if h.join().is_err() {
                warn!(self.log, "monitor thread panicked");
            }
        }
        info!(self.log, "monitor stopped");
    }
}

fn spawn<F>(name: &str, f: F) -> AsicResult<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(f)
        .map_err(|e| {
            AsicError::Unexpected(format!("failed to start {name} thread: {e}"))
        })
}

fn poll_loop(
    log: &Logger,
    dev: &Device,
    shutdown: &AtomicBool,
    interval: Duration,
) {
    info!(log, "polling links"; "interval_ms" => interval.as_millis() as u64);
    let ctx = Deferred::enter();
    while !shutdown.load(Ordering::Acquire) {
        dev.scan_ports(&ctx);
        thread::park_timeout(interval);
    }
}

fn bottom_half_loop(
    log: &Logger,
    dev: &Device,
    shutdown: &AtomicBool,
    interval: Duration,
) {
    info!(log, "waiting for link interrupts");
    let ctx = Deferred::enter();
    while !shutdown.load(Ordering::Acquire) {
        if !dev.service_interrupt(&ctx) {
            thread::park_timeout(interval);
        }
    }
}

fn dma_loop(
    log: &Logger,
    dev: &Device,
    shutdown: &AtomicBool,
    rx: &mpsc::Receiver<DmaCompletion>,
    interval: Duration,
) {
    while !shutdown.load(Ordering::Acquire) {
        match rx.recv_timeout(interval) {
            Ok(completion) => {
                let msg_id = completion.msg_id;
                if let Err(e) = dev.stats_dma_complete(completion) {
                    warn!(log, "dropping dma completion";
                        "msg_id" => msg_id, "error" => %e);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                info!(log, "dma completion channel closed");
                break;
            }
        }
    }
}
