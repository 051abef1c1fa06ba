// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The ASIC abstraction layer: the error type shared by the link-management
//! core, and the traits through which the core talks to the per-generation
//! hardware code it doesn't own.

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use common::counters::CounterSet;
use common::counters::RmonCounter;

mod ports;
pub use ports::*;

/// A specialized Result type for ASIC operations
pub type AsicResult<T> = Result<T, AsicError>;

/// Opaque tag attached to a DMA request, echoed back with its completion.
pub type MsgId = u64;

/// Error type conveying additional information about ASIC errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsicError {
    /// An argument passed to the ASIC layer is invalid or inappropriate.  This
    /// covers malformed autonegotiation advertisements and unknown ports, and
    /// indicates misbehavior from the caller.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// A register or DMA read failed, after exhausting any retry budget.
    #[error("Hardware communication failure: {}", .0)]
    HwCommFail(String),
    /// The operation can't be started until an earlier one completes.
    #[error("Not ready: {}", .0)]
    NotReady(String),
    /// The ASIC layer detected some internal inconsistency
    #[error("Unexpected internal error: {}", .0)]
    Unexpected(String),
    /// An error derived from a purposely triggered synthetic fault for testing
    /// purposes.
    #[error("Synthetic ASIC error: {}", .0)]
    Synthetic(String),
}

impl AsicError {
    /// Is this a failure that might succeed if the operation is retried?
    pub fn is_transient(&self) -> bool {
        matches!(self, AsicError::HwCommFail(_) | AsicError::Synthetic(_))
    }
}

/// One sample of a port's physical coding sublayer and fault status.
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
pub struct PhysicalStatus {
    /// Block lock and alignment-marker lock achieved on every lane
    pub pcs_ready: bool,
    /// The PCS is reporting a high bit-error rate
    pub hi_ber: bool,
    /// Errored blocks seen during the last measurement window
    pub block_errors: u32,
    /// Local fault detected by the reconciliation sublayer
    pub local_fault: bool,
    /// Remote fault signalled by the link partner
    pub remote_fault: bool,
    /// PCS sync was lost during the last measurement window
    pub sync_loss: bool,
    /// Block lock was lost during the last measurement window
    pub block_lock_loss: bool,
}

impl PhysicalStatus {
    /// The raw link-up indication: the PCS is ready and neither end is
    /// signalling a fault.
    pub fn link_up(&self) -> bool {
        self.pcs_ready && !self.local_fault && !self.remote_fault
    }

    /// Is the PCS reporting any condition that would make the error rate
    /// unacceptable on a link without FEC?
    pub fn degraded(&self) -> bool {
        self.hi_ber || self.sync_loss || self.block_lock_loss
    }
}

/// A completed DMA counter read, as handed back by the hardware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DmaCompletion {
    pub msg_id: MsgId,
    /// Counter data in the chip generation's own layout
    pub raw: Vec<u8>,
    pub timestamp_ns: u64,
}

/// Source of PCS/FEC/fault status for ports on one device.  There is one
/// implementation per hardware generation.
#[cfg_attr(feature = "mocks", mockall::automock)]
pub trait PhysicalStatusSource: Send + Sync {
    /// Sample the current physical status of a port.
    fn read(&self, port: PortHdl) -> AsicResult<PhysicalStatus>;
}

/// Source of MAC counter data for ports on one device.  There is one
/// implementation per hardware generation.
#[cfg_attr(feature = "mocks", mockall::automock)]
pub trait CounterSource: Send + Sync {
    /// Read a single counter synchronously.
    fn read_one(&self, port: PortHdl, counter: RmonCounter) -> AsicResult<u64>;

    /// Start a DMA read of every counter on the port.  The completion is
    /// delivered, tagged with `msg_id`, to the channel registered with
    /// `register_dma_handler()`.
    fn request_dma(&self, port: PortHdl, msg_id: MsgId) -> AsicResult<()>;

    /// Convert a DMA buffer in this generation's layout into canonical order.
    fn decode_dma(&self, raw: &[u8]) -> AsicResult<CounterSet>;

    /// Reset the port's hardware counters to zero.
    fn clear(&self, port: PortHdl) -> AsicResult<()>;

    /// Register the channel on which DMA completions should be delivered.
    fn register_dma_handler(
        &self,
        tx: std::sync::mpsc::Sender<DmaCompletion>,
    ) -> AsicResult<()>;
}

/// Per-edge side effects on the rest of the driver: re-arming interrupts,
/// resetting drain state, and the like.
#[cfg_attr(feature = "mocks", mockall::automock)]
pub trait LinkActions: Send + Sync {
    fn link_up_actions(&self, port: PortHdl) -> AsicResult<()>;
    fn link_down_actions(&self, port: PortHdl) -> AsicResult<()>;
}

/// Operational state of a link, as last reported to subscribers.
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
pub enum LinkState {
    #[default]
    Down,
    Up,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            LinkState::Down => write!(f, "Down"),
            LinkState::Up => write!(f, "Up"),
        }
    }
}

/// Receives link up/down notifications.
#[cfg_attr(feature = "mocks", mockall::automock)]
pub trait LinkSubscriber: Send + Sync {
    fn on_link_event(&self, port: PortHdl, state: LinkState);
}

/// When the link-management core detects a state change for a port, it can
/// send a PortUpdate event to interested daemons informing them of the change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortUpdate {
    /// Signal that the linkup/linkdown state of a port has changed
    LinkUp { port: PortHdl, linkup: bool },
}

// Link events can be forwarded straight into a daemon's update channel.
impl LinkSubscriber for tokio::sync::mpsc::UnboundedSender<PortUpdate> {
    fn on_link_event(&self, port: PortHdl, state: LinkState) {
        // A closed channel means the receiver is gone and no longer cares.
        let _ = self.send(PortUpdate::LinkUp {
            port,
            linkup: state == LinkState::Up,
        });
    }
}
