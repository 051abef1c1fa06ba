// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! MAC counter reconciliation.
//!
//! Some operations on a port reset its hardware counters as a side effect.
//! To keep the reported totals exact, each port holds two sets of counters:
//! `cache`, the values most recently read from the hardware, and
//! `historical`, everything the hardware has counted before its last reset.
//! Callers must invoke `rollover_before_clear()` before doing anything that
//! will reset the counters.

use std::fmt;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::warn;
use strum::IntoEnumIterator;

use aal::AsicError;
use aal::AsicResult;
use aal::DmaCompletion;
use aal::MsgId;
use aal::PortHdl;
use common::counters::CounterSet;
use common::counters::RmonCounter;

use crate::link::LinkInfo;
use crate::Device;

/// Called with the port's combined counters and the time the DMA completed.
pub type StatsCallback = Box<dyn FnOnce(PortHdl, &CounterSet, u64) + Send>;

struct PendingDma {
    msg_id: MsgId,
    callback: StatsCallback,
}

/// The counter state kept for each port.
#[derive(Default)]
pub struct PortStats {
    pub cache: CounterSet,
    pub historical: CounterSet,
    pending: Option<PendingDma>,
}

impl PortStats {
    /// `cache + historical`, counter by counter.
    pub fn combined(&self) -> CounterSet {
        self.cache.sum(&self.historical)
    }

    /// Fold the cached values into the historical totals, in preparation for
    /// the hardware counters being reset.
    pub fn rollover(&mut self) {
        self.historical.accumulate(&self.cache);
        self.cache.zero();
    }

    pub fn dma_outstanding(&self) -> bool {
        self.pending.is_some()
    }
}

impl fmt::Debug for PortStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PortStats")
            .field("cache", &self.cache)
            .field("historical", &self.historical)
            .field("pending", &self.pending.as_ref().map(|p| p.msg_id))
            .finish()
    }
}

/// Link state and counters for a port, captured together.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct PortSnapshot {
    pub link: LinkInfo,
    pub counters: CounterSet,
}

impl Device {
    /// Tag for a DMA counter read on a port.  The device ID occupies the
    /// upper 32 bits and the packed port handle the lower.
    pub fn stats_msg_id(&self, port: PortHdl) -> MsgId {
        (u64::from(self.dev_id) << 32) | u64::from(port)
    }

    fn msg_id_port(&self, msg_id: MsgId) -> AsicResult<PortHdl> {
        let dev_id = (msg_id >> 32) as u32;
        if dev_id != self.dev_id {
            return Err(AsicError::Unexpected(format!(
                "dma completion {msg_id:#x} is for device {dev_id}"
            )));
        }
        Ok(PortHdl::from(msg_id & 0xffff_ffff))
    }

    fn read_counter(
        &self,
        port: PortHdl,
        counter: RmonCounter,
    ) -> AsicResult<u64> {
        let attempts = self.config.read_retries.max(1);
        let mut attempt = 1;
        loop {
            match self.backend.counters.read_one(port, counter) {
                Ok(v) => return Ok(v),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= attempts => {
                    warn!(self.log, "giving up reading counter";
                        "port" => %port,
                        "counter" => counter.name(),
                        "attempts" => attempts,
                        "error" => %e);
                    return Err(AsicError::HwCommFail(format!(
                        "reading {} on {port}: {e}",
                        counter.name()
                    )));
                }
                Err(e) => {
                    debug!(self.log, "retrying counter read";
                        "port" => %port,
                        "counter" => counter.name(),
                        "attempt" => attempt,
                        "error" => %e);
                    attempt += 1;
                }
            }
        }
    }

    /// Read every counter on the port directly from the hardware, refresh
    /// the cache, and return the combined totals.
    pub fn stats_sync_read(&self, port: PortHdl) -> AsicResult<CounterSet> {
        let p = self.ports.get(port)?;
        // The lock is held across the reads so that a rollover can't land
        // between reading the hardware and storing the result.
        let mut state = p.lock();
        let mut fresh = CounterSet::new();
        for counter in RmonCounter::iter() {
            fresh[counter] = self.read_counter(port, counter)?;
        }
        state.stats.cache = fresh;
        Ok(state.stats.combined())
    }

    /// Start a DMA read of the port's counters.  When it completes, the
    /// cache is refreshed and `callback` is given the combined totals.
    /// Only one read may be outstanding on a port at a time.
    pub fn stats_async_read<F>(
        &self,
        port: PortHdl,
        callback: F,
    ) -> AsicResult<()>
    where
        F: FnOnce(PortHdl, &CounterSet, u64) + Send + 'static,
    {
        let p = self.ports.get(port)?;
        let mut state = p.lock();
        if state.stats.dma_outstanding() {
            return Err(AsicError::NotReady(format!(
                "counter read already outstanding on {port}"
            )));
        }

        let msg_id = self.stats_msg_id(port);
        self.backend.counters.request_dma(port, msg_id).map_err(|e| {
            warn!(self.log, "counter dma request failed";
                "port" => %port, "error" => %e);
            e
        })?;
        state.stats.pending = Some(PendingDma {
            msg_id,
            callback: Box::new(callback),
        });
        Ok(())
    }

    /// Handle a completed DMA counter read.  This runs on the DMA dispatcher
    /// thread.
    pub fn stats_dma_complete(
        &self,
        completion: DmaCompletion,
    ) -> AsicResult<()> {
        let DmaCompletion {
            msg_id,
            raw,
            timestamp_ns,
        } = completion;
        let port = self.msg_id_port(msg_id)?;
        let p = self.ports.get(port)?;

        let (callback, combined) = {
            let mut state = p.lock();
            let pending = match state.stats.pending.take() {
                Some(pending) if pending.msg_id == msg_id => pending,
                other => {
                    state.stats.pending = other;
                    return Err(AsicError::Unexpected(format!(
                        "no counter read outstanding for {msg_id:#x}"
                    )));
                }
            };
            // The request is finished either way, so a bad buffer drops the
            // callback along with it.
            state.stats.cache = self.backend.counters.decode_dma(&raw)?;
            (pending.callback, state.stats.combined())
        };

        callback(port, &combined, timestamp_ns);
        Ok(())
    }

    /// Move the cached counters into the historical totals.  This must be
    /// called before any operation that resets the port's hardware counters.
    pub fn stats_rollover_before_clear(&self, port: PortHdl) -> AsicResult<()> {
        let p = self.ports.get(port)?;
        p.lock().stats.rollover();
        debug!(self.log, "counters rolled over"; "port" => %port);
        Ok(())
    }

    /// Zero every counter on the port, in the hardware as well as here.
    pub fn stats_clear(&self, port: PortHdl) -> AsicResult<()> {
        let p = self.ports.get(port)?;
        let mut state = p.lock();
        self.backend.counters.clear(port)?;
        state.stats.cache.zero();
        state.stats.historical.zero();
        debug!(self.log, "counters cleared"; "port" => %port);
        Ok(())
    }

    /// The combined counters as of the last read, without touching the
    /// hardware.
    pub fn stats_combined(&self, port: PortHdl) -> AsicResult<CounterSet> {
        let p = self.ports.get(port)?;
        let combined = p.lock().stats.combined();
        Ok(combined)
    }

    /// Capture the port's link state and combined counters together.
    pub fn snapshot(&self, port: PortHdl) -> AsicResult<PortSnapshot> {
        let p = self.ports.get(port)?;
        let state = p.lock();
        Ok(PortSnapshot {
            link: LinkInfo::new(port, &state.link),
            counters: state.stats.combined(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::test_utils::mock_device;
    use aal::Connector;
    use aal::MockCounterSource;
    use common::counters::RMON_COUNTER_COUNT;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;
    use rand::Rng;
    use std::sync::atomic::AtomicU64;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::sync::Mutex;

    fn port() -> PortHdl {
        PortHdl::new(Connector::QSFP(9), 0)
    }

    fn check_invariant(dev: &Device) {
        let p = dev.ports.get(port()).unwrap();
        let state = p.lock();
        for (counter, combined) in state.stats.combined().iter() {
            assert_eq!(
                combined,
                state.stats.cache[counter] + state.stats.historical[counter]
            );
        }
    }

    // A counter source whose counters all hold the same value, which the
    // test can change.
    fn shared_counters(value: Arc<AtomicU64>) -> MockCounterSource {
        let mut counters = MockCounterSource::new();
        let v = value.clone();
        counters
            .expect_read_one()
            .returning(move |_, _| Ok(v.load(Ordering::SeqCst)));
        counters.expect_clear().returning(move |_| {
            value.store(0, Ordering::SeqCst);
            Ok(())
        });
        counters
    }

    #[test]
    fn test_sync_read() -> anyhow::Result<()> {
        let hw = Arc::new(AtomicU64::new(7));
        let dev = mock_device(
            LinkConfig::default(),
            None,
            Some(shared_counters(hw.clone())),
            None,
        );
        dev.port_add(port())?;

        let combined = dev.stats_sync_read(port())?;
        assert!(combined.values().iter().all(|v| *v == 7));

        // The hardware resets after a rollover; totals carry on from there.
        dev.stats_rollover_before_clear(port())?;
        hw.store(3, Ordering::SeqCst);
        let combined = dev.stats_sync_read(port())?;
        assert!(combined.values().iter().all(|v| *v == 10));
        assert_eq!(dev.stats_combined(port())?, combined);
        check_invariant(&dev);
        Ok(())
    }

    #[test]
    fn test_rollover_idempotent() -> anyhow::Result<()> {
        let hw = Arc::new(AtomicU64::new(5));
        let dev = mock_device(
            LinkConfig::default(),
            None,
            Some(shared_counters(hw)),
            None,
        );
        dev.port_add(port())?;
        dev.stats_sync_read(port())?;

        dev.stats_rollover_before_clear(port())?;
        let once = dev.stats_combined(port())?;
        dev.stats_rollover_before_clear(port())?;
        assert_eq!(dev.stats_combined(port())?, once);
        check_invariant(&dev);
        Ok(())
    }

    #[test]
    fn test_invariant_sweep() -> anyhow::Result<()> {
        let hw = Arc::new(AtomicU64::new(0));
        let dev = mock_device(
            LinkConfig::default(),
            None,
            Some(shared_counters(hw.clone())),
            None,
        );
        dev.port_add(port())?;

        let mut rng = rand::thread_rng();
        let mut expected = 0u64;
        let mut at_last_read = 0u64;
        for _ in 0..200 {
            match rng.gen_range(0..4) {
                0 => {
                    let traffic = rng.gen_range(0..1000);
                    hw.fetch_add(traffic, Ordering::SeqCst);
                    expected += traffic;
                }
                1 => {
                    let combined = dev.stats_sync_read(port())?;
                    at_last_read = expected;
                    assert_eq!(combined[RmonCounter::OctetsRx], expected);
                }
                2 => {
                    // Read, roll over, then reset the hardware
                    dev.stats_sync_read(port())?;
                    dev.stats_rollover_before_clear(port())?;
                    hw.store(0, Ordering::SeqCst);
                    at_last_read = expected;
                }
                _ => {
                    dev.stats_clear(port())?;
                    expected = 0;
                    at_last_read = 0;
                }
            }
            check_invariant(&dev);
            assert_eq!(
                dev.stats_combined(port())?[RmonCounter::FramesTxOk],
                at_last_read
            );
        }
        Ok(())
    }

    #[test]
    fn test_retry() -> anyhow::Result<()> {
        let mut seq = Sequence::new();
        let mut counters = MockCounterSource::new();
        for _ in 0..2 {
            counters
                .expect_read_one()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Err(AsicError::HwCommFail("busy".into())));
        }
        counters
            .expect_read_one()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(1));
        // Every remaining counter reads cleanly
        counters
            .expect_read_one()
            .times(RMON_COUNTER_COUNT - 1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(2));

        let dev =
            mock_device(LinkConfig::default(), None, Some(counters), None);
        dev.port_add(port())?;
        let combined = dev.stats_sync_read(port())?;
        assert_eq!(combined[RmonCounter::FramesRxOk], 1);
        assert_eq!(combined[RmonCounter::FramesRxAll], 2);
        Ok(())
    }

    #[test]
    fn test_retries_exhausted() -> anyhow::Result<()> {
        let mut counters = MockCounterSource::new();
        counters
            .expect_read_one()
            .times(3)
            .returning(|_, _| Err(AsicError::Synthetic("flaky".into())));

        let dev =
            mock_device(LinkConfig::default(), None, Some(counters), None);
        dev.port_add(port())?;
        let err = dev.stats_sync_read(port()).unwrap_err();
        assert!(matches!(err, AsicError::HwCommFail(_)));
        // Nothing was stored
        assert_eq!(dev.stats_combined(port())?, CounterSet::new());
        Ok(())
    }

    #[test]
    fn test_no_retry_on_bad_argument() -> anyhow::Result<()> {
        let mut counters = MockCounterSource::new();
        counters
            .expect_read_one()
            .times(1)
            .returning(|_, _| Err(AsicError::InvalidArg("bad counter".into())));

        let dev =
            mock_device(LinkConfig::default(), None, Some(counters), None);
        dev.port_add(port())?;
        assert!(matches!(
            dev.stats_sync_read(port()),
            Err(AsicError::InvalidArg(_))
        ));
        Ok(())
    }

    fn dma_counters() -> MockCounterSource {
        let mut counters = MockCounterSource::new();
        counters.expect_request_dma().returning(|_, _| Ok(()));
        counters.expect_decode_dma().returning(|raw| {
            let mut set = CounterSet::new();
            set[RmonCounter::OctetsRx] = u64::from(raw[0]);
            Ok(set)
        });
        counters
    }

    #[test]
    fn test_async_read() -> anyhow::Result<()> {
        let dev = mock_device(
            LinkConfig::default(),
            None,
            Some(dma_counters()),
            None,
        );
        dev.port_add(port())?;
        dev.ports.get(port())?.lock().stats.historical[RmonCounter::OctetsRx] =
            100;

        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        dev.stats_async_read(port(), move |port, combined, ts| {
            *s.lock().unwrap() =
                Some((port, combined[RmonCounter::OctetsRx], ts));
        })?;

        let second = dev.stats_async_read(port(), |_, _, _| {});
        assert!(matches!(second, Err(AsicError::NotReady(_))));

        dev.stats_dma_complete(DmaCompletion {
            msg_id: dev.stats_msg_id(port()),
            raw: vec![42],
            timestamp_ns: 1234,
        })?;
        assert_eq!(*seen.lock().unwrap(), Some((port(), 142, 1234)));
        check_invariant(&dev);

        // The port is free for another read
        dev.stats_async_read(port(), |_, _, _| {})?;
        Ok(())
    }

    #[test]
    fn test_failed_request_not_outstanding() -> anyhow::Result<()> {
        let mut counters = MockCounterSource::new();
        let mut seq = Sequence::new();
        counters
            .expect_request_dma()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(AsicError::HwCommFail("ring full".into())));
        counters
            .expect_request_dma()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let dev =
            mock_device(LinkConfig::default(), None, Some(counters), None);
        dev.port_add(port())?;
        assert!(dev.stats_async_read(port(), |_, _, _| {}).is_err());
        dev.stats_async_read(port(), |_, _, _| {})?;
        Ok(())
    }

    #[test]
    fn test_failed_decode_clears_outstanding() -> anyhow::Result<()> {
        let mut counters = MockCounterSource::new();
        counters.expect_request_dma().returning(|_, _| Ok(()));
        counters
            .expect_decode_dma()
            .returning(|_| Err(AsicError::HwCommFail("short buffer".into())));

        let dev =
            mock_device(LinkConfig::default(), None, Some(counters), None);
        dev.port_add(port())?;
        dev.stats_async_read(port(), |_, _, _| panic!("callback ran"))?;
        let result = dev.stats_dma_complete(DmaCompletion {
            msg_id: dev.stats_msg_id(port()),
            raw: Vec::new(),
            timestamp_ns: 0,
        });
        assert!(result.is_err());
        dev.stats_async_read(port(), |_, _, _| {})?;
        Ok(())
    }

    #[test]
    fn test_unexpected_completion() -> anyhow::Result<()> {
        let dev = mock_device(
            LinkConfig::default(),
            None,
            Some(dma_counters()),
            None,
        );
        dev.port_add(port())?;

        let stray = DmaCompletion {
            msg_id: dev.stats_msg_id(port()),
            raw: vec![1],
            timestamp_ns: 0,
        };
        assert!(matches!(
            dev.stats_dma_complete(stray.clone()),
            Err(AsicError::Unexpected(_))
        ));

        let other_device = DmaCompletion {
            msg_id: stray.msg_id | (7 << 32),
            ..stray
        };
        assert!(matches!(
            dev.stats_dma_complete(other_device),
            Err(AsicError::Unexpected(_))
        ));
        Ok(())
    }

    #[test]
    fn test_msg_id() {
        let dev = mock_device(LinkConfig::default(), None, None, None);
        let id = dev.stats_msg_id(port());
        assert_eq!(id, (1 << 32) | 0x0900);
        assert_eq!(dev.msg_id_port(id).unwrap(), port());

        // Every port the registry accepts has an id of its own.
        let edges = [
            PortHdl::new(Connector::QSFP(0), 0),
            PortHdl::new(Connector::QSFP(aal::MAX_QSFP), 0),
            PortHdl::new(Connector::CPU, 0),
        ];
        let ids: Vec<MsgId> =
            edges.iter().map(|p| dev.stats_msg_id(*p)).collect();
        for (i, hdl) in edges.iter().enumerate() {
            assert_eq!(dev.msg_id_port(ids[i]).unwrap(), *hdl);
            assert!(ids[i + 1..].iter().all(|id| *id != ids[i]));
        }
    }

    #[test]
    fn test_clear() -> anyhow::Result<()> {
        let hw = Arc::new(AtomicU64::new(9));
        let dev = mock_device(
            LinkConfig::default(),
            None,
            Some(shared_counters(hw.clone())),
            None,
        );
        dev.port_add(port())?;
        dev.stats_sync_read(port())?;
        dev.stats_rollover_before_clear(port())?;
        dev.stats_sync_read(port())?;
        dev.stats_clear(port())?;
        assert_eq!(hw.load(Ordering::SeqCst), 0);
        assert_eq!(dev.stats_combined(port())?, CounterSet::new());

        let snap = dev.snapshot(port())?;
        assert_eq!(snap.counters, CounterSet::new());
        assert_eq!(snap.link.port, port());

        let json = serde_json::to_value(&snap)?;
        assert_eq!(json["link"]["oper_state"], "Down");
        assert_eq!(json["counters"].as_array().map(Vec::len), Some(89));
        Ok(())
    }
}
