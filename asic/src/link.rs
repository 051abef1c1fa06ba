// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The link state engine.
//!
//! Detecting a link change and telling anyone about it are two separate
//! steps.  `sample_and_update()` reads the port's physical status, applies
//! the error-hold policy, and records any edge by setting a pending flag.
//! `issue_pending_callbacks()` runs the per-edge link actions and notifies
//! the subscriber.  Only the second step runs foreign code, and it demands a
//! `Deferred` token to prove it is being called from a context where that is
//! allowed.

use std::time::Duration;
use std::time::Instant;

use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use slog::debug;
use slog::info;
use slog::warn;

use aal::AsicResult;
use aal::LinkState;
use aal::PhysicalStatus;
use aal::PortHdl;
use common::ports::PortFec;

use crate::autoneg;
use crate::autoneg::Codeword;
use crate::autoneg::HcdResult;
use crate::config::MonitoringMode;
use crate::monitor::Deferred;
use crate::Device;

/// The link state kept for each port.
#[derive(Clone, Debug, Default)]
pub struct PortLinkState {
    /// The state most recently detected
    pub oper_state: LinkState,
    pub monitoring_mode: MonitoringMode,
    /// An edge has been detected that hasn't yet been delivered
    pub pending_callback: bool,
    /// Deliver down edges to the subscriber even in interrupt mode
    pub force_link_down_notify: bool,
    /// Maximum errored blocks a link without FEC may show while coming up.
    /// 0 means no limit.
    pub error_hold_threshold: u32,
    pub fec: PortFec,
    /// Administrative state.  A disabled port is always down.
    pub enabled: bool,
    pub last_enable_time: Option<Instant>,
    pub last_up_time: Option<Instant>,
    pub last_down_time: Option<Instant>,
    pub last_signal_detect_time: Option<Instant>,
    pub up_count: u64,
    pub down_count: u64,
    pub hcd: Option<HcdResult>,
    // Bumped on every edge, so a delivery can tell whether another edge
    // arrived while it was running.
    edge_seq: u64,
    signal_present: bool,
}

impl PortLinkState {
    /// Does the error-hold threshold constrain this port's bring-up?
    pub fn error_hold_applies(&self) -> bool {
        self.error_hold_threshold > 0 && self.fec == PortFec::None
    }

    /// Fold a new physical-status sample into the state.  Returns the
    /// resulting state and whether it changed.
    pub fn apply_sample(
        &mut self,
        sample: &PhysicalStatus,
        now: Instant,
    ) -> (LinkState, bool) {
        if sample.pcs_ready && !self.signal_present {
            self.last_signal_detect_time = Some(now);
        }
        self.signal_present = sample.pcs_ready;

        let raw_up = self.enabled && sample.link_up();
        let next = match (self.oper_state, raw_up) {
            (_, false) => LinkState::Down,
            // Once up, error counts alone never take the link down.
            (LinkState::Up, true) => LinkState::Up,
            (LinkState::Down, true) => {
                let held = self.error_hold_applies()
                    && (sample.block_errors > self.error_hold_threshold
                        || sample.degraded());
                if held {
                    LinkState::Down
                } else {
                    LinkState::Up
                }
            }
        };

        let changed = next != self.oper_state;
        if changed {
            self.pending_callback = true;
            self.edge_seq += 1;
            match next {
                LinkState::Up => {
                    self.last_up_time = Some(now);
                    self.up_count += 1;
                }
                LinkState::Down => {
                    self.last_down_time = Some(now);
                    self.down_count += 1;
                }
            }
        }
        self.oper_state = next;
        (next, changed)
    }

    /// Time from the port being enabled to the link coming up.
    pub fn bringup_latency(&self) -> Option<Duration> {
        match (self.oper_state, self.last_enable_time, self.last_up_time) {
            (LinkState::Up, Some(enabled), Some(up)) => {
                Some(up.saturating_duration_since(enabled))
            }
            _ => None,
        }
    }

    // If the port was re-enabled while its up edge was being delivered, the
    // up time predates the enable.  Pull it forward.
    fn fix_up_time(&mut self) {
        if self.oper_state != LinkState::Up {
            return;
        }
        if let (Some(enabled), Some(up)) =
            (self.last_enable_time, self.last_up_time)
        {
            if enabled > up {
                self.last_up_time = Some(enabled);
            }
        }
    }
}

/// A port's link state, as reported to operators.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct LinkInfo {
    pub port: PortHdl,
    pub oper_state: LinkState,
    pub enabled: bool,
    pub monitoring_mode: MonitoringMode,
    pub pending_callback: bool,
    pub force_link_down_notify: bool,
    pub error_hold_threshold: u32,
    pub fec: PortFec,
    pub up_count: u64,
    pub down_count: u64,
    pub hcd: Option<HcdResult>,
    /// Milliseconds from enable to link up, while the link is up
    pub bringup_ms: Option<u64>,
}

impl LinkInfo {
    pub(crate) fn new(port: PortHdl, link: &PortLinkState) -> Self {
        LinkInfo {
            port,
            oper_state: link.oper_state,
            enabled: link.enabled,
            monitoring_mode: link.monitoring_mode,
            pending_callback: link.pending_callback,
            force_link_down_notify: link.force_link_down_notify,
            error_hold_threshold: link.error_hold_threshold,
            fec: link.fec,
            up_count: link.up_count,
            down_count: link.down_count,
            hcd: link.hcd,
            bringup_ms: link
                .bringup_latency()
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
    }
}

impl Device {
    /// Sample a port's physical status and update its link state.  Returns
    /// the new state and whether it changed.  If the status can't be read,
    /// the state is left as it was and the error is returned.
    pub fn sample_and_update(
        &self,
        port: PortHdl,
    ) -> AsicResult<(LinkState, bool)> {
        let p = self.ports.get(port)?;
        let _sampling = p.lock_sampling();
        let sample = self.backend.phys.read(port).map_err(|e| {
            warn!(self.log, "failed to read physical status";
                "port" => %port, "error" => %e);
            e
        })?;

        let mut state = p.lock();
        let (link, changed) = state.link.apply_sample(&sample, Instant::now());
        if changed {
            info!(self.log, "link {}", link; "port" => %port,
                "block_errors" => sample.block_errors);
        }
        Ok((link, changed))
    }

    /// Deliver a port's pending link event, if it has one.  Returns whether
    /// an event was pending.
    ///
    /// The link actions for the edge are run, and then the subscriber is
    /// told the port's current state.  Neither is called with the port's
    /// state locked, so the subscriber may call back into the device to
    /// enable or disable the port.  It must not deliver events for the same
    /// port.
    pub fn issue_pending_callbacks(
        &self,
        _ctx: &Deferred,
        port: PortHdl,
    ) -> AsicResult<bool> {
        let p = self.ports.get(port)?;
        let _delivery = p.lock_delivery();

        let (link, seq, notify) = {
            let state = p.lock();
            if !state.link.pending_callback {
                return Ok(false);
            }
            let link = state.link.oper_state;
            let notify = match (state.link.monitoring_mode, link) {
                (MonitoringMode::Interrupt, LinkState::Down) => {
                    state.link.force_link_down_notify
                }
                _ => true,
            };
            (link, state.link.edge_seq, notify)
        };

        let actions = match link {
            LinkState::Up => self.backend.actions.link_up_actions(port),
            LinkState::Down => self.backend.actions.link_down_actions(port),
        };
        if let Err(e) = actions {
            warn!(self.log, "link {} actions failed", link;
                "port" => %port, "error" => %e);
        }

        if notify {
            if let Some(subscriber) = self.subscriber() {
                subscriber.on_link_event(port, link);
            }
        } else {
            debug!(self.log, "link down notification suppressed";
                "port" => %port);
        }

        let mut state = p.lock();
        state.link.fix_up_time();
        // Another edge may have been detected while this one was being
        // delivered.  If so, leave the flag set for it.
        if state.link.edge_seq == seq {
            state.link.pending_callback = false;
        }
        Ok(true)
    }

    /// Administratively enable or disable a port.  A disabled port is
    /// reported down on its next sample.
    pub fn set_enabled(&self, port: PortHdl, enabled: bool) -> AsicResult<()> {
        let p = self.ports.get(port)?;
        let mut state = p.lock();
        if enabled && !state.link.enabled {
            state.link.last_enable_time = Some(Instant::now());
        }
        state.link.enabled = enabled;
        let admin = if enabled { "enabled" } else { "disabled" };
        debug!(self.log, "port {}", admin; "port" => %port);
        Ok(())
    }

    pub fn set_force_link_down_notify(
        &self,
        port: PortHdl,
        force: bool,
    ) -> AsicResult<()> {
        let p = self.ports.get(port)?;
        p.lock().link.force_link_down_notify = force;
        Ok(())
    }

    pub fn set_error_hold_threshold(
        &self,
        port: PortHdl,
        threshold: u32,
    ) -> AsicResult<()> {
        let p = self.ports.get(port)?;
        p.lock().link.error_hold_threshold = threshold;
        Ok(())
    }

    /// Record the FEC mode a port is running.
    pub fn set_fec(&self, port: PortHdl, fec: PortFec) -> AsicResult<()> {
        let p = self.ports.get(port)?;
        p.lock().link.fec = fec;
        Ok(())
    }

    pub fn link_info(&self, port: PortHdl) -> AsicResult<LinkInfo> {
        let p = self.ports.get(port)?;
        let state = p.lock();
        Ok(LinkInfo::new(port, &state.link))
    }

    /// Record a completed autonegotiation exchange: the pages this port sent
    /// and the pages received from its partner.  The resolved mode is stored
    /// on the port, and its FEC mode becomes the port's.
    pub fn autoneg_complete(
        &self,
        port: PortHdl,
        local: &[Codeword],
        remote: &[Codeword],
    ) -> AsicResult<HcdResult> {
        let p = self.ports.get(port)?;
        autoneg::decode(local)?;
        autoneg::decode(remote)?;
        let hcd = autoneg::resolve_pages(local, remote)?;

        let mut state = p.lock();
        state.autoneg.local = local.to_vec();
        state.autoneg.remote = remote.to_vec();
        state.link.hcd = Some(hcd);
        state.link.fec = hcd.fec;
        drop(state);

        if hcd.is_none() {
            warn!(self.log, "autonegotiation found no common mode";
                "port" => %port);
        } else {
            info!(self.log, "autonegotiation resolved {}", hcd;
                "port" => %port);
        }
        Ok(hcd)
    }

    /// The pages exchanged in the port's last autonegotiation.
    pub fn autoneg_pages(
        &self,
        port: PortHdl,
    ) -> AsicResult<(Vec<Codeword>, Vec<Codeword>)> {
        let p = self.ports.get(port)?;
        let state = p.lock();
        Ok((state.autoneg.local.clone(), state.autoneg.remote.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::Mutex;

    use aal::AsicError;
    use aal::Connector;
    use aal::MockLinkActions;
    use aal::MockLinkSubscriber;
    use aal::MockPhysicalStatusSource;
    use mockall::predicate::eq;

    use crate::config::LinkConfig;
    use crate::test_utils::mock_device;
    use crate::test_utils::permissive_actions;

    fn ready() -> PhysicalStatus {
        PhysicalStatus {
            pcs_ready: true,
            ..Default::default()
        }
    }

    fn enabled_state(threshold: u32) -> PortLinkState {
        PortLinkState {
            enabled: true,
            error_hold_threshold: threshold,
            ..Default::default()
        }
    }

    #[test]
    fn test_hysteresis() {
        let noisy = PhysicalStatus {
            block_errors: 25,
            ..ready()
        };
        let now = Instant::now();

        let mut down = enabled_state(20);
        assert_eq!(down.apply_sample(&noisy, now), (LinkState::Down, false));
        assert!(!down.pending_callback);

        let mut up = enabled_state(20);
        up.apply_sample(&ready(), now);
        assert_eq!(up.oper_state, LinkState::Up);
        assert_eq!(up.apply_sample(&noisy, now), (LinkState::Up, false));

        // At the threshold is acceptable
        let mut down = enabled_state(20);
        let edge = PhysicalStatus {
            block_errors: 20,
            ..ready()
        };
        assert_eq!(down.apply_sample(&edge, now), (LinkState::Up, true));
    }

    #[test]
    fn test_hold_degraded() {
        let now = Instant::now();
        for sample in [
            PhysicalStatus {
                hi_ber: true,
                ..ready()
            },
            PhysicalStatus {
                sync_loss: true,
                ..ready()
            },
            PhysicalStatus {
                block_lock_loss: true,
                ..ready()
            },
        ] {
            let mut st = enabled_state(20);
            assert_eq!(st.apply_sample(&sample, now).0, LinkState::Down);
            // Without a threshold, the same sample brings the link up
            let mut st = enabled_state(0);
            assert_eq!(st.apply_sample(&sample, now).0, LinkState::Up);
        }
    }

    #[test]
    fn test_hold_ignored_with_fec() {
        let mut st = enabled_state(20);
        st.fec = PortFec::Rs;
        let noisy = PhysicalStatus {
            block_errors: 1000,
            ..ready()
        };
        assert_eq!(
            st.apply_sample(&noisy, Instant::now()),
            (LinkState::Up, true)
        );
    }

    #[test]
    fn test_faults_and_disable() {
        let now = Instant::now();
        let mut st = enabled_state(0);
        st.apply_sample(&ready(), now);
        assert_eq!(st.oper_state, LinkState::Up);

        let fault = PhysicalStatus {
            remote_fault: true,
            ..ready()
        };
        assert_eq!(st.apply_sample(&fault, now), (LinkState::Down, true));
        assert_eq!(st.down_count, 1);
        assert!(st.last_down_time.is_some());

        st.apply_sample(&ready(), now);
        st.enabled = false;
        assert_eq!(st.apply_sample(&ready(), now), (LinkState::Down, true));
        assert_eq!(st.up_count, 2);
        assert_eq!(st.down_count, 2);
    }

    #[test]
    fn test_signal_detect_time() {
        let mut st = PortLinkState::default();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_millis(5);

        st.apply_sample(&PhysicalStatus::default(), t0);
        assert_eq!(st.last_signal_detect_time, None);
        st.apply_sample(&ready(), t0);
        assert_eq!(st.last_signal_detect_time, Some(t0));
        // Signal stays present, so the time doesn't move
        st.apply_sample(&ready(), t1);
        assert_eq!(st.last_signal_detect_time, Some(t0));
        // Disabled ports still see signal
        assert_eq!(st.oper_state, LinkState::Down);
    }

    #[test]
    fn test_fix_up_time() {
        let t0 = Instant::now();
        let mut st = enabled_state(0);
        st.last_enable_time = Some(t0);
        st.apply_sample(&ready(), t0 + Duration::from_millis(10));
        assert_eq!(st.bringup_latency(), Some(Duration::from_millis(10)));

        st.last_enable_time = Some(t0 + Duration::from_millis(20));
        st.fix_up_time();
        assert_eq!(st.last_up_time, st.last_enable_time);
        assert_eq!(st.bringup_latency(), Some(Duration::ZERO));
    }

    fn port() -> PortHdl {
        PortHdl::new(Connector::QSFP(4), 0)
    }

    fn phys_sequence(
        samples: Vec<AsicResult<PhysicalStatus>>,
    ) -> MockPhysicalStatusSource {
        let samples = Mutex::new(samples.into_iter());
        let mut phys = MockPhysicalStatusSource::new();
        phys.expect_read()
            .returning(move |_| samples.lock().unwrap().next().unwrap());
        phys
    }

    #[test]
    fn test_failed_read_keeps_state() -> anyhow::Result<()> {
        let phys = phys_sequence(vec![
            Ok(ready()),
            Err(AsicError::HwCommFail("timeout".into())),
        ]);
        let dev = mock_device(LinkConfig::default(), Some(phys), None, None);
        dev.port_add(port())?;
        dev.set_enabled(port(), true)?;

        assert_eq!(dev.sample_and_update(port())?, (LinkState::Up, true));
        assert_eq!(
            dev.sample_and_update(port()),
            Err(AsicError::HwCommFail("timeout".into()))
        );
        let info = dev.link_info(port())?;
        assert_eq!(info.oper_state, LinkState::Up);
        assert!(info.pending_callback);
        Ok(())
    }

    fn delivery_test(
        mode: MonitoringMode,
        force: bool,
        expect_down_notify: bool,
    ) -> anyhow::Result<()> {
        let phys =
            phys_sequence(vec![Ok(ready()), Ok(PhysicalStatus::default())]);

        let mut actions = MockLinkActions::new();
        actions
            .expect_link_up_actions()
            .with(eq(port()))
            .times(1)
            .returning(|_| Ok(()));
        actions
            .expect_link_down_actions()
            .with(eq(port()))
            .times(1)
            .returning(|_| Ok(()));

        let mut subscriber = MockLinkSubscriber::new();
        subscriber
            .expect_on_link_event()
            .with(eq(port()), eq(LinkState::Up))
            .times(1)
            .return_const(());
        subscriber
            .expect_on_link_event()
            .with(eq(port()), eq(LinkState::Down))
            .times(usize::from(expect_down_notify))
            .return_const(());

        let config = LinkConfig {
            monitoring_mode: mode,
            ..Default::default()
        };
        let dev = mock_device(config, Some(phys), None, Some(actions));
        dev.register_link_subscriber(Arc::new(subscriber));
        dev.port_add(port())?;
        dev.set_enabled(port(), true)?;
        dev.set_force_link_down_notify(port(), force)?;
        let ctx = Deferred::enter();

        dev.sample_and_update(port())?;
        assert!(dev.issue_pending_callbacks(&ctx, port())?);
        assert!(!dev.link_info(port())?.pending_callback);
        assert!(!dev.issue_pending_callbacks(&ctx, port())?);

        assert_eq!(dev.sample_and_update(port())?, (LinkState::Down, true));
        assert!(dev.issue_pending_callbacks(&ctx, port())?);
        assert!(!dev.link_info(port())?.pending_callback);
        Ok(())
    }

    #[test]
    fn test_polled_delivers_down() -> anyhow::Result<()> {
        delivery_test(MonitoringMode::Polled, false, true)
    }

    #[test]
    fn test_interrupt_suppresses_down() -> anyhow::Result<()> {
        delivery_test(MonitoringMode::Interrupt, false, false)
    }

    #[test]
    fn test_interrupt_forced_down() -> anyhow::Result<()> {
        delivery_test(MonitoringMode::Interrupt, true, true)
    }

    #[test]
    fn test_failed_actions_still_notify() -> anyhow::Result<()> {
        let phys = phys_sequence(vec![Ok(ready())]);
        let mut actions = MockLinkActions::new();
        actions
            .expect_link_up_actions()
            .times(1)
            .returning(|_| Err(AsicError::HwCommFail("rearm".into())));
        let mut subscriber = MockLinkSubscriber::new();
        subscriber.expect_on_link_event().times(1).return_const(());

        let dev = mock_device(
            LinkConfig::default(),
            Some(phys),
            None,
            Some(actions),
        );
        dev.register_link_subscriber(Arc::new(subscriber));
        dev.port_add(port())?;
        dev.set_enabled(port(), true)?;
        dev.sample_and_update(port())?;
        assert!(dev.issue_pending_callbacks(&Deferred::enter(), port())?);
        Ok(())
    }

    // A subscriber that re-enables the port it was told about.
    struct Bouncer {
        dev: Mutex<Option<Arc<Device>>>,
    }

    impl aal::LinkSubscriber for Bouncer {
        fn on_link_event(&self, port: PortHdl, state: LinkState) {
            if state != LinkState::Up {
                return;
            }
            if let Some(dev) = self.dev.lock().unwrap().as_ref() {
                std::thread::sleep(Duration::from_millis(2));
                dev.set_enabled(port, false).unwrap();
                dev.set_enabled(port, true).unwrap();
            }
        }
    }

    #[test]
    fn test_reenable_during_delivery() -> anyhow::Result<()> {
        let phys = phys_sequence(vec![Ok(ready())]);
        let dev = Arc::new(mock_device(
            LinkConfig::default(),
            Some(phys),
            None,
            Some(permissive_actions()),
        ));
        let bouncer = Arc::new(Bouncer {
            dev: Mutex::new(Some(dev.clone())),
        });
        dev.register_link_subscriber(bouncer.clone());
        dev.port_add(port())?;
        dev.set_enabled(port(), true)?;

        dev.sample_and_update(port())?;
        dev.issue_pending_callbacks(&Deferred::enter(), port())?;

        let p = dev.ports.get(port())?;
        let state = p.lock();
        assert_eq!(state.link.oper_state, LinkState::Up);
        assert!(state.link.last_up_time >= state.link.last_enable_time);
        assert_eq!(state.link.last_up_time, state.link.last_enable_time);
        drop(state);

        // Break the reference cycle
        bouncer.dev.lock().unwrap().take();
        Ok(())
    }

    #[test]
    fn test_edge_during_delivery_stays_pending() -> anyhow::Result<()> {
        let phys =
            phys_sequence(vec![Ok(ready()), Ok(PhysicalStatus::default())]);
        let dev = Arc::new(mock_device(
            LinkConfig::default(),
            Some(phys),
            None,
            Some(permissive_actions()),
        ));

        // The subscriber samples the port again while the up edge is being
        // delivered, detecting a down edge.
        struct Resampler(Mutex<Option<Arc<Device>>>);
        impl aal::LinkSubscriber for Resampler {
            fn on_link_event(&self, port: PortHdl, state: LinkState) {
                if state == LinkState::Up {
                    if let Some(dev) = self.0.lock().unwrap().as_ref() {
                        dev.sample_and_update(port).unwrap();
                    }
                }
            }
        }
        let sub = Arc::new(Resampler(Mutex::new(Some(dev.clone()))));
        dev.register_link_subscriber(sub.clone());
        dev.port_add(port())?;
        dev.set_enabled(port(), true)?;

        let ctx = Deferred::enter();
        dev.sample_and_update(port())?;
        assert!(dev.issue_pending_callbacks(&ctx, port())?);
        let info = dev.link_info(port())?;
        assert_eq!(info.oper_state, LinkState::Down);
        assert!(info.pending_callback);

        assert!(dev.issue_pending_callbacks(&ctx, port())?);
        assert!(!dev.link_info(port())?.pending_callback);
        sub.0.lock().unwrap().take();
        Ok(())
    }

    #[test]
    fn test_concurrent_samples_apply_in_order() -> anyhow::Result<()> {
        use std::sync::atomic::AtomicUsize;
        use std::sync::atomic::Ordering;
        use std::sync::mpsc;

        let reads = Arc::new(AtomicUsize::new(0));
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        // The first read stalls until released, then reports the link up.
        // The second reports it down.
        let mut phys = MockPhysicalStatusSource::new();
        let mut seq = mockall::Sequence::new();
        let r = reads.clone();
        phys.expect_read()
            .once()
            .in_sequence(&mut seq)
            .returning(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                let _ = entered_tx.send(());
                let _ = release_rx.lock().unwrap().recv();
                Ok(ready())
            });
        let r = reads.clone();
        phys.expect_read()
            .once()
            .in_sequence(&mut seq)
            .returning(move |_| {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(PhysicalStatus::default())
            });

        let dev =
            mock_device(LinkConfig::default(), Some(phys), None, None);
        let dev = Arc::new(dev);
        dev.port_add(port())?;
        dev.set_enabled(port(), true)?;

        let sampler = |dev: &Arc<Device>| {
            let dev = dev.clone();
            std::thread::spawn(move || dev.sample_and_update(port()))
        };
        let first = sampler(&dev);
        entered_rx.recv_timeout(Duration::from_secs(5))?;
        let second = sampler(&dev);

        // The second sample waits for the first to be applied.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(reads.load(Ordering::SeqCst), 1);
        release_tx.send(())?;

        assert_eq!(first.join().unwrap()?, (LinkState::Up, true));
        assert_eq!(second.join().unwrap()?, (LinkState::Down, true));
        let info = dev.link_info(port())?;
        assert_eq!(info.oper_state, LinkState::Down);
        assert_eq!((info.up_count, info.down_count), (1, 1));
        Ok(())
    }

    #[test]
    fn test_autoneg_complete() -> anyhow::Result<()> {
        use crate::autoneg::{AnFec, AutonegAdvertisement, Technology};
        use common::ports::PortSpeed;

        let dev = mock_device(LinkConfig::default(), None, None, None);
        dev.port_add(port())?;
        dev.set_error_hold_threshold(port(), 20)?;

        let local = autoneg::encode(&AutonegAdvertisement {
            speeds: [Technology::Base25GKr].into_iter().collect(),
            fec: AnFec::RS_REQUEST_25G,
            ..Default::default()
        })?;
        let remote = autoneg::encode(&AutonegAdvertisement {
            speeds: [Technology::Base25GKr, Technology::Base10GKr]
                .into_iter()
                .collect(),
            ..Default::default()
        })?;
        let hcd = dev.autoneg_complete(port(), &local, &remote)?;
        assert_eq!(hcd.speed, PortSpeed::Speed25G);
        assert_eq!(hcd.fec, PortFec::Rs);

        let info = dev.link_info(port())?;
        assert_eq!(info.hcd, Some(hcd));
        assert_eq!(info.fec, PortFec::Rs);
        assert_eq!(dev.autoneg_pages(port())?, (local.clone(), remote));

        // A malformed partner page is rejected, and nothing is recorded
        let bogus = [Codeword::new(0b00010)];
        assert!(dev.autoneg_complete(port(), &local, &bogus).is_err());
        assert_eq!(dev.link_info(port())?.hcd, Some(hcd));
        Ok(())
    }

    #[test]
    fn test_autoneg_consortium_fallback() -> anyhow::Result<()> {
        use crate::autoneg::{AnFec, AutonegAdvertisement, Technology};
        use crate::autoneg::CONSORTIUM_OUI;
        use common::ports::PortSpeed;

        let dev = mock_device(LinkConfig::default(), None, None, None);
        dev.port_add(port())?;

        // The base pages share nothing, so the extended technology pages
        // decide.
        let local = autoneg::encode(&AutonegAdvertisement {
            speeds: [
                Technology::Base10GKr,
                Technology::Consortium25GCr1,
                Technology::Consortium50GCr2,
            ]
            .into_iter()
            .collect(),
            fec: AnFec::CONSORTIUM_RS_ABILITY | AnFec::CONSORTIUM_RS_REQUEST,
            consortium_oui: CONSORTIUM_OUI,
            ..Default::default()
        })?;
        let remote = autoneg::encode(&AutonegAdvertisement {
            speeds: [Technology::Base1GKx, Technology::Consortium50GCr2]
                .into_iter()
                .collect(),
            fec: AnFec::CONSORTIUM_RS_ABILITY,
            consortium_oui: CONSORTIUM_OUI,
            ..Default::default()
        })?;
        assert_eq!(local.len(), 3);
        assert_eq!(remote.len(), 3);

        let hcd = dev.autoneg_complete(port(), &local, &remote)?;
        let expected = HcdResult {
            speed: PortSpeed::Speed50G,
            lane_count: 2,
            fec: PortFec::Rs,
        };
        assert_eq!(hcd, expected);

        let info = dev.link_info(port())?;
        assert_eq!(info.hcd, Some(expected));
        assert_eq!(info.fec, PortFec::Rs);
        assert_eq!(dev.autoneg_pages(port())?, (local, remote));
        Ok(())
    }

    #[test]
    fn test_unknown_port() {
        let dev = mock_device(LinkConfig::default(), None, None, None);
        assert!(matches!(
            dev.sample_and_update(port()),
            Err(AsicError::InvalidArg(_))
        ));
        assert!(matches!(
            dev.issue_pending_callbacks(&Deferred::enter(), port()),
            Err(AsicError::InvalidArg(_))
        ));
        assert!(dev.set_enabled(port(), true).is_err());
        assert!(dev.link_info(port()).is_err());
    }
}
