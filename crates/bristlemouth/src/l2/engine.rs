// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! L2 event loop, producer handle and telemetry.

use crate::config::L2Settings;
use crate::l2::device::{DeviceConfig, DeviceError, DeviceHandle, NetDevice, NetDeviceKind};
use crate::l2::error::L2Error;
use crate::l2::frame;
use crate::l2::netif::NetInterface;
use crate::l2::ADIN2111_PORT_NUM;
use crossbeam::channel::{self, Receiver, SendTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How long the idle loop sleeps before re-checking the running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Highest global port count representable in a `u8` port mask.
const MAX_GLOBAL_PORTS: u8 = 8;

/// Called on the L2 thread with `(global_port_idx, link_up)`.
pub type LinkChangeCallback = Box<dyn Fn(u8, bool) + Send + Sync>;

// ============================================================================
// Events
// ============================================================================

/// Work items consumed by the L2 thread. Each carries its own buffer.
#[derive(Debug)]
pub enum L2Event {
    Tx {
        port_mask: u8,
        frame: Vec<u8>,
    },
    Rx {
        device: DeviceHandle,
        port_mask: u8,
        frame: Vec<u8>,
    },
    LinkUp {
        device: DeviceHandle,
        port: u8,
    },
    LinkDown {
        device: DeviceHandle,
        port: u8,
    },
    SetNetifUp {
        device: DeviceHandle,
    },
    SetNetifDown {
        device: DeviceHandle,
    },
}

// ============================================================================
// Metrics
// ============================================================================

/// Counters updated by the L2 thread and its producers.
///
/// Relaxed atomics: readers only need monotonic snapshots.
#[derive(Debug)]
pub struct L2Metrics {
    pub frames_tx: AtomicU64,
    pub frames_rx: AtomicU64,
    pub frames_flooded: AtomicU64,
    pub tx_device_errors: AtomicU64,
    pub input_errors: AtomicU64,
    pub queue_drops: AtomicU64,
    pub link_changes: AtomicU64,
}

impl L2Metrics {
    #[inline]
    pub fn new() -> Self {
        Self {
            frames_tx: AtomicU64::new(0),
            frames_rx: AtomicU64::new(0),
            frames_flooded: AtomicU64::new(0),
            tx_device_errors: AtomicU64::new(0),
            input_errors: AtomicU64::new(0),
            queue_drops: AtomicU64::new(0),
            link_changes: AtomicU64::new(0),
        }
    }

    /// `(tx, rx, flooded, tx_device_errors, input_errors, queue_drops, link_changes)`
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> (u64, u64, u64, u64, u64, u64, u64) {
        (
            self.frames_tx.load(Ordering::Relaxed),
            self.frames_rx.load(Ordering::Relaxed),
            self.frames_flooded.load(Ordering::Relaxed),
            self.tx_device_errors.load(Ordering::Relaxed),
            self.input_errors.load(Ordering::Relaxed),
            self.queue_drops.load(Ordering::Relaxed),
            self.link_changes.load(Ordering::Relaxed),
        )
    }
}

impl Default for L2Metrics {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Producer handle
// ============================================================================

/// State readable from any thread, written only by the L2 thread
/// (except `available_ports_mask`, fixed before the thread starts).
#[derive(Debug, Default)]
struct Shared {
    available_ports_mask: AtomicU8,
    enabled_port_mask: AtomicU8,
    netif_up: AtomicBool,
    metrics: L2Metrics,
}

/// Cloneable entry point for everything that feeds the L2 thread.
///
/// Device drivers get one at `init` time for RX and link reports; the upper
/// layer uses it for `tx`/`link_output`.
#[derive(Clone)]
pub struct L2Handle {
    data_tx: Sender<L2Event>,
    control_tx: Sender<L2Event>,
    shared: Arc<Shared>,
    enqueue_timeout: Duration,
}

impl L2Handle {
    /// Queue `frame` for transmission on the enabled subset of `port_mask`.
    ///
    /// The frame is consumed either way: on error it has already been dropped.
    pub fn tx(&self, frame: Vec<u8>, port_mask: u8) -> Result<(), L2Error> {
        let port_mask = port_mask & self.shared.enabled_port_mask.load(Ordering::Acquire);
        match self
            .data_tx
            .send_timeout(L2Event::Tx { port_mask, frame }, self.enqueue_timeout)
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                self.shared.metrics.queue_drops.fetch_add(1, Ordering::Relaxed);
                log::debug!("[L2] tx queue full, dropping frame");
                Err(L2Error::NoMem)
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(L2Error::QueueClosed),
        }
    }

    /// Driver RX entry point. Copies `payload`; never blocks.
    pub fn rx(&self, device: DeviceHandle, payload: &[u8], port_mask: u8) -> Result<(), L2Error> {
        let event = L2Event::Rx {
            device,
            port_mask,
            frame: payload.to_vec(),
        };
        match self.data_tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.shared.metrics.queue_drops.fetch_add(1, Ordering::Relaxed);
                log::debug!("[L2] rx queue full, dropping frame from {}", device);
                Err(L2Error::NoMem)
            }
            Err(TrySendError::Disconnected(_)) => Err(L2Error::QueueClosed),
        }
    }

    /// Upper-layer output hook.
    ///
    /// Floods to every available port unless the application pre-stamped a
    /// 1-based egress port into the destination address. The stamp is cleared
    /// before the frame leaves.
    pub fn link_output(&self, mut frame: Vec<u8>) -> Result<(), L2Error> {
        let mut port_mask = self.available_ports_mask();
        if let Some(port) = frame::take_requested_egress_port(&mut frame) {
            if (1..=ADIN2111_PORT_NUM).contains(&port) {
                port_mask = 1 << (port - 1);
            }
        }
        self.tx(frame, port_mask)
    }

    /// Driver link-change entry point (`port` is device-local).
    pub fn link_change(&self, device: DeviceHandle, port: u8, up: bool) -> Result<(), L2Error> {
        let event = if up {
            L2Event::LinkUp { device, port }
        } else {
            L2Event::LinkDown { device, port }
        };
        self.send_control(event)
    }

    /// Power a device's ports and bring the logical interface up or down.
    pub fn set_netif_power(&self, device: DeviceHandle, on: bool) -> Result<(), L2Error> {
        let event = if on {
            L2Event::SetNetifUp { device }
        } else {
            L2Event::SetNetifDown { device }
        };
        self.send_control(event)
    }

    fn send_control(&self, event: L2Event) -> Result<(), L2Error> {
        match self.control_tx.send_timeout(event, self.enqueue_timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => {
                self.shared.metrics.queue_drops.fetch_add(1, Ordering::Relaxed);
                Err(L2Error::NoMem)
            }
            Err(SendTimeoutError::Disconnected(_)) => Err(L2Error::QueueClosed),
        }
    }

    #[inline]
    pub fn available_ports_mask(&self) -> u8 {
        self.shared.available_ports_mask.load(Ordering::Acquire)
    }

    #[inline]
    pub fn enabled_port_mask(&self) -> u8 {
        self.shared.enabled_port_mask.load(Ordering::Acquire)
    }

    /// Link state of a global port.
    pub fn port_state(&self, port: u8) -> bool {
        1u8.checked_shl(u32::from(port))
            .is_some_and(|bit| self.enabled_port_mask() & bit != 0)
    }

    pub fn netif_is_up(&self) -> bool {
        self.shared.netif_up.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> &L2Metrics {
        &self.shared.metrics
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Public view of a configured device slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    pub handle: DeviceHandle,
    pub kind: NetDeviceKind,
    pub num_ports: u8,
    pub start_port_idx: u8,
}

struct DeviceSlot {
    device: Arc<dyn NetDevice>,
    info: DeviceInfo,
    enabled_ports_mask: u8,
}

/// Owns the `bm-l2` thread.
///
/// # Example
///
/// ```rust,no_run
/// use bristlemouth::config::L2Settings;
/// use bristlemouth::l2::{DeviceConfig, L2Engine};
/// use bristlemouth::sim::{CaptureNetif, MemDevice};
///
/// # fn main() -> Result<(), bristlemouth::L2Error> {
/// let dev = MemDevice::new(0);
/// let netif = CaptureNetif::new();
/// let engine = L2Engine::start(vec![DeviceConfig::new(dev)], netif, None, &L2Settings::default())?;
/// assert_eq!(engine.handle().available_ports_mask(), 0b11);
/// # Ok(())
/// # }
/// ```
pub struct L2Engine {
    handle: L2Handle,
    devices: Vec<DeviceInfo>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl L2Engine {
    /// Initialise every configured device and start the event loop.
    ///
    /// Ports are numbered in configuration order. Devices whose `init` fails
    /// are skipped and contribute no ports.
    pub fn start(
        devices: Vec<DeviceConfig>,
        netif: Arc<dyn NetInterface>,
        link_change_cb: Option<LinkChangeCallback>,
        settings: &L2Settings,
    ) -> Result<Self, L2Error> {
        if devices
            .iter()
            .all(|cfg| cfg.device.kind() == NetDeviceKind::None)
        {
            log::error!("[L2] no supported network device configured");
            return Err(L2Error::NoDevice);
        }

        let (data_tx, data_rx) = channel::bounded(settings.event_queue_len);
        let (control_tx, control_rx) = channel::bounded(settings.event_queue_len);
        let shared = Arc::new(Shared::default());
        let handle = L2Handle {
            data_tx,
            control_tx,
            shared: Arc::clone(&shared),
            enqueue_timeout: settings.enqueue_timeout(),
        };

        let mut slots = Vec::with_capacity(devices.len());
        let mut next_port_idx = 0u8;
        let mut available = 0u8;

        for cfg in devices {
            let kind = cfg.device.kind();
            let dev_handle = cfg.device.handle();
            if kind == NetDeviceKind::None {
                continue;
            }
            if next_port_idx + kind.port_count() > MAX_GLOBAL_PORTS {
                log::error!(
                    "[L2] {} does not fit in the port mask ({} ports already used)",
                    dev_handle,
                    next_port_idx
                );
                continue;
            }

            if let Err(e) = cfg.device.init(handle.clone(), cfg.port_mask) {
                log::error!("[L2] failed to init {}: {}", dev_handle, e);
                continue;
            }

            let info = DeviceInfo {
                handle: dev_handle,
                kind,
                num_ports: kind.port_count(),
                start_port_idx: next_port_idx,
            };
            available |= kind.port_mask() << next_port_idx;
            next_port_idx += kind.port_count();
            log::info!(
                "[L2] {} ({:?}) ports {}..{}",
                dev_handle,
                kind,
                info.start_port_idx,
                next_port_idx
            );

            slots.push(DeviceSlot {
                device: cfg.device,
                info,
                enabled_ports_mask: cfg.port_mask,
            });
        }

        shared.available_ports_mask.store(available, Ordering::Release);

        let device_infos = slots.iter().map(|s| s.info).collect();
        let running = Arc::new(AtomicBool::new(true));
        let dispatcher = Dispatcher {
            slots,
            netif,
            link_change_cb,
            handle: handle.clone(),
        };

        let running_clone = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("bm-l2".to_string())
            .spawn(move || dispatcher.run(data_rx, control_rx, running_clone))
            .map_err(|e| {
                log::error!("[L2] failed to spawn thread: {}", e);
                L2Error::Spawn
            })?;

        Ok(Self {
            handle,
            devices: device_infos,
            running,
            thread: Some(thread),
        })
    }

    /// Producer handle (cheap to clone).
    pub fn handle(&self) -> L2Handle {
        self.handle.clone()
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    /// `(handle, kind, start_port_idx)` for an initialised device slot.
    pub fn device_info(&self, idx: usize) -> Option<DeviceInfo> {
        self.devices.get(idx).copied()
    }

    pub fn metrics(&self) -> &L2Metrics {
        self.handle.metrics()
    }

    /// Stop the event loop and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[L2] bm-l2 thread panicked");
            }
        }
    }
}

impl Drop for L2Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Dispatch (L2 thread only)
// ============================================================================

struct Dispatcher {
    slots: Vec<DeviceSlot>,
    netif: Arc<dyn NetInterface>,
    link_change_cb: Option<LinkChangeCallback>,
    /// Used to re-inject flooded frames.
    handle: L2Handle,
}

impl Dispatcher {
    fn run(self, data_rx: Receiver<L2Event>, control_rx: Receiver<L2Event>, running: Arc<AtomicBool>) {
        log::debug!("[L2] event loop started");

        while running.load(Ordering::Relaxed) {
            // Link and power events jump ahead of queued traffic.
            while let Ok(event) = control_rx.try_recv() {
                self.dispatch(event);
            }

            crossbeam::select! {
                recv(control_rx) -> msg => match msg {
                    Ok(event) => self.dispatch(event),
                    Err(_) => break,
                },
                recv(data_rx) -> msg => match msg {
                    Ok(event) => self.dispatch(event),
                    Err(_) => break,
                },
                default(POLL_INTERVAL) => {}
            }
        }

        log::debug!("[L2] event loop stopped");
    }

    fn dispatch(&self, event: L2Event) {
        match event {
            L2Event::Tx { port_mask, frame } => self.process_tx(port_mask, &frame),
            L2Event::Rx {
                device,
                port_mask,
                frame,
            } => self.process_rx(device, port_mask, frame),
            L2Event::LinkUp { device, port } => self.handle_link_change(device, port, true),
            L2Event::LinkDown { device, port } => self.handle_link_change(device, port, false),
            L2Event::SetNetifUp { device } => {
                self.process_netif_power(device, true);
                self.set_netif(true);
            }
            L2Event::SetNetifDown { device } => {
                self.set_netif(false);
                self.process_netif_power(device, false);
            }
        }
    }

    fn slot(&self, device: DeviceHandle) -> Option<&DeviceSlot> {
        self.slots.iter().find(|slot| slot.info.handle == device)
    }

    fn metrics(&self) -> &L2Metrics {
        &self.handle.shared.metrics
    }

    /// Offer the frame once to every device, each with its slice of the mask.
    fn process_tx(&self, port_mask: u8, frame: &[u8]) {
        let mut mask_idx = 0u8;
        for slot in &self.slots {
            let local_mask = (port_mask >> mask_idx) & slot.info.kind.port_mask();
            mask_idx += slot.info.num_ports;

            if let Err(e) = slot.device.tx(frame, local_mask, slot.info.start_port_idx) {
                log::warn!("[L2] failed to submit TX buffer to {}: {}", slot.info.handle, e);
                self.metrics().tx_device_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.metrics().frames_tx.fetch_add(1, Ordering::Relaxed);
    }

    fn process_rx(&self, device: DeviceHandle, port_mask: u8, mut frame: Vec<u8>) {
        let Some(slot) = self.slot(device) else {
            log::error!("[L2] RX from unknown device {}, dropping", device);
            return;
        };
        self.metrics().frames_rx.fetch_add(1, Ordering::Relaxed);

        let ingress_mask = (port_mask & slot.info.kind.port_mask()) << slot.info.start_port_idx;

        if ingress_mask & !self.handle.enabled_port_mask() != 0 {
            log::warn!(
                "[L2] received on port mask {:#04x} of {} while link is down (enabled {:#04x}), renegotiating",
                ingress_mask,
                device,
                self.handle.enabled_port_mask()
            );
            slot.device.renegotiate(port_mask);
        }

        if !frame::stamp_ingress_port(&mut frame, ingress_mask) {
            log::debug!("[L2] short frame ({} bytes) from {}", frame.len(), device);
        } else if frame::is_global_multicast(&frame) {
            let flood_mask = self.handle.available_ports_mask() & !ingress_mask;
            match self.handle.tx(frame.clone(), flood_mask) {
                Ok(()) => {
                    self.metrics().frames_flooded.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => log::warn!("[L2] failed to flood multicast frame: {}", e),
            }
        }

        if let Err(rejected) = self.netif.input(frame) {
            self.metrics().input_errors.fetch_add(1, Ordering::Relaxed);
            log::debug!("[L2] upper layer rejected {} byte frame", rejected.len());
        }
    }

    fn handle_link_change(&self, device: DeviceHandle, port: u8, up: bool) {
        let Some(slot) = self.slot(device) else {
            log::error!("[L2] link change from unknown device {}", device);
            return;
        };

        let port_idx = slot.info.start_port_idx + port;
        let Some(bit) = 1u8.checked_shl(u32::from(port_idx)) else {
            log::error!("[L2] link change on out-of-range port {}", port_idx);
            return;
        };

        let enabled = &self.handle.shared.enabled_port_mask;
        if up {
            enabled.fetch_or(bit, Ordering::AcqRel);
        } else {
            enabled.fetch_and(!bit, Ordering::AcqRel);
        }
        self.metrics().link_changes.fetch_add(1, Ordering::Relaxed);

        match &self.link_change_cb {
            Some(cb) => cb(port_idx, up),
            None => log::info!("[L2] port{} {}", port_idx, if up { "up" } else { "down" }),
        }
    }

    fn process_netif_power(&self, device: DeviceHandle, on: bool) {
        let Some(slot) = self.slot(device) else {
            log::error!("[L2] power request for unknown device {}", device);
            return;
        };

        let state = if on { "on" } else { "off" };
        match slot.device.set_power(on, slot.enabled_ports_mask) {
            Ok(()) => log::info!("[L2] powered {} {}", device, state),
            Err(DeviceError::Unsupported) => {}
            Err(e) => log::warn!("[L2] failed to power {} {}: {}", device, state, e),
        }
    }

    fn set_netif(&self, up: bool) {
        self.handle.shared.netif_up.store(up, Ordering::Release);
        self.netif.set_up(up);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{CaptureNetif, MemDevice};
    use parking_lot::Mutex;
    use std::time::Instant;

    const WAIT: Duration = Duration::from_secs(2);

    fn multicast_frame(len: usize) -> Vec<u8> {
        let mut f = vec![0u8; len];
        f[38] = 0xFF;
        f[39] = 0x03;
        f
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn start_two(
        netif: Arc<CaptureNetif>,
    ) -> Result<(L2Engine, Arc<MemDevice>, Arc<MemDevice>), String> {
        let d0 = MemDevice::new(0);
        let d1 = MemDevice::new(1);
        let engine = L2Engine::start(
            vec![DeviceConfig::new(d0.clone()), DeviceConfig::new(d1.clone())],
            netif,
            None,
            &L2Settings::default(),
        )
        .map_err(|e| e.to_string())?;
        Ok((engine, d0, d1))
    }

    fn all_links_up(d0: &MemDevice, d1: &MemDevice, handle: &L2Handle) -> bool {
        for port in 0..2 {
            if d0.inject_link(port, true).is_err() || d1.inject_link(port, true).is_err() {
                return false;
            }
        }
        wait_until(|| handle.enabled_port_mask() == 0b1111)
    }

    #[test]
    fn test_no_device_is_enodev() {
        let none = MemDevice::with_kind(9, NetDeviceKind::None);
        let result = L2Engine::start(
            vec![DeviceConfig::new(none)],
            CaptureNetif::new(),
            None,
            &L2Settings::default(),
        );
        assert_eq!(result.err(), Some(L2Error::NoDevice));
    }

    #[test]
    fn test_port_accounting_two_devices() -> Result<(), String> {
        let (engine, _d0, _d1) = start_two(CaptureNetif::new())?;
        let handle = engine.handle();

        assert_eq!(handle.available_ports_mask(), 0b1111);
        assert_eq!(engine.num_devices(), 2);
        assert_eq!(engine.device_info(0).map(|d| d.start_port_idx), Some(0));
        assert_eq!(engine.device_info(1).map(|d| d.start_port_idx), Some(2));
        assert_eq!(engine.device_info(2), None);
        // Links start down
        assert_eq!(handle.enabled_port_mask(), 0);
        Ok(())
    }

    #[test]
    fn test_failed_init_contributes_no_ports() -> Result<(), String> {
        let bad = MemDevice::failing_init(0);
        let good = MemDevice::new(1);
        let engine = L2Engine::start(
            vec![DeviceConfig::new(bad), DeviceConfig::new(good)],
            CaptureNetif::new(),
            None,
            &L2Settings::default(),
        )
        .map_err(|e| e.to_string())?;

        assert_eq!(engine.handle().available_ports_mask(), 0b0011);
        assert_eq!(engine.num_devices(), 1);
        Ok(())
    }

    #[test]
    fn test_link_change_updates_mask_and_calls_back() -> Result<(), String> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let d0 = MemDevice::new(0);
        let d1 = MemDevice::new(1);
        let engine = L2Engine::start(
            vec![DeviceConfig::new(d0.clone()), DeviceConfig::new(d1.clone())],
            CaptureNetif::new(),
            Some(Box::new(move |port, up| seen_clone.lock().push((port, up)))),
            &L2Settings::default(),
        )
        .map_err(|e| e.to_string())?;
        let handle = engine.handle();

        d1.inject_link(1, true).map_err(|e| e.to_string())?;
        assert!(wait_until(|| handle.port_state(3)));
        assert_eq!(handle.enabled_port_mask(), 0b1000);

        d1.inject_link(1, false).map_err(|e| e.to_string())?;
        assert!(wait_until(|| !handle.port_state(3)));

        assert!(wait_until(|| seen.lock().len() == 2));
        assert_eq!(*seen.lock(), vec![(3, true), (3, false)]);
        Ok(())
    }

    #[test]
    fn test_tx_splits_mask_per_device() -> Result<(), String> {
        let (engine, d0, d1) = start_two(CaptureNetif::new())?;
        let handle = engine.handle();
        assert!(all_links_up(&d0, &d1, &handle));

        handle.tx(vec![1, 2, 3], 0b0110).map_err(|e| e.to_string())?;
        assert!(d0.wait_for_sent(1, WAIT));
        assert!(d1.wait_for_sent(1, WAIT));

        let s0 = d0.sent();
        let s1 = d1.sent();
        assert_eq!(s0[0].port_mask, 0b10);
        assert_eq!(s0[0].port_offset, 0);
        assert_eq!(s1[0].port_mask, 0b01);
        assert_eq!(s1[0].port_offset, 2);
        assert_eq!(s0[0].frame, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_tx_masks_disabled_ports() -> Result<(), String> {
        let (engine, d0, _d1) = start_two(CaptureNetif::new())?;
        let handle = engine.handle();

        d0.inject_link(0, true).map_err(|e| e.to_string())?;
        assert!(wait_until(|| handle.enabled_port_mask() == 0b0001));

        handle.tx(vec![0xAA], 0b1111).map_err(|e| e.to_string())?;
        assert!(d0.wait_for_sent(1, WAIT));
        assert_eq!(d0.sent()[0].port_mask, 0b01);
        Ok(())
    }

    #[test]
    fn test_device_tx_failure_does_not_block_others() -> Result<(), String> {
        let (engine, d0, d1) = start_two(CaptureNetif::new())?;
        let handle = engine.handle();
        assert!(all_links_up(&d0, &d1, &handle));

        d0.set_fail_tx(true);
        handle.tx(vec![7; 10], 0b1111).map_err(|e| e.to_string())?;
        assert!(d1.wait_for_sent(1, WAIT));
        assert!(wait_until(|| engine.metrics().snapshot().3 == 1));
        Ok(())
    }

    #[test]
    fn test_rx_stamps_ingress_and_delivers() -> Result<(), String> {
        let netif = CaptureNetif::new();
        let (engine, d0, d1) = start_two(Arc::clone(&netif))?;
        let handle = engine.handle();
        assert!(all_links_up(&d0, &d1, &handle));

        // Unicast on device 1 local port 0 -> global ingress 0b0100
        d1.inject_rx(&vec![0u8; 60], 0b01).map_err(|e| e.to_string())?;
        assert!(netif.wait_for(1, WAIT));

        let frames = netif.frames();
        assert_eq!(frame::ingress_port(&frames[0]), Some(0b0100));
        // Unicast: never flooded
        thread::sleep(Duration::from_millis(20));
        assert!(d0.sent().is_empty());
        Ok(())
    }

    #[test]
    fn test_multicast_flood_never_bounces() -> Result<(), String> {
        let netif = CaptureNetif::new();
        let (engine, d0, d1) = start_two(Arc::clone(&netif))?;
        let handle = engine.handle();
        assert!(all_links_up(&d0, &d1, &handle));

        // Device 0, local port 1 -> ingress 0b0010, flood 0b1101
        d0.inject_rx(&multicast_frame(64), 0b10).map_err(|e| e.to_string())?;
        assert!(netif.wait_for(1, WAIT));
        assert!(d0.wait_for_sent(1, WAIT));
        assert!(d1.wait_for_sent(1, WAIT));

        assert_eq!(d0.sent()[0].port_mask, 0b01);
        assert_eq!(d1.sent()[0].port_mask, 0b11);
        assert_eq!(frame::ingress_port(&d1.sent()[0].frame), Some(0b0010));
        assert_eq!(engine.metrics().snapshot().2, 1);
        Ok(())
    }

    #[test]
    fn test_rejected_input_is_counted() -> Result<(), String> {
        let netif = CaptureNetif::new();
        netif.set_reject(true);
        let (engine, d0, d1) = start_two(Arc::clone(&netif))?;
        assert!(all_links_up(&d0, &d1, &engine.handle()));

        d0.inject_rx(&[0u8; 60], 0b01).map_err(|e| e.to_string())?;
        assert!(wait_until(|| engine.metrics().snapshot().4 == 1));
        assert!(netif.frames().is_empty());
        Ok(())
    }

    #[test]
    fn test_rx_on_disabled_port_renegotiates() -> Result<(), String> {
        let netif = CaptureNetif::new();
        let (_engine, d0, _d1) = start_two(Arc::clone(&netif))?;

        d0.inject_rx(&[0u8; 60], 0b10).map_err(|e| e.to_string())?;
        assert!(netif.wait_for(1, WAIT));
        assert_eq!(d0.renegotiations(), vec![0b10]);
        Ok(())
    }

    #[test]
    fn test_link_output_default_floods_available() -> Result<(), String> {
        let (engine, d0, d1) = start_two(CaptureNetif::new())?;
        let handle = engine.handle();
        assert!(all_links_up(&d0, &d1, &handle));

        handle.link_output(vec![0u8; 60]).map_err(|e| e.to_string())?;
        assert!(d0.wait_for_sent(1, WAIT));
        assert!(d1.wait_for_sent(1, WAIT));
        assert_eq!(d0.sent()[0].port_mask, 0b11);
        assert_eq!(d1.sent()[0].port_mask, 0b11);
        Ok(())
    }

    #[test]
    fn test_link_output_honours_and_clears_egress_port() -> Result<(), String> {
        let (engine, d0, d1) = start_two(CaptureNetif::new())?;
        let handle = engine.handle();
        assert!(all_links_up(&d0, &d1, &handle));

        let mut f = vec![0u8; 60];
        assert!(frame::request_egress_port(&mut f, 2));
        handle.link_output(f).map_err(|e| e.to_string())?;

        assert!(d0.wait_for_sent(1, WAIT));
        let sent = d0.sent();
        assert_eq!(sent[0].port_mask, 0b10);
        assert_eq!(sent[0].frame[frame::DST_EGRESS_PORT_OFFSET], 0);
        assert!(d1.wait_for_sent(1, WAIT));
        assert_eq!(d1.sent()[0].port_mask, 0);
        Ok(())
    }

    #[test]
    fn test_out_of_range_egress_port_floods() -> Result<(), String> {
        let (engine, d0, d1) = start_two(CaptureNetif::new())?;
        let handle = engine.handle();
        assert!(all_links_up(&d0, &d1, &handle));

        let mut f = vec![0u8; 60];
        frame::request_egress_port(&mut f, 9);
        handle.link_output(f).map_err(|e| e.to_string())?;
        assert!(d1.wait_for_sent(1, WAIT));
        assert_eq!(d1.sent()[0].port_mask, 0b11);
        assert_eq!(d1.sent()[0].frame[frame::DST_EGRESS_PORT_OFFSET], 0);
        Ok(())
    }

    #[test]
    fn test_netif_power_brackets_interface_state() -> Result<(), String> {
        let netif = CaptureNetif::new();
        let d0 = MemDevice::with_power_control(0);
        let engine = L2Engine::start(
            vec![DeviceConfig::new(d0.clone())],
            Arc::clone(&netif) as Arc<dyn NetInterface>,
            None,
            &L2Settings::default(),
        )
        .map_err(|e| e.to_string())?;
        let handle = engine.handle();

        handle
            .set_netif_power(DeviceHandle(0), true)
            .map_err(|e| e.to_string())?;
        assert!(wait_until(|| handle.netif_is_up()));
        assert!(netif.is_up());

        handle
            .set_netif_power(DeviceHandle(0), false)
            .map_err(|e| e.to_string())?;
        assert!(wait_until(|| !handle.netif_is_up()));
        assert_eq!(d0.power_calls(), vec![(true, 0b11), (false, 0b11)]);
        Ok(())
    }

    #[test]
    fn test_rx_queue_full_is_enomem() -> Result<(), String> {
        let d0 = MemDevice::new(0);
        let settings = L2Settings {
            event_queue_len: 1,
            enqueue_timeout_ms: 1,
        };
        let netif = CaptureNetif::new();
        netif.block(true);
        let engine = L2Engine::start(
            vec![DeviceConfig::new(d0.clone())],
            Arc::clone(&netif) as Arc<dyn NetInterface>,
            None,
            &settings,
        )
        .map_err(|e| e.to_string())?;

        // First frame parks the L2 thread inside the blocked netif, the
        // second fills the queue, the third must fail fast.
        let mut results = Vec::new();
        for _ in 0..8 {
            results.push(d0.inject_rx(&[0u8; 60], 0b01));
        }
        assert!(results.contains(&Err(L2Error::NoMem)));
        assert!(engine.metrics().snapshot().5 >= 1);
        netif.block(false);
        Ok(())
    }
}
