// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::l2::{DeviceError, DeviceHandle, L2Error, L2Handle, NetDevice, NetDeviceKind};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// One call to [`NetDevice::tx`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub frame: Vec<u8>,
    pub port_mask: u8,
    pub port_offset: u8,
}

struct WireEnd {
    peer: Weak<MemDevice>,
    peer_port: u8,
}

/// Simulated two-port switch.
///
/// Records every transmitted frame. Ports can be wired to a port of another
/// `MemDevice`, in which case transmitted frames arrive as RX on the peer.
pub struct MemDevice {
    handle: DeviceHandle,
    kind: NetDeviceKind,
    fail_init: bool,
    power_control: bool,
    sink: Mutex<Option<L2Handle>>,
    sent: Mutex<Vec<SentFrame>>,
    sent_cv: Condvar,
    fail_tx: AtomicBool,
    renegotiations: Mutex<Vec<u8>>,
    power_calls: Mutex<Vec<(bool, u8)>>,
    wires: Mutex<[Option<WireEnd>; 2]>,
}

impl MemDevice {
    pub fn new(id: u32) -> Arc<Self> {
        Arc::new(Self::build(id, NetDeviceKind::Adin2111, false, false))
    }

    pub fn with_kind(id: u32, kind: NetDeviceKind) -> Arc<Self> {
        Arc::new(Self::build(id, kind, false, false))
    }

    /// Device whose `init` always fails.
    pub fn failing_init(id: u32) -> Arc<Self> {
        Arc::new(Self::build(id, NetDeviceKind::Adin2111, true, false))
    }

    /// Device that implements `set_power`.
    pub fn with_power_control(id: u32) -> Arc<Self> {
        Arc::new(Self::build(id, NetDeviceKind::Adin2111, false, true))
    }

    fn build(id: u32, kind: NetDeviceKind, fail_init: bool, power_control: bool) -> Self {
        Self {
            handle: DeviceHandle(id),
            kind,
            fail_init,
            power_control,
            sink: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            sent_cv: Condvar::new(),
            fail_tx: AtomicBool::new(false),
            renegotiations: Mutex::new(Vec::new()),
            power_calls: Mutex::new(Vec::new()),
            wires: Mutex::new([None, None]),
        }
    }

    fn sink(&self) -> Result<L2Handle, L2Error> {
        self.sink.lock().clone().ok_or(L2Error::NoDevice)
    }

    /// Deliver `frame` as if it arrived on the ports in `port_mask`.
    pub fn inject_rx(&self, frame: &[u8], port_mask: u8) -> Result<(), L2Error> {
        self.sink()?.rx(self.handle, frame, port_mask)
    }

    /// Report a link change on device-local `port`.
    pub fn inject_link(&self, port: u8, up: bool) -> Result<(), L2Error> {
        self.sink()?.link_change(self.handle, port, up)
    }

    /// Wire `a_port` of `a` to `b_port` of `b` and bring both links up.
    ///
    /// Both devices must already be initialised by their engines.
    pub fn connect(a: &Arc<Self>, a_port: u8, b: &Arc<Self>, b_port: u8) -> Result<(), L2Error> {
        if a_port > 1 || b_port > 1 {
            return Err(L2Error::NoDevice);
        }
        a.wires.lock()[a_port as usize] = Some(WireEnd {
            peer: Arc::downgrade(b),
            peer_port: b_port,
        });
        b.wires.lock()[b_port as usize] = Some(WireEnd {
            peer: Arc::downgrade(a),
            peer_port: a_port,
        });
        a.inject_link(a_port, true)?;
        b.inject_link(b_port, true)
    }

    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent.lock().clone()
    }

    /// Wait until at least `n` frames were transmitted.
    pub fn wait_for_sent(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut sent = self.sent.lock();
        while sent.len() < n {
            if self.sent_cv.wait_until(&mut sent, deadline).timed_out() {
                return sent.len() >= n;
            }
        }
        true
    }

    pub fn set_fail_tx(&self, fail: bool) {
        self.fail_tx.store(fail, Ordering::Relaxed);
    }

    /// Port masks passed to `renegotiate`.
    pub fn renegotiations(&self) -> Vec<u8> {
        self.renegotiations.lock().clone()
    }

    /// `(on, port_mask)` of every `set_power` call.
    pub fn power_calls(&self) -> Vec<(bool, u8)> {
        self.power_calls.lock().clone()
    }

    fn forward_over_wires(&self, frame: &[u8], port_mask: u8) {
        let targets: Vec<(Arc<MemDevice>, u8)> = {
            let wires = self.wires.lock();
            (0..2u8)
                .filter(|port| port_mask & (1 << port) != 0)
                .filter_map(|port| wires[port as usize].as_ref())
                .filter_map(|end| end.peer.upgrade().map(|peer| (peer, end.peer_port)))
                .collect()
        };
        for (peer, peer_port) in targets {
            if let Err(e) = peer.inject_rx(frame, 1 << peer_port) {
                log::debug!("[SIM] {} -> {} dropped: {}", self.handle, peer.handle, e);
            }
        }
    }
}

impl NetDevice for MemDevice {
    fn kind(&self) -> NetDeviceKind {
        self.kind
    }

    fn handle(&self) -> DeviceHandle {
        self.handle
    }

    fn init(&self, sink: L2Handle, _port_mask: u8) -> Result<(), DeviceError> {
        if self.fail_init {
            return Err(DeviceError::InitFailed(format!("{} refused init", self.handle)));
        }
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn tx(&self, frame: &[u8], port_mask: u8, port_offset: u8) -> Result<(), DeviceError> {
        if self.fail_tx.load(Ordering::Relaxed) {
            return Err(DeviceError::TxFailed(format!("{} tx disabled", self.handle)));
        }
        self.sent.lock().push(SentFrame {
            frame: frame.to_vec(),
            port_mask,
            port_offset,
        });
        self.sent_cv.notify_all();
        self.forward_over_wires(frame, port_mask);
        Ok(())
    }

    fn set_power(&self, on: bool, port_mask: u8) -> Result<(), DeviceError> {
        if !self.power_control {
            return Err(DeviceError::Unsupported);
        }
        self.power_calls.lock().push((on, port_mask));
        Ok(())
    }

    fn renegotiate(&self, port_mask: u8) {
        self.renegotiations.lock().push(port_mask);
    }
}
