// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::dfu::{
    DfuError, DfuFrame, DfuHandle, DfuTransport, FlashError, FlashPartition, Platform, RebootInfo,
    RebootStore,
};
use crate::pubsub::{Bus, PubSubCallback, PubSubError};
use crate::NodeId;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Topic DFU frames travel on when carried over the bus.
pub const DFU_TOPIC: &str = "bcmp/dfu";

// ============================================================================
// Flash
// ============================================================================

/// RAM-backed flash partition. Erased bytes read as `0xFF`.
pub struct MemPartition {
    data: Mutex<Vec<u8>>,
    fail_read: AtomicBool,
    fail_write: AtomicBool,
    fail_erase: AtomicBool,
}

impl MemPartition {
    pub fn new(size: u32) -> Arc<Self> {
        Self::with_data(vec![0xFF; size as usize])
    }

    /// Partition pre-loaded with `data` (its length is the partition size).
    pub fn with_data(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
            fail_read: AtomicBool::new(false),
            fail_write: AtomicBool::new(false),
            fail_erase: AtomicBool::new(false),
        })
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn set_fail_read(&self, fail: bool) {
        self.fail_read.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_write(&self, fail: bool) {
        self.fail_write.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_erase(&self, fail: bool) {
        self.fail_erase.store(fail, Ordering::Relaxed);
    }

    fn range(&self, len_total: usize, offset: u32, len: usize) -> Result<std::ops::Range<usize>, FlashError> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= len_total => Ok(start..end),
            _ => Err(FlashError::OutOfBounds { offset, len }),
        }
    }
}

impl FlashPartition for MemPartition {
    fn size(&self) -> u32 {
        self.data.lock().len() as u32
    }

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        if self.fail_read.load(Ordering::Relaxed) {
            return Err(FlashError::Device);
        }
        let data = self.data.lock();
        let range = self.range(data.len(), offset, buf.len())?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }

    fn write(&self, offset: u32, bytes: &[u8]) -> Result<(), FlashError> {
        if self.fail_write.load(Ordering::Relaxed) {
            return Err(FlashError::Device);
        }
        let mut data = self.data.lock();
        let range = self.range(data.len(), offset, bytes.len())?;
        data[range].copy_from_slice(bytes);
        Ok(())
    }

    fn erase(&self, offset: u32, len: u32) -> Result<(), FlashError> {
        if self.fail_erase.load(Ordering::Relaxed) {
            return Err(FlashError::Device);
        }
        let mut data = self.data.lock();
        let range = self.range(data.len(), offset, len as usize)?;
        data[range].fill(0xFF);
        Ok(())
    }
}

// ============================================================================
// Reboot survival
// ============================================================================

/// Reboot info that survives dropping and restarting a `DfuEngine`.
#[derive(Default)]
pub struct MemRebootStore {
    info: Mutex<RebootInfo>,
}

impl MemRebootStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl RebootStore for MemRebootStore {
    fn load(&self) -> RebootInfo {
        *self.info.lock()
    }

    fn store(&self, info: RebootInfo) {
        *self.info.lock() = info;
    }
}

/// Bootloader stand-in. Resets are only counted; the caller decides when to
/// "reboot" by restarting the DFU engine with a new `git_sha`.
pub struct MemPlatform {
    git_sha: AtomicU32,
    pending_resets: AtomicUsize,
    confirmations: AtomicUsize,
    reverts: AtomicUsize,
    confirm_enabled: AtomicBool,
    confirm_resets: AtomicUsize,
    reset_cv: Condvar,
    reset_lock: Mutex<()>,
}

impl MemPlatform {
    pub fn new(git_sha: u32) -> Arc<Self> {
        Arc::new(Self {
            git_sha: AtomicU32::new(git_sha),
            pending_resets: AtomicUsize::new(0),
            confirmations: AtomicUsize::new(0),
            reverts: AtomicUsize::new(0),
            confirm_enabled: AtomicBool::new(true),
            confirm_resets: AtomicUsize::new(0),
            reset_cv: Condvar::new(),
            reset_lock: Mutex::new(()),
        })
    }

    /// Simulate booting a different firmware.
    pub fn set_git_sha(&self, git_sha: u32) {
        self.git_sha.store(git_sha, Ordering::Release);
    }

    pub fn pending_resets(&self) -> usize {
        self.pending_resets.load(Ordering::Acquire)
    }

    pub fn confirmations(&self) -> usize {
        self.confirmations.load(Ordering::Acquire)
    }

    pub fn reverts(&self) -> usize {
        self.reverts.load(Ordering::Acquire)
    }

    /// Resets caused by re-enabling confirmation after a forced confirm.
    pub fn confirm_resets(&self) -> usize {
        self.confirm_resets.load(Ordering::Acquire)
    }

    /// Wait until `set_pending_and_reset` has been called at least once.
    pub fn wait_for_reset(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.reset_lock.lock();
        while self.pending_resets() == 0 {
            if self.reset_cv.wait_until(&mut guard, deadline).timed_out() {
                return self.pending_resets() > 0;
            }
        }
        true
    }
}

impl Platform for MemPlatform {
    fn git_sha(&self) -> u32 {
        self.git_sha.load(Ordering::Acquire)
    }

    fn set_pending_and_reset(&self) {
        let _guard = self.reset_lock.lock();
        self.pending_resets.fetch_add(1, Ordering::AcqRel);
        self.reset_cv.notify_all();
    }

    fn confirm_update(&self) {
        self.confirmations.fetch_add(1, Ordering::AcqRel);
    }

    fn fail_update_and_reset(&self) {
        self.reverts.fetch_add(1, Ordering::AcqRel);
    }

    fn confirm_enabled(&self) -> bool {
        self.confirm_enabled.load(Ordering::Acquire)
    }

    fn set_confirm_enabled(&self, enabled: bool) {
        let was = self.confirm_enabled.swap(enabled, Ordering::AcqRel);
        if enabled && !was {
            self.confirm_resets.fetch_add(1, Ordering::AcqRel);
        }
    }
}

// ============================================================================
// Transports
// ============================================================================

/// Records outgoing DFU frames instead of sending them.
#[derive(Default)]
pub struct CaptureDfuTransport {
    frames: Mutex<Vec<Vec<u8>>>,
    fail: AtomicBool,
}

impl CaptureDfuTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Decoded frames, oldest first.
    pub fn frames(&self) -> Vec<DfuFrame> {
        self.frames
            .lock()
            .iter()
            .filter_map(|wire| DfuFrame::decode(wire).ok())
            .collect()
    }

    /// Remove and return every recorded frame.
    pub fn take(&self) -> Vec<DfuFrame> {
        std::mem::take(&mut *self.frames.lock())
            .iter()
            .filter_map(|wire| DfuFrame::decode(wire).ok())
            .collect()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }
}

impl DfuTransport for CaptureDfuTransport {
    fn send(&self, frame: Vec<u8>) -> Result<(), DfuError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(DfuError::Transport("capture transport disabled".into()));
        }
        self.frames.lock().push(frame);
        Ok(())
    }
}

/// Publishes DFU frames on [`DFU_TOPIC`].
pub struct BusDfuTransport {
    bus: Arc<Bus>,
}

impl BusDfuTransport {
    pub fn new(bus: Arc<Bus>) -> Arc<Self> {
        Arc::new(Self { bus })
    }
}

impl DfuTransport for BusDfuTransport {
    fn send(&self, frame: Vec<u8>) -> Result<(), DfuError> {
        self.bus
            .publish(DFU_TOPIC, &frame, 0, 0)
            .map_err(|e| DfuError::Transport(e.to_string()))
    }
}

/// Feed frames published on [`DFU_TOPIC`] into `dfu`.
///
/// Returns the subscription so the caller can unsubscribe later.
pub fn attach_dfu(bus: &Arc<Bus>, dfu: DfuHandle) -> Result<PubSubCallback, PubSubError> {
    let cb: PubSubCallback = Arc::new(
        move |_src: NodeId, _topic: &str, data: &[u8], _ty: u8, _ver: u8| {
            // Undecodable frames are already logged by the handle.
            let _ = dfu.process_message(data);
        },
    );
    bus.subscribe(DFU_TOPIC, cb.clone())?;
    Ok(cb)
}
