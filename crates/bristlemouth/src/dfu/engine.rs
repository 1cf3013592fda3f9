// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DFU thread and producer handle.

use super::machine::{DfuContext, DfuCore, DfuShared, DfuState};
use super::error::{DfuErr, DfuError};
use super::event::DfuEvent;
use super::messages::{DfuFrame, DfuMessage, ImageInfo};
use crate::config::DfuSettings;
use crate::NodeId;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest the DFU thread sleeps before re-checking the running flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Producer side of the DFU event queue (cheap to clone).
#[derive(Clone)]
pub struct DfuHandle {
    node_id: NodeId,
    max_chunk_size: u16,
    tx: Sender<DfuEvent>,
    shared: Arc<DfuShared>,
}

impl DfuHandle {
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Current state as last published by the DFU thread.
    pub fn state(&self) -> DfuState {
        self.shared.state()
    }

    /// Route an inbound DFU frame to the state machine.
    ///
    /// Frames for other nodes, and frames from anyone but the peer of an
    /// active update, are dropped silently.
    pub fn process_message(&self, wire: &[u8]) -> Result<(), DfuError> {
        let frame = DfuFrame::decode(wire).inspect_err(|e| {
            log::debug!("[DFU] dropping frame: {}", e);
        })?;

        let addr = frame.addr;
        if addr.dst_node_id != self.node_id {
            log::trace!("[DFU] frame for {:016x}, not us", addr.dst_node_id);
            return Ok(());
        }

        let state = self.shared.state();
        if (state.is_client() || state.is_host()) && addr.src_node_id != self.shared.peer_node_id() {
            log::debug!(
                "[DFU] ignoring frame from {:016x} while in {}",
                addr.src_node_id,
                state
            );
            return Ok(());
        }

        let event = match frame.msg {
            DfuMessage::Start(info) => DfuEvent::ReceivedUpdateRequest { addr, info },
            DfuMessage::PayloadReq { seq_num } => DfuEvent::ChunkRequest { seq_num },
            DfuMessage::Payload(data) => DfuEvent::ImageChunk { data },
            DfuMessage::End(result) => DfuEvent::UpdateEnd(result),
            DfuMessage::Ack(result) => DfuEvent::AckReceived(result),
            DfuMessage::Abort(_) => DfuEvent::AbortReceived,
            DfuMessage::Heartbeat => DfuEvent::Heartbeat,
            DfuMessage::RebootReq => DfuEvent::RebootRequest,
            DfuMessage::Reboot => DfuEvent::Reboot,
            DfuMessage::BootComplete => DfuEvent::BootComplete,
        };
        self.enqueue(event)
    }

    /// Start pushing the image described by `info` to `client_node_id`.
    ///
    /// `finish_cb` runs once on the DFU thread with the outcome. If the
    /// machine is busy it runs immediately with `DfuErr::InProgress`. On any
    /// other error it is dropped unused. `timeout` bounds the whole update.
    pub fn initiate_update<F>(
        &self,
        info: ImageInfo,
        client_node_id: NodeId,
        finish_cb: F,
        timeout: Duration,
    ) -> Result<(), DfuError>
    where
        F: FnOnce(bool, DfuErr, NodeId) + Send + 'static,
    {
        if info.chunk_size > self.max_chunk_size {
            log::warn!(
                "[DFU] chunk size {} above the {} byte limit",
                info.chunk_size,
                self.max_chunk_size
            );
            return Err(DfuError::ChunkTooLarge(info.chunk_size));
        }
        if self.state() != DfuState::Idle {
            finish_cb(false, DfuErr::InProgress, client_node_id);
            return Err(DfuError::InProgress);
        }

        self.enqueue(DfuEvent::BeginHost {
            info,
            client_node_id,
            finish_cb: Box::new(finish_cb),
            timeout,
        })
    }

    /// Cancel the active update.
    pub fn abort(&self) -> Result<(), DfuError> {
        self.enqueue(DfuEvent::AbortReceived)
    }

    fn enqueue(&self, event: DfuEvent) -> Result<(), DfuError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(event) => {
                log::warn!("[DFU] event queue full, dropping {:?}", event);
                DfuError::QueueFull
            }
            TrySendError::Disconnected(_) => DfuError::Stopped,
        })
    }
}

/// Owns the `bm-dfu` thread.
///
/// # Example
///
/// ```rust,no_run
/// use bristlemouth::config::DfuSettings;
/// use bristlemouth::dfu::{DfuContext, DfuEngine};
/// use bristlemouth::sim::{CaptureDfuTransport, MemPartition, MemPlatform, MemRebootStore};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let ctx = DfuContext {
///     transport: CaptureDfuTransport::new(),
///     image: MemPartition::new(64 * 1024),
///     slot: MemPartition::new(64 * 1024),
///     reboot_store: MemRebootStore::new(),
///     platform: MemPlatform::new(0x1234_5678),
/// };
/// let engine = DfuEngine::start(0x1, &DfuSettings::default(), ctx)?;
/// println!("DFU is {}", engine.state());
/// # Ok(())
/// # }
/// ```
pub struct DfuEngine {
    handle: DfuHandle,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DfuEngine {
    /// Build the state machine and start its thread.
    ///
    /// The thread delivers `InitSuccess` first, so a node that rebooted
    /// mid-update resumes in `ClientRebootDone`.
    pub fn start(
        node_id: NodeId,
        settings: &DfuSettings,
        ctx: DfuContext,
    ) -> Result<Self, DfuError> {
        let core = DfuCore::new(node_id, settings.clone(), ctx);
        let (tx, rx) = channel::bounded(settings.event_queue_len);
        let handle = DfuHandle {
            node_id,
            max_chunk_size: settings.max_chunk_size,
            tx,
            shared: core.shared(),
        };

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("bm-dfu".to_string())
            .spawn(move || run(core, rx, running_clone))
            .map_err(|e| {
                log::error!("[DFU] failed to spawn thread: {}", e);
                DfuError::Spawn
            })?;

        Ok(Self {
            handle,
            running,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> DfuHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> DfuState {
        self.handle.state()
    }

    /// Stop the DFU thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[DFU] bm-dfu thread panicked");
            }
        }
    }
}

impl Drop for DfuEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(mut core: DfuCore, rx: Receiver<DfuEvent>, running: Arc<AtomicBool>) {
    core.handle_event(DfuEvent::InitSuccess);

    while running.load(Ordering::Relaxed) {
        let now = Instant::now();
        if let Some(timer) = core.timers_mut().take_expired(now) {
            log::debug!("[DFU] {:?} timer expired", timer);
            core.handle_event(timer.event());
            continue;
        }

        let poll_until = now + POLL_INTERVAL;
        let deadline = core
            .timers()
            .next_deadline()
            .map_or(poll_until, |d| d.min(poll_until));
        match rx.recv_deadline(deadline) {
            Ok(event) => core.handle_event(event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    log::debug!("[DFU] thread exiting in {}", core.state());
}
