// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::l2::frame::{
    ETH_HEADER_LEN, GLOBAL_MULTICAST_PREFIX, IPV6_DST_ADDR_OFFSET, IPV6_SRC_ADDR_OFFSET,
    MIN_FRAME_LEN,
};
use crate::l2::{L2Handle, NetInterface};
use crate::pubsub::{Bus, PubSubError, Transport};
use crate::NodeId;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// The node id sits in the interface-identifier half of the source address.
const SRC_NODE_ID_OFFSET: usize = ETH_HEADER_LEN + IPV6_SRC_ADDR_OFFSET + 8;
const DST_ADDR_OFFSET: usize = ETH_HEADER_LEN + IPV6_DST_ADDR_OFFSET;

// ============================================================================
// CaptureNetif
// ============================================================================

/// Upper layer that just records what L2 hands it.
#[derive(Default)]
pub struct CaptureNetif {
    frames: Mutex<Vec<Vec<u8>>>,
    frames_cv: Condvar,
    reject: AtomicBool,
    up: AtomicBool,
    blocked: Mutex<bool>,
    blocked_cv: Condvar,
}

impl CaptureNetif {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    /// Wait until at least `n` frames were delivered.
    pub fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut frames = self.frames.lock();
        while frames.len() < n {
            if self.frames_cv.wait_until(&mut frames, deadline).timed_out() {
                return frames.len() >= n;
            }
        }
        true
    }

    /// Hand every frame back to L2 instead of accepting it.
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::Relaxed);
    }

    /// While blocked, `input` does not return.
    pub fn block(&self, block: bool) {
        *self.blocked.lock() = block;
        self.blocked_cv.notify_all();
    }

    pub fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }
}

impl NetInterface for CaptureNetif {
    fn input(&self, frame: Vec<u8>) -> Result<(), Vec<u8>> {
        {
            let mut blocked = self.blocked.lock();
            while *blocked {
                self.blocked_cv.wait(&mut blocked);
            }
        }
        if self.reject.load(Ordering::Relaxed) {
            return Err(frame);
        }
        self.frames.lock().push(frame);
        self.frames_cv.notify_all();
        Ok(())
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Release);
    }
}

// ============================================================================
// Pub/sub over L2
// ============================================================================

/// Build a global-multicast frame carrying `payload` from `node_id`.
fn encapsulate(node_id: NodeId, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; MIN_FRAME_LEN + payload.len()];
    // IPv6 ethertype and version
    frame[12] = 0x86;
    frame[13] = 0xDD;
    frame[ETH_HEADER_LEN] = 0x60;
    frame[SRC_NODE_ID_OFFSET..SRC_NODE_ID_OFFSET + 8].copy_from_slice(&node_id.to_be_bytes());
    frame[DST_ADDR_OFFSET..DST_ADDR_OFFSET + 2].copy_from_slice(&GLOBAL_MULTICAST_PREFIX);
    frame[DST_ADDR_OFFSET + 15] = 0x01;
    frame[MIN_FRAME_LEN..].copy_from_slice(payload);
    frame
}

fn source_node_id(frame: &[u8]) -> Option<NodeId> {
    let bytes = frame.get(SRC_NODE_ID_OFFSET..SRC_NODE_ID_OFFSET + 8)?;
    let mut id = [0u8; 8];
    id.copy_from_slice(bytes);
    Some(NodeId::from_be_bytes(id))
}

/// Upper layer that unwraps pub/sub messages from L2 frames and hands them
/// to a bus.
pub struct MeshNetif {
    node_id: NodeId,
    bus: Weak<Bus>,
    up: AtomicBool,
}

impl MeshNetif {
    pub fn new(bus: &Arc<Bus>) -> Arc<Self> {
        Arc::new(Self {
            node_id: bus.node_id(),
            bus: Arc::downgrade(bus),
            up: AtomicBool::new(true),
        })
    }
}

impl NetInterface for MeshNetif {
    fn input(&self, frame: Vec<u8>) -> Result<(), Vec<u8>> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(frame);
        }
        let Some(src) = source_node_id(&frame) else {
            return Err(frame);
        };
        if src == self.node_id {
            return Ok(());
        }
        let Some(bus) = self.bus.upgrade() else {
            return Err(frame);
        };

        let payload = frame[MIN_FRAME_LEN..].to_vec();
        match bus.handle_message(src, payload) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::debug!("[SIM] {:016x} dropped message from {:016x}: {}", self.node_id, src, e);
                Err(frame)
            }
        }
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Release);
    }
}

/// Pub/sub transport that floods every message through an L2 engine.
pub struct MeshTransport {
    node_id: NodeId,
    l2: L2Handle,
}

impl MeshTransport {
    pub fn new(node_id: NodeId, l2: L2Handle) -> Arc<Self> {
        Arc::new(Self { node_id, l2 })
    }
}

impl Transport for MeshTransport {
    fn send(&self, wire: Vec<u8>) -> Result<(), PubSubError> {
        self.l2
            .link_output(encapsulate(self.node_id, &wire))
            .map_err(|e| PubSubError::Transport(e.to_string()))
    }
}
