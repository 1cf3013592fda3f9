// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared helpers for the integration tests.

#![allow(dead_code)]

use bristlemouth::config::{L2Settings, NodeConfig};
use bristlemouth::l2::{DeviceConfig, L2Engine};
use bristlemouth::pubsub::Bus;
use bristlemouth::sim::{MemDevice, MeshNetif, MeshTransport};
use bristlemouth::NodeId;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(3);

pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// One node of a simulated mesh: a single two-port switch under L2 and a bus.
pub struct MeshNode {
    pub node_id: NodeId,
    pub bus: Arc<Bus>,
    pub device: Arc<MemDevice>,
    pub l2: L2Engine,
}

impl MeshNode {
    pub fn start(index: u32, node_id: NodeId) -> Self {
        let config = NodeConfig::with_node_id(node_id);
        let bus = Bus::start(node_id, None, config.bus.queue_len).expect("bus");
        let device = MemDevice::new(index);
        let l2 = L2Engine::start(
            vec![DeviceConfig::new(device.clone())],
            MeshNetif::new(&bus),
            None,
            &L2Settings::default(),
        )
        .expect("l2 engine");
        bus.set_transport(Some(MeshTransport::new(node_id, l2.handle())));
        Self {
            node_id,
            bus,
            device,
            l2,
        }
    }
}

/// Nodes wired in a line: port 1 of node `i` to port 0 of node `i + 1`.
pub fn line(ids: &[NodeId]) -> Vec<MeshNode> {
    let nodes: Vec<MeshNode> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| MeshNode::start(i as u32, *id))
        .collect();

    for pair in nodes.windows(2) {
        MemDevice::connect(&pair[0].device, 1, &pair[1].device, 0).expect("connect");
    }

    let last = nodes.len() - 1;
    for (i, node) in nodes.iter().enumerate() {
        let expected = match (i == 0, i == last) {
            (true, true) => 0b00,
            (true, false) => 0b10,
            (false, true) => 0b01,
            (false, false) => 0b11,
        };
        let handle = node.l2.handle();
        assert!(
            wait_until(|| handle.enabled_port_mask() == expected),
            "links of node {} never came up",
            i
        );
    }
    nodes
}
