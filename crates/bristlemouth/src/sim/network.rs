// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use crate::pubsub::{Bus, PubSubError, Transport};
use crate::NodeId;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Connects buses directly, as if every node were one hop from every other.
///
/// ```rust,no_run
/// use bristlemouth::pubsub::Bus;
/// use bristlemouth::sim::LoopbackNetwork;
///
/// # fn main() -> Result<(), bristlemouth::PubSubError> {
/// let net = LoopbackNetwork::new();
/// let a = Bus::start(1, None, 32)?;
/// let b = Bus::start(2, None, 32)?;
/// net.attach(&a);
/// net.attach(&b);
/// a.publish("hello", b"world", 0, 0)?; // delivered to b's subscribers
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct LoopbackNetwork {
    buses: RwLock<Vec<Weak<Bus>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join `bus` to the network and make it publish through it.
    pub fn attach(self: &Arc<Self>, bus: &Arc<Bus>) {
        self.buses.write().push(Arc::downgrade(bus));
        bus.set_transport(Some(Arc::new(LoopbackPort {
            node_id: bus.node_id(),
            network: Arc::downgrade(self),
        })));
    }

    /// Number of attached buses still alive.
    pub fn len(&self) -> usize {
        self.buses.read().iter().filter(|b| b.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn deliver(&self, source: NodeId, wire: &[u8]) {
        let targets: Vec<Arc<Bus>> = self
            .buses
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|bus| bus.node_id() != source)
            .collect();

        for bus in targets {
            if let Err(e) = bus.handle_message(source, wire.to_vec()) {
                log::debug!(
                    "[SIM] {:016x} -> {:016x} dropped: {}",
                    source,
                    bus.node_id(),
                    e
                );
            }
        }
    }
}

struct LoopbackPort {
    node_id: NodeId,
    network: Weak<LoopbackNetwork>,
}

impl Transport for LoopbackPort {
    fn send(&self, wire: Vec<u8>) -> Result<(), PubSubError> {
        let network = self.network.upgrade().ok_or(PubSubError::Stopped)?;
        network.deliver(self.node_id, &wire);
        Ok(())
    }
}
