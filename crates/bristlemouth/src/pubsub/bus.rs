// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::error::PubSubError;
use super::wire;
use crate::NodeId;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Subscriber callback: `(source_node_id, topic, data, type, version)`.
///
/// Identity (for duplicate suppression and unsubscribe) is the `Arc` pointer,
/// so keep a clone of the callback you subscribed with.
pub type PubSubCallback = Arc<dyn Fn(NodeId, &str, &[u8], u8, u8) + Send + Sync>;

/// Network side of the bus: carries encoded messages to other nodes.
pub trait Transport: Send + Sync {
    fn send(&self, wire: Vec<u8>) -> Result<(), PubSubError>;
}

struct Delivery {
    source: NodeId,
    wire: Vec<u8>,
}

type Registry = DashMap<String, Vec<PubSubCallback>>;

/// Pub/sub bus for one node.
pub struct Bus {
    node_id: NodeId,
    subscriptions: Arc<Registry>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    queue_tx: Sender<Delivery>,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Bus {
    /// Create the bus and start its middleware thread.
    pub fn start(
        node_id: NodeId,
        transport: Option<Arc<dyn Transport>>,
        queue_len: usize,
    ) -> Result<Arc<Self>, PubSubError> {
        let (queue_tx, queue_rx) = channel::bounded(queue_len);
        let subscriptions: Arc<Registry> = Arc::new(DashMap::new());
        let running = Arc::new(AtomicBool::new(true));

        let registry = Arc::clone(&subscriptions);
        let running_clone = Arc::clone(&running);
        let thread = thread::Builder::new()
            .name("bm-middleware".to_string())
            .spawn(move || run_middleware(registry, queue_rx, running_clone))
            .map_err(|e| {
                log::error!("[PUBSUB] failed to spawn middleware thread: {}", e);
                PubSubError::Spawn
            })?;

        log::debug!("[PUBSUB] bus started for node {:016x}", node_id);

        Ok(Arc::new(Self {
            node_id,
            subscriptions,
            transport: RwLock::new(transport),
            queue_tx,
            running,
            thread: Mutex::new(Some(thread)),
        }))
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Attach or detach the network transport.
    pub fn set_transport(&self, transport: Option<Arc<dyn Transport>>) {
        *self.transport.write() = transport;
    }

    /// Subscribe `cb` to `topic`. Subscribing the same callback twice is a no-op.
    pub fn subscribe(&self, topic: &str, cb: PubSubCallback) -> Result<(), PubSubError> {
        wire::check_topic(topic)?;

        let mut callbacks = self.subscriptions.entry(topic.to_string()).or_default();
        if callbacks.iter().any(|existing| Arc::ptr_eq(existing, &cb)) {
            log::debug!("[PUBSUB] duplicate subscription to '{}' ignored", topic);
            return Ok(());
        }
        callbacks.push(cb);
        log::debug!("[PUBSUB] subscribed to '{}' ({} callbacks)", topic, callbacks.len());
        Ok(())
    }

    /// Subscribe using the first `len` bytes of `topic`.
    pub fn subscribe_wl(&self, topic: &str, len: usize, cb: PubSubCallback) -> Result<(), PubSubError> {
        let topic = topic.get(..len).ok_or(PubSubError::InvalidTopic)?;
        self.subscribe(topic, cb)
    }

    pub fn unsubscribe(&self, topic: &str, cb: &PubSubCallback) -> Result<(), PubSubError> {
        let mut removed = false;
        let mut now_empty = false;

        if let Some(mut callbacks) = self.subscriptions.get_mut(topic) {
            let before = callbacks.len();
            callbacks.retain(|existing| !Arc::ptr_eq(existing, cb));
            removed = callbacks.len() != before;
            now_empty = callbacks.is_empty();
        }

        if now_empty {
            self.subscriptions.remove_if(topic, |_, callbacks| callbacks.is_empty());
        }

        if removed {
            log::debug!("[PUBSUB] unsubscribed from '{}'", topic);
            Ok(())
        } else {
            Err(PubSubError::NotSubscribed)
        }
    }

    pub fn unsubscribe_wl(&self, topic: &str, len: usize, cb: &PubSubCallback) -> Result<(), PubSubError> {
        let topic = topic.get(..len).ok_or(PubSubError::InvalidTopic)?;
        self.unsubscribe(topic, cb)
    }

    /// Publish to local subscribers (if any) and to the network.
    pub fn publish(&self, topic: &str, data: &[u8], ty: u8, version: u8) -> Result<(), PubSubError> {
        let wire = wire::encode(topic, data, ty, version)?;

        if self.subscriptions.contains_key(topic) {
            self.enqueue(Delivery {
                source: self.node_id,
                wire: wire.clone(),
            })?;
        }

        let transport = self.transport.read().clone();
        if let Some(transport) = transport {
            transport.send(wire)?;
        }
        Ok(())
    }

    /// Inbound message from the network, sent by `source`.
    pub fn handle_message(&self, source: NodeId, wire: Vec<u8>) -> Result<(), PubSubError> {
        self.enqueue(Delivery { source, wire })
    }

    /// Topics with at least one subscriber, sorted.
    pub fn subscriptions(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        topics.sort();
        topics
    }

    fn enqueue(&self, delivery: Delivery) -> Result<(), PubSubError> {
        match self.queue_tx.try_send(delivery) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::warn!("[PUBSUB] middleware queue full, dropping message");
                Err(PubSubError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(PubSubError::Stopped),
        }
    }

    /// Stop the middleware thread.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.lock().take() {
            // The last Arc may be dropped from inside a callback.
            if thread.thread().id() != thread::current().id() {
                if thread.join().is_err() {
                    log::error!("[PUBSUB] delivery thread panicked");
                }
            }
        }
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_middleware(registry: Arc<Registry>, rx: Receiver<Delivery>, running: Arc<AtomicBool>) {
    while running.load(Ordering::Relaxed) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(delivery) => deliver(&registry, &delivery),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    log::debug!("[PUBSUB] middleware stopped");
}

fn deliver(registry: &Registry, delivery: &Delivery) {
    let msg = match wire::decode(&delivery.wire) {
        Ok(msg) => msg,
        Err(e) => {
            log::debug!("[PUBSUB] dropping message from {:016x}: {}", delivery.source, e);
            return;
        }
    };

    // Clone out so callbacks can (un)subscribe without deadlocking the shard.
    let callbacks = match registry.get(msg.topic) {
        Some(entry) => entry.value().clone(),
        None => return,
    };

    for cb in callbacks {
        cb(delivery.source, msg.topic, msg.data, msg.ty, msg.version);
    }
}
