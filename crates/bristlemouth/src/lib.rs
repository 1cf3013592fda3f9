// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Bristlemouth - mesh node core
//!
//! Pure Rust implementation of the Bristlemouth node stack that sits between a
//! multi-port Ethernet switch (ADIN2111-class PHYs) and the application:
//! L2 forwarding, a topic pub/sub bus, service request/reply RPC and the
//! device firmware update (DFU) state machine.
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                         Application Layer                           |
//! |        ServiceServer / ServiceRequester   |   DfuHandle             |
//! +---------------------------------------------------------------------+
//! |                           Pub/Sub Bus                               |
//! |   topic registry | local delivery | middleware thread               |
//! +---------------------------------------------------------------------+
//! |                      (IPv6/UDP upper layer)                         |
//! +---------------------------------------------------------------------+
//! |                        L2 Forwarding Engine                         |
//! |   port masks | ingress/egress stamping | multicast flooding         |
//! +---------------------------------------------------------------------+
//! |                 NetDevice (ADIN2111 / simulated)                    |
//! +---------------------------------------------------------------------+
//! ```
//!
//! Every subsystem is an explicit object built once at startup and passed by
//! handle: there is no hidden global state. Each one owns a single worker
//! thread fed by a bounded crossbeam channel; producers only ever enqueue.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bristlemouth::pubsub::Bus;
//! use bristlemouth::service::{EchoService, ServiceRequester, ServiceServer};
//! use bristlemouth::timer_handler::TimerCallbackHandler;
//! use bristlemouth::config::NodeConfig;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = NodeConfig::with_node_id(0xdead_beef);
//! let bus = Bus::start(config.node_id, None, config.bus.queue_len)?;
//! let timers = TimerCallbackHandler::start(config.service.timer_queue_len)?;
//!
//! let server = ServiceServer::new(bus.clone(), &config.service);
//! let _echo = EchoService::register(&server)?;
//!
//! let requester = ServiceRequester::start(bus.clone(), &timers, &config.service)?;
//! let service = EchoService::topic_for(config.node_id);
//! requester.request(&service, b"ping", Duration::from_millis(200), |ack, id, _svc, reply| {
//!     println!("request {} ack={} reply={:?}", id, ack, reply);
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dfu;
pub mod l2;
pub mod pubsub;
pub mod service;
pub mod sim;
pub mod timer_handler;

/// 64-bit Bristlemouth node identifier.
pub type NodeId = u64;

pub use config::{ConfigError, NodeConfig};
pub use dfu::{DfuEngine, DfuErr, DfuError, DfuHandle, DfuState};
pub use l2::{L2Engine, L2Error, L2Handle, NetDevice, NetInterface};
pub use pubsub::{Bus, PubSubError};
pub use service::{ServiceError, ServiceRequester, ServiceServer};
