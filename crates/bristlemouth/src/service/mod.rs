// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service request/reply over the pub/sub bus.
//!
//! # Overview
//!
//! A service named `S` is reached through two topics:
//! - `S/req`: `{id u32, data_size u32, data}` published by requesters
//! - `S/rep`: `{target_node_id u64, id u32, data_size u32, data}` published
//!   by the server, addressed to the requesting node
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bristlemouth::config::ServiceSettings;
//! use bristlemouth::pubsub::Bus;
//! use bristlemouth::service::{ServiceRequester, ServiceServer};
//! use bristlemouth::timer_handler::TimerCallbackHandler;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ServiceSettings::default();
//! let bus = Bus::start(7, None, 32)?;
//! let timers = TimerCallbackHandler::start(settings.timer_queue_len)?;
//!
//! let server = ServiceServer::new(bus.clone(), &settings);
//! server.register("double", |_svc: &str, req: &[u8]| {
//!     Some(req.iter().map(|b| b.wrapping_mul(2)).collect())
//! })?;
//!
//! let requester = ServiceRequester::start(bus, &timers, &settings)?;
//! requester.request("double", &[1, 2, 3], Duration::from_millis(100), |ack, _id, _svc, data| {
//!     assert!(ack);
//!     assert_eq!(data, &[2, 4, 6]);
//! })?;
//! # Ok(())
//! # }
//! ```

mod client;
mod echo;
mod error;
mod server;
pub mod types;

pub use client::{ReplyCallback, ServiceRequester};
pub use echo::EchoService;
pub use error::{ServiceError, ServiceResult};
pub use server::{ServiceHandler, ServiceServer};
pub use types::{ReplyHeader, RequestHeader, DEFAULT_SERVICE_REQUEST_TIMEOUT_MS};

use std::sync::atomic::{AtomicU64, Ordering};

/// Request/reply counters for one server or requester.
#[derive(Debug, Default)]
pub struct ServiceMetrics {
    pub requests_sent: AtomicU64,
    pub replies_received: AtomicU64,
    pub expirations: AtomicU64,
    pub requests_served: AtomicU64,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(requests_sent, replies_received, expirations, requests_served)`
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.requests_sent.load(Ordering::Relaxed),
            self.replies_received.load(Ordering::Relaxed),
            self.expirations.load(Ordering::Relaxed),
            self.requests_served.load(Ordering::Relaxed),
        )
    }
}
