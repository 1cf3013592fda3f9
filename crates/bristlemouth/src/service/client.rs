// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service requester (client).
//!
//! Requests are published to `<service>/req` and tracked by id until either
//! a matching reply arrives on `<service>/rep` or the periodic expiry sweep
//! finds them past their timeout. Every request's callback runs exactly once.

use crate::config::ServiceSettings;
use crate::pubsub::{Bus, PubSubCallback};
use crate::service::error::{ServiceError, ServiceResult};
use crate::service::types::{
    check_service_name, reply_topic, request_topic, strip_suffix, ReplyHeader, RequestHeader,
    REPLY_SUFFIX, SERVICE_MSG_TYPE, SERVICE_MSG_VERSION,
};
use crate::service::ServiceMetrics;
use crate::timer_handler::{PeriodicTimer, TimerCallbackHandler};
use crate::NodeId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

/// Reply callback: `(ack, request_id, service, reply_data)`.
///
/// `ack == false` means the request expired; `reply_data` is then empty.
pub type ReplyCallback = Box<dyn FnOnce(bool, u32, &str, &[u8]) + Send>;

struct PendingRequest {
    service: String,
    reply_cb: ReplyCallback,
    timeout: Duration,
    started_at: Instant,
}

impl PendingRequest {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) >= self.timeout
    }
}

struct RequesterInner {
    bus: Arc<Bus>,
    pending: Mutex<BTreeMap<u32, PendingRequest>>,
    next_id: AtomicU32,
    lock_timeout: Duration,
    max_data_size: usize,
    metrics: ServiceMetrics,
}

/// Issues service requests and correlates replies.
///
/// # Example
///
/// ```rust,no_run
/// use bristlemouth::config::ServiceSettings;
/// use bristlemouth::pubsub::Bus;
/// use bristlemouth::service::ServiceRequester;
/// use bristlemouth::timer_handler::TimerCallbackHandler;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = Bus::start(0x1234, None, 32)?;
/// let timers = TimerCallbackHandler::start(10)?;
/// let requester = ServiceRequester::start(bus, &timers, &ServiceSettings::default())?;
///
/// let id = requester.request("status", b"", Duration::from_millis(500), |ack, id, svc, data| {
///     println!("{} #{}: ack={} {} bytes", svc, id, ack, data.len());
/// })?;
/// # let _ = id;
/// # Ok(())
/// # }
/// ```
pub struct ServiceRequester {
    inner: Arc<RequesterInner>,
    /// Shared by every `<service>/rep` subscription.
    reply_cb: PubSubCallback,
    expiry: PeriodicTimer,
}

impl ServiceRequester {
    /// Create the requester and start the expiry ticker (`bm-svc-expiry`).
    ///
    /// The ticker only posts; the sweep itself runs on `timers`' thread.
    pub fn start(
        bus: Arc<Bus>,
        timers: &TimerCallbackHandler,
        settings: &ServiceSettings,
    ) -> ServiceResult<Self> {
        let inner = Arc::new(RequesterInner {
            bus,
            pending: Mutex::new(BTreeMap::new()),
            next_id: AtomicU32::new(0),
            lock_timeout: settings.lock_timeout(),
            max_data_size: settings.max_data_size,
            metrics: ServiceMetrics::new(),
        });

        let weak: Weak<RequesterInner> = Arc::downgrade(&inner);
        let reply_cb: PubSubCallback = Arc::new(
            move |_src: NodeId, topic: &str, data: &[u8], _ty: u8, _ver: u8| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_reply(topic, data);
                }
            },
        );

        let poster = timers.poster();
        let weak = Arc::downgrade(&inner);
        let post_timeout = settings.lock_timeout();
        let expiry = PeriodicTimer::start("bm-svc-expiry", settings.expiry_period(), move || {
            let weak = weak.clone();
            let sweep = Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.expire(Instant::now());
                }
            });
            if let Err(e) = poster.post(sweep, post_timeout) {
                log::warn!("[SERVICE] failed to post expiry sweep: {}", e);
            }
        })?;

        Ok(Self {
            inner,
            reply_cb,
            expiry,
        })
    }

    /// Send `data` to `service`; `reply_cb` runs once with the reply or on expiry.
    ///
    /// Returns the request id. On error the callback is dropped unused.
    pub fn request<F>(
        &self,
        service: &str,
        data: &[u8],
        timeout: Duration,
        reply_cb: F,
    ) -> ServiceResult<u32>
    where
        F: FnOnce(bool, u32, &str, &[u8]) + Send + 'static,
    {
        if data.len() > self.inner.max_data_size {
            return Err(ServiceError::DataTooLarge {
                size: data.len(),
                max: self.inner.max_data_size,
            });
        }
        check_service_name(service)?;

        let id = {
            let mut pending = self
                .inner
                .pending
                .try_lock_for(self.inner.lock_timeout)
                .ok_or(ServiceError::LockTimeout)?;
            // The counter wraps; never reuse an id that is still outstanding.
            let mut id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            while pending.contains_key(&id) {
                id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            }
            pending.insert(
                id,
                PendingRequest {
                    service: service.to_string(),
                    reply_cb: Box::new(reply_cb),
                    timeout,
                    started_at: Instant::now(),
                },
            );
            id
        };

        if let Err(e) = self.send(service, id, data) {
            self.inner.forget(id);
            return Err(e);
        }

        self.inner.metrics.requests_sent.fetch_add(1, Ordering::Relaxed);
        log::debug!("[SERVICE] request {} to '{}' ({} bytes)", id, service, data.len());
        Ok(id)
    }

    fn send(&self, service: &str, id: u32, data: &[u8]) -> ServiceResult<()> {
        // Same callback Arc every time, so repeat subscriptions are no-ops.
        self.inner
            .bus
            .subscribe(&reply_topic(service), self.reply_cb.clone())?;

        let msg = RequestHeader::encode(id, data);
        self.inner.bus.publish(
            &request_topic(service),
            &msg,
            SERVICE_MSG_TYPE,
            SERVICE_MSG_VERSION,
        )?;
        Ok(())
    }

    /// Number of requests still waiting for a reply or expiry.
    pub fn pending_count(&self) -> usize {
        self.inner
            .pending
            .try_lock_for(self.inner.lock_timeout)
            .map_or(0, |pending| pending.len())
    }

    /// Run an expiry sweep now instead of waiting for the ticker.
    pub fn expire_now(&self) {
        self.inner.expire(Instant::now());
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.inner.metrics
    }

    #[cfg(test)]
    pub(super) fn set_next_id(&self, id: u32) {
        self.inner.next_id.store(id, Ordering::Relaxed);
    }
}

impl Drop for ServiceRequester {
    fn drop(&mut self) {
        self.expiry.stop();
    }
}

impl RequesterInner {
    fn forget(&self, id: u32) {
        if let Some(mut pending) = self.pending.try_lock_for(self.lock_timeout) {
            pending.remove(&id);
        }
    }

    fn handle_reply(&self, topic: &str, body: &[u8]) {
        let Some(service) = strip_suffix(topic, REPLY_SUFFIX) else {
            return;
        };
        let Some((header, data)) = ReplyHeader::decode(body) else {
            log::debug!("[SERVICE] malformed reply on '{}' ({} bytes)", topic, body.len());
            return;
        };
        if header.target_node_id != self.bus.node_id() {
            return;
        }

        let entry = match self.pending.try_lock_for(self.lock_timeout) {
            Some(mut pending) => {
                if pending.get(&header.id).is_some_and(|p| p.service == service) {
                    pending.remove(&header.id)
                } else {
                    None
                }
            }
            None => {
                log::warn!("[SERVICE] pending lock timeout, dropping reply {}", header.id);
                return;
            }
        };

        match entry {
            Some(request) => {
                self.metrics.replies_received.fetch_add(1, Ordering::Relaxed);
                (request.reply_cb)(true, header.id, &request.service, data);
            }
            None => log::debug!("[SERVICE] reply {} for unknown or expired request", header.id),
        }
    }

    fn expire(&self, now: Instant) {
        let expired: Vec<(u32, PendingRequest)> = {
            let Some(mut pending) = self.pending.try_lock_for(self.lock_timeout) else {
                log::warn!("[SERVICE] pending lock timeout, skipping expiry sweep");
                return;
            };
            let ids: Vec<u32> = pending
                .iter()
                .filter(|(_, request)| request.is_expired(now))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|request| (id, request)))
                .collect()
        };

        for (id, request) in expired {
            log::debug!("[SERVICE] request {} to '{}' expired", id, request.service);
            self.metrics.expirations.fetch_add(1, Ordering::Relaxed);
            (request.reply_cb)(false, id, &request.service, &[]);
        }
    }
}
