// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Service server (replier).
//!
//! Each registered service subscribes to `<service>/req`. Requests are
//! dispatched to the service's handler on the middleware thread and the
//! reply, if any, is published to `<service>/rep` addressed to the
//! requesting node.

use crate::config::ServiceSettings;
use crate::pubsub::{Bus, PubSubCallback};
use crate::service::error::{ServiceError, ServiceResult};
use crate::service::types::{
    check_service_name, reply_topic, request_topic, strip_suffix, ReplyHeader, RequestHeader,
    REQUEST_SUFFIX, SERVICE_MSG_TYPE, SERVICE_MSG_VERSION,
};
use crate::service::ServiceMetrics;
use crate::NodeId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Handler trait for processing service requests.
pub trait ServiceHandler: Send + Sync + 'static {
    /// Handle a request and return the reply payload, or `None` for no reply.
    fn handle(&self, service: &str, request: &[u8]) -> Option<Vec<u8>>;
}

/// A function-based service handler.
impl<F> ServiceHandler for F
where
    F: Fn(&str, &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
{
    fn handle(&self, service: &str, request: &[u8]) -> Option<Vec<u8>> {
        self(service, request)
    }
}

struct ServerInner {
    bus: Arc<Bus>,
    handlers: Mutex<HashMap<String, Arc<dyn ServiceHandler>>>,
    lock_timeout: Duration,
    max_data_size: usize,
    metrics: ServiceMetrics,
}

/// Hosts any number of services on one bus.
///
/// # Example
///
/// ```rust,no_run
/// use bristlemouth::config::ServiceSettings;
/// use bristlemouth::pubsub::Bus;
/// use bristlemouth::service::ServiceServer;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = Bus::start(0x1234, None, 32)?;
/// let server = ServiceServer::new(bus, &ServiceSettings::default());
/// server.register("status", |_svc: &str, _req: &[u8]| Some(b"ok".to_vec()))?;
/// # Ok(())
/// # }
/// ```
pub struct ServiceServer {
    inner: Arc<ServerInner>,
    /// Shared by every `<service>/req` subscription.
    request_cb: PubSubCallback,
}

impl ServiceServer {
    pub fn new(bus: Arc<Bus>, settings: &ServiceSettings) -> Self {
        let inner = Arc::new(ServerInner {
            bus,
            handlers: Mutex::new(HashMap::new()),
            lock_timeout: settings.lock_timeout(),
            max_data_size: settings.max_data_size,
            metrics: ServiceMetrics::new(),
        });

        let weak: Weak<ServerInner> = Arc::downgrade(&inner);
        let request_cb: PubSubCallback = Arc::new(
            move |src: NodeId, topic: &str, data: &[u8], _ty: u8, _ver: u8| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_request(src, topic, data);
                }
            },
        );

        Self { inner, request_cb }
    }

    /// Register `handler` for `service` and subscribe to `<service>/req`.
    pub fn register<H: ServiceHandler>(&self, service: &str, handler: H) -> ServiceResult<()> {
        check_service_name(service)?;

        {
            let mut handlers = self
                .inner
                .handlers
                .try_lock_for(self.inner.lock_timeout)
                .ok_or(ServiceError::LockTimeout)?;
            if handlers.contains_key(service) {
                return Err(ServiceError::AlreadyRegistered(service.to_string()));
            }
            handlers.insert(service.to_string(), Arc::new(handler));
        }

        if let Err(e) = self
            .inner
            .bus
            .subscribe(&request_topic(service), self.request_cb.clone())
        {
            if let Some(mut handlers) = self.inner.handlers.try_lock_for(self.inner.lock_timeout) {
                handlers.remove(service);
            }
            return Err(e.into());
        }

        log::info!("[SERVICE] registered '{}'", service);
        Ok(())
    }

    /// Remove the handler for `service` and unsubscribe from `<service>/req`.
    pub fn unregister(&self, service: &str) -> ServiceResult<()> {
        let removed = self
            .inner
            .handlers
            .try_lock_for(self.inner.lock_timeout)
            .ok_or(ServiceError::LockTimeout)?
            .remove(service);

        if removed.is_none() {
            return Err(ServiceError::NotRegistered(service.to_string()));
        }

        self.inner
            .bus
            .unsubscribe(&request_topic(service), &self.request_cb)?;
        log::info!("[SERVICE] unregistered '{}'", service);
        Ok(())
    }

    /// Registered service names, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .handlers
            .try_lock_for(self.inner.lock_timeout)
            .map(|handlers| handlers.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.inner.bus
    }

    pub fn metrics(&self) -> &ServiceMetrics {
        &self.inner.metrics
    }
}

impl Drop for ServiceServer {
    fn drop(&mut self) {
        for service in self.services() {
            let _ = self
                .inner
                .bus
                .unsubscribe(&request_topic(&service), &self.request_cb);
        }
    }
}

impl ServerInner {
    fn handle_request(&self, src: NodeId, topic: &str, body: &[u8]) {
        let Some(service) = strip_suffix(topic, REQUEST_SUFFIX) else {
            log::debug!("[SERVICE] ignoring request on unexpected topic '{}'", topic);
            return;
        };
        let Some((header, request)) = RequestHeader::decode(body) else {
            log::debug!("[SERVICE] malformed request on '{}' ({} bytes)", topic, body.len());
            return;
        };

        let handler = match self.handlers.try_lock_for(self.lock_timeout) {
            Some(handlers) => handlers.get(service).cloned(),
            None => {
                log::warn!("[SERVICE] handler lock timeout, dropping request {}", header.id);
                return;
            }
        };
        let Some(handler) = handler else {
            log::debug!("[SERVICE] no handler for '{}'", service);
            return;
        };

        self.metrics.requests_served.fetch_add(1, Ordering::Relaxed);
        let Some(reply) = handler.handle(service, request) else {
            return;
        };

        let max_reply = self.max_data_size.saturating_sub(ReplyHeader::LEN);
        if reply.len() > max_reply {
            log::warn!(
                "[SERVICE] reply for '{}' too large ({} > {} bytes), dropping",
                service,
                reply.len(),
                max_reply
            );
            return;
        }

        let msg = ReplyHeader::encode(src, header.id, &reply);
        if let Err(e) = self.bus.publish(
            &reply_topic(service),
            &msg,
            SERVICE_MSG_TYPE,
            SERVICE_MSG_VERSION,
        ) {
            log::warn!("[SERVICE] failed to publish reply {} for '{}': {}", header.id, service, e);
        }
    }
}
