// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-node echo service.

use crate::service::error::ServiceResult;
use crate::service::ServiceServer;
use crate::NodeId;

/// Replies to every request on `"{node_id:016x}/echo"` with the request bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoService {
    service: String,
}

impl EchoService {
    /// Service name of the echo service hosted by `node_id`.
    pub fn topic_for(node_id: NodeId) -> String {
        format!("{:016x}/echo", node_id)
    }

    /// Register the echo service on `server`'s node.
    pub fn register(server: &ServiceServer) -> ServiceResult<Self> {
        let service = Self::topic_for(server.bus().node_id());
        server.register(&service, |_service: &str, request: &[u8]| {
            Some(request.to_vec())
        })?;
        Ok(Self { service })
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}
