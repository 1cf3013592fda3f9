// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/reply wire headers and topic naming.
//!
//! All fields are little endian.

use crate::pubsub::BM_TOPIC_MAX_LEN;
use crate::NodeId;

/// Suffix of the request topic.
pub const REQUEST_SUFFIX: &str = "/req";

/// Suffix of the reply topic.
pub const REPLY_SUFFIX: &str = "/rep";

/// Default bound on pending/handler lock acquisition.
pub const DEFAULT_SERVICE_REQUEST_TIMEOUT_MS: u64 = 100;

/// Pub/sub message type and version used for service traffic.
pub const SERVICE_MSG_TYPE: u8 = 0;
pub const SERVICE_MSG_VERSION: u8 = 0;

/// `{id: u32, data_size: u32}` followed by `data_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub id: u32,
    pub data_size: u32,
}

impl RequestHeader {
    pub const LEN: usize = 8;

    /// Encode header and payload into a single message body.
    pub fn encode(id: u32, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN + data.len());
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);
        buf
    }

    /// Split a message body into header and payload.
    ///
    /// Fails unless the body is exactly header plus `data_size` bytes.
    pub fn decode(body: &[u8]) -> Option<(Self, &[u8])> {
        let header = body.get(..Self::LEN)?;
        let id = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let data_size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        let data = &body[Self::LEN..];
        (data.len() == data_size as usize).then_some((Self { id, data_size }, data))
    }
}

/// `{target_node_id: u64, id: u32, data_size: u32}` followed by `data_size` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyHeader {
    pub target_node_id: NodeId,
    pub id: u32,
    pub data_size: u32,
}

impl ReplyHeader {
    pub const LEN: usize = 16;

    pub fn encode(target_node_id: NodeId, id: u32, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN + data.len());
        buf.extend_from_slice(&target_node_id.to_le_bytes());
        buf.extend_from_slice(&id.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);
        buf
    }

    pub fn decode(body: &[u8]) -> Option<(Self, &[u8])> {
        let header = body.get(..Self::LEN)?;
        let mut node = [0u8; 8];
        node.copy_from_slice(&header[..8]);
        let id = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let data_size = u32::from_le_bytes([header[12], header[13], header[14], header[15]]);
        let data = &body[Self::LEN..];
        (data.len() == data_size as usize).then_some((
            Self {
                target_node_id: u64::from_le_bytes(node),
                id,
                data_size,
            },
            data,
        ))
    }
}

pub fn request_topic(service: &str) -> String {
    format!("{}{}", service, REQUEST_SUFFIX)
}

pub fn reply_topic(service: &str) -> String {
    format!("{}{}", service, REPLY_SUFFIX)
}

/// Check that both derived topics fit in a pub/sub topic.
pub fn check_service_name(service: &str) -> Result<(), super::ServiceError> {
    let len = service.len() + REQUEST_SUFFIX.len();
    if service.is_empty() || len > BM_TOPIC_MAX_LEN {
        return Err(super::ServiceError::TopicTooLong(len));
    }
    Ok(())
}

/// Service name of a topic carrying `suffix`, if the topic is exactly
/// `service_len + 4` bytes long and ends with it.
pub fn strip_suffix<'a>(topic: &'a str, suffix: &str) -> Option<&'a str> {
    topic
        .strip_suffix(suffix)
        .filter(|service| !service.is_empty() && topic.len() == service.len() + suffix.len())
}
