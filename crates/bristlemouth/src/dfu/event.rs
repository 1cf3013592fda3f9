// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use super::error::DfuErr;
use super::messages::{DfuAddr, DfuResult, ImageInfo};
use crate::NodeId;
use std::time::Duration;

/// Host completion callback: `(success, err, client_node_id)`.
pub type FinishCallback = Box<dyn FnOnce(bool, DfuErr, NodeId) + Send>;

/// Input to the DFU state machine.
///
/// Network frames, timer expiries and local requests all arrive as events
/// on the same queue.
pub enum DfuEvent {
    None,
    InitSuccess,
    ReceivedUpdateRequest { addr: DfuAddr, info: ImageInfo },
    ChunkRequest { seq_num: u16 },
    ImageChunk { data: Vec<u8> },
    UpdateEnd(DfuResult),
    AckReceived(DfuResult),
    AbortReceived,
    Heartbeat,
    RebootRequest,
    Reboot,
    BootComplete,
    AckTimeout,
    HeartbeatTimeout,
    ChunkTimeout,
    /// Local request to push an image to `client_node_id`
    BeginHost {
        info: ImageInfo,
        client_node_id: NodeId,
        finish_cb: FinishCallback,
        timeout: Duration,
    },
}

impl DfuEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::InitSuccess => "InitSuccess",
            Self::ReceivedUpdateRequest { .. } => "ReceivedUpdateRequest",
            Self::ChunkRequest { .. } => "ChunkRequest",
            Self::ImageChunk { .. } => "ImageChunk",
            Self::UpdateEnd(_) => "UpdateEnd",
            Self::AckReceived(_) => "AckReceived",
            Self::AbortReceived => "AbortReceived",
            Self::Heartbeat => "Heartbeat",
            Self::RebootRequest => "RebootRequest",
            Self::Reboot => "Reboot",
            Self::BootComplete => "BootComplete",
            Self::AckTimeout => "AckTimeout",
            Self::HeartbeatTimeout => "HeartbeatTimeout",
            Self::ChunkTimeout => "ChunkTimeout",
            Self::BeginHost { .. } => "BeginHost",
        }
    }
}

impl std::fmt::Debug for DfuEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
