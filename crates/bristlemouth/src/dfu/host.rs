// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Host side: offer an image and serve chunks until the client confirms.

use super::machine::{DfuCore, DfuState};
use super::error::DfuErr;
use super::event::{DfuEvent, FinishCallback};
use super::messages::{DfuMessage, DfuResult, ImageInfo};
use super::timer::DfuTimer;
use crate::NodeId;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct HostCtx {
    pub(crate) info: ImageInfo,
    pub(crate) client_node_id: NodeId,
    pub(crate) bytes_remaining: u32,
    pub(crate) ack_retry: u8,
    pub(crate) finish_cb: Option<FinishCallback>,
}

impl DfuCore {
    /// Bytes of the image the client has not requested yet.
    pub fn host_bytes_remaining(&self) -> u32 {
        self.host.bytes_remaining
    }

    pub(super) fn host_begin(
        &mut self,
        info: ImageInfo,
        client_node_id: NodeId,
        finish_cb: FinishCallback,
        timeout: Duration,
    ) -> Option<DfuState> {
        log::info!(
            "[DFU] pushing {} byte image v{}.{} to {:016x}",
            info.image_size,
            info.major_ver,
            info.minor_ver,
            client_node_id
        );
        self.host = HostCtx {
            info,
            client_node_id,
            finish_cb: Some(finish_cb),
            ..HostCtx::default()
        };
        self.timers.start(DfuTimer::Update, timeout);
        Some(DfuState::HostReqUpdate)
    }

    // ========================================================================
    // HostReqUpdate
    // ========================================================================

    pub(super) fn host_req_update_entry(&mut self) -> Option<DfuState> {
        self.host.bytes_remaining = self.host.info.image_size;
        self.host.ack_retry = 0;
        self.send_start();
        None
    }

    fn send_start(&mut self) {
        self.send(self.host.client_node_id, DfuMessage::Start(self.host.info));
        self.timers.start(DfuTimer::Ack, self.settings.ack_timeout());
    }

    pub(super) fn host_req_update_run(&mut self, event: DfuEvent) -> Option<DfuState> {
        match event {
            DfuEvent::AckReceived(result) => {
                self.timers.stop(DfuTimer::Ack);
                if result.success {
                    log::info!("[DFU] client {:016x} accepted update", self.host.client_node_id);
                    Some(DfuState::HostUpdate)
                } else if result.err.is_fatal() {
                    self.host_client_failed(result.err)
                } else {
                    log::warn!("[DFU] client refused update: {}", result.err);
                    self.fail(result.err)
                }
            }
            DfuEvent::AckTimeout => {
                self.host.ack_retry += 1;
                if self.host.ack_retry >= self.settings.max_ack_retries {
                    return self.fail(DfuErr::Timeout);
                }
                log::debug!("[DFU] no ACK, resending START ({})", self.host.ack_retry);
                self.send_start();
                None
            }
            DfuEvent::AbortReceived => self.fail(DfuErr::Aborted),
            _ => None,
        }
    }

    // ========================================================================
    // HostUpdate
    // ========================================================================

    pub(super) fn host_update_entry(&mut self) -> Option<DfuState> {
        self.restart_heartbeat();
        None
    }

    fn restart_heartbeat(&mut self) {
        self.timers
            .start(DfuTimer::Heartbeat, self.settings.heartbeat_timeout());
    }

    pub(super) fn host_update_run(&mut self, event: DfuEvent) -> Option<DfuState> {
        let client = self.host.client_node_id;
        match event {
            DfuEvent::ChunkRequest { seq_num } => {
                self.timers.stop(DfuTimer::Heartbeat);
                self.send(client, DfuMessage::Heartbeat);
                self.host_send_chunk(seq_num)
            }
            DfuEvent::RebootRequest => {
                log::info!("[DFU] client {:016x} asks to reboot", client);
                self.send(client, DfuMessage::Reboot);
                self.restart_heartbeat();
                None
            }
            DfuEvent::BootComplete => {
                log::info!("[DFU] client {:016x} booted the new image", client);
                self.send(client, DfuMessage::End(DfuResult::ok()));
                self.restart_heartbeat();
                None
            }
            DfuEvent::UpdateEnd(result) if result.success => {
                self.timers.stop(DfuTimer::Update);
                if let Some(finish_cb) = self.host.finish_cb.take() {
                    finish_cb(true, result.err, client);
                }
                log::info!("[DFU] update of {:016x} complete", client);
                Some(DfuState::Idle)
            }
            DfuEvent::UpdateEnd(result) => self.host_client_failed(result.err),
            DfuEvent::Heartbeat => {
                self.restart_heartbeat();
                None
            }
            DfuEvent::HeartbeatTimeout => self.fail(DfuErr::Timeout),
            DfuEvent::AbortReceived => {
                log::warn!("[DFU] update of {:016x} aborted", client);
                self.timers.stop_all();
                if let Some(finish_cb) = self.host.finish_cb.take() {
                    finish_cb(false, DfuErr::Aborted, client);
                }
                Some(DfuState::Idle)
            }
            _ => None,
        }
    }

    /// End the update on an error reported by the client.
    ///
    /// The code describes the client, so even a fatal one returns the host
    /// to `Idle` instead of latching it in `Error`.
    fn host_client_failed(&mut self, err: DfuErr) -> Option<DfuState> {
        let client = self.host.client_node_id;
        log::warn!("[DFU] client {:016x} failed the update: {}", client, err);
        self.timers.stop_all();
        self.error = err;
        if let Some(finish_cb) = self.host.finish_cb.take() {
            finish_cb(false, err, client);
        }
        Some(DfuState::Idle)
    }

    fn host_send_chunk(&mut self, seq_num: u16) -> Option<DfuState> {
        let info = self.host.info;
        let chunk_size = info.chunk_size as u32;
        let offset = seq_num as u32 * chunk_size;
        if chunk_size == 0 || offset >= info.image_size {
            log::warn!("[DFU] chunk {} outside the image", seq_num);
            return self.fail(DfuErr::ImgChunkAccess);
        }

        let len = chunk_size.min(info.image_size - offset);
        let Some(flash_offset) = self.settings.image_offset.checked_add(offset) else {
            return self.fail(DfuErr::ImgChunkAccess);
        };
        let mut chunk = vec![0u8; len as usize];
        if let Err(e) = self.ctx.image.read(flash_offset, &mut chunk) {
            log::error!("[DFU] reading chunk {}: {}", seq_num, e);
            return self.fail(DfuErr::FlashAccess);
        }

        if !self.send(self.host.client_node_id, DfuMessage::Payload(chunk)) {
            return self.fail(DfuErr::ImgChunkAccess);
        }

        self.host.bytes_remaining = info.image_size - offset - len;
        log::trace!(
            "[DFU] sent chunk {} ({} bytes, {} remaining)",
            seq_num,
            len,
            self.host.bytes_remaining
        );
        self.restart_heartbeat();
        None
    }
}
