// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client side: receive an image into the update slot, validate it, reboot
//! into it and confirm with the host.

use super::machine::{DfuCore, DfuState};
use super::crc::crc16_ccitt;
use super::error::DfuErr;
use super::event::DfuEvent;
use super::messages::{DfuAddr, DfuMessage, DfuResult, ImageInfo, BM_DFU_IMG_INFO_FORCE_UPDATE};
use super::platform::{FlashError, RebootInfo};
use super::timer::DfuTimer;
use crate::NodeId;

/// Flash write granularity; chunks are gathered into pages of this size.
pub const BM_IMG_PAGE_LENGTH: usize = 2048;

#[derive(Debug, Default)]
pub(crate) struct ClientCtx {
    pub(crate) host_node_id: NodeId,
    pub(crate) image_size: u32,
    pub(crate) num_chunks: u32,
    pub(crate) crc16: u16,
    pub(crate) running_crc16: u16,
    pub(crate) page_buf: Vec<u8>,
    pub(crate) flash_offset: u32,
    pub(crate) chunk_retry: u8,
    pub(crate) current_chunk: u32,
}

impl DfuCore {
    /// Handle START while idle (or a repeated START while receiving).
    pub(super) fn client_process_update_request(
        &mut self,
        addr: DfuAddr,
        info: ImageInfo,
    ) -> Option<DfuState> {
        let host = addr.src_node_id;
        let running_sha = self.ctx.platform.git_sha();

        if info.git_sha == running_sha && info.filter_key != BM_DFU_IMG_INFO_FORCE_UPDATE {
            log::info!("[DFU] already running {:08x}, refusing update", running_sha);
            self.send(host, DfuMessage::Ack(DfuResult::fail(DfuErr::SameVer)));
            return None;
        }

        self.client.host_node_id = host;
        if info.chunk_size == 0 || info.chunk_size > self.settings.max_chunk_size {
            log::warn!("[DFU] chunk size {} not supported", info.chunk_size);
            self.send(host, DfuMessage::Abort(DfuResult::fail(DfuErr::Aborted)));
            return self.fail(DfuErr::ChunkSize);
        }

        let slot_size = self.ctx.slot.size();
        let num_chunks = info.num_chunks();
        if info.image_size == 0 || info.image_size > slot_size || num_chunks > u16::MAX as u32 + 1 {
            log::warn!(
                "[DFU] image of {} bytes does not fit the {} byte slot",
                info.image_size,
                slot_size
            );
            self.send(host, DfuMessage::Ack(DfuResult::fail(DfuErr::TooLarge)));
            return None;
        }

        if let Err(e) = self.ctx.slot.erase(0, slot_size) {
            log::error!("[DFU] erasing update slot: {}", e);
            self.send(host, DfuMessage::Ack(DfuResult::fail(DfuErr::FlashAccess)));
            return self.fail(DfuErr::FlashAccess);
        }

        self.client.image_size = info.image_size;
        self.client.num_chunks = num_chunks;
        self.client.crc16 = info.crc16;

        self.send(host, DfuMessage::Ack(DfuResult::ok()));
        self.ctx.reboot_store.store(RebootInfo::new(
            info.major_ver,
            info.minor_ver,
            host,
            info.git_sha,
        ));
        log::info!(
            "[DFU] receiving {} bytes in {} chunks from {:016x}",
            info.image_size,
            num_chunks,
            host
        );
        Some(DfuState::ClientReceiving)
    }

    // ========================================================================
    // ClientReceiving
    // ========================================================================

    pub(super) fn client_receiving_entry(&mut self) -> Option<DfuState> {
        self.client.current_chunk = 0;
        self.client.chunk_retry = 0;
        self.client.page_buf.clear();
        self.client.flash_offset = 0;
        self.client.running_crc16 = 0;
        self.request_chunk();
        None
    }

    fn request_chunk(&mut self) {
        let seq_num = self.client.current_chunk as u16;
        self.send(self.client.host_node_id, DfuMessage::PayloadReq { seq_num });
        self.timers.start(DfuTimer::Chunk, self.settings.chunk_timeout());
    }

    pub(super) fn client_receiving_run(&mut self, event: DfuEvent) -> Option<DfuState> {
        match event {
            DfuEvent::ImageChunk { data } => {
                self.timers.stop(DfuTimer::Chunk);
                self.client.running_crc16 = crc16_ccitt(self.client.running_crc16, &data);
                if let Err(e) = self.buffer_chunk(&data) {
                    log::error!("[DFU] writing chunk {}: {}", self.client.current_chunk, e);
                    return self.fail(DfuErr::BmFrame);
                }

                self.client.current_chunk += 1;
                self.client.chunk_retry = 0;
                if self.client.current_chunk < self.client.num_chunks {
                    self.request_chunk();
                    return None;
                }

                if let Err(e) = self.flush_page() {
                    log::error!("[DFU] flushing last page: {}", e);
                    return self.fail(DfuErr::BmFrame);
                }
                Some(DfuState::ClientValidating)
            }
            DfuEvent::ChunkTimeout => {
                self.client.chunk_retry += 1;
                if self.client.chunk_retry >= self.settings.max_chunk_retries {
                    log::warn!("[DFU] chunk {} never arrived", self.client.current_chunk);
                    self.send(
                        self.client.host_node_id,
                        DfuMessage::Abort(DfuResult::fail(DfuErr::Aborted)),
                    );
                    return self.fail(DfuErr::Timeout);
                }
                self.request_chunk();
                None
            }
            DfuEvent::Heartbeat => {
                self.timers.start(DfuTimer::Chunk, self.settings.chunk_timeout());
                None
            }
            DfuEvent::ReceivedUpdateRequest { addr, info } => {
                log::info!("[DFU] START repeated, restarting transfer");
                self.client_process_update_request(addr, info)
            }
            DfuEvent::AbortReceived => self.fail(DfuErr::Aborted),
            _ => None,
        }
    }

    fn buffer_chunk(&mut self, data: &[u8]) -> Result<(), FlashError> {
        self.client.page_buf.extend_from_slice(data);
        while self.client.page_buf.len() >= BM_IMG_PAGE_LENGTH {
            self.ctx
                .slot
                .write(self.client.flash_offset, &self.client.page_buf[..BM_IMG_PAGE_LENGTH])?;
            self.client.flash_offset += BM_IMG_PAGE_LENGTH as u32;
            self.client.page_buf.drain(..BM_IMG_PAGE_LENGTH);
        }
        Ok(())
    }

    fn flush_page(&mut self) -> Result<(), FlashError> {
        if self.client.page_buf.is_empty() {
            return Ok(());
        }
        self.ctx
            .slot
            .write(self.client.flash_offset, &self.client.page_buf)?;
        self.client.flash_offset += self.client.page_buf.len() as u32;
        self.client.page_buf.clear();
        Ok(())
    }

    // ========================================================================
    // ClientValidating
    // ========================================================================

    pub(super) fn client_validating_entry(&mut self) -> Option<DfuState> {
        let host = self.client.host_node_id;
        if self.client.image_size != self.client.flash_offset {
            log::warn!(
                "[DFU] wrote {} bytes, expected {}",
                self.client.flash_offset,
                self.client.image_size
            );
            self.send(host, DfuMessage::End(DfuResult::fail(DfuErr::MismatchLen)));
            return self.fail(DfuErr::MismatchLen);
        }
        if self.client.crc16 != self.client.running_crc16 {
            log::warn!(
                "[DFU] CRC {:04x} does not match expected {:04x}",
                self.client.running_crc16,
                self.client.crc16
            );
            self.send(host, DfuMessage::End(DfuResult::fail(DfuErr::BadCrc)));
            return self.fail(DfuErr::BadCrc);
        }
        log::info!("[DFU] image validated");
        Some(DfuState::ClientRebootReq)
    }

    // ========================================================================
    // ClientRebootReq
    // ========================================================================

    pub(super) fn client_reboot_req_entry(&mut self) -> Option<DfuState> {
        self.client.chunk_retry = 0;
        self.send_reboot_request();
        None
    }

    fn send_reboot_request(&mut self) {
        self.send(self.client.host_node_id, DfuMessage::RebootReq);
        self.timers.start(DfuTimer::Chunk, self.settings.chunk_timeout());
    }

    pub(super) fn client_reboot_req_run(&mut self, event: DfuEvent) -> Option<DfuState> {
        match event {
            DfuEvent::Reboot => {
                self.timers.stop(DfuTimer::Chunk);
                Some(DfuState::ClientActivating)
            }
            DfuEvent::ChunkTimeout => {
                self.client.chunk_retry += 1;
                if self.client.chunk_retry >= self.settings.max_chunk_retries {
                    self.send(
                        self.client.host_node_id,
                        DfuMessage::Abort(DfuResult::fail(DfuErr::Aborted)),
                    );
                    return self.fail(DfuErr::Timeout);
                }
                self.send_reboot_request();
                None
            }
            DfuEvent::AbortReceived => self.fail(DfuErr::Aborted),
            _ => None,
        }
    }

    // ========================================================================
    // ClientActivating
    // ========================================================================

    pub(super) fn client_activating_entry(&mut self) -> Option<DfuState> {
        log::info!("[DFU] activating new image");
        self.ctx.platform.set_pending_and_reset();
        None
    }

    // ========================================================================
    // ClientRebootDone
    // ========================================================================

    pub(super) fn client_reboot_done_entry(&mut self) -> Option<DfuState> {
        let info = self.ctx.reboot_store.load();
        self.client.host_node_id = info.host_node_id;
        self.set_peer(info.host_node_id);
        self.client.chunk_retry = 0;

        let running_sha = self.ctx.platform.git_sha();
        if running_sha == info.git_sha && !self.ctx.platform.confirm_enabled() {
            log::info!("[DFU] force-confirming {:08x} without the host", running_sha);
            self.ctx.reboot_store.clear();
            self.ctx.platform.confirm_update();
            self.ctx.platform.set_confirm_enabled(true);
            Some(DfuState::Idle)
        } else if running_sha == info.git_sha {
            log::info!(
                "[DFU] booted v{}.{} ({:08x}), confirming with host",
                info.major,
                info.minor,
                running_sha
            );
            self.send_boot_complete();
            None
        } else {
            log::error!(
                "[DFU] booted {:08x}, expected {:08x}",
                running_sha,
                info.git_sha
            );
            self.send(
                info.host_node_id,
                DfuMessage::End(DfuResult::fail(DfuErr::WrongVer)),
            );
            self.revert_update();
            self.fail(DfuErr::WrongVer)
        }
    }

    fn send_boot_complete(&mut self) {
        self.send(self.client.host_node_id, DfuMessage::BootComplete);
        self.timers.start(DfuTimer::Chunk, self.settings.chunk_timeout());
    }

    fn revert_update(&mut self) {
        self.ctx.reboot_store.clear();
        self.ctx.platform.fail_update_and_reset();
    }

    pub(super) fn client_reboot_done_run(&mut self, event: DfuEvent) -> Option<DfuState> {
        let host = self.client.host_node_id;
        match event {
            DfuEvent::UpdateEnd(result) if result.success => {
                self.timers.stop(DfuTimer::Chunk);
                self.ctx.platform.confirm_update();
                self.send(host, DfuMessage::End(DfuResult::ok()));
                log::info!("[DFU] update confirmed");
                Some(DfuState::Idle)
            }
            DfuEvent::UpdateEnd(result) => {
                self.timers.stop(DfuTimer::Chunk);
                self.revert_update();
                self.fail(result.err)
            }
            DfuEvent::ChunkTimeout => {
                self.client.chunk_retry += 1;
                if self.client.chunk_retry >= self.settings.max_chunk_retries {
                    self.send(
                        host,
                        DfuMessage::Abort(DfuResult::fail(DfuErr::ConfirmationAbort)),
                    );
                    self.revert_update();
                    return self.fail(DfuErr::ConfirmationAbort);
                }
                self.send_boot_complete();
                None
            }
            DfuEvent::AbortReceived => {
                self.revert_update();
                self.fail(DfuErr::Aborted)
            }
            _ => None,
        }
    }
}
