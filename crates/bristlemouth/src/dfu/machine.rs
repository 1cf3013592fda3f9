// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DFU state machine driver.
//!
//! [`DfuCore`] owns the state, the per-role contexts and the timers. It is
//! driven one event at a time; every state function returns the next state
//! (if any) and the driver applies it after the function has returned, so a
//! `run` never observes its own transition.

use super::client::ClientCtx;
use super::error::DfuErr;
use super::event::DfuEvent;
use super::host::HostCtx;
use super::messages::{DfuFrame, DfuMessage};
use super::platform::{DfuTransport, FlashPartition, Platform, RebootStore};
use super::timer::{DfuTimer, DfuTimers};
use crate::config::DfuSettings;
use crate::NodeId;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

/// DFU states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DfuState {
    Init = 0,
    Idle = 1,
    Error = 2,
    ClientReceiving = 3,
    ClientValidating = 4,
    ClientRebootReq = 5,
    ClientRebootDone = 6,
    ClientActivating = 7,
    HostReqUpdate = 8,
    HostUpdate = 9,
}

impl DfuState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Idle,
            2 => Self::Error,
            3 => Self::ClientReceiving,
            4 => Self::ClientValidating,
            5 => Self::ClientRebootReq,
            6 => Self::ClientRebootDone,
            7 => Self::ClientActivating,
            8 => Self::HostReqUpdate,
            9 => Self::HostUpdate,
            _ => Self::Init,
        }
    }

    pub fn is_client(self) -> bool {
        matches!(
            self,
            Self::ClientReceiving
                | Self::ClientValidating
                | Self::ClientRebootReq
                | Self::ClientRebootDone
                | Self::ClientActivating
        )
    }

    pub fn is_host(self) -> bool {
        matches!(self, Self::HostReqUpdate | Self::HostUpdate)
    }
}

impl fmt::Display for DfuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Platform services the state machine runs against.
#[derive(Clone)]
pub struct DfuContext {
    pub transport: Arc<dyn DfuTransport>,
    /// Host: partition holding the image to send
    pub image: Arc<dyn FlashPartition>,
    /// Client: partition the received image is written to
    pub slot: Arc<dyn FlashPartition>,
    pub reboot_store: Arc<dyn RebootStore>,
    pub platform: Arc<dyn Platform>,
}

/// State visible outside the DFU thread.
#[derive(Debug, Default)]
pub(crate) struct DfuShared {
    state: AtomicU8,
    /// Host node while a client state is active, client node while a host
    /// state is active.
    peer_node_id: AtomicU64,
}

impl DfuShared {
    pub(crate) fn state(&self) -> DfuState {
        DfuState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn peer_node_id(&self) -> NodeId {
        self.peer_node_id.load(Ordering::Acquire)
    }
}

pub struct DfuCore {
    pub(super) node_id: NodeId,
    pub(super) settings: DfuSettings,
    pub(super) ctx: DfuContext,
    pub(super) state: DfuState,
    pub(super) error: DfuErr,
    pub(super) host: HostCtx,
    pub(super) client: ClientCtx,
    pub(super) timers: DfuTimers,
    shared: Arc<DfuShared>,
}

impl DfuCore {
    pub fn new(node_id: NodeId, settings: DfuSettings, ctx: DfuContext) -> Self {
        Self {
            node_id,
            settings,
            ctx,
            state: DfuState::Init,
            error: DfuErr::None,
            host: HostCtx::default(),
            client: ClientCtx::default(),
            timers: DfuTimers::new(),
            shared: Arc::new(DfuShared::default()),
        }
    }

    pub fn state(&self) -> DfuState {
        self.state
    }

    /// Last error the machine recorded, local or reported by the peer.
    pub fn last_error(&self) -> DfuErr {
        self.error
    }

    pub fn timers(&self) -> &DfuTimers {
        &self.timers
    }

    pub(crate) fn timers_mut(&mut self) -> &mut DfuTimers {
        &mut self.timers
    }

    pub(crate) fn shared(&self) -> Arc<DfuShared> {
        Arc::clone(&self.shared)
    }

    /// Feed one event through the current state's `run`.
    pub fn handle_event(&mut self, event: DfuEvent) {
        let event = match event {
            DfuEvent::BeginHost {
                client_node_id,
                finish_cb,
                ..
            } if self.state != DfuState::Idle => {
                log::warn!(
                    "[DFU] update to {:016x} rejected, busy in {}",
                    client_node_id,
                    self.state
                );
                finish_cb(false, DfuErr::InProgress, client_node_id);
                return;
            }
            other => other,
        };

        log::trace!("[DFU] {} event {:?}", self.state, event);
        let next = match self.state {
            DfuState::Init => self.init_run(event),
            DfuState::Idle => self.idle_run(event),
            DfuState::Error => None,
            DfuState::ClientReceiving => self.client_receiving_run(event),
            DfuState::ClientRebootReq => self.client_reboot_req_run(event),
            DfuState::ClientRebootDone => self.client_reboot_done_run(event),
            // Pass-through states, their entry always moves on or resets.
            DfuState::ClientValidating | DfuState::ClientActivating => None,
            DfuState::HostReqUpdate => self.host_req_update_run(event),
            DfuState::HostUpdate => self.host_update_run(event),
        };

        if let Some(next) = next {
            self.transition(next);
        }
    }

    fn transition(&mut self, mut next: DfuState) {
        loop {
            self.exit();
            log::debug!("[DFU] {} -> {}", self.state, next);
            self.set_state(next);
            match self.entry() {
                Some(follow) => next = follow,
                None => break,
            }
        }
    }

    /// Update the peer filter when the peer changes inside an entry.
    pub(super) fn set_peer(&self, peer: NodeId) {
        self.shared.peer_node_id.store(peer, Ordering::Release);
    }

    fn set_state(&mut self, state: DfuState) {
        let peer = if state.is_client() {
            self.client.host_node_id
        } else if state.is_host() {
            self.host.client_node_id
        } else {
            0
        };
        self.shared.peer_node_id.store(peer, Ordering::Release);
        self.shared.state.store(state as u8, Ordering::Release);
        self.state = state;
    }

    fn entry(&mut self) -> Option<DfuState> {
        match self.state {
            DfuState::Init => None,
            DfuState::Idle => self.idle_entry(),
            DfuState::Error => self.error_entry(),
            DfuState::ClientReceiving => self.client_receiving_entry(),
            DfuState::ClientValidating => self.client_validating_entry(),
            DfuState::ClientRebootReq => self.client_reboot_req_entry(),
            DfuState::ClientRebootDone => self.client_reboot_done_entry(),
            DfuState::ClientActivating => self.client_activating_entry(),
            DfuState::HostReqUpdate => self.host_req_update_entry(),
            DfuState::HostUpdate => self.host_update_entry(),
        }
    }

    fn exit(&mut self) {
        match self.state {
            DfuState::ClientReceiving | DfuState::ClientRebootReq | DfuState::ClientRebootDone => {
                self.timers.stop(DfuTimer::Chunk);
            }
            DfuState::HostReqUpdate => self.timers.stop(DfuTimer::Ack),
            DfuState::HostUpdate => self.timers.stop(DfuTimer::Heartbeat),
            _ => {}
        }
    }

    // ========================================================================
    // Common states
    // ========================================================================

    fn init_run(&mut self, event: DfuEvent) -> Option<DfuState> {
        match event {
            DfuEvent::InitSuccess => {
                if self.ctx.reboot_store.load().is_valid() {
                    log::info!("[DFU] resuming after update reboot");
                    Some(DfuState::ClientRebootDone)
                } else {
                    Some(DfuState::Idle)
                }
            }
            _ => None,
        }
    }

    fn idle_entry(&mut self) -> Option<DfuState> {
        self.timers.stop_all();
        self.ctx.reboot_store.clear();
        None
    }

    fn idle_run(&mut self, event: DfuEvent) -> Option<DfuState> {
        match event {
            DfuEvent::ReceivedUpdateRequest { addr, info } => {
                self.client_process_update_request(addr, info)
            }
            DfuEvent::BeginHost {
                info,
                client_node_id,
                finish_cb,
                timeout,
            } => self.host_begin(info, client_node_id, finish_cb, timeout),
            _ => None,
        }
    }

    fn error_entry(&mut self) -> Option<DfuState> {
        self.timers.stop_all();
        log::error!("[DFU] error: {} ({})", self.error, self.error.code());

        if let Some(finish_cb) = self.host.finish_cb.take() {
            finish_cb(false, self.error, self.host.client_node_id);
        }

        if self.error.is_fatal() {
            None
        } else {
            Some(DfuState::Idle)
        }
    }

    // ========================================================================
    // Helpers shared by host and client
    // ========================================================================

    pub(super) fn fail(&mut self, err: DfuErr) -> Option<DfuState> {
        self.error = err;
        Some(DfuState::Error)
    }

    pub(super) fn send(&self, dst: NodeId, msg: DfuMessage) -> bool {
        let ty = msg.frame_type();
        let frame = DfuFrame::new(self.node_id, dst, msg).encode();
        match self.ctx.transport.send(frame) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("[DFU] failed to send {:#04x} to {:016x}: {}", ty, dst, e);
                false
            }
        }
    }
}
