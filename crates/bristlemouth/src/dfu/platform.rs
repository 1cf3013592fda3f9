// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hardware seams used by the DFU state machine.
//!
//! Real targets back these with the MCU flash driver, a no-init RAM region
//! and the bootloader; [`crate::sim`] provides in-memory versions.

use super::error::DfuError;
use crate::NodeId;
use std::fmt;

/// Marks a valid [`RebootInfo`].
pub const DFU_REBOOT_MAGIC: u32 = 0xBADC_0FFE;

/// Flash errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Access outside the partition
    OutOfBounds { offset: u32, len: usize },
    /// Driver reported a failure
    Device,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { offset, len } => {
                write!(f, "flash access out of bounds ({} bytes at {:#x})", len, offset)
            }
            Self::Device => write!(f, "flash device error"),
        }
    }
}

impl std::error::Error for FlashError {}

/// A flash partition addressed from zero.
pub trait FlashPartition: Send + Sync {
    fn size(&self) -> u32;

    fn read(&self, offset: u32, buf: &mut [u8]) -> Result<(), FlashError>;

    fn write(&self, offset: u32, data: &[u8]) -> Result<(), FlashError>;

    fn erase(&self, offset: u32, len: u32) -> Result<(), FlashError>;
}

/// State that must survive the reset between `ClientActivating` and
/// `ClientRebootDone`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebootInfo {
    pub magic: u32,
    pub major: u8,
    pub minor: u8,
    pub host_node_id: NodeId,
    pub git_sha: u32,
}

impl RebootInfo {
    pub fn new(major: u8, minor: u8, host_node_id: NodeId, git_sha: u32) -> Self {
        Self {
            magic: DFU_REBOOT_MAGIC,
            major,
            minor,
            host_node_id,
            git_sha,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == DFU_REBOOT_MAGIC
    }
}

/// Storage for [`RebootInfo`] that outlives a reset.
pub trait RebootStore: Send + Sync {
    fn load(&self) -> RebootInfo;

    fn store(&self, info: RebootInfo);

    fn clear(&self) {
        self.store(RebootInfo::default());
    }
}

/// Bootloader and firmware identity hooks.
pub trait Platform: Send + Sync {
    /// `git_sha` of the running firmware.
    fn git_sha(&self) -> u32;

    /// Mark the freshly written image boot-pending and reset into it.
    fn set_pending_and_reset(&self);

    /// Make the running image permanent.
    fn confirm_update(&self);

    /// Revert to the previous image and reset.
    fn fail_update_and_reset(&self);

    /// Persisted flag: when cleared, a rebooted client confirms its new
    /// image on its own instead of waiting for the host.
    fn confirm_enabled(&self) -> bool {
        true
    }

    /// Persist the confirm flag. Setting it back to `true` after a forced
    /// confirmation resets the node.
    fn set_confirm_enabled(&self, _enabled: bool) {}
}

/// Outbound path for encoded DFU frames.
pub trait DfuTransport: Send + Sync {
    fn send(&self, frame: Vec<u8>) -> Result<(), DfuError>;
}
