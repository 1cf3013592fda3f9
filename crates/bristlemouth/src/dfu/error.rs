// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DFU protocol error codes and API errors.

use std::fmt;

/// Protocol error kinds carried in ACK/END/ABORT frames and reported to the
/// finish callback. Discriminants are the wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum DfuErr {
    #[default]
    None = 0,
    TooLarge = 1,
    SameVer = 2,
    MismatchLen = 3,
    BadCrc = 4,
    ImgChunkAccess = 5,
    Timeout = 6,
    BmFrame = 7,
    Aborted = 8,
    WrongVer = 9,
    InProgress = 10,
    ChunkSize = 11,
    UnknownNodeId = 12,
    ConfirmationAbort = 13,
    FlashAccess = 14,
}

impl DfuErr {
    /// Decode a wire code.
    pub fn from_u8(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::None,
            1 => Self::TooLarge,
            2 => Self::SameVer,
            3 => Self::MismatchLen,
            4 => Self::BadCrc,
            5 => Self::ImgChunkAccess,
            6 => Self::Timeout,
            7 => Self::BmFrame,
            8 => Self::Aborted,
            9 => Self::WrongVer,
            10 => Self::InProgress,
            11 => Self::ChunkSize,
            12 => Self::UnknownNodeId,
            13 => Self::ConfirmationAbort,
            14 => Self::FlashAccess,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Fatal errors park the state machine in `Error`.
    #[inline]
    pub fn is_fatal(self) -> bool {
        self >= Self::FlashAccess
    }
}

impl fmt::Display for DfuErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::None => "no error",
            Self::TooLarge => "image too large for client",
            Self::SameVer => "client already running this image",
            Self::MismatchLen => "length mismatch",
            Self::BadCrc => "CRC mismatch",
            Self::ImgChunkAccess => "unable to get image chunk",
            Self::Timeout => "DFU timeout",
            Self::BmFrame => "frame processing error",
            Self::Aborted => "aborted",
            Self::WrongVer => "client booted with the wrong version",
            Self::InProgress => "an update is already in progress",
            Self::ChunkSize => "chunk size too large",
            Self::UnknownNodeId => "unknown node id",
            Self::ConfirmationAbort => "aborted during reboot confirmation",
            Self::FlashAccess => "flash access error (fatal)",
        };
        f.write_str(msg)
    }
}

/// Errors returned by the DFU API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DfuError {
    /// Requested chunk size exceeds the maximum
    ChunkTooLarge(u16),
    /// State machine is not idle
    InProgress,
    /// Event queue full
    QueueFull,
    /// Frame could not be decoded
    Decode(&'static str),
    /// Frame could not be sent
    Transport(String),
    /// DFU thread has stopped
    Stopped,
    /// DFU thread could not be spawned
    Spawn,
}

impl fmt::Display for DfuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChunkTooLarge(size) => write!(f, "chunk size {} too large", size),
            Self::InProgress => write!(f, "DFU already in progress"),
            Self::QueueFull => write!(f, "DFU event queue full"),
            Self::Decode(what) => write!(f, "DFU frame decode error: {}", what),
            Self::Transport(msg) => write!(f, "DFU transport error: {}", msg),
            Self::Stopped => write!(f, "DFU thread stopped"),
            Self::Spawn => write!(f, "failed to spawn DFU thread"),
        }
    }
}

impl std::error::Error for DfuError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_codes_round_trip() {
        for code in 0..=14u8 {
            let err = DfuErr::from_u8(code).expect("known code");
            assert_eq!(err.code(), code);
        }
        assert_eq!(DfuErr::from_u8(15), None);
    }

    #[test]
    fn test_only_flash_access_is_fatal() {
        assert!(DfuErr::FlashAccess.is_fatal());
        assert!(!DfuErr::ConfirmationAbort.is_fatal());
        assert!(!DfuErr::Timeout.is_fatal());
        assert!(!DfuErr::None.is_fatal());
    }
}
