// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the L2 engine.

use std::fmt;

/// Errors returned by L2 entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L2Error {
    /// Event queue full or buffer could not be allocated (ENOMEM)
    NoMem,
    /// No recognised device configured (ENODEV)
    NoDevice,
    /// Engine thread has stopped
    QueueClosed,
    /// Engine thread could not be spawned
    Spawn,
}

impl fmt::Display for L2Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMem => write!(f, "L2 queue full or out of memory"),
            Self::NoDevice => write!(f, "no supported network device configured"),
            Self::QueueClosed => write!(f, "L2 engine stopped"),
            Self::Spawn => write!(f, "failed to spawn L2 thread"),
        }
    }
}

impl std::error::Error for L2Error {}
