// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for service request/reply operations.

use crate::pubsub::PubSubError;
use crate::timer_handler::TimerError;
use std::fmt;

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors that can occur during service operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Request or reply data exceeds the maximum service data size
    DataTooLarge { size: usize, max: usize },

    /// `<service>/req` would exceed the topic length limit
    TopicTooLong(usize),

    /// Bounded lock acquisition timed out
    LockTimeout,

    /// Service already has a handler
    AlreadyRegistered(String),

    /// Service has no handler
    NotRegistered(String),

    /// Underlying pub/sub error
    Publish(PubSubError),

    /// Expiry ticker could not be started
    Timer(TimerError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataTooLarge { size, max } => {
                write!(f, "service data too large ({} > {} bytes)", size, max)
            }
            Self::TopicTooLong(len) => write!(f, "service topic too long ({} bytes)", len),
            Self::LockTimeout => write!(f, "timed out acquiring service lock"),
            Self::AlreadyRegistered(name) => write!(f, "service already registered: {}", name),
            Self::NotRegistered(name) => write!(f, "service not registered: {}", name),
            Self::Publish(e) => write!(f, "pub/sub error: {}", e),
            Self::Timer(e) => write!(f, "timer error: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Publish(e) => Some(e),
            Self::Timer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PubSubError> for ServiceError {
    fn from(e: PubSubError) -> Self {
        Self::Publish(e)
    }
}

impl From<TimerError> for ServiceError {
    fn from(e: TimerError) -> Self {
        Self::Timer(e)
    }
}
