// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

use std::fmt;

/// Pub/sub errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubError {
    /// Topic is empty or not valid UTF-8 at the requested length
    InvalidTopic,
    /// Topic exceeds `BM_TOPIC_MAX_LEN`
    TopicTooLong(usize),
    /// Wire message too short or inconsistent
    Malformed,
    /// Callback was not subscribed to the topic
    NotSubscribed,
    /// Middleware queue full
    QueueFull,
    /// Middleware thread has stopped
    Stopped,
    /// Middleware thread could not be spawned
    Spawn,
    /// Network transport refused the message
    Transport(String),
}

impl fmt::Display for PubSubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTopic => write!(f, "invalid topic"),
            Self::TopicTooLong(len) => write!(f, "topic too long ({} bytes)", len),
            Self::Malformed => write!(f, "malformed pub/sub message"),
            Self::NotSubscribed => write!(f, "callback not subscribed to topic"),
            Self::QueueFull => write!(f, "middleware queue full"),
            Self::Stopped => write!(f, "middleware stopped"),
            Self::Spawn => write!(f, "failed to spawn middleware thread"),
            Self::Transport(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

impl std::error::Error for PubSubError {}
