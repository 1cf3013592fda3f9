// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! One-shot DFU timers.
//!
//! Timers are plain deadlines owned by the state machine. The `bm-dfu`
//! thread sleeps until the earliest one and turns an expired deadline into
//! its timeout event, so stopping a timer can never race with its expiry.

use super::event::DfuEvent;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuTimer {
    /// Host: waiting for the ACK to START
    Ack,
    /// Host: silence from the client
    Heartbeat,
    /// Client: waiting for a chunk, REBOOT or END
    Chunk,
    /// Host: whole-update watchdog
    Update,
}

impl DfuTimer {
    const ALL: [DfuTimer; 4] = [Self::Ack, Self::Heartbeat, Self::Chunk, Self::Update];

    fn index(self) -> usize {
        self as usize
    }

    /// Event produced when this timer expires.
    pub fn event(self) -> DfuEvent {
        match self {
            Self::Ack => DfuEvent::AckTimeout,
            Self::Heartbeat => DfuEvent::HeartbeatTimeout,
            Self::Chunk => DfuEvent::ChunkTimeout,
            Self::Update => DfuEvent::AbortReceived,
        }
    }
}

#[derive(Debug, Default)]
pub struct DfuTimers {
    deadlines: [Option<Instant>; 4],
}

impl DfuTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm (or re-arm) `timer` to fire `after` from now.
    pub fn start(&mut self, timer: DfuTimer, after: Duration) {
        self.deadlines[timer.index()] = Some(Instant::now() + after);
    }

    pub fn stop(&mut self, timer: DfuTimer) {
        self.deadlines[timer.index()] = None;
    }

    pub fn stop_all(&mut self) {
        self.deadlines = [None; 4];
    }

    pub fn is_running(&self, timer: DfuTimer) -> bool {
        self.deadlines[timer.index()].is_some()
    }

    /// Earliest armed deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Disarm and return the earliest timer whose deadline is at or before `now`.
    pub fn take_expired(&mut self, now: Instant) -> Option<DfuTimer> {
        let expired = DfuTimer::ALL
            .into_iter()
            .filter(|t| self.deadlines[t.index()].is_some_and(|d| d <= now))
            .min_by_key(|t| self.deadlines[t.index()])?;
        self.stop(expired);
        Some(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_timer_never_expires() {
        let mut timers = DfuTimers::new();
        timers.start(DfuTimer::Ack, Duration::ZERO);
        timers.stop(DfuTimer::Ack);
        assert_eq!(timers.take_expired(Instant::now() + Duration::from_secs(1)), None);
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_earliest_expires_first_and_is_disarmed() {
        let mut timers = DfuTimers::new();
        timers.start(DfuTimer::Update, Duration::from_millis(20));
        timers.start(DfuTimer::Heartbeat, Duration::from_millis(10));
        timers.start(DfuTimer::Chunk, Duration::from_secs(60));

        let later = Instant::now() + Duration::from_millis(50);
        assert_eq!(timers.take_expired(later), Some(DfuTimer::Heartbeat));
        assert!(!timers.is_running(DfuTimer::Heartbeat));
        assert_eq!(timers.take_expired(later), Some(DfuTimer::Update));
        assert_eq!(timers.take_expired(later), None);
        assert!(timers.is_running(DfuTimer::Chunk));
    }

    #[test]
    fn test_restart_pushes_deadline_out() {
        let mut timers = DfuTimers::new();
        timers.start(DfuTimer::Chunk, Duration::ZERO);
        timers.start(DfuTimer::Chunk, Duration::from_secs(60));
        assert_eq!(timers.take_expired(Instant::now()), None);
    }

    #[test]
    fn test_update_timer_maps_to_abort() {
        assert!(matches!(DfuTimer::Update.event(), DfuEvent::AbortReceived));
        assert!(matches!(DfuTimer::Chunk.event(), DfuEvent::ChunkTimeout));
    }
}
