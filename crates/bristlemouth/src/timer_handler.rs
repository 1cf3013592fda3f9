// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deferred callback thread and periodic tickers.
//!
//! Timer expiries must never run user work on the timer's own thread.
//! Instead they post a boxed callback to [`TimerCallbackHandler`], whose single
//! worker (`bm-timer-cb`) runs callbacks one at a time in post order.

use crossbeam::channel::{self, RecvTimeoutError, SendTimeoutError, Sender};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Work posted to the callback thread.
pub type TimerCallback = Box<dyn FnOnce() + Send>;

/// Errors returned when posting or spawning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerError {
    /// Queue stayed full for the whole post timeout
    QueueFull,
    /// Callback thread has exited
    Stopped,
    /// Worker thread could not be spawned
    Spawn,
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "timer callback queue full"),
            Self::Stopped => write!(f, "timer callback thread stopped"),
            Self::Spawn => write!(f, "failed to spawn timer thread"),
        }
    }
}

impl std::error::Error for TimerError {}

// ============================================================================
// Callback handler
// ============================================================================

/// Cloneable posting side of a [`TimerCallbackHandler`].
#[derive(Clone)]
pub struct TimerPoster {
    tx: Sender<TimerCallback>,
}

impl TimerPoster {
    /// Queue `cb` for the callback thread, waiting at most `timeout`.
    pub fn post(&self, cb: TimerCallback, timeout: Duration) -> Result<(), TimerError> {
        self.tx.send_timeout(cb, timeout).map_err(|e| match e {
            SendTimeoutError::Timeout(_) => TimerError::QueueFull,
            SendTimeoutError::Disconnected(_) => TimerError::Stopped,
        })
    }
}

/// Owns the `bm-timer-cb` thread.
pub struct TimerCallbackHandler {
    poster: TimerPoster,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TimerCallbackHandler {
    pub fn start(queue_len: usize) -> Result<Self, TimerError> {
        let (tx, rx) = channel::bounded::<TimerCallback>(queue_len);
        let running = Arc::new(AtomicBool::new(true));
        let running_clone = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("bm-timer-cb".to_string())
            .spawn(move || {
                log::debug!("[TIMER] callback thread started");
                while running_clone.load(Ordering::Relaxed) {
                    match rx.recv_timeout(POLL_INTERVAL) {
                        Ok(cb) => cb(),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("[TIMER] callback thread stopped");
            })
            .map_err(|e| {
                log::error!("[TIMER] failed to spawn callback thread: {}", e);
                TimerError::Spawn
            })?;

        Ok(Self {
            poster: TimerPoster { tx },
            running,
            thread: Some(thread),
        })
    }

    pub fn post(&self, cb: TimerCallback, timeout: Duration) -> Result<(), TimerError> {
        self.poster.post(cb, timeout)
    }

    pub fn poster(&self) -> TimerPoster {
        self.poster.clone()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[TIMER] bm-timer-cb thread panicked");
            }
        }
    }
}

impl Drop for TimerCallbackHandler {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Periodic ticker
// ============================================================================

/// Background thread calling `tick` every `period` until stopped.
///
/// Dropping the stop sender disconnects the channel, which wakes the
/// thread out of `recv_timeout` immediately.
pub struct PeriodicTimer {
    stop_tx: Mutex<Option<Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTimer {
    pub fn start<F>(name: &str, period: Duration, mut tick: F) -> Result<Self, TimerError>
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(period) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => tick(),
                }
            })
            .map_err(|e| {
                log::error!("[TIMER] failed to spawn {}: {}", name, e);
                TimerError::Spawn
            })?;

        Ok(Self {
            stop_tx: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Stop ticking and join the thread. Safe to call more than once.
    pub fn stop(&self) {
        drop(self.stop_tx.lock().take());
        if let Some(thread) = self.thread.lock().take() {
            let name = thread.thread().name().unwrap_or("ticker").to_string();
            if thread.join().is_err() {
                log::error!("[TIMER] {} thread panicked", name);
            }
        }
    }
}

impl Drop for PeriodicTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn test_callbacks_run_in_post_order() {
        let handler = TimerCallbackHandler::start(10).expect("start");
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = Arc::clone(&order);
            handler
                .post(Box::new(move || order.lock().push(i)), Duration::from_millis(10))
                .expect("post");
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while order.lock().len() < 5 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_post_after_stop_fails() {
        let mut handler = TimerCallbackHandler::start(1).expect("start");
        let poster = handler.poster();
        handler.stop();
        assert_eq!(
            poster.post(Box::new(|| {}), Duration::from_millis(1)),
            Err(TimerError::Stopped)
        );
    }

    #[test]
    fn test_full_queue_times_out() {
        let handler = TimerCallbackHandler::start(1).expect("start");
        let (release_tx, release_rx) = channel::bounded::<()>(0);

        // Park the worker so the queue can fill.
        handler
            .post(
                Box::new(move || {
                    let _ = release_rx.recv_timeout(Duration::from_secs(2));
                }),
                Duration::from_millis(10),
            )
            .expect("post blocker");
        thread::sleep(Duration::from_millis(20));
        handler
            .post(Box::new(|| {}), Duration::from_millis(10))
            .expect("fills queue");

        assert_eq!(
            handler.post(Box::new(|| {}), Duration::from_millis(5)),
            Err(TimerError::QueueFull)
        );
        let _ = release_tx.send(());
    }

    #[test]
    fn test_periodic_timer_ticks_and_stops() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let timer = PeriodicTimer::start("test-tick", Duration::from_millis(10), move || {
            count_clone.fetch_add(1, Ordering::Relaxed);
        })
        .expect("start");

        thread::sleep(Duration::from_millis(80));
        timer.stop();
        let after_stop = count.load(Ordering::Relaxed);
        assert!(after_stop >= 2, "ticked {} times", after_stop);

        thread::sleep(Duration::from_millis(40));
        assert_eq!(count.load(Ordering::Relaxed), after_stop);
    }

    #[test]
    fn test_stop_survives_panicking_callback() {
        let mut handler = TimerCallbackHandler::start(1).expect("start");
        let poster = handler.poster();
        handler
            .post(Box::new(|| panic!("callback failed")), Duration::from_millis(10))
            .expect("post");

        thread::sleep(Duration::from_millis(50));

        handler.stop();
        assert_eq!(
            poster.post(Box::new(|| {}), Duration::from_millis(1)),
            Err(TimerError::Stopped)
        );
    }

    #[test]
    fn test_periodic_timer_stop_survives_panicking_tick() {
        let timer = PeriodicTimer::start("test-panic", Duration::from_millis(5), || {
            panic!("tick failed");
        })
        .expect("start");

        thread::sleep(Duration::from_millis(40));
        timer.stop();
        timer.stop();
    }
}
