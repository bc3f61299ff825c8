// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! State shared between the sampler thread and the control loop.
//!
//! Only three things cross that boundary: the gesture queue, the page index and
//! running flag in [`SharedState`], and the [`Shutdown`] handle.

use crate::button::ButtonEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Notify, mpsc};

pub type EventSender = mpsc::UnboundedSender<ButtonEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ButtonEvent>;

/// Ordered, unbounded gesture queue. The sampler never blocks on it.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

// ---------------------------------------------------------------------------
// Shared cells
// ---------------------------------------------------------------------------

/// Slider page index and fan running flag.
#[derive(Debug)]
pub struct SharedState {
    page: AtomicUsize,
    running: AtomicBool,
}

impl SharedState {
    /// First page, fans running.
    pub fn new() -> Self {
        Self {
            page: AtomicUsize::new(0),
            running: AtomicBool::new(true),
        }
    }

    /// Current page index, reduced modulo `page_count`.
    pub fn page(&self, page_count: usize) -> usize {
        if page_count == 0 {
            return 0;
        }
        self.page.load(Ordering::Acquire) % page_count
    }

    /// Move to the next page, wrapping after the last one. Returns the new index.
    pub fn advance_page(&self, page_count: usize) -> usize {
        if page_count == 0 {
            return 0;
        }
        let previous = self
            .page
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |i| {
                Some((i + 1) % page_count)
            })
            .unwrap_or_else(|current| current);
        (previous + 1) % page_count
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Flip the running flag. Returns the new value.
    pub fn toggle_running(&self) -> bool {
        !self.running.fetch_xor(true, Ordering::AcqRel)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Process-wide stop signal.
///
/// Threads poll [`Shutdown::is_triggered`]; async code awaits [`Shutdown::wait`].
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Resolve once [`Shutdown::trigger`] has been called, including before this call.
    pub async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent trigger can't slip between.
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_page_wraps() {
        let state = SharedState::new();
        assert_eq!(state.page(3), 0);
        assert_eq!(state.advance_page(3), 1);
        assert_eq!(state.advance_page(3), 2);
        assert_eq!(state.advance_page(3), 0);
        assert_eq!(state.page(3), 0);
    }

    #[test]
    fn test_zero_pages() {
        let state = SharedState::new();
        assert_eq!(state.advance_page(0), 0);
        assert_eq!(state.page(0), 0);
    }

    #[test]
    fn test_toggle_running() {
        let state = SharedState::new();
        assert!(state.running());
        assert!(!state.toggle_running());
        assert!(!state.running());
        assert!(state.toggle_running());
        assert!(state.running());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let state = Arc::new(SharedState::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        state.advance_page(7);
                        state.toggle_running();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // 4000 advances mod 7, and an even number of toggles.
        assert_eq!(state.page(7), 4000 % 7);
        assert!(state.running());
    }

    #[tokio::test]
    async fn test_wait_after_trigger_returns() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .expect("wait should resolve immediately");
    }

    #[tokio::test]
    async fn test_wait_wakes_on_trigger() {
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!shutdown.is_triggered());
        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn test_events_keep_order() {
        let (tx, mut rx) = event_channel();
        let producer = thread::spawn(move || {
            tx.send(ButtonEvent::Click).unwrap();
            tx.send(ButtonEvent::LongPress).unwrap();
            tx.send(ButtonEvent::DoubleClick).unwrap();
        });
        producer.join().unwrap();

        assert_eq!(rx.recv().await, Some(ButtonEvent::Click));
        assert_eq!(rx.recv().await, Some(ButtonEvent::LongPress));
        assert_eq!(rx.recv().await, Some(ButtonEvent::DoubleClick));
        assert_eq!(rx.recv().await, None);
    }
}
