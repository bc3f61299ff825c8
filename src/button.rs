// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Key gesture classification.
//!
//! The top-board key idles high and is pulled low while held. The sampler reads the
//! line at a fixed rate into a bounded window, and the window is matched against
//! three run-length patterns anchored at its oldest sample (`1` = high, `0` = low):
//!
//! | Gesture       | Pattern                  |
//! |---------------|--------------------------|
//! | `LongPress`   | `1+ 0{press_len,}`       |
//! | `DoubleClick` | `1+ 0+ 1+ 0+ 1{3,}`      |
//! | `Click`       | `1+ 0+ 1{gap_len,}`      |
//!
//! Patterns are tried in that order. A match emits one event and clears the window.
//! A gesture that doesn't complete inside the window ages out silently.

use crate::board::DigitalInput;
use crate::config::Config;
use crate::coord::{EventSender, Shutdown};
use std::collections::VecDeque;
use std::io;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Idle samples after the second tap that confirm a double click.
pub const DOUBLE_CLICK_SETTLE: usize = 3;

/// A classified key gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonEvent {
    Click,
    DoubleClick,
    LongPress,
}

/// Number of samples covering `seconds` at `rate` Hz.
pub fn samples(seconds: f64, rate: f64) -> usize {
    (seconds * rate).round() as usize
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Classifier {
    window: VecDeque<bool>,
    capacity: usize,
    press_len: usize,
    gap_len: usize,
}

impl Classifier {
    /// `press_len` low samples make a long press; `gap_len` high samples after a
    /// tap make it a single click. The window holds `press_len + 1` samples.
    pub fn new(press_len: usize, gap_len: usize) -> Self {
        let capacity = press_len + 1;
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            press_len,
            gap_len,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let rate = config.board.sample_rate;
        Self::new(
            samples(config.time.press, rate),
            samples(config.time.twice, rate),
        )
    }

    pub fn press_len(&self) -> usize {
        self.press_len
    }

    pub fn gap_len(&self) -> usize {
        self.gap_len
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Feed one line sample. Returns the gesture it completes, if any.
    pub fn push(&mut self, high: bool) -> Option<ButtonEvent> {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(high);

        let event = self.classify();
        if event.is_some() {
            self.window.clear();
        }
        event
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }

    fn classify(&self) -> Option<ButtonEvent> {
        let runs = run_lengths(&self.window);

        // Every pattern opens with an idle run; runs alternate from there, so
        // even indices are high and odd indices are low.
        match runs.first() {
            Some(&(true, _)) => {}
            _ => return None,
        }
        let len = |i: usize| runs.get(i).map(|&(_, n)| n);

        if len(1).is_some_and(|n| n >= self.press_len) {
            Some(ButtonEvent::LongPress)
        } else if len(4).is_some_and(|n| n >= DOUBLE_CLICK_SETTLE) {
            Some(ButtonEvent::DoubleClick)
        } else if len(2).is_some_and(|n| n >= self.gap_len) {
            Some(ButtonEvent::Click)
        } else {
            None
        }
    }
}

/// Run-length encode the window, oldest sample first.
fn run_lengths(window: &VecDeque<bool>) -> Vec<(bool, usize)> {
    let mut runs: Vec<(bool, usize)> = Vec::new();
    for &level in window {
        match runs.last_mut() {
            Some((last, n)) if *last == level => *n += 1,
            _ => runs.push((level, 1)),
        }
    }
    runs
}

// ---------------------------------------------------------------------------
// Sampler thread
// ---------------------------------------------------------------------------

/// Start the sampling thread. It exits within one `period` of `shutdown`
/// triggering, or as soon as the event queue's receiver is dropped.
pub fn spawn_sampler<I>(
    input: I,
    classifier: Classifier,
    period: Duration,
    events: EventSender,
    shutdown: Shutdown,
) -> io::Result<JoinHandle<()>>
where
    I: DigitalInput + Send + 'static,
{
    thread::Builder::new()
        .name("key-sampler".to_string())
        .spawn(move || run_sampler(input, classifier, period, events, shutdown))
}

/// Sampling loop body, run on the current thread.
pub fn run_sampler<I: DigitalInput>(
    mut input: I,
    mut classifier: Classifier,
    period: Duration,
    events: EventSender,
    shutdown: Shutdown,
) {
    log::info!(
        "Key sampler started ({} ms period, {} sample window, long press {} samples, click gap {} samples)",
        period.as_millis(),
        classifier.capacity(),
        classifier.press_len(),
        classifier.gap_len()
    );

    let mut failing = false;
    while !shutdown.is_triggered() {
        match input.read_level() {
            Ok(level) => {
                if failing {
                    log::info!("Key input readable again");
                    failing = false;
                }
                if let Some(event) = classifier.push(level) {
                    log::debug!("Key gesture: {event:?}");
                    if events.send(event).is_err() {
                        log::info!("Event queue closed, key sampler stopping");
                        return;
                    }
                }
            }
            Err(e) => {
                // Only the first failure of a streak is logged. A gap in the
                // samples breaks any gesture in progress.
                if !failing {
                    log::error!("Failed to read key input: {e}");
                    failing = true;
                    classifier.reset();
                }
            }
        }
        thread::sleep(period);
    }

    log::info!("Key sampler stopped");
}
