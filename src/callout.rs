//! Callout scheduler: pending timeouts kept as a delta list.
//!
//! Each entry stores the time remaining *after* the entry in front of it
//! expires, so only the head is ever measured against the real clock.
//! The event loop arms one timer for [`CalloutList::next_expiry`] and
//! reports real elapsed time back through [`CalloutList::resync`].

use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Callout<T> {
    delta: Duration,
    what: T,
}

/// `T` is the handler together with its argument; `cancel` matches on it.
#[derive(Debug, Clone)]
pub struct CalloutList<T> {
    entries: VecDeque<Callout<T>>,
}

impl<T> Default for CalloutList<T> {
    fn default() -> Self {
        CalloutList { entries: VecDeque::new() }
    }
}

impl<T: PartialEq> CalloutList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries with equal expiry fire in the order they were scheduled.
    pub fn schedule(&mut self, delay: Duration, what: T) {
        let mut remaining = delay;
        let mut idx = 0;
        while idx < self.entries.len() && self.entries[idx].delta <= remaining {
            remaining -= self.entries[idx].delta;
            idx += 1;
        }
        if let Some(next) = self.entries.get_mut(idx) {
            next.delta -= remaining;
        }
        self.entries.insert(idx, Callout { delta: remaining, what });
    }

    /// Removes the first matching entry; its time goes to the one behind it.
    pub fn cancel(&mut self, what: &T) -> bool {
        let Some(idx) = self.entries.iter().position(|c| &c.what == what) else {
            return false;
        };
        if let Some(removed) = self.entries.remove(idx) {
            if let Some(next) = self.entries.get_mut(idx) {
                next.delta += removed.delta;
            }
        }
        true
    }

    /// Charges real elapsed time against the head entry. Never goes below
    /// zero; a timer that fired early leaves the rest of the delta in place.
    pub fn resync(&mut self, elapsed: Duration) {
        if let Some(head) = self.entries.front_mut() {
            head.delta = head.delta.saturating_sub(elapsed);
        }
    }

    /// What the real timer should be armed for; `None` means disarmed.
    pub fn next_expiry(&self) -> Option<Duration> {
        self.entries.front().map(|c| c.delta)
    }

    /// Pops the head if it is due. Callers drain it in a loop so the
    /// handler of one entry can schedule or cancel others.
    pub fn pop_due(&mut self) -> Option<T> {
        match self.entries.front() {
            Some(head) if head.delta.is_zero() => self.entries.pop_front().map(|c| c.what),
            _ => None,
        }
    }

    pub fn is_pending(&self, what: &T) -> bool {
        self.entries.iter().any(|c| &c.what == what)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries with their absolute time-to-expiry, head first.
    pub fn remaining(&self) -> Vec<(Duration, &T)> {
        let mut total = Duration::ZERO;
        self.entries
            .iter()
            .map(|c| {
                total += c.delta;
                (total, &c.what)
            })
            .collect()
    }
}
