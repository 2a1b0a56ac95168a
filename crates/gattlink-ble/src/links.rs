//! Per-peripheral link bookkeeping
//!
//! btleplug reports the end of a link from two places: the disconnect call
//! returns, and the adapter emits `DeviceDisconnected`. A late connect result
//! can also outlive the attempt that started it. The table decides which of
//! these signals reach the core, so each link ends exactly once.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Connecting(u64),
    Connected(u64),
}

#[derive(Debug, Default)]
pub(crate) struct LinkTable {
    links: HashMap<String, Link>,
    next_attempt: u64,
}

impl LinkTable {
    /// Start a connect attempt, superseding any earlier one
    pub fn begin(&mut self, key: &str) -> u64 {
        self.next_attempt += 1;
        self.links
            .insert(key.to_string(), Link::Connecting(self.next_attempt));
        self.next_attempt
    }

    /// Attempt succeeded; `false` if it was aborted or superseded meanwhile
    pub fn established(&mut self, key: &str, attempt: u64) -> bool {
        match self.links.get_mut(key) {
            Some(link) if *link == Link::Connecting(attempt) => {
                *link = Link::Connected(attempt);
                true
            }
            _ => false,
        }
    }

    /// Attempt failed; `false` if nobody is waiting for it any more
    pub fn failed(&mut self, key: &str, attempt: u64) -> bool {
        if self.links.get(key) == Some(&Link::Connecting(attempt)) {
            self.links.remove(key);
            true
        } else {
            false
        }
    }

    /// Requested disconnect or abort; `true` if the core must be told
    pub fn close(&mut self, key: &str) -> bool {
        self.links.remove(key).is_some()
    }

    /// Adapter reported the link down; only an established link counts
    ///
    /// A pending attempt is left alone: it still reports through its own
    /// connect result.
    pub fn lost(&mut self, key: &str) -> bool {
        match self.links.get(key) {
            Some(Link::Connected(_)) => {
                self.links.remove(key);
                true
            }
            _ => false,
        }
    }

    /// No attempt or link is tracked for `key`
    pub fn is_idle(&self, key: &str) -> bool {
        !self.links.contains_key(key)
    }
}
