//! Keyed cancel-and-restart timers
//!
//! Each key has at most one live timer. Re-arming a key aborts the previous
//! timer; a firing that raced with a re-arm carries an old token and is
//! discarded by `take_if_current`.

use super::SessionEvent;
use crate::peer::PeerId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// What a timer is for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Debounced snapshot broadcast for a page
    Snapshot(usize),
    /// End of a stroke pacing window for a peer
    StrokeFlush(PeerId),
    /// Deadline of an ICE restart for a peer
    IceRestart(PeerId),
}

impl TimerKey {
    fn peer(&self) -> Option<&PeerId> {
        match self {
            TimerKey::Snapshot(_) => None,
            TimerKey::StrokeFlush(peer) | TimerKey::IceRestart(peer) => Some(peer),
        }
    }
}

/// A timer expired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    pub token: u64,
}

/// Timers owned by the session event loop
#[derive(Debug)]
pub struct TimerSet {
    tx: mpsc::UnboundedSender<SessionEvent>,
    active: HashMap<TimerKey, (u64, JoinHandle<()>)>,
    next_token: u64,
}

impl TimerSet {
    pub fn new(tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            tx,
            active: HashMap::new(),
            next_token: 0,
        }
    }

    /// Start (or restart) the timer for `key`
    pub fn arm(&mut self, key: TimerKey, after: Duration) {
        self.cancel(&key);

        self.next_token += 1;
        let token = self.next_token;
        let tx = self.tx.clone();
        let fired = TimerFired {
            key: key.clone(),
            token,
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(SessionEvent::Timer(fired));
        });

        trace!(?key, token, ?after, "Timer armed");
        self.active.insert(key, (token, handle));
    }

    /// Stop the timer for `key`; returns true if one was running
    pub fn cancel(&mut self, key: &TimerKey) -> bool {
        match self.active.remove(key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Accept a firing if it belongs to the live timer of its key
    pub fn take_if_current(&mut self, fired: &TimerFired) -> bool {
        match self.active.get(&fired.key) {
            Some((token, _)) if *token == fired.token => {
                self.active.remove(&fired.key);
                true
            }
            _ => {
                trace!(key = ?fired.key, token = fired.token, "Stale timer ignored");
                false
            }
        }
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.active.contains_key(key)
    }

    /// Stop every timer tied to `peer_id`
    pub fn cancel_peer(&mut self, peer_id: &PeerId) {
        self.active.retain(|key, (_, handle)| {
            if key.peer() == Some(peer_id) {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Stop everything
    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.active.drain() {
            handle.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
