//! ICE restart policy
//!
//! A connected peer that loses ICE connectivity gets exactly one restart.
//! The restart must complete within a deadline; a second failure after the
//! restart, or a missed deadline, closes the connection for good.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Outcome of reporting an ICE failure to the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRestartDecision {
    /// Send an ICE restart offer and wait up to the deadline
    Restart,
    /// The single restart was already used; close the connection
    GiveUp,
}

/// Single-shot ICE restart bookkeeping for one connection
#[derive(Debug, Clone)]
pub struct IceRestartPolicy {
    /// Maximum number of restarts (always 1 for whiteboard peers)
    max_restarts: u32,
    /// Restarts attempted so far
    attempts: u32,
    /// Deadline for a restart to bring the transport back
    timeout: Duration,
    /// When the in-flight restart began
    started_at: Option<Instant>,
}

impl IceRestartPolicy {
    /// Create a policy allowing one restart within `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            max_restarts: 1,
            attempts: 0,
            timeout,
            started_at: None,
        }
    }

    /// Record an ICE failure and decide what to do
    pub fn on_ice_failure(&mut self) -> IceRestartDecision {
        if self.attempts < self.max_restarts {
            self.attempts += 1;
            self.started_at = Some(Instant::now());
            info!(attempt = self.attempts, "Starting ICE restart");
            IceRestartDecision::Restart
        } else {
            debug!(attempts = self.attempts, "ICE restart budget exhausted");
            IceRestartDecision::GiveUp
        }
    }

    /// Record that the transport came back; returns how long recovery took
    pub fn on_recovered(&mut self) -> Option<Duration> {
        self.started_at.take().map(|t| t.elapsed())
    }

    /// A restart is in flight
    pub fn in_progress(&self) -> bool {
        self.started_at.is_some()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
