//! Session orchestration
//!
//! A `Session` owns every piece of mutable state (room, peer connections,
//! pages, timers) and processes `SessionEvent`s one at a time from a single
//! queue. Signaling frames, transport callbacks, timer expiries and
//! application commands all arrive on that queue, in arrival order.

pub mod handle;
mod negotiation;
pub mod observer;
#[allow(clippy::module_inception)]
pub mod session;
mod sync;
pub mod timers;

use crate::engine::LinkEvent;
use crate::signaling::protocol::InboundSignal;

pub use handle::{BroadcastStats, Command, SessionHandle, SessionInfo};
pub use observer::{SessionObserver, Severity, TracingObserver};
pub use session::{Session, SessionBuilder};
pub use timers::{TimerFired, TimerKey, TimerSet};

/// Everything the session event loop reacts to
#[derive(Debug)]
pub enum SessionEvent {
    /// A frame from the signaling relay
    Signal(InboundSignal),
    /// The relay connection failed or sent garbage
    SignalingError(String),
    /// Activity on a peer link
    Link(LinkEvent),
    /// A keyed timer expired
    Timer(TimerFired),
    /// A request from the application
    Command(Command),
    /// Every `SessionHandle` was dropped
    HandlesDropped,
}
