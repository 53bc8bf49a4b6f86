//! Core traits shared by the sender and receiver.
//!
//! Both roles are written as explicit state machines that never block. The
//! caller supplies the current time and repeatedly calls [`StateMachine::poll`];
//! each call performs at most one state action and reports what to do next.

use std::time::Instant;

/// Outcome of a single [`StateMachine::poll`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Something happened (a packet was handled or sent, or the state
    /// changed). Poll again right away.
    Progress,
    /// Nothing to do until a datagram arrives or `deadline` passes.
    ///
    /// `None` means no timer is armed (for example a receiver waiting for its
    /// first SYN).
    Idle {
        /// Next armed timer, if any.
        deadline: Option<Instant>,
    },
    /// The machine reached its terminal state.
    Done,
}

impl Poll {
    /// Idle until `deadline`.
    pub fn idle_until(deadline: Instant) -> Self {
        Poll::Idle {
            deadline: Some(deadline),
        }
    }

    /// Check if the machine finished.
    pub fn is_done(self) -> bool {
        matches!(self, Poll::Done)
    }
}

/// A connection role driven by repeated, non-blocking polls.
///
/// # Requirements
///
/// - `poll` MUST NOT block; "no datagram available" is reported as
///   [`Poll::Idle`], never as an error.
/// - Once `poll` returns [`Poll::Done`] every later call returns `Done` too.
/// - `close` MUST be idempotent and safe on a partially-initialized machine.
pub trait StateMachine {
    /// Summary produced when the machine finishes.
    type Report;
    /// Failure reported when the machine finishes abnormally.
    type Error;

    /// Advance the machine by at most one action, using `now` for all timers.
    fn poll(&mut self, now: Instant) -> Poll;

    /// Release the file and socket. Calling it again has no effect.
    fn close(&mut self);

    /// Consume the finished machine and produce its result.
    ///
    /// Releases resources first if that has not happened yet.
    fn finish(self) -> Result<Self::Report, Self::Error>;
}
