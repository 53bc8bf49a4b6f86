//! Async driver for [`StateMachine`]s.
//!
//! The machines never block; this loop supplies the clock and turns
//! [`Poll::Idle`] into a bounded tokio sleep. The bound is what notices
//! datagrams arriving before the deadline, since the channels are polled
//! rather than awaited.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::core::{Poll, StateMachine};

/// Consecutive [`Poll::Progress`] steps before yielding to the runtime.
const PROGRESS_BURST: u32 = 64;

/// Run `machine` to completion.
///
/// Idle sleeps last until the machine's deadline but never longer than
/// `poll_interval`.
pub async fn drive<M: StateMachine>(
    mut machine: M,
    poll_interval: Duration,
) -> Result<M::Report, M::Error> {
    let mut burst = 0;
    loop {
        match machine.poll(Instant::now()) {
            Poll::Progress => {
                burst += 1;
                if burst >= PROGRESS_BURST {
                    burst = 0;
                    tokio::task::yield_now().await;
                }
            }
            Poll::Idle { deadline } => {
                burst = 0;
                let wait = match deadline {
                    Some(deadline) => deadline
                        .saturating_duration_since(Instant::now())
                        .min(poll_interval),
                    None => poll_interval,
                };
                if wait.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(wait).await;
                }
            }
            Poll::Done => {
                trace!("machine done");
                return machine.finish();
            }
        }
    }
}
