//! Bounded retry until a condition holds.
//!
//! Every wait in the harness goes through [`poll_until`]. A condition either
//! reports `Satisfied`, reports `Pending` with a description of what it saw,
//! or fails. Transient failures count as "not yet"; anything else stops the
//! poll immediately.


use std::future::Future;

use tokio::time::sleep;
use tokio::time::Instant;
use tracing::debug;
use tracing::warn;

use crate::Error;
use crate::PollPolicy;
use crate::Result;
use crate::TimeoutError;

/// Outcome of one evaluation of a poll condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<T> {
    Satisfied(T),
    /// Not yet; carries what was observed
    Pending(String),
}

/// Evaluates `condition` until it is satisfied or `policy.timeout()` elapses.
///
/// Returns as soon as the condition holds, so an already-true condition
/// completes without sleeping. Otherwise sleeps `min(interval, remaining)`
/// between evaluations, which bounds the return time of a non-blocking
/// condition to `[timeout, timeout + interval)`.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    policy: &PollPolicy,
    mut condition: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Verdict<T>>>,
{
    let started = Instant::now();
    let limit = policy.timeout();
    let mut attempts: u32 = 0;
    let mut consecutive_errors: u32 = 0;

    loop {
        attempts += 1;
        let last_observed = match condition().await {
            Ok(Verdict::Satisfied(value)) => {
                debug!(what, attempts, elapsed = ?started.elapsed(), "condition satisfied");
                return Ok(value);
            }
            Ok(Verdict::Pending(observed)) => {
                consecutive_errors = 0;
                debug!(what, attempts, %observed, "condition pending");
                observed
            }
            Err(e) if e.is_transient() => {
                consecutive_errors += 1;
                debug!(what, attempts, consecutive_errors, "transient failure: {}", e);
                if policy.max_consecutive_errors > 0
                    && consecutive_errors > policy.max_consecutive_errors
                {
                    warn!(what, consecutive_errors, "giving up on repeated failures");
                    return Err(Error::PollAborted {
                        what: what.to_string(),
                        attempts: consecutive_errors,
                        cause: Box::new(e),
                    });
                }
                e.to_string()
            }
            Err(e) => return Err(e),
        };

        let elapsed = started.elapsed();
        if elapsed >= limit {
            warn!(what, attempts, ?elapsed, "condition did not converge");
            return Err(TimeoutError {
                what: what.to_string(),
                elapsed,
                last_observed: Some(last_observed),
            }
            .into());
        }

        let remaining = limit - elapsed;
        sleep(policy.interval().min(remaining)).await;
    }
}
