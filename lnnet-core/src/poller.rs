//! Timeout-bounded readiness polling.
//!
//! Every wait in the bring-up goes through [`wait_until`], so all of them
//! share one notion of interval, timeout and "not ready yet".

use core::fmt;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

/// How often to probe, and for how long
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollSpec {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSpec {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        PollSpec { interval, timeout }
    }
}

/// The probe never succeeded within the timeout
#[derive(Debug)]
pub struct PollTimeout<E> {
    pub attempts: u32,
    pub elapsed: Duration,
    /// The last error the probe returned, if it returned at all
    pub last_error: Option<E>,
    /// Attempts that were cut off without an answer
    pub unanswered: u32,
}

impl<E: Display> PollTimeout<E> {
    /// The last observation, for error reports
    pub fn last(&self) -> String {
        match &self.last_error {
            Some(e) => e.to_string(),
            None if self.unanswered > 0 => "no answer".to_string(),
            None => "none".to_string(),
        }
    }
}

impl<E: Display> Display for PollTimeout<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "not ready after {} attempts in {:?}, last: {}",
            self.attempts,
            self.elapsed,
            self.last()
        )
    }
}

impl<E: fmt::Debug + Display> std::error::Error for PollTimeout<E> {}

/// Call `probe` every `spec.interval` until it returns `Ok`.
///
/// Any `Err` from the probe means "not ready yet".  A single probe call is
/// cut off once it would run past the deadline plus one interval, so the
/// whole wait never exceeds `spec.timeout + spec.interval`.
pub async fn wait_until<T, E, F, Fut>(
    what: &str,
    spec: PollSpec,
    mut probe: F,
) -> Result<T, PollTimeout<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let start = Instant::now();
    let mut attempts = 0;
    let mut unanswered = 0;
    let mut last_error = None;
    loop {
        attempts += 1;
        let budget = spec.timeout.saturating_sub(start.elapsed()) + spec.interval;
        match timeout(budget, probe()).await {
            Ok(Ok(value)) => {
                debug!(what, attempts, elapsed = ?start.elapsed(), "ready");
                return Ok(value);
            }
            Ok(Err(e)) => {
                debug!(what, attempts, error = %e, "not ready");
                last_error = Some(e);
            }
            Err(_) => {
                debug!(what, attempts, "probe did not answer");
                unanswered += 1;
            }
        }
        let elapsed = start.elapsed();
        if elapsed >= spec.timeout {
            return Err(PollTimeout { attempts, elapsed, last_error, unanswered });
        }
        sleep(spec.interval.min(spec.timeout - elapsed)).await;
    }
}
