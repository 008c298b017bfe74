use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Backoff settings for retrying a request that failed transiently.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total tries, counting the first one
    pub max_attempts: u32,
    /// Delay before the second try
    pub initial_backoff: Duration,
    /// No single delay grows past this
    pub max_backoff: Duration,
    /// Each delay is the previous one times this factor
    pub exponential_base: f64,
    /// Spread each delay by up to 20% either way
    pub jitter: bool,
}

impl RetryPolicy {
    /// Startup probe: a worker container that is still booting usually
    /// answers within a couple of seconds.
    pub fn worker_probe(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(2),
            exponential_base: 2.0,
            jitter: true,
        }
    }

    fn schedule(&self) -> Backoff<'_> {
        Backoff {
            policy: self,
            upcoming: self.initial_backoff,
        }
    }
}

/// Successive delays for one retry sequence.
struct Backoff<'a> {
    policy: &'a RetryPolicy,
    upcoming: Duration,
}

impl Backoff<'_> {
    fn advance(&mut self) -> Duration {
        let delay = self.upcoming.min(self.policy.max_backoff);
        self.upcoming = delay.mul_f64(self.policy.exponential_base);
        if self.policy.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.8..=1.2))
        } else {
            delay
        }
    }
}

/// Call `operation` until it succeeds, `is_retryable` rejects the error,
/// or the policy runs out of attempts. Always makes at least one call.
pub async fn retry_with_condition<F, Fut, T, E, C>(
    policy: &RetryPolicy,
    mut operation: F,
    mut is_retryable: C,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    C: FnMut(&E) -> bool,
{
    let mut backoff = policy.schedule();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let error = match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("Worker answered on attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !is_retryable(&error) {
            debug!("Not retrying: {}", error);
            return Err(error);
        }
        if attempt >= policy.max_attempts {
            warn!("No answer after {} attempts: {}", attempt, error);
            return Err(error);
        }

        let delay = backoff.advance();
        warn!("Attempt {} failed ({}), next try in {:?}", attempt, error, delay);
        sleep(delay).await;
    }
}
