//! Readiness primitives
//!
//! Two kinds of waits exist. [`wait_until`] is a bounded waiter with
//! exponential backoff, used for provider-side conditions such as "subnet
//! available" or "instance terminated". [`poll_until`] re-checks at a fixed
//! interval and is only bounded when a timeout is configured.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::errors::CloudError;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Bounded waiter options
#[derive(Debug, Clone)]
pub struct WaiterOptions {
    pub cooldown: CooldownOptions,
    pub max_attempts: u32,
}

impl Default for WaiterOptions {
    fn default() -> Self {
        Self {
            cooldown: CooldownOptions {
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(15),
                multiplier: 2.0,
            },
            max_attempts: 40,
        }
    }
}

/// Fixed-interval poll options
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,

    /// `None` polls forever
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            timeout: Some(Duration::from_secs(15 * 60)),
        }
    }
}

/// Re-run `check` with backoff until it returns `true`
///
/// Errors from `check` end the wait immediately.
pub async fn wait_until<F, Fut>(
    waiter: &str,
    options: &WaiterOptions,
    mut check: F,
) -> Result<(), CloudError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, CloudError>>,
{
    for attempt in 0..options.max_attempts {
        if check().await? {
            debug!("Waiter {} satisfied after {} attempt(s)", waiter, attempt + 1);
            return Ok(());
        }

        if attempt + 1 < options.max_attempts {
            let delay = calc_exp_backoff(&options.cooldown, attempt);
            debug!("Waiter {} not satisfied, retrying in {:?}", waiter, delay);
            tokio::time::sleep(delay).await;
        }
    }

    Err(CloudError::WaiterTimeout {
        waiter: waiter.to_string(),
        attempts: options.max_attempts,
    })
}

/// Re-run `check` every `interval` until it returns `true`
pub async fn poll_until<F, Fut>(
    what: &str,
    options: &PollOptions,
    mut check: F,
) -> Result<(), CloudError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, CloudError>>,
{
    let started = Instant::now();

    loop {
        if check().await? {
            return Ok(());
        }

        if let Some(timeout) = options.timeout {
            let elapsed = started.elapsed();
            if elapsed + options.interval > timeout {
                return Err(CloudError::PollTimeout {
                    what: what.to_string(),
                    elapsed,
                });
            }
        }

        tokio::time::sleep(options.interval).await;
    }
}
