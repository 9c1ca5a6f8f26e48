//! Resilience patterns for provider RPC
//!
//! Per-provider circuit breakers (`failsafe`), bounded retry for idempotent
//! auxiliary calls (`backon`), and the per-call deadlines every RPC is
//! wrapped in. Transcode starts are never auto-retried here; the fallback
//! cascade owns that recovery path.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::{Error, Result};

pub mod timeout {
    //! Per-call deadlines for external interactions

    use std::time::Duration;

    /// Control-plane RPCs: start, stop, capability queries.
    pub const CONTROL_RPC_TIMEOUT: Duration = Duration::from_secs(30);

    /// Progress polls run every couple of seconds; a slow worker must not
    /// stack pollers.
    pub const PROGRESS_POLL_TIMEOUT: Duration = Duration::from_secs(5);

    /// Endpoint discovery (Info).
    pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
}

pub mod retry {
    //! Retry policy for idempotent auxiliary RPCs
    //!
    //! Progress polling and capability queries are safe to repeat; transcode
    //! starts are not and go through the fallback engine instead.

    use backon::ExponentialBuilder;
    use std::time::Duration;

    pub const MAX_RETRIES: usize = 3;
    pub const BASE_DELAY: Duration = Duration::from_secs(1);

    /// Exponential backoff starting at [`BASE_DELAY`], at most
    /// [`MAX_RETRIES`] retries.
    #[must_use]
    pub fn rpc_backoff() -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(BASE_DELAY)
            .with_max_times(MAX_RETRIES)
    }

    /// Whether an error is transient and worth repeating the call for.
    #[must_use]
    pub fn should_retry(err: &crate::provider::ProviderError) -> bool {
        matches!(err, crate::provider::ProviderError::Network(_))
    }
}

pub mod circuit_breaker {
    //! Per-provider circuit breaking
    //!
    //! Built on `failsafe`: consecutive failures trip the breaker, a constant
    //! backoff keeps it open for the configured window, the first permitted
    //! probe after the window closes it again on success.

    use std::time::Duration;

    pub use failsafe::CircuitBreaker;

    pub type Breaker = failsafe::StateMachine<
        failsafe::failure_policy::ConsecutiveFailures<failsafe::backoff::Constant>,
        (),
    >;

    /// Breaker that opens after `failure_threshold` consecutive failures and
    /// stays open for `open_timeout` before permitting a probe.
    #[must_use]
    pub fn create(failure_threshold: u32, open_timeout: Duration) -> Breaker {
        let backoff = failsafe::backoff::constant(open_timeout);
        let policy = failsafe::failure_policy::consecutive_failures(failure_threshold, backoff);
        failsafe::Config::new().failure_policy(policy).build()
    }
}

/// Lazily-created breaker per provider id.
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<circuit_breaker::Breaker>>,
    failure_threshold: u32,
    open_timeout: Duration,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            failure_threshold,
            open_timeout,
        }
    }

    fn breaker(&self, provider_id: &str) -> Arc<circuit_breaker::Breaker> {
        self.breakers
            .entry(provider_id.to_string())
            .or_insert_with(|| {
                Arc::new(circuit_breaker::create(
                    self.failure_threshold,
                    self.open_timeout,
                ))
            })
            .clone()
    }

    /// Reject immediately with `CircuitOpen` when the provider's breaker is
    /// open. Permitting a call transitions an elapsed breaker to half-open.
    pub fn check(&self, provider_id: &str) -> Result<()> {
        use circuit_breaker::CircuitBreaker;

        if self.breaker(provider_id).is_call_permitted() {
            Ok(())
        } else {
            Err(Error::CircuitOpen {
                provider: provider_id.to_string(),
            })
        }
    }

    pub fn record_success(&self, provider_id: &str) {
        use circuit_breaker::CircuitBreaker;
        self.breaker(provider_id).on_success();
    }

    pub fn record_failure(&self, provider_id: &str) {
        use circuit_breaker::CircuitBreaker;
        self.breaker(provider_id).on_error();
    }
}
