//! Latency and failure injection.
//!
//! The delay is drawn and slept first, then the failure verdict is drawn
//! independently. Dropping the future returned by [`Injector::inject`] cancels
//! the sleep.

use crate::errors::ValidationError;
use crate::metrics_defs::{INJECTED_DELAY, SIMULATED_FAILURE};
use crate::model::{self, ConfigKey, Endpoint, MAX_FAIL_RATE_PERCENT};
use crate::random::RandomSource;
use http::StatusCode;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::Duration;

/// Used when a profile carries no error codes of its own.
pub const DEFAULT_ERROR_CODES: [StatusCode; 2] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::SERVICE_UNAVAILABLE,
];

/// Failure probability in `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct FailRate(f64);

impl FailRate {
    pub const NEVER: FailRate = FailRate(0.0);
    pub const ALWAYS: FailRate = FailRate(1.0);

    /// Rules and config keys store the rate as a whole percentage.
    pub fn from_percent(percent: u8) -> Result<Self, ValidationError> {
        model::validate_fail_rate(percent)?;
        Ok(Self(f64::from(percent) / f64::from(MAX_FAIL_RATE_PERCENT)))
    }

    /// The sandbox takes the rate as a fraction.
    pub fn from_fraction(fraction: f64) -> Result<Self, ValidationError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(ValidationError::InvalidFailRateFraction(fraction));
        }
        Ok(Self(fraction))
    }

    pub fn probability(&self) -> f64 {
        self.0
    }
}

/// Chaos parameters captured for one request.
#[derive(Clone, Debug, PartialEq)]
pub struct ChaosProfile {
    min_latency_ms: u64,
    max_latency_ms: u64,
    fail_rate: FailRate,
    error_codes: Vec<StatusCode>,
}

impl ChaosProfile {
    pub fn new(
        min_latency_ms: u64,
        max_latency_ms: u64,
        fail_rate: FailRate,
        error_codes: Vec<StatusCode>,
    ) -> Result<Self, ValidationError> {
        model::validate_latency(min_latency_ms, max_latency_ms)?;
        Ok(Self {
            min_latency_ms,
            max_latency_ms,
            fail_rate,
            error_codes,
        })
    }

    pub fn from_endpoint(endpoint: &Endpoint) -> Result<Self, ValidationError> {
        let spec = &endpoint.spec;
        Self::new(
            spec.min_latency_ms,
            spec.max_latency_ms,
            FailRate::from_percent(spec.fail_rate_percent)?,
            Vec::new(),
        )
    }

    pub fn from_config_key(config_key: &ConfigKey) -> Result<Self, ValidationError> {
        let error_codes = config_key
            .error_codes
            .iter()
            .map(|code| {
                StatusCode::from_u16(*code).map_err(|_| ValidationError::InvalidErrorCode(*code))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(
            config_key.min_latency_ms,
            config_key.max_latency_ms,
            FailRate::from_percent(config_key.fail_rate_percent)?,
            error_codes,
        )
    }

    pub fn fail_rate(&self) -> FailRate {
        self.fail_rate
    }

    pub fn error_codes(&self) -> &[StatusCode] {
        if self.error_codes.is_empty() {
            &DEFAULT_ERROR_CODES
        } else {
            &self.error_codes
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    Proceed,
    Fail(StatusCode),
}

#[derive(Clone)]
pub struct Injector {
    rng: Arc<dyn RandomSource>,
}

impl Injector {
    pub fn new(rng: Arc<dyn RandomSource>) -> Self {
        Self { rng }
    }

    pub fn draw_delay(&self, profile: &ChaosProfile) -> Duration {
        Duration::from_millis(
            self.rng
                .next_in_range(profile.min_latency_ms, profile.max_latency_ms),
        )
    }

    pub fn draw_verdict(&self, profile: &ChaosProfile) -> Verdict {
        if self.rng.next_f64() >= profile.fail_rate.probability() {
            return Verdict::Proceed;
        }
        let codes = profile.error_codes();
        let index = self.rng.next_in_range(0, codes.len() as u64 - 1) as usize;
        Verdict::Fail(codes[index])
    }

    /// Sleeps for a freshly drawn delay, then decides the outcome.
    pub async fn inject(&self, profile: &ChaosProfile) -> Verdict {
        let delay = self.draw_delay(profile);
        histogram!(INJECTED_DELAY).record(delay.as_millis() as f64);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let verdict = self.draw_verdict(profile);
        if let Verdict::Fail(status) = verdict {
            counter!(SIMULATED_FAILURE, "status" => status.as_str().to_string()).increment(1);
        }
        tracing::debug!(delay_ms = delay.as_millis() as u64, ?verdict, "chaos injected");
        verdict
    }
}
