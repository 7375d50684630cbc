//! Shared exponential-backoff retry helper (§4.9), used by the photo fetcher
//! and the object store uploader: `min(base*2^(n-1)*(1+jitter), maxDelay)`.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
	pub max_attempts: u32,
	pub base: Duration,
	pub max_delay: Duration,
}

impl Default for RetryConfig {
	fn default() -> Self {
		Self {
			max_attempts: 5,
			base: Duration::from_secs(1),
			max_delay: Duration::from_secs(30),
		}
	}
}

fn delay_for_attempt(config: &RetryConfig, attempt: u32) -> Duration {
	let exponential = config.base.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
	let jitter = rand::thread_rng().gen_range(0.0..0.1);
	let scaled = exponential * (1.0 + jitter);
	Duration::from_secs_f64(scaled.min(config.max_delay.as_secs_f64()))
}

/// Retry `operation` up to `config.max_attempts` times, sleeping the
/// exponential-backoff delay between failures. Returns the last error once
/// attempts are exhausted.
pub async fn with_backoff<T, E, F, Fut>(label: &str, config: &RetryConfig, mut operation: F) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T, E>>,
	E: std::fmt::Display,
{
	let mut attempt = 0u32;
	loop {
		attempt += 1;
		match operation().await {
			Ok(value) => return Ok(value),
			Err(e) if attempt >= config.max_attempts => return Err(e),
			Err(e) => {
				let delay = delay_for_attempt(config, attempt);
				warn!(label, attempt, delay_ms = delay.as_millis() as u64, error = %e, "retrying after backoff");
				tokio::time::sleep(delay).await;
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn delay_is_capped_at_max_delay() {
		let config = RetryConfig::default();
		let delay = delay_for_attempt(&config, 10);
		assert!(delay <= config.max_delay);
	}

	#[test]
	fn delay_grows_with_attempt_number() {
		let config = RetryConfig::default();
		// Even with jitter, attempt 1's upper bound (1.1s) is below attempt
		// 3's lower bound (4.0s).
		let first = delay_for_attempt(&config, 1);
		let third = delay_for_attempt(&config, 3);
		assert!(first < third);
	}

	#[tokio::test]
	async fn succeeds_without_retry_on_first_try() {
		let config = RetryConfig::default();
		let result: Result<u32, &'static str> = with_backoff("test", &config, || async { Ok(42) }).await;
		assert_eq!(result.unwrap(), 42);
	}

	#[tokio::test]
	async fn exhausts_attempts_and_returns_last_error() {
		let config = RetryConfig {
			max_attempts: 2,
			base: Duration::from_millis(1),
			max_delay: Duration::from_millis(5),
		};
		let mut calls = 0;
		let result: Result<u32, &'static str> = with_backoff("test", &config, || {
			calls += 1;
			async move { Err("boom") }
		})
		.await;
		assert!(result.is_err());
		assert_eq!(calls, 2);
	}
}
