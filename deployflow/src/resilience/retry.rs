//! Retry with exponential backoff and proportional jitter.
//!
//! Failures are classified before any delay is computed: only rate limiting,
//! timeouts, known transient transport codes and configured HTTP statuses
//! are retried. Everything else is returned after the first call.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{DeployError, GatewayError};
use crate::events::{noop_sink, SharedEventSink};

const RATE_LIMIT_MARKERS: [&str; 3] = ["rate limit", "request_limit_exceeded", "too many requests"];

/// Configuration for [`RetryHandler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for any delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Growth factor per attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Relative jitter applied to each delay (0.2 means ±20%).
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
    /// Transport error codes treated as transient.
    #[serde(default = "default_network_codes")]
    pub retryable_network_codes: Vec<String>,
    /// HTTP statuses treated as transient.
    #[serde(default = "default_status_codes")]
    pub retryable_status_codes: Vec<u16>,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter_factor() -> f64 {
    0.2
}

fn default_network_codes() -> Vec<String> {
    [
        "ECONNREFUSED",
        "ECONNRESET",
        "ENOTFOUND",
        "ENETUNREACH",
        "ETIMEDOUT",
        "EAI_AGAIN",
        "EPIPE",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn default_status_codes() -> Vec<u16> {
    vec![502, 503, 504]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter_factor(),
            retryable_network_codes: default_network_codes(),
            retryable_status_codes: default_status_codes(),
        }
    }
}

impl RetryConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = delay;
        self
    }

    /// Sets the delay cap.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets the jitter factor.
    #[must_use]
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Un-jittered delay before retry number `attempt + 1`.
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Delay before retry number `attempt + 1`, jittered and capped.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        jittered(self.base_delay(attempt), self.jitter_factor, self.max_delay_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.backoff_multiplier < 1.0 {
            return Err("retry.backoff_multiplier must be >= 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("retry.jitter_factor must be within 0.0..=1.0".to_string());
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err("retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string());
        }
        Ok(())
    }
}

/// Applies `±factor` jitter to `base` and clamps to `max_delay_ms`.
#[must_use]
pub fn jittered(base: Duration, factor: f64, max_delay_ms: u64) -> Duration {
    let base_ms = base.as_millis() as f64;
    let spread = base_ms * factor;
    let value = if spread > 0.0 {
        base_ms + rand::thread_rng().gen_range(-spread..=spread)
    } else {
        base_ms
    };
    Duration::from_millis(value.clamp(0.0, max_delay_ms as f64) as u64)
}

/// Notified before each backoff sleep.
pub type RetryObserver = Arc<dyn Fn(&RetryAttempt) + Send + Sync>;

/// Details of a scheduled retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// Logical operation name.
    pub operation: String,
    /// 1-based number of the retry about to happen.
    pub attempt: u32,
    /// Backoff before the retry.
    pub delay: Duration,
    /// Why the previous call failed.
    pub class: FailureClass,
    /// Message of the previous failure.
    pub error: String,
}

/// Per-call overrides of a handler's [`RetryConfig`].
#[derive(Clone, Default)]
pub struct RetryOverrides {
    /// Overrides `max_retries`.
    pub max_retries: Option<u32>,
    /// Overrides `initial_delay_ms`.
    pub initial_delay_ms: Option<u64>,
    /// Overrides `max_delay_ms`.
    pub max_delay_ms: Option<u64>,
    /// Overrides `backoff_multiplier`.
    pub backoff_multiplier: Option<f64>,
    /// Overrides `jitter_factor`.
    pub jitter_factor: Option<f64>,
    /// Replaces the handler's observer for this call.
    pub on_retry: Option<RetryObserver>,
}

impl RetryOverrides {
    /// No overrides.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the retry count.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Overrides the initial delay.
    #[must_use]
    pub fn initial_delay_ms(mut self, delay: u64) -> Self {
        self.initial_delay_ms = Some(delay);
        self
    }

    /// Sets an observer for this call.
    #[must_use]
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RetryAttempt) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    fn apply(&self, base: &RetryConfig) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            initial_delay_ms: self.initial_delay_ms.unwrap_or(base.initial_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(base.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            jitter_factor: self.jitter_factor.unwrap_or(base.jitter_factor),
            retryable_network_codes: base.retryable_network_codes.clone(),
            retryable_status_codes: base.retryable_status_codes.clone(),
        }
    }
}

impl std::fmt::Debug for RetryOverrides {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOverrides")
            .field("max_retries", &self.max_retries)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter_factor", &self.jitter_factor)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Throttled by the remote side.
    RateLimited,
    /// The call timed out.
    Timeout,
    /// Transient transport failure, including an open circuit.
    Network,
    /// A configured transient HTTP status.
    RetryableStatus,
    /// Anything else.
    Permanent,
}

impl FailureClass {
    /// Returns true for every class except `Permanent`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent)
    }

    /// Classifies `error` under `config`.
    #[must_use]
    pub fn of(error: &DeployError, config: &RetryConfig) -> Self {
        match error {
            DeployError::Gateway(gateway) => Self::of_gateway(gateway, config),
            DeployError::CircuitOpen { .. } => Self::Network,
            DeployError::RunLog(err) if err.is_transient() => Self::Network,
            _ => Self::Permanent,
        }
    }

    fn of_gateway(error: &GatewayError, config: &RetryConfig) -> Self {
        match error {
            GatewayError::RateLimited { .. } => Self::RateLimited,
            GatewayError::Timeout { .. } => Self::Timeout,
            GatewayError::Network { code, .. } => {
                if config
                    .retryable_network_codes
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(code))
                {
                    Self::Network
                } else {
                    Self::Permanent
                }
            }
            GatewayError::Status { status, .. } => {
                if config.retryable_status_codes.contains(status) {
                    Self::RetryableStatus
                } else {
                    Self::Permanent
                }
            }
            GatewayError::Rejected { message } => {
                let lower = message.to_lowercase();
                if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
                    Self::RateLimited
                } else {
                    Self::Permanent
                }
            }
            GatewayError::Unauthorized { .. } => Self::Permanent,
        }
    }
}

/// Outcome of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the delay.
    Retry(Duration),
    /// The retry budget is spent.
    GiveUp,
    /// The failure is not transient.
    NotRetryable,
}

/// Decides what to do after failed call number `attempt + 1`.
#[must_use]
pub fn decide(config: &RetryConfig, attempt: u32, error: &DeployError) -> RetryDecision {
    if !FailureClass::of(error, config).is_retryable() {
        return RetryDecision::NotRetryable;
    }
    if attempt >= config.max_retries {
        return RetryDecision::GiveUp;
    }

    let mut delay = config.delay_for(attempt);
    if let Some(GatewayError::RateLimited {
        retry_after_ms: Some(after),
        ..
    }) = error.gateway_error()
    {
        delay = delay.max(Duration::from_millis((*after).min(config.max_delay_ms)));
    }
    RetryDecision::Retry(delay)
}

/// Runs async operations with classified, backed-off retries.
#[derive(Clone)]
pub struct RetryHandler {
    config: RetryConfig,
    on_retry: Option<RetryObserver>,
    sink: SharedEventSink,
}

impl RetryHandler {
    /// Creates a handler that reports to no sink.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            on_retry: None,
            sink: noop_sink(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedEventSink) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the default observer.
    #[must_use]
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&RetryAttempt) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// The handler's configuration.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `op` under the handler's configuration.
    pub async fn execute<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
    {
        self.execute_with(operation, &RetryOverrides::default(), op)
            .await
    }

    /// Runs `op` with per-call overrides.
    ///
    /// Non-retryable failures are returned unchanged. When the budget runs
    /// out the last failure is wrapped in [`DeployError::RetriesExhausted`].
    pub async fn execute_with<T, F, Fut>(
        &self,
        operation: &str,
        overrides: &RetryOverrides,
        mut op: F,
    ) -> Result<T, DeployError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
    {
        let config = overrides.apply(&self.config);
        let observer = overrides.on_retry.as_ref().or(self.on_retry.as_ref());
        let max_delay = Duration::from_millis(config.max_delay_ms);
        let mut attempt: u32 = 0;
        let mut previous = Duration::ZERO;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match decide(&config, attempt, &err) {
                RetryDecision::NotRetryable => return Err(err),
                RetryDecision::GiveUp => {
                    let attempts = attempt + 1;
                    self.sink.try_emit(
                        "retry.exhausted",
                        Some(serde_json::json!({
                            "operation": operation,
                            "attempts": attempts,
                            "error": err.to_string(),
                        })),
                    );
                    return Err(DeployError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts,
                        source: Box::new(err),
                    });
                }
                RetryDecision::Retry(delay) => {
                    // Jitter must not shrink the wait below the previous one.
                    let delay = delay.max(previous).min(max_delay);
                    previous = delay;
                    let scheduled = RetryAttempt {
                        operation: operation.to_string(),
                        attempt: attempt + 1,
                        delay,
                        class: FailureClass::of(&err, &config),
                        error: err.to_string(),
                    };
                    if let Some(observer) = observer {
                        observer(&scheduled);
                    }
                    self.sink.try_emit(
                        "retry.scheduled",
                        Some(serde_json::json!({
                            "operation": operation,
                            "attempt": scheduled.attempt,
                            "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "class": scheduled.class,
                            "error": scheduled.error,
                        })),
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryHandler")
            .field("config", &self.config)
            .field("on_retry", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use crate::runlog::RunLogError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn unavailable() -> DeployError {
        DeployError::Gateway(GatewayError::from_status(503, "Service Unavailable"))
    }

    fn fast_config() -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(3)
            .with_initial_delay_ms(100)
            .with_max_delay_ms(250)
            .with_jitter(0.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retryable_failure_exhausts_with_growing_delays() {
        let delays = Arc::new(Mutex::new(Vec::new()));
        let seen = delays.clone();
        let handler = RetryHandler::new(fast_config())
            .with_observer(move |attempt| seen.lock().push(attempt.delay));
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let started = Instant::now();

        let result: Result<(), _> = handler
            .execute("deploy", move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(unavailable())
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let delays = delays.lock().clone();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(250),
            ]
        );
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(started.elapsed(), Duration::from_millis(550));
        match result {
            Err(DeployError::RetriesExhausted { attempts, source, .. }) => {
                assert_eq!(attempts, 4);
                assert!(source.to_string().contains("503"));
            }
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_jittered_delays_never_shrink() {
        let config = RetryConfig::default().with_max_retries(8);
        let cap = Duration::from_millis(config.max_delay_ms);

        for _ in 0..50 {
            let delays = Arc::new(Mutex::new(Vec::new()));
            let seen = delays.clone();
            let handler = RetryHandler::new(config.clone())
                .with_observer(move |attempt| seen.lock().push(attempt.delay));

            let _: Result<(), _> = handler
                .execute("deploy", || async { Err(unavailable()) })
                .await;

            let delays = delays.lock().clone();
            assert_eq!(delays.len(), 8);
            assert!(delays.windows(2).all(|w| w[0] <= w[1]), "{delays:?}");
            assert!(delays.iter().all(|d| *d <= cap));
            assert!(*delays.last().unwrap() >= cap.mul_f64(0.8));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_returns_after_one_call() {
        let handler = RetryHandler::new(fast_config());
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let started = Instant::now();

        let result: Result<(), _> = handler
            .execute("deploy", move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(DeployError::Gateway(GatewayError::from_status(400, "bad package")))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(matches!(
            result,
            Err(DeployError::Gateway(GatewayError::Status { status: 400, .. }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let sink = Arc::new(CollectingEventSink::new());
        let handler = RetryHandler::new(fast_config()).with_sink(sink.clone());
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;

        let result = handler
            .execute("check_status", move || async move {
                if calls_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DeployError::Gateway(GatewayError::network(
                        "ECONNRESET",
                        "socket hang up",
                    )))
                } else {
                    Ok("InProgress")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "InProgress");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sink.count("retry.scheduled"), 2);
        assert_eq!(sink.count("retry.exhausted"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrides_replace_budget_and_observer() {
        let sink = Arc::new(CollectingEventSink::new());
        let handler = RetryHandler::new(fast_config()).with_sink(sink.clone());
        let observed = Arc::new(AtomicU32::new(0));
        let counter = observed.clone();
        let overrides = RetryOverrides::new().max_retries(1).on_retry(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result: Result<(), _> = handler
            .execute_with("describe", &overrides, || async {
                Err(DeployError::Gateway(GatewayError::timeout("read timed out")))
            })
            .await;

        assert!(matches!(
            result,
            Err(DeployError::RetriesExhausted { attempts: 2, .. })
        ));
        assert_eq!(observed.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count("retry.exhausted"), 1);
    }

    #[test]
    fn test_classification() {
        let config = RetryConfig::default();
        let class = |err: DeployError| FailureClass::of(&err, &config);

        assert_eq!(
            class(DeployError::Gateway(GatewayError::from_status(429, "slow down"))),
            FailureClass::RateLimited
        );
        assert_eq!(
            class(DeployError::Gateway(GatewayError::rejected(
                "REQUEST_LIMIT_EXCEEDED: TotalRequests Limit exceeded"
            ))),
            FailureClass::RateLimited
        );
        assert_eq!(
            class(DeployError::Gateway(GatewayError::network("econnrefused", "refused"))),
            FailureClass::Network
        );
        assert_eq!(
            class(DeployError::Gateway(GatewayError::network("EPROTO", "bad tls"))),
            FailureClass::Permanent
        );
        assert_eq!(
            class(DeployError::Gateway(GatewayError::from_status(504, "gateway timeout"))),
            FailureClass::RetryableStatus
        );
        assert_eq!(
            class(DeployError::Gateway(GatewayError::from_status(500, "boom"))),
            FailureClass::Permanent
        );
        assert_eq!(
            class(DeployError::Gateway(GatewayError::from_status(401, "expired"))),
            FailureClass::Permanent
        );
        assert_eq!(
            class(DeployError::CircuitOpen {
                operation_class: "deploy".to_string(),
                retry_after_ms: 10,
            }),
            FailureClass::Network
        );
        assert_eq!(
            class(DeployError::RunLog(RunLogError::Unavailable("locked".to_string()))),
            FailureClass::Network
        );
        assert_eq!(
            class(DeployError::Configuration("missing target".to_string())),
            FailureClass::Permanent
        );
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        for _ in 0..200 {
            let delay = jittered(Duration::from_millis(1000), 0.2, 30_000);
            assert!(delay >= Duration::from_millis(800));
            assert!(delay <= Duration::from_millis(1200));

            let capped = jittered(Duration::from_millis(1000), 0.2, 1100);
            assert!(capped <= Duration::from_millis(1100));
        }
    }

    #[test]
    fn test_base_delay_caps_at_max() {
        let config = RetryConfig::default();

        assert_eq!(config.base_delay(0), Duration::from_millis(1000));
        assert_eq!(config.base_delay(3), Duration::from_millis(8000));
        assert_eq!(config.base_delay(10), Duration::from_millis(30_000));
    }

    #[test]
    fn test_rate_limit_hint_extends_delay() {
        let config = fast_config();
        let err = DeployError::Gateway(GatewayError::RateLimited {
            message: "slow down".to_string(),
            retry_after_ms: Some(220),
        });

        assert_eq!(
            decide(&config, 0, &err),
            RetryDecision::Retry(Duration::from_millis(220))
        );
        assert_eq!(decide(&config, 3, &err), RetryDecision::GiveUp);
    }
}
