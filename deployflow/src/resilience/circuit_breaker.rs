//! Circuit breaker guarding one class of gateway operations.
//!
//! ```text
//! CLOSED --(failure_threshold countable failures)--> OPEN
//! OPEN --(recovery_timeout since last failure)--> HALF_OPEN
//! HALF_OPEN --(any countable failure)--> OPEN
//! HALF_OPEN --(half_open_max_attempts successes)--> CLOSED
//! ```

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::{DeployError, GatewayError};
use crate::events::{noop_sink, SharedEventSink};

/// Thresholds for a [`CircuitBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive countable failures that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time after the last failure before a probe is admitted, in milliseconds.
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    /// Consecutive probe successes that close the breaker.
    #[serde(default = "default_half_open_max_attempts")]
    pub half_open_max_attempts: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_ms() -> u64 {
    60_000
}

fn default_half_open_max_attempts() -> u32 {
    3
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            half_open_max_attempts: default_half_open_max_attempts(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Creates a configuration.
    #[must_use]
    pub fn new(failure_threshold: u32, recovery_timeout_ms: u64, half_open_max_attempts: u32) -> Self {
        Self {
            failure_threshold,
            recovery_timeout_ms,
            half_open_max_attempts,
        }
    }

    /// Recovery timeout as a `Duration`.
    #[must_use]
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be at least 1".to_string());
        }
        if self.half_open_max_attempts == 0 {
            return Err("circuit_breaker.half_open_max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without invoking the dependency.
    Open,
    /// Probe calls are admitted.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Mutable breaker state. Only the breaker's own handlers change it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerState {
    /// Current position.
    pub state: CircuitState,
    /// Consecutive countable failures.
    pub failure_count: u32,
    /// When the last countable failure was recorded.
    pub last_failure_time: Option<Instant>,
    /// Consecutive successes while half-open.
    pub half_open_attempts: u32,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            half_open_attempts: 0,
        }
    }
}

/// Gateway operation classes, each with its own breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Package submission.
    Deploy,
    /// Status checks and deployment details.
    Status,
    /// Component lookups.
    Describe,
}

impl OperationClass {
    /// Lowercase name used in errors and events.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deploy => "deploy",
            Self::Status => "status",
            Self::Describe => "describe",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true for failures that say something about the dependency's
/// health: 5xx, throttling, timeouts and transport errors.
#[must_use]
pub fn is_countable(error: &DeployError) -> bool {
    match error {
        DeployError::Gateway(gateway) => match gateway {
            GatewayError::RateLimited { .. }
            | GatewayError::Timeout { .. }
            | GatewayError::Network { .. } => true,
            GatewayError::Status { .. } => gateway.is_server_error(),
            GatewayError::Unauthorized { .. } | GatewayError::Rejected { .. } => false,
        },
        _ => false,
    }
}

type Transition = (&'static str, serde_json::Value);

/// A circuit breaker shared by every run that calls one operation class.
pub struct CircuitBreaker {
    class: OperationClass,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
    sink: SharedEventSink,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub fn new(class: OperationClass, config: CircuitBreakerConfig) -> Self {
        Self {
            class,
            config,
            state: Mutex::new(CircuitBreakerState::default()),
            sink: noop_sink(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedEventSink) -> Self {
        self.sink = sink;
        self
    }

    /// The guarded operation class.
    #[must_use]
    pub fn class(&self) -> OperationClass {
        self.class
    }

    /// A copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerState {
        self.state.lock().clone()
    }

    /// The current position.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Forces the breaker closed with zeroed counters.
    pub fn reset(&self) {
        *self.state.lock() = CircuitBreakerState::default();
        self.emit(Some(("circuit.closed", self.event_data(serde_json::json!({"reset": true})))));
    }

    /// Runs `op` if the breaker admits it.
    ///
    /// An open breaker returns [`DeployError::CircuitOpen`] without calling
    /// `op`. The outcome of an admitted call updates the state before it is
    /// returned.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, DeployError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DeployError>>,
    {
        self.admit()?;
        let result = op().await;
        match &result {
            Ok(_) => self.on_success(),
            Err(err) if is_countable(err) => self.on_failure(),
            Err(_) => {}
        }
        result
    }

    fn admit(&self) -> Result<(), DeployError> {
        let mut transition = None;
        let outcome = {
            let mut state = self.state.lock();
            match state.state {
                CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
                CircuitState::Open => {
                    let elapsed = state
                        .last_failure_time
                        .map_or(Duration::MAX, |at| at.elapsed());
                    let timeout = self.config.recovery_timeout();
                    if elapsed >= timeout {
                        state.state = CircuitState::HalfOpen;
                        state.half_open_attempts = 0;
                        transition = Some((
                            "circuit.half_open",
                            self.event_data(serde_json::json!({})),
                        ));
                        Ok(())
                    } else {
                        let remaining = timeout.saturating_sub(elapsed);
                        let retry_after_ms = u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX);
                        transition = Some((
                            "circuit.rejected",
                            self.event_data(serde_json::json!({"retry_after_ms": retry_after_ms})),
                        ));
                        Err(DeployError::CircuitOpen {
                            operation_class: self.class.to_string(),
                            retry_after_ms,
                        })
                    }
                }
            }
        };
        self.emit(transition);
        outcome
    }

    fn on_success(&self) {
        let mut transition = None;
        {
            let mut state = self.state.lock();
            match state.state {
                CircuitState::Closed => state.failure_count = 0,
                CircuitState::HalfOpen => {
                    state.half_open_attempts += 1;
                    if state.half_open_attempts >= self.config.half_open_max_attempts {
                        *state = CircuitBreakerState::default();
                        transition = Some(("circuit.closed", self.event_data(serde_json::json!({}))));
                    }
                }
                CircuitState::Open => {}
            }
        }
        self.emit(transition);
    }

    fn on_failure(&self) {
        let mut transition = None;
        {
            let mut state = self.state.lock();
            state.failure_count = state.failure_count.saturating_add(1);
            state.last_failure_time = Some(Instant::now());
            match state.state {
                CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                    state.state = CircuitState::Open;
                    transition = Some((
                        "circuit.opened",
                        self.event_data(serde_json::json!({"failure_count": state.failure_count})),
                    ));
                }
                CircuitState::HalfOpen => {
                    state.state = CircuitState::Open;
                    state.half_open_attempts = 0;
                    transition = Some((
                        "circuit.opened",
                        self.event_data(serde_json::json!({"from": "HALF_OPEN"})),
                    ));
                }
                _ => {}
            }
        }
        self.emit(transition);
    }

    fn event_data(&self, mut data: serde_json::Value) -> serde_json::Value {
        if let Some(map) = data.as_object_mut() {
            map.insert("operation_class".to_string(), serde_json::json!(self.class.as_str()));
        }
        data
    }

    fn emit(&self, transition: Option<Transition>) {
        if let Some((kind, data)) = transition {
            self.sink.try_emit(kind, Some(data));
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("class", &self.class)
            .field("config", &self.config)
            .field("state", &self.snapshot())
            .finish_non_exhaustive()
    }
}
