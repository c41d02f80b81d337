//! Tracing setup and stage timing.

use std::time::Instant;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level`. With `json` set, log lines are
/// newline-delimited JSON. Only the first call in a process has an effect.
pub fn init_tracing(json: bool, level: Level) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(fmt::layer().with_target(false).json())
            .try_init()
            .ok();
    } else {
        registry.with(fmt::layer().with_target(false)).try_init().ok();
    }
}

/// Measures how long a pipeline stage takes.
#[derive(Debug)]
pub struct StepTimer {
    start: Instant,
    step: String,
}

impl StepTimer {
    /// Starts timing `step`.
    #[must_use]
    pub fn start(step: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            step: step.into(),
        }
    }

    /// The step being timed.
    #[must_use]
    pub fn step(&self) -> &str {
        &self.step
    }

    /// Elapsed wall time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Stops the timer and returns the elapsed milliseconds.
    #[must_use]
    pub fn finish(self) -> u64 {
        self.elapsed_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
    }

    #[test]
    fn test_step_timer_measures() {
        let timer = StepTimer::start("PARSE");
        std::thread::sleep(std::time::Duration::from_millis(5));

        assert_eq!(timer.step(), "PARSE");
        assert!(timer.finish() >= 5);
    }
}
