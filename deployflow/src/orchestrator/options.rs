//! Per-run options.

use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::core::RequirementSource;

/// What to run and where to deploy it.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Requirement text and its external reference.
    pub source: RequirementSource,
    /// Target system id or name.
    pub target_ref: String,
    /// Stop after validation.
    pub dry_run: bool,
    /// Deploy to a production target instead of redirecting to staging.
    pub force_production: bool,
    /// Container used for requirements that do not name one.
    pub default_container: Option<String>,
    /// Checked between stages.
    pub cancellation: Option<Arc<CancellationToken>>,
}

impl RunOptions {
    /// Creates options for a full run.
    #[must_use]
    pub fn new(source: RequirementSource, target_ref: impl Into<String>) -> Self {
        Self {
            source,
            target_ref: target_ref.into(),
            dry_run: false,
            force_production: false,
            default_container: None,
            cancellation: None,
        }
    }

    /// Stops the run after validation.
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Allows deploying to production.
    #[must_use]
    pub fn force_production(mut self) -> Self {
        self.force_production = true;
        self
    }

    /// Sets the fallback container.
    #[must_use]
    pub fn with_default_container(mut self, container: impl Into<String>) -> Self {
        self.default_container = Some(container.into());
        self
    }

    /// Attaches a cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub(crate) fn cancel_reason(&self) -> Option<String> {
        self.cancellation
            .as_ref()
            .filter(|token| token.is_cancelled())
            .map(|token| token.reason().unwrap_or_else(|| "cancelled".to_string()))
    }
}
