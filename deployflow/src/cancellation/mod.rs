//! Cancellation support for runs.

mod token;

pub use token::{CancelCallback, CancellationToken};
