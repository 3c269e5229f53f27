//! Configuration for logical queries

use core::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

/// Time a trace may run without EOSE before it is force-closed
pub const DEFAULT_TRACE_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Period of the timeout sweep
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Delay between `cancel` and the point a query may be evicted
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(5_000);

// ----------------------------------------------------------------------------
// Query Configuration
// ----------------------------------------------------------------------------

/// Configuration for a logical query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Maximum runtime of a trace before it is treated as finished
    pub trace_timeout: Duration,
    /// How often live traces are checked against `trace_timeout`
    pub sweep_interval: Duration,
    /// Grace period after `cancel` for in-flight responses to land
    pub cancel_grace: Duration,
    /// Keep subscriptions open after EOSE (live/streaming queries)
    pub leave_open: bool,
    /// Drop events that do not match the filters of their subscription
    pub verify_events: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            trace_timeout: DEFAULT_TRACE_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            leave_open: false,
            verify_events: true,
        }
    }
}

impl QueryConfig {
    /// Configuration for streaming queries that stay open after EOSE
    pub fn live() -> Self {
        Self {
            leave_open: true,
            ..Self::default()
        }
    }

    /// Configuration with short deadlines for local development and tests
    pub fn short_timeouts() -> Self {
        Self {
            trace_timeout: Duration::from_millis(1_000),
            sweep_interval: Duration::from_millis(100),
            cancel_grace: Duration::from_millis(1_000),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval.is_zero() {
            return Err(invalid("Sweep interval cannot be zero"));
        }
        if self.trace_timeout.is_zero() {
            return Err(invalid("Trace timeout cannot be zero"));
        }
        if self.sweep_interval > self.trace_timeout {
            return Err(invalid("Sweep interval cannot exceed the trace timeout"));
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> QueryError {
    QueryError::InvalidConfiguration {
        reason: reason.to_string(),
    }
}
