use crate::error::ErrorKind;

/// Records the terminal outcome of a recovery attempt. Implementations must
/// be non-blocking and must not panic.
pub trait MetricsSink: Send + Sync {
    fn record_stale_recovery(&self, outcome: Option<&ErrorKind>);
}

/// A [`MetricsSink`] that discards everything. Lets the crate link and run
/// standalone without a higher-layer metrics backend wired in.
#[derive(Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record_stale_recovery(&self, _outcome: Option<&ErrorKind>) {}
}
