use serde::Serialize;

/// Outcome of one expiry-notification sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NotificationSweepReport {
    pub scanned: usize,
    pub sent: usize,
    pub failed: usize,
}
