//! Session renewal scheduling.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Returns how long to wait before renewing a session expiring at
/// `expires_at`, or `None` when the renewal point has already passed.
pub fn renewal_delay(expires_at: DateTime<Utc>, now: DateTime<Utc>, lead: Duration) -> Option<Duration> {
    let lead = chrono::Duration::from_std(lead).ok()?;
    let delay = expires_at.checked_sub_signed(lead)?.signed_duration_since(now);
    delay.to_std().ok().filter(|delay| !delay.is_zero())
}

/// The single renewal deadline owned by the controller loop.
#[derive(Debug, Default)]
pub(crate) struct RenewalTimer {
    deadline: Option<Instant>,
}

impl RenewalTimer {
    /// Arms the timer for a session expiring at `expires_at`, replacing any
    /// previous deadline. Disarms it when no positive delay remains.
    pub(crate) fn arm(&mut self, expires_at: Option<DateTime<Utc>>, lead: Duration) -> Option<Duration> {
        let delay = expires_at.and_then(|expires_at| renewal_delay(expires_at, Utc::now(), lead));
        self.deadline = delay.map(|delay| Instant::now() + delay);
        delay
    }

    pub(crate) fn cancel(&mut self) {
        self.deadline = None;
    }

    pub(crate) const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) const fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }
}
