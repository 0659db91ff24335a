//! Chime snapshots and snooze helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Read-only view of one registration, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChimeInfo {
    pub name: String,
    /// `None` means never snoozed (or cleared).
    pub snooze_until: Option<DateTime<Utc>>,
}

impl ChimeInfo {
    /// The expiry only while it is still in the future.
    pub fn active_snooze(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.snooze_until.filter(|until| is_snoozed(Some(*until), now))
    }
}

/// True while `now` is strictly before the snooze expiry.
pub fn is_snoozed(snooze_until: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    matches!(snooze_until, Some(until) if now < until)
}
