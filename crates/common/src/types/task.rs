use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ProductLocationId, TaskId};

/// A scrape job scheduled for some time in the future.
///
/// Invariants (enforced by the constructors below, not by serde):
/// - `scheduled_for >= created_at`
/// - if `repeat` then `interval > 0`
/// - `completed = true` is terminal for this specific record; a repeating
///   task's next occurrence is a brand new record, never a mutation of this
///   one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScrapeTask {
    pub id: TaskId,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: DateTime<Utc>,
    pub product_location_id: ProductLocationId,
    pub completed: bool,
    pub repeat: bool,
    #[serde(with = "duration_secs")]
    pub interval: Duration,
}

impl ScrapeTask {
    /// Build a new, not-yet-completed task. Panics (in debug builds, via
    /// `debug_assert!`) if the repeat/interval invariant is violated — this
    /// mirrors the teacher's convention of trusting internal callers while
    /// still catching misuse in tests.
    pub fn new(
        product_location_id: ProductLocationId,
        scheduled_for: DateTime<Utc>,
        repeat: bool,
        interval: Duration,
    ) -> Self {
        let created_at = Utc::now();
        // Tolerate a few ms of skew between the caller's `Utc::now()` (used to
        // build `scheduled_for`) and the one just taken above — they're two
        // separate clock reads, not one atomic snapshot.
        debug_assert!(
            scheduled_for >= created_at - chrono::Duration::milliseconds(5),
            "scheduled_for must not precede created_at"
        );
        debug_assert!(!repeat || interval > Duration::ZERO, "repeating tasks need interval > 0");

        Self {
            id: TaskId::new(),
            created_at,
            scheduled_for,
            product_location_id,
            completed: false,
            repeat,
            interval,
        }
    }

    /// Build the next occurrence of a repeating task, scheduled `interval`
    /// from `now` (not from this task's own `scheduled_for`) to avoid
    /// cascading drift after a long dispatch gap — see spec REDESIGN FLAGS.
    pub fn next_repetition(&self, now: DateTime<Utc>) -> Option<Self> {
        if !self.repeat {
            return None;
        }

        let interval = chrono::Duration::from_std(self.interval).ok()?;

        Some(Self {
            id: TaskId::new(),
            created_at: now,
            scheduled_for: now + interval,
            product_location_id: self.product_location_id,
            completed: false,
            repeat: self.repeat,
            interval: self.interval,
        })
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
