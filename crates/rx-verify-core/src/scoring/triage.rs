//! Review queue triage by time since upload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Waiting longer than this many whole hours is urgent.
pub const URGENT_AFTER_HOURS: i64 = 24;

/// Waiting longer than this many whole hours is high priority.
pub const HIGH_AFTER_HOURS: i64 = 12;

/// Priority tier, ordered so that `Urgent` sorts highest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityTier {
    Normal,
    High,
    Urgent,
}

/// Derived priority; recomputed on every read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriorityAssessment {
    pub tier: PriorityTier,
    pub age_hours: i64,
}

/// Tier for a given age in whole hours.
pub fn tier_for_age(age_hours: i64) -> PriorityTier {
    if age_hours > URGENT_AFTER_HOURS {
        PriorityTier::Urgent
    } else if age_hours > HIGH_AFTER_HOURS {
        PriorityTier::High
    } else {
        PriorityTier::Normal
    }
}

/// Priority of a prescription uploaded at `uploaded_at`, as seen at `now`.
pub fn priority(uploaded_at: DateTime<Utc>, now: DateTime<Utc>) -> PriorityAssessment {
    // clock skew can put the upload in the future
    let age_hours = (now - uploaded_at).num_hours().max(0);
    PriorityAssessment {
        tier: tier_for_age(age_hours),
        age_hours,
    }
}
