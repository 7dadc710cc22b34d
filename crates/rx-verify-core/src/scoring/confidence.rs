//! Extraction confidence classification.
//!
//! Upstream extraction output is inconsistent about scale: some lines carry
//! a fraction in [0, 1], others a percentage in [0, 100]. Anything above 1 is
//! treated as a percentage.

use serde::{Deserialize, Serialize};

/// Tier boundaries (inclusive lower bounds).
pub mod thresholds {
    /// At or above this: High.
    pub const HIGH: f64 = 0.8;

    /// At or above this: Medium. Below: Low.
    pub const MEDIUM: f64 = 0.5;
}

/// Three-tier confidence classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConfidenceTier {
    Low,
    Medium,
    High,
}

/// Classified confidence with a display percentage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfidenceScore {
    pub tier: ConfidenceTier,
    pub percent: u8,
}

/// Bring a raw confidence into [0, 1].
///
/// Values above 1 are read as percentages. NaN and negatives become 0.
pub fn normalize_confidence(raw: f64) -> f64 {
    if raw.is_nan() || raw <= 0.0 {
        return 0.0;
    }
    let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
    scaled.min(1.0)
}

/// Classify a raw confidence into a tier and a rounded percentage.
pub fn classify(raw: f64) -> ConfidenceScore {
    let normalized = normalize_confidence(raw);

    let tier = if normalized >= thresholds::HIGH {
        ConfidenceTier::High
    } else if normalized >= thresholds::MEDIUM {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    };

    ConfidenceScore {
        tier,
        percent: (normalized * 100.0).round() as u8,
    }
}
