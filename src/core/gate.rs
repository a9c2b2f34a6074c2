//! Brief readiness gate.
//!
//! Pure function over the slot set: no I/O, same input gives the same answer.

use serde::{Deserialize, Serialize};

use crate::domain::{FieldPath, Slots};

/// Minimum fill confidence for a field to count as satisfied
pub const CONFIDENCE_FLOOR: f64 = 0.7;

/// Required fields in evaluation order
pub const REQUIRED: [FieldPath; 8] = FieldPath::ALL;

pub const MIN_FEATURES: usize = 3;
pub const MAX_CHANNELS: usize = 2;

/// Derived readiness of a brief
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateStatus {
    pub ready: bool,
    pub missing_required: Vec<FieldPath>,
    /// Fraction of required fields satisfied, rounded to 3 decimals
    pub completeness: f64,
}

impl GateStatus {
    /// First field the conversation should ask about next
    pub fn next_missing(&self) -> Option<FieldPath> {
        self.missing_required.first().copied()
    }
}

pub fn evaluate(slots: &Slots) -> GateStatus {
    let missing_required: Vec<FieldPath> = REQUIRED
        .into_iter()
        .filter(|path| !is_satisfied(slots, *path))
        .collect();

    let satisfied = REQUIRED.len() - missing_required.len();
    let completeness = (satisfied as f64 / REQUIRED.len() as f64 * 1000.0).round() / 1000.0;

    GateStatus {
        ready: missing_required.is_empty(),
        missing_required,
        completeness,
    }
}

/// Present, confident enough, and the right shape
pub fn is_satisfied(slots: &Slots, path: FieldPath) -> bool {
    let confident = slots
        .confidence(path)
        .is_some_and(|c| c >= CONFIDENCE_FLOOR);
    if !confident {
        return false;
    }

    match path {
        FieldPath::ProductFeatures => slots.features().len() >= MIN_FEATURES,
        FieldPath::ChannelChannels => (1..=MAX_CHANNELS).contains(&slots.channels().len()),
        _ => true,
    }
}
