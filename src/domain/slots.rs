//! Brief slots: the fixed schema of fields collected during conversation.
//!
//! Updates are addressed by a closed set of field paths and carry a typed
//! value, so merging never touches anything but the addressed field.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Address of a single brief field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FieldPath {
    #[serde(rename = "product.name")]
    ProductName,
    #[serde(rename = "product.category")]
    ProductCategory,
    #[serde(rename = "product.features")]
    ProductFeatures,
    #[serde(rename = "product.price_band")]
    ProductPriceBand,
    #[serde(rename = "target.who")]
    TargetWho,
    #[serde(rename = "target.why")]
    TargetWhy,
    #[serde(rename = "channel.channels")]
    ChannelChannels,
    #[serde(rename = "goal.weekly_goal")]
    GoalWeeklyGoal,
}

impl FieldPath {
    /// Every path in schema order
    pub const ALL: [FieldPath; 8] = [
        FieldPath::ProductName,
        FieldPath::ProductCategory,
        FieldPath::ProductFeatures,
        FieldPath::ProductPriceBand,
        FieldPath::TargetWho,
        FieldPath::TargetWhy,
        FieldPath::ChannelChannels,
        FieldPath::GoalWeeklyGoal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductName => "product.name",
            Self::ProductCategory => "product.category",
            Self::ProductFeatures => "product.features",
            Self::ProductPriceBand => "product.price_band",
            Self::TargetWho => "target.who",
            Self::TargetWhy => "target.why",
            Self::ChannelChannels => "channel.channels",
            Self::GoalWeeklyGoal => "goal.weekly_goal",
        }
    }

    /// Value kind this path accepts
    pub fn kind(&self) -> SlotKind {
        match self {
            Self::ProductFeatures | Self::ChannelChannels => SlotKind::List,
            Self::ProductPriceBand => SlotKind::PriceBand,
            Self::GoalWeeklyGoal => SlotKind::WeeklyGoal,
            _ => SlotKind::Text,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldPath {
    type Err = SlotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| SlotError::UnknownPath(s.to_string()))
    }
}

/// Price positioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceBand {
    Low,
    Mid,
    Premium,
}

/// What the campaign should move this week
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeeklyGoal {
    Reach,
    Inquiry,
    Purchase,
}

impl WeeklyGoal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reach => "reach",
            Self::Inquiry => "inquiry",
            Self::Purchase => "purchase",
        }
    }
}

/// Kind tag for slot values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    Text,
    List,
    PriceBand,
    WeeklyGoal,
}

/// Typed value carried by a slot update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    Text(String),
    List(Vec<String>),
    PriceBand(PriceBand),
    WeeklyGoal(WeeklyGoal),
}

impl SlotValue {
    pub fn kind(&self) -> SlotKind {
        match self {
            Self::Text(_) => SlotKind::Text,
            Self::List(_) => SlotKind::List,
            Self::PriceBand(_) => SlotKind::PriceBand,
            Self::WeeklyGoal(_) => SlotKind::WeeklyGoal,
        }
    }

    /// Short human-readable rendering (lists truncated to three items)
    pub fn display(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::List(items) => items.iter().take(3).cloned().collect::<Vec<_>>().join(", "),
            Self::PriceBand(band) => format!("{:?}", band).to_lowercase(),
            Self::WeeklyGoal(goal) => goal.as_str().to_string(),
        }
    }
}

/// One field update proposed by the planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotUpdate {
    pub path: FieldPath,
    pub value: SlotValue,
    pub confidence: f64,
}

impl SlotUpdate {
    pub fn new(path: FieldPath, value: SlotValue, confidence: f64) -> Self {
        Self {
            path,
            value,
            confidence,
        }
    }

    pub fn text(path: FieldPath, value: impl Into<String>, confidence: f64) -> Self {
        Self::new(path, SlotValue::Text(value.into()), confidence)
    }

    pub fn list(path: FieldPath, items: Vec<String>, confidence: f64) -> Self {
        Self::new(path, SlotValue::List(items), confidence)
    }

    /// Check kind, confidence range and emptiness
    pub fn validate(&self) -> Result<(), SlotError> {
        if self.path.kind() != self.value.kind() {
            return Err(SlotError::KindMismatch {
                path: self.path,
                expected: self.path.kind(),
                actual: self.value.kind(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) || self.confidence.is_nan() {
            return Err(SlotError::ConfidenceOutOfRange {
                path: self.path,
                confidence: self.confidence,
            });
        }
        let empty = match &self.value {
            SlotValue::Text(s) => s.trim().is_empty(),
            SlotValue::List(items) => items.iter().all(|i| i.trim().is_empty()),
            _ => false,
        };
        if empty {
            return Err(SlotError::EmptyValue(self.path));
        }
        Ok(())
    }
}

/// Slot update rejected before it reached the store
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SlotError {
    #[error("Unknown field path: {0}")]
    UnknownPath(String),

    #[error("Field {path} expects a {expected:?} value, got {actual:?}")]
    KindMismatch {
        path: FieldPath,
        expected: SlotKind,
        actual: SlotKind,
    },

    #[error("Field {path} has confidence {confidence} outside [0, 1]")]
    ConfidenceOutOfRange { path: FieldPath, confidence: f64 },

    #[error("Field {0} has an empty value")]
    EmptyValue(FieldPath),
}

/// Last written value of a field with its fill confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotField<T> {
    pub value: T,
    pub confidence: f64,
    /// Turn number that produced this value
    pub turn: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductSlots {
    pub name: Option<SlotField<String>>,
    pub category: Option<SlotField<String>>,
    pub features: Option<SlotField<Vec<String>>>,
    pub price_band: Option<SlotField<PriceBand>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSlots {
    pub who: Option<SlotField<String>>,
    pub why: Option<SlotField<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelSlots {
    pub channels: Option<SlotField<Vec<String>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalSlots {
    pub weekly_goal: Option<SlotField<WeeklyGoal>>,
}

/// The full brief
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Slots {
    #[serde(default)]
    pub product: ProductSlots,
    #[serde(default)]
    pub target: TargetSlots,
    #[serde(default)]
    pub channel: ChannelSlots,
    #[serde(default)]
    pub goal: GoalSlots,
}

impl Slots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a turn's updates as one batch.
    ///
    /// Returns the new slot set plus the updates that landed. `self` is left
    /// untouched, so a rejected batch leaves no partial writes behind.
    pub fn apply_batch(
        &self,
        updates: &[SlotUpdate],
        turn: u64,
    ) -> Result<(Slots, Vec<SlotUpdate>), SlotError> {
        for update in updates {
            update.validate()?;
        }

        let mut next = self.clone();
        let mut landed = Vec::new();
        for update in updates {
            if next.apply_one(update, turn) {
                landed.push(update.clone());
            }
        }
        Ok((next, landed))
    }

    fn apply_one(&mut self, update: &SlotUpdate, turn: u64) -> bool {
        let c = update.confidence;
        match (&update.value, update.path) {
            (SlotValue::Text(v), FieldPath::ProductName) => {
                merge(&mut self.product.name, clean_text(v), c, turn)
            }
            (SlotValue::Text(v), FieldPath::ProductCategory) => {
                merge(&mut self.product.category, clean_text(v), c, turn)
            }
            (SlotValue::Text(v), FieldPath::TargetWho) => {
                merge(&mut self.target.who, clean_text(v), c, turn)
            }
            (SlotValue::Text(v), FieldPath::TargetWhy) => {
                merge(&mut self.target.why, clean_text(v), c, turn)
            }
            (SlotValue::List(items), FieldPath::ProductFeatures) => {
                merge(&mut self.product.features, clean_list(items), c, turn)
            }
            (SlotValue::List(items), FieldPath::ChannelChannels) => {
                merge(&mut self.channel.channels, clean_list(items), c, turn)
            }
            (SlotValue::PriceBand(band), FieldPath::ProductPriceBand) => {
                merge(&mut self.product.price_band, *band, c, turn)
            }
            (SlotValue::WeeklyGoal(goal), FieldPath::GoalWeeklyGoal) => {
                merge(&mut self.goal.weekly_goal, *goal, c, turn)
            }
            // validate() already rejected mismatched kinds
            _ => false,
        }
    }

    /// Confidence of a field, if it has been written
    pub fn confidence(&self, path: FieldPath) -> Option<f64> {
        match path {
            FieldPath::ProductName => self.product.name.as_ref().map(|f| f.confidence),
            FieldPath::ProductCategory => self.product.category.as_ref().map(|f| f.confidence),
            FieldPath::ProductFeatures => self.product.features.as_ref().map(|f| f.confidence),
            FieldPath::ProductPriceBand => self.product.price_band.as_ref().map(|f| f.confidence),
            FieldPath::TargetWho => self.target.who.as_ref().map(|f| f.confidence),
            FieldPath::TargetWhy => self.target.why.as_ref().map(|f| f.confidence),
            FieldPath::ChannelChannels => self.channel.channels.as_ref().map(|f| f.confidence),
            FieldPath::GoalWeeklyGoal => self.goal.weekly_goal.as_ref().map(|f| f.confidence),
        }
    }

    /// Current value of a field as a typed slot value
    pub fn value(&self, path: FieldPath) -> Option<SlotValue> {
        match path {
            FieldPath::ProductName => text_of(&self.product.name),
            FieldPath::ProductCategory => text_of(&self.product.category),
            FieldPath::ProductFeatures => list_of(&self.product.features),
            FieldPath::ProductPriceBand => {
                self.product.price_band.as_ref().map(|f| SlotValue::PriceBand(f.value))
            }
            FieldPath::TargetWho => text_of(&self.target.who),
            FieldPath::TargetWhy => text_of(&self.target.why),
            FieldPath::ChannelChannels => list_of(&self.channel.channels),
            FieldPath::GoalWeeklyGoal => {
                self.goal.weekly_goal.as_ref().map(|f| SlotValue::WeeklyGoal(f.value))
            }
        }
    }

    /// Feature list, empty when unset
    pub fn features(&self) -> &[String] {
        self.product
            .features
            .as_ref()
            .map(|f| f.value.as_slice())
            .unwrap_or(&[])
    }

    /// Channel list, empty when unset
    pub fn channels(&self) -> &[String] {
        self.channel
            .channels
            .as_ref()
            .map(|f| f.value.as_slice())
            .unwrap_or(&[])
    }
}

/// Write `value` unless it is an older, less confident extraction
fn merge<T: PartialEq>(slot: &mut Option<SlotField<T>>, value: T, confidence: f64, turn: u64) -> bool {
    if let Some(current) = slot.as_ref() {
        if turn < current.turn && confidence < current.confidence {
            return false;
        }
    }
    *slot = Some(SlotField {
        value,
        confidence,
        turn,
    });
    true
}

fn clean_text(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clean_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|i| clean_text(i))
        .filter(|i| !i.is_empty())
        .collect()
}

fn text_of(field: &Option<SlotField<String>>) -> Option<SlotValue> {
    field.as_ref().map(|f| SlotValue::Text(f.value.clone()))
}

fn list_of(field: &Option<SlotField<Vec<String>>>) -> Option<SlotValue> {
    field.as_ref().map(|f| SlotValue::List(f.value.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_path_roundtrip_names() {
        for path in FieldPath::ALL {
            let parsed: FieldPath = path.as_str().parse().unwrap();
            assert_eq!(parsed, path);

            let json = serde_json::to_string(&path).unwrap();
            assert_eq!(json, format!("\"{}\"", path.as_str()));
        }
        assert!("product.color".parse::<FieldPath>().is_err());
    }

    #[test]
    fn test_batch_merges_by_path() {
        let slots = Slots::new();
        let (slots, landed) = slots
            .apply_batch(
                &[
                    SlotUpdate::text(FieldPath::ProductName, "Glow Serum", 0.9),
                    SlotUpdate::text(FieldPath::TargetWho, "office workers", 0.8),
                ],
                1,
            )
            .unwrap();
        assert_eq!(landed.len(), 2);

        let (slots, _) = slots
            .apply_batch(&[SlotUpdate::text(FieldPath::ProductCategory, "skincare", 0.9)], 2)
            .unwrap();

        // Earlier fields survive a later batch touching a different path
        assert_eq!(slots.product.name.as_ref().unwrap().value, "Glow Serum");
        assert_eq!(slots.product.category.as_ref().unwrap().value, "skincare");
        assert_eq!(slots.target.who.as_ref().unwrap().turn, 1);
    }

    #[test]
    fn test_older_low_confidence_update_is_ignored() {
        let (slots, _) = Slots::new()
            .apply_batch(&[SlotUpdate::text(FieldPath::ProductName, "New Name", 0.9)], 5)
            .unwrap();

        let (slots, landed) = slots
            .apply_batch(&[SlotUpdate::text(FieldPath::ProductName, "Stale", 0.6)], 3)
            .unwrap();
        assert!(landed.is_empty());
        assert_eq!(slots.product.name.as_ref().unwrap().value, "New Name");

        // Same turn, lower confidence: last writer wins
        let (slots, landed) = slots
            .apply_batch(&[SlotUpdate::text(FieldPath::ProductName, "Fixed", 0.5)], 5)
            .unwrap();
        assert_eq!(landed.len(), 1);
        assert_eq!(slots.product.name.as_ref().unwrap().value, "Fixed");
    }

    #[test]
    fn test_invalid_batch_leaves_slots_untouched() {
        let slots = Slots::new();
        let result = slots.apply_batch(
            &[
                SlotUpdate::text(FieldPath::ProductName, "Glow Serum", 0.9),
                SlotUpdate::text(FieldPath::ProductFeatures, "not a list", 0.9),
            ],
            1,
        );

        assert!(matches!(result, Err(SlotError::KindMismatch { .. })));
        assert_eq!(slots, Slots::new());
    }

    #[test]
    fn test_validate_rejects_bad_confidence_and_empty_values() {
        let update = SlotUpdate::text(FieldPath::TargetWhy, "hydration", 1.4);
        assert!(matches!(update.validate(), Err(SlotError::ConfidenceOutOfRange { .. })));

        let update = SlotUpdate::text(FieldPath::TargetWhy, "   ", 0.9);
        assert_eq!(update.validate(), Err(SlotError::EmptyValue(FieldPath::TargetWhy)));
    }

    #[test]
    fn test_slot_value_wire_shape() {
        let update = SlotUpdate::new(
            FieldPath::GoalWeeklyGoal,
            SlotValue::WeeklyGoal(WeeklyGoal::Inquiry),
            0.91,
        );
        let json = serde_json::to_value(&update).unwrap();

        assert_eq!(json["path"], "goal.weekly_goal");
        assert_eq!(json["value"]["kind"], "weekly_goal");
        assert_eq!(json["value"]["value"], "inquiry");
    }
}
