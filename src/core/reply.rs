//! Assistant replies for the brief conversation.

use crate::domain::{FieldPath, SlotUpdate};

use super::gate::GateStatus;

pub fn question(path: FieldPath) -> &'static str {
    match path {
        FieldPath::ProductName => "What is the product called?",
        FieldPath::ProductCategory => "What category is the product in?",
        FieldPath::ProductFeatures => "What are three key features? (comma separated)",
        FieldPath::ProductPriceBand => {
            "What is the price band? (low, mid, premium, or an actual price)"
        }
        FieldPath::TargetWho => "Who is the main target customer?",
        FieldPath::TargetWhy => "Why would that customer buy this product?",
        FieldPath::ChannelChannels => {
            "Which one or two channels should we focus on? (e.g. Instagram, Naver)"
        }
        FieldPath::GoalWeeklyGoal => "What is this week's goal? (reach, inquiry, or purchase)",
    }
}

fn label(path: FieldPath) -> &'static str {
    match path {
        FieldPath::ProductName => "product name",
        FieldPath::ProductCategory => "category",
        FieldPath::ProductFeatures => "key features",
        FieldPath::ProductPriceBand => "price band",
        FieldPath::TargetWho => "target customer",
        FieldPath::TargetWhy => "purchase reason",
        FieldPath::ChannelChannels => "focus channels",
        FieldPath::GoalWeeklyGoal => "weekly goal",
    }
}

fn hint(path: FieldPath) -> &'static str {
    match path {
        FieldPath::ProductName => "e.g. Glow Serum X",
        FieldPath::ProductCategory => "e.g. skincare, smartphone",
        FieldPath::ProductFeatures => "e.g. gentle, fast absorbing, vegan formula",
        FieldPath::ProductPriceBand => "e.g. mid, or 39,000 won",
        FieldPath::TargetWho => "e.g. office workers in their 20s",
        FieldPath::TargetWhy => "e.g. keeps skin hydrated all day",
        FieldPath::ChannelChannels => "e.g. Instagram, Naver",
        FieldPath::GoalWeeklyGoal => "e.g. inquiry",
    }
}

/// First two landed updates as `label 'value'`
fn summarize(updates: &[SlotUpdate]) -> String {
    updates
        .iter()
        .take(2)
        .map(|u| format!("{} '{}'", label(u.path), u.value.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reply after a turn: confirm what landed, then ask for what is missing
pub fn compose(landed: &[SlotUpdate], gate: &GateStatus) -> String {
    let summary = summarize(landed);

    let Some(next) = gate.next_missing() else {
        return if summary.is_empty() {
            "The brief is complete. You can start research and strategy generation now."
                .to_string()
        } else {
            format!(
                "Got it: {}. The brief is complete. You can start research and strategy generation now.",
                summary
            )
        };
    };

    if summary.is_empty() {
        format!(
            "I still need the {}. {} ({})",
            label(next),
            question(next),
            hint(next)
        )
    } else {
        format!("Got it: {}. {}", summary, question(next))
    }
}

/// Reply for turns that arrive after the brief is locked
pub fn brief_locked() -> String {
    "The brief is already complete and locked. Start a generation run to continue.".to_string()
}

/// Opening question for a new session
pub fn opening() -> String {
    question(FieldPath::ProductName).to_string()
}
