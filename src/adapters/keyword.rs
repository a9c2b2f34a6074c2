//! Rule-based planner.
//!
//! Extracts slot updates from a user message with keyword and pattern
//! matching. Understands English and Korean phrasing. Each rule carries a
//! fixed confidence; answers to the question currently being asked fall back
//! to a direct read of the message.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::{Provider, ProviderContext, ProviderOutput};
use crate::core::gate;
use crate::domain::{FieldPath, PriceBand, SlotUpdate, SlotValue, Slots, WeeklyGoal};
use crate::error::ProviderError;

pub const MAX_FEATURES: usize = 6;

const CONF_NAME: f64 = 0.93;
const CONF_CATEGORY: f64 = 0.9;
const CONF_CATEGORY_INFERRED: f64 = 0.72;
const CONF_FEATURES: f64 = 0.82;
const CONF_PRICE_BAND: f64 = 0.86;
const CONF_WHO: f64 = 0.88;
const CONF_WHY: f64 = 0.84;
const CONF_CHANNELS: f64 = 0.9;
const CONF_GOAL: f64 = 0.91;
const CONF_DIRECT_ANSWER: f64 = 0.75;

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\b(?:product name|name)\s*(?:is|:)|(?:제품명|상품명|이름)\s*(?:은|는|:)?)\s*([^\n,.;]{2,40})")
        .expect("valid name regex")
});
static CATEGORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\bcategory\s*(?:is|:)|(?:카테고리|분야|업종)\s*(?:은|는|:)?)\s*([^\n,.;]{2,40})")
        .expect("valid category regex")
});
static WHO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\btarget(?: audience| customers?)?\s*(?:is|are|:)|(?:타겟|대상|고객)\s*(?:은|는|:)?)\s*([^\n,.;]{2,60})")
        .expect("valid target regex")
});
static WHY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:\b(?:reason|because|need)\s*(?:is|:)?|(?:이유|니즈|문제|왜냐하면|왜)\s*(?:은|는|:)?)\s*([^\n,.;]{2,80})")
        .expect("valid reason regex")
});
static WON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(\d[\d,]*)\s*(?:won|krw|원)").expect("valid won regex"));
static MANWON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*만\s*원").expect("valid manwon regex"));
static LIST_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[,\n/|;·]+").expect("valid list split regex"));

const FEATURE_KEYWORDS: [&str; 6] = ["features", "feature", "benefits", "특징", "장점", "핵심"];

const CHANNEL_KEYWORDS: [(&str, &[&str]); 7] = [
    ("Instagram", &["instagram", "insta", "인스타"]),
    ("YouTube Shorts", &["youtube shorts", "shorts", "유튜브 쇼츠", "유튜브숏"]),
    ("YouTube", &["youtube", "유튜브"]),
    ("Naver", &["naver", "네이버"]),
    ("SmartStore", &["smartstore", "smart store", "스마트스토어"]),
    ("Coupang", &["coupang", "쿠팡"]),
    ("TikTok", &["tiktok", "tik tok", "틱톡"]),
];

const CATEGORY_KEYWORDS: [(&[&str], &str); 5] = [
    (&["skin", "serum", "cosmetic", "cream", "스킨", "세럼", "화장품", "크림"], "skincare"),
    (&["apparel", "clothing", "fashion", "옷", "의류", "패션"], "fashion"),
    (&["supplement", "vitamin", "wellness", "건강식품", "영양제", "헬스"], "healthcare"),
    (&["snack", "beverage", "food", "식품", "간식", "음료"], "food"),
    (&["gadget", "device", "appliance", "가전", "디바이스", "기기"], "electronics"),
];

/// Offline planner that needs no model backend
#[derive(Debug, Default)]
pub struct KeywordPlanner;

impl KeywordPlanner {
    pub fn new() -> Self {
        Self
    }

    /// All updates this message supports, given the current slots
    pub fn extract(
        &self,
        message: &str,
        slots: &Slots,
        expected: Option<FieldPath>,
    ) -> Vec<SlotUpdate> {
        let message = message.trim();
        let lowered = message.to_lowercase();
        let missing = |path| !gate::is_satisfied(slots, path);
        let mut updates = Vec::new();

        if missing(FieldPath::ProductName) {
            if let Some(name) = capture(&NAME_RE, message) {
                updates.push(SlotUpdate::text(FieldPath::ProductName, name, CONF_NAME));
            }
        }

        if missing(FieldPath::ProductCategory) {
            if let Some(category) = capture(&CATEGORY_RE, message) {
                updates.push(SlotUpdate::text(FieldPath::ProductCategory, category, CONF_CATEGORY));
            } else if let Some(category) = infer_category(&lowered) {
                updates.push(SlotUpdate::text(
                    FieldPath::ProductCategory,
                    category,
                    CONF_CATEGORY_INFERRED,
                ));
            }
        }

        if slots.features().len() < gate::MIN_FEATURES {
            let mut found = extract_features(message, true);
            if found.is_empty() && expected == Some(FieldPath::ProductFeatures) {
                found = extract_features(message, false);
            }
            if !found.is_empty() {
                let merged = merge_unique(slots.features(), &found, MAX_FEATURES);
                if merged.as_slice() != slots.features() {
                    updates.push(SlotUpdate::list(FieldPath::ProductFeatures, merged, CONF_FEATURES));
                }
            }
        }

        if missing(FieldPath::ProductPriceBand) {
            if let Some(band) = extract_price_band(message, &lowered) {
                updates.push(SlotUpdate::new(
                    FieldPath::ProductPriceBand,
                    SlotValue::PriceBand(band),
                    CONF_PRICE_BAND,
                ));
            }
        }

        if missing(FieldPath::TargetWho) {
            if let Some(who) = capture(&WHO_RE, message) {
                updates.push(SlotUpdate::text(FieldPath::TargetWho, who, CONF_WHO));
            }
        }

        if missing(FieldPath::TargetWhy) {
            if let Some(why) = capture(&WHY_RE, message) {
                updates.push(SlotUpdate::text(FieldPath::TargetWhy, why, CONF_WHY));
            }
        }

        let channels = extract_channels(&lowered);
        if !channels.is_empty() {
            let merged = merge_unique(slots.channels(), &channels, gate::MAX_CHANNELS);
            if merged.as_slice() != slots.channels() {
                updates.push(SlotUpdate::list(FieldPath::ChannelChannels, merged, CONF_CHANNELS));
            }
        }

        if missing(FieldPath::GoalWeeklyGoal) {
            if let Some(goal) = extract_goal(&lowered) {
                updates.push(SlotUpdate::new(
                    FieldPath::GoalWeeklyGoal,
                    SlotValue::WeeklyGoal(goal),
                    CONF_GOAL,
                ));
            }
        }

        if let Some(path) = expected {
            if !updates.iter().any(|u| u.path == path) {
                if let Some(update) = direct_answer(message, &lowered, path) {
                    updates.push(update);
                }
            }
        }

        updates
    }
}

#[async_trait]
impl Provider for KeywordPlanner {
    fn name(&self) -> &str {
        "keyword-planner"
    }

    async fn run(&self, ctx: &ProviderContext) -> Result<ProviderOutput, ProviderError> {
        let input = ctx.user_input.as_deref().unwrap_or_default();
        let slot_updates = self.extract(input, &ctx.slots, ctx.expected_path);
        Ok(ProviderOutput {
            summary: format!("{} slot update(s) extracted", slot_updates.len()),
            slot_updates,
            ..Default::default()
        })
    }
}

/// Read the whole message as the answer to the current question
fn direct_answer(message: &str, lowered: &str, path: FieldPath) -> Option<SlotUpdate> {
    let cleaned = clean_fragment(message);
    if cleaned.chars().count() < 2 {
        return None;
    }

    match path {
        FieldPath::ProductName if cleaned.chars().count() <= 40 => Some(SlotUpdate::text(
            path,
            cleaned,
            CONF_DIRECT_ANSWER,
        )),
        FieldPath::ProductCategory => match infer_category(lowered) {
            Some(category) => Some(SlotUpdate::text(path, category, CONF_DIRECT_ANSWER)),
            None if cleaned.chars().count() <= 40 && !cleaned.contains(',') => {
                Some(SlotUpdate::text(path, cleaned, CONF_DIRECT_ANSWER))
            }
            None => None,
        },
        FieldPath::TargetWho | FieldPath::TargetWhy => {
            Some(SlotUpdate::text(path, cleaned, CONF_DIRECT_ANSWER))
        }
        _ => None,
    }
}

fn capture(re: &Regex, message: &str) -> Option<String> {
    re.captures(message)
        .and_then(|c| c.get(1))
        .map(|m| clean_fragment(m.as_str()))
        .filter(|s| s.chars().count() >= 2)
}

fn infer_category(lowered: &str) -> Option<&'static str> {
    CATEGORY_KEYWORDS
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(_, category)| *category)
}

fn extract_features(message: &str, require_keyword: bool) -> Vec<String> {
    let lowered = message.to_lowercase();
    let keyword = FEATURE_KEYWORDS.iter().find(|k| lowered.contains(*k));

    let candidate = match keyword {
        Some(k) => lowered
            .find(k)
            .and_then(|idx| message.get(idx + k.len()..))
            .unwrap_or(message),
        None if require_keyword => return Vec::new(),
        None if !LIST_SPLIT_RE.is_match(message) => return Vec::new(),
        None => message,
    };

    LIST_SPLIT_RE
        .split(candidate)
        .map(clean_fragment)
        .filter(|item| item.chars().count() >= 2)
        .collect()
}

fn extract_price_band(message: &str, lowered: &str) -> Option<PriceBand> {
    const LOW: [&str; 6] = ["cheap", "budget", "affordable", "저가", "가성비", "저렴"];
    const MID: [&str; 5] = ["mid-range", "midrange", "mid price", "중가", "미드"];
    const PREMIUM: [&str; 6] = ["premium", "luxury", "high-end", "고가", "프리미엄", "고급"];

    if LOW.iter().any(|k| lowered.contains(k)) {
        return Some(PriceBand::Low);
    }
    if MID.iter().any(|k| lowered.contains(k)) {
        return Some(PriceBand::Mid);
    }
    if PREMIUM.iter().any(|k| lowered.contains(k)) {
        return Some(PriceBand::Premium);
    }

    let amount = WON_RE
        .captures(message)
        .map(|c| won_amount(&c[1].replace(',', ""), 1))
        .or_else(|| MANWON_RE.captures(message).map(|c| won_amount(&c[1], 10_000)))?;

    Some(match amount {
        0..=30_000 => PriceBand::Low,
        30_001..=100_000 => PriceBand::Mid,
        _ => PriceBand::Premium,
    })
}

/// Amounts too large for `u64` saturate
fn won_amount(digits: &str, unit: u64) -> u64 {
    digits
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(unit))
        .unwrap_or(u64::MAX)
}

fn extract_channels(lowered: &str) -> Vec<String> {
    CHANNEL_KEYWORDS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(canonical, _)| canonical.to_string())
        .take(gate::MAX_CHANNELS)
        .collect()
}

fn extract_goal(lowered: &str) -> Option<WeeklyGoal> {
    const PURCHASE: [&str; 8] = ["purchase", "conversion", "sales", "buy", "구매", "전환", "매출", "판매"];
    const INQUIRY: [&str; 6] = ["inquir", "lead", "consult", "문의", "리드", "상담"];
    const REACH: [&str; 8] = ["reach", "views", "awareness", "impression", "조회", "도달", "노출", "리치"];

    if PURCHASE.iter().any(|k| lowered.contains(k)) {
        Some(WeeklyGoal::Purchase)
    } else if INQUIRY.iter().any(|k| lowered.contains(k)) {
        Some(WeeklyGoal::Inquiry)
    } else if REACH.iter().any(|k| lowered.contains(k)) {
        Some(WeeklyGoal::Reach)
    } else {
        None
    }
}

/// Append unseen items (case-insensitive) up to `limit` total
pub fn merge_unique(existing: &[String], incoming: &[String], limit: usize) -> Vec<String> {
    let mut seen: std::collections::HashSet<String> =
        existing.iter().map(|i| i.trim().to_lowercase()).collect();
    let mut merged: Vec<String> = existing.to_vec();

    for item in incoming {
        if merged.len() >= limit {
            break;
        }
        let item = item.trim();
        if item.is_empty() || !seen.insert(item.to_lowercase()) {
            continue;
        }
        merged.push(item.to_string());
    }
    merged
}

fn clean_fragment(text: &str) -> String {
    let trimmed = text.trim().trim_matches(|c: char| "\"'`:".contains(c) || c.is_whitespace());
    let mut cleaned = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");

    for prefix in ["are ", "is ", "include "] {
        if cleaned.to_lowercase().starts_with(prefix) {
            cleaned = cleaned[prefix.len()..].to_string();
        }
    }
    for suffix in ["입니다", "이에요", "예요"] {
        if let Some(stripped) = cleaned.strip_suffix(suffix) {
            cleaned = stripped.trim_end().to_string();
        }
    }
    cleaned
}
