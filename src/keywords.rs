use std::collections::BTreeSet;

use serde::Serialize;

use crate::aggregate::mean;
use crate::config::TierCutoffs;
use crate::models::{KeywordPerformance, KeywordStat, PerformanceRecord, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Keyword {
    Benefit,
    Maximum,
    Discount,
    Rate,
    Limit,
    Loan,
    Compare,
    Switch,
    Check,
    Apply,
    Urgent,
    Special,
    Point,
    Lowest,
}

impl Keyword {
    pub const ALL: [Keyword; 14] = [
        Keyword::Benefit,
        Keyword::Maximum,
        Keyword::Discount,
        Keyword::Rate,
        Keyword::Limit,
        Keyword::Loan,
        Keyword::Compare,
        Keyword::Switch,
        Keyword::Check,
        Keyword::Apply,
        Keyword::Urgent,
        Keyword::Special,
        Keyword::Point,
        Keyword::Lowest,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Keyword::Benefit => "benefit",
            Keyword::Maximum => "maximum",
            Keyword::Discount => "discount",
            Keyword::Rate => "rate",
            Keyword::Limit => "limit",
            Keyword::Loan => "loan",
            Keyword::Compare => "compare",
            Keyword::Switch => "switch",
            Keyword::Check => "check",
            Keyword::Apply => "apply",
            Keyword::Urgent => "urgent",
            Keyword::Special => "special",
            Keyword::Point => "point",
            Keyword::Lowest => "lowest",
        }
    }

    /// Matched terms, already lowercase and whitespace-free. The first one is
    /// the Korean term used when writing copy.
    pub fn terms(self) -> &'static [&'static str] {
        match self {
            Keyword::Benefit => &["혜택", "benefit"],
            Keyword::Maximum => &["최대", "max"],
            Keyword::Discount => &["할인", "discount"],
            Keyword::Rate => &["금리", "rate"],
            Keyword::Limit => &["한도", "limit"],
            Keyword::Loan => &["대출", "loan"],
            Keyword::Compare => &["비교", "compar"],
            Keyword::Switch => &["갈아타기", "refinanc"],
            Keyword::Check => &["확인", "check"],
            Keyword::Apply => &["신청", "apply"],
            Keyword::Urgent => &["긴급", "urgent"],
            Keyword::Special => &["특가", "special"],
            Keyword::Point => &["포인트", "point"],
            Keyword::Lowest => &["최저", "lowest"],
        }
    }

    pub fn copy_term(self) -> &'static str {
        self.terms()[0]
    }

    /// Expects text already passed through [`match_key`].
    pub fn matches(self, key: &str) -> bool {
        self.terms().iter().any(|term| key.contains(term))
    }

    /// Resolves a user hint (label or any term) to a vocabulary keyword.
    pub fn from_hint(hint: &str) -> Option<Keyword> {
        let key = match_key(hint);
        if key.is_empty() {
            return None;
        }
        Keyword::ALL
            .into_iter()
            .find(|keyword| keyword.label() == key || keyword.terms().contains(&key.as_str()))
    }
}

/// Lowercased, whitespace-free form used for keyword containment.
pub fn match_key(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Vocabulary keywords contained in `text`, in vocabulary order.
pub fn detect(text: &str) -> Vec<Keyword> {
    let key = match_key(text);
    Keyword::ALL
        .into_iter()
        .filter(|keyword| keyword.matches(&key))
        .collect()
}

pub fn tier_for(rate: f64, cutoffs: &TierCutoffs) -> Tier {
    if rate >= cutoffs.high {
        Tier::High
    } else if rate >= cutoffs.medium {
        Tier::Medium
    } else {
        Tier::Low
    }
}

/// Scores every vocabulary keyword over `records`, in vocabulary order.
pub fn score_keywords(records: &[PerformanceRecord], cutoffs: &TierCutoffs) -> Vec<KeywordStat> {
    let keys: Vec<String> = records.iter().map(|r| match_key(&r.message_text)).collect();

    Keyword::ALL
        .into_iter()
        .map(|keyword| {
            let matching: Vec<&PerformanceRecord> = records
                .iter()
                .zip(keys.iter())
                .filter(|(_, key)| keyword.matches(key))
                .map(|(record, _)| record)
                .collect();

            KeywordStat {
                keyword,
                performance: performance_of(&matching, records.len(), cutoffs),
            }
        })
        .collect()
}

fn performance_of(
    matching: &[&PerformanceRecord],
    total_records: usize,
    cutoffs: &TierCutoffs,
) -> Option<KeywordPerformance> {
    let rates: Vec<f64> = matching.iter().map(|r| r.click_rate).collect();
    let average_click_rate = mean(&rates)?;

    // Best rate wins; equal rates fall back to the smaller text so row order
    // does not matter.
    let best_message = matching
        .iter()
        .max_by(|a, b| {
            a.click_rate
                .total_cmp(&b.click_rate)
                .then_with(|| b.message_text.cmp(&a.message_text))
        })
        .map(|r| r.message_text.clone())?;

    let distinct_messages = matching
        .iter()
        .map(|r| r.message_text.as_str())
        .collect::<BTreeSet<_>>()
        .len();

    Some(KeywordPerformance {
        matching_message_count: matching.len(),
        distinct_messages,
        average_click_rate,
        usage_share: matching.len() as f64 / total_records as f64,
        tier: tier_for(average_click_rate, cutoffs),
        best_message,
    })
}
