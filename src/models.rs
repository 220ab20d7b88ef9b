use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::keywords::Keyword;

/// One accepted row of send history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceRecord {
    pub send_date: Option<NaiveDate>,
    pub service: String,
    pub channel: Option<String>,
    pub message_text: String,
    pub sent_count: Option<u64>,
    pub click_count: Option<u64>,
    /// Percentage in [0, 100].
    pub click_rate: f64,
}

/// All records sharing one normalized message text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageGroup {
    pub message_text: String,
    pub occurrences: usize,
    pub total_sent: u64,
    pub total_clicks: u64,
    /// Simple arithmetic mean of the member click rates.
    pub average_click_rate: f64,
    pub max_click_rate: f64,
    pub min_click_rate: f64,
    /// total_clicks / total_sent, when any sends are known.
    pub pooled_click_rate: Option<f64>,
    pub first_seen: Option<NaiveDate>,
    pub last_seen: Option<NaiveDate>,
    pub services: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    High,
    Medium,
    Low,
}

impl Tier {
    pub fn label(self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Medium => "medium",
            Tier::Low => "low",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordPerformance {
    pub matching_message_count: usize,
    pub distinct_messages: usize,
    pub average_click_rate: f64,
    /// Share of all records that contain the keyword.
    pub usage_share: f64,
    pub tier: Tier,
    pub best_message: String,
}

/// Keyword statistics; `performance` is `None` when nothing matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordStat {
    pub keyword: Keyword,
    pub performance: Option<KeywordPerformance>,
}

impl KeywordStat {
    pub fn average_click_rate(&self) -> Option<f64> {
        self.performance.as_ref().map(|p| p.average_click_rate)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStat {
    pub service: String,
    pub record_count: usize,
    pub average_click_rate: f64,
    pub median_click_rate: f64,
    pub average_sent: Option<f64>,
    pub top_groups: Vec<MessageGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekdayStat {
    pub weekday: Weekday,
    pub record_count: usize,
    pub average_click_rate: Option<f64>,
    pub top_groups: Vec<MessageGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HighPerformers {
    pub dataset_mean: Option<f64>,
    pub floor_percent: f64,
    pub threshold: f64,
    /// How many top-ranked groups were eligible.
    pub eligible_count: usize,
    pub groups: Vec<MessageGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmojiEffect {
    pub with_emoji: usize,
    pub without_emoji: usize,
    pub with_emoji_mean: Option<f64>,
    pub without_emoji_mean: Option<f64>,
    pub delta: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelShare {
    pub channel: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub record_count: usize,
    pub group_count: usize,
    pub service_count: usize,
    pub mean_click_rate: Option<f64>,
    pub median_click_rate: Option<f64>,
    pub best_click_rate: Option<f64>,
    pub worst_click_rate: Option<f64>,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub channels: Vec<ChannelShare>,
}

/// Part of the month a send fell in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonthPeriod {
    Early,
    Middle,
    Late,
}

impl MonthPeriod {
    pub const ALL: [MonthPeriod; 3] = [MonthPeriod::Early, MonthPeriod::Middle, MonthPeriod::Late];

    pub fn of_day(day: u32) -> Self {
        match day {
            0..=10 => MonthPeriod::Early,
            11..=20 => MonthPeriod::Middle,
            _ => MonthPeriod::Late,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MonthPeriod::Early => "early month (days 1-10)",
            MonthPeriod::Middle => "mid month (days 11-20)",
            MonthPeriod::Late => "late month (days 21-31)",
        }
    }
}

/// Position of a send relative to the usual 25th/month-end payday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaydayWindow {
    BeforePayday,
    Payday,
    AfterPayday,
    Other,
}

impl PaydayWindow {
    pub const ALL: [PaydayWindow; 4] = [
        PaydayWindow::BeforePayday,
        PaydayWindow::Payday,
        PaydayWindow::AfterPayday,
        PaydayWindow::Other,
    ];

    pub fn of_date(date: NaiveDate) -> Self {
        let day = date.day();
        let month_end = date.succ_opt().map_or(true, |next| next.month() != date.month());
        match day {
            22..=24 => PaydayWindow::BeforePayday,
            25 => PaydayWindow::Payday,
            _ if month_end => PaydayWindow::Payday,
            1..=5 => PaydayWindow::AfterPayday,
            _ => PaydayWindow::Other,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PaydayWindow::BeforePayday => "before payday (days 22-24)",
            PaydayWindow::Payday => "payday (25th or month end)",
            PaydayWindow::AfterPayday => "after payday (days 1-5)",
            PaydayWindow::Other => "other days",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    pub const ALL: [Season; 4] = [Season::Spring, Season::Summer, Season::Autumn, Season::Winter];

    pub fn of_month(month: u32) -> Self {
        match month {
            3..=5 => Season::Spring,
            6..=8 => Season::Summer,
            9..=11 => Season::Autumn,
            _ => Season::Winter,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Season::Spring => "spring (Mar-May)",
            Season::Summer => "summer (Jun-Aug)",
            Season::Autumn => "autumn (Sep-Nov)",
            Season::Winter => "winter (Dec-Feb)",
        }
    }
}

/// Click-rate statistics for one timing bucket; `None` when it holds no rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStat<K> {
    pub bucket: K,
    pub record_count: usize,
    pub average_click_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BestBucket<K> {
    pub bucket: K,
    pub average_click_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingRecommendation {
    pub best_weekday: Option<BestBucket<Weekday>>,
    pub best_month_period: Option<BestBucket<MonthPeriod>>,
    pub best_payday_window: Option<BestBucket<PaydayWindow>>,
    pub best_season: Option<BestBucket<Season>>,
}

/// Date-based patterns over dated records only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingAnalysis {
    pub dated_records: usize,
    pub month_periods: Vec<BucketStat<MonthPeriod>>,
    pub payday: Vec<BucketStat<PaydayWindow>>,
    pub seasons: Vec<BucketStat<Season>>,
    /// January through December.
    pub months: Vec<BucketStat<u32>>,
    pub recommendation: TimingRecommendation,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeSegment {
    pub record_count: usize,
    pub average_click_rate: f64,
}

/// Rows split at the median send count; large sends include the median.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeSplit {
    pub median_sent: f64,
    pub large: VolumeSegment,
    pub small: VolumeSegment,
}

/// Services split into response tiers at the tertiles of their averages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSegments {
    pub low_cutoff: f64,
    pub high_cutoff: f64,
    pub high: Vec<String>,
    pub medium: Vec<String>,
    pub low: Vec<String>,
}

/// Immutable result of analyzing one uploaded dataset.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub overview: Overview,
    /// Ranked best first.
    pub groups: Vec<MessageGroup>,
    /// In vocabulary order.
    pub keywords: Vec<KeywordStat>,
    /// Best average first.
    pub services: Vec<ServiceStat>,
    /// Monday through Sunday.
    pub weekdays: Vec<WeekdayStat>,
    pub high_performers: HighPerformers,
    pub emoji: EmojiEffect,
    pub timing: TimingAnalysis,
    /// `None` without send counts on both sides of the median.
    pub volume: Option<VolumeSplit>,
    pub segments: Option<ResponseSegments>,
}

impl AnalysisSnapshot {
    pub fn keyword(&self, keyword: Keyword) -> Option<&KeywordStat> {
        self.keywords.iter().find(|stat| stat.keyword == keyword)
    }

    pub fn weekday(&self, weekday: Weekday) -> Option<&WeekdayStat> {
        self.weekdays.iter().find(|stat| stat.weekday == weekday)
    }

    /// Scored keywords, best average first; ties keep vocabulary order.
    pub fn ranked_keywords(&self) -> Vec<(&Keyword, &KeywordPerformance)> {
        let mut ranked: Vec<(&Keyword, &KeywordPerformance)> = self
            .keywords
            .iter()
            .filter_map(|stat| stat.performance.as_ref().map(|p| (&stat.keyword, p)))
            .collect();
        ranked.sort_by(|a, b| b.1.average_click_rate.total_cmp(&a.1.average_click_rate));
        ranked
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Promotional,
    Urgent,
    Informational,
    Empathetic,
}

impl Tone {
    pub fn label(self) -> &'static str {
        match self {
            Tone::Promotional => "promotional",
            Tone::Urgent => "urgent",
            Tone::Informational => "informational",
            Tone::Empathetic => "empathetic",
        }
    }
}
