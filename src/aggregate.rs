use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate, Utc, Weekday};
use tracing::debug;
use uuid::Uuid;

use crate::config::AnalysisConfig;
use crate::keywords;
use crate::models::{
    AnalysisSnapshot, BestBucket, BucketStat, ChannelShare, EmojiEffect, MessageGroup, MonthPeriod,
    Overview, PaydayWindow, PerformanceRecord, ResponseSegments, Season, ServiceStat,
    TimingAnalysis, TimingRecommendation, VolumeSegment, VolumeSplit, WeekdayStat,
};
use crate::selector;

pub const EMOJIS: [&str; 15] = [
    "🎉", "💰", "👉", "🏠", "💸", "🎁", "📣", "💌", "🚘", "⚡", "🔔", "🚨", "💎", "🔥", "📢",
];

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(sorted.iter().sum::<f64>() / sorted.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Best average first, then more occurrences, then message text.
pub fn rank_groups(groups: &mut [MessageGroup]) {
    groups.sort_by(|a, b| {
        b.average_click_rate
            .total_cmp(&a.average_click_rate)
            .then_with(|| b.occurrences.cmp(&a.occurrences))
            .then_with(|| a.message_text.cmp(&b.message_text))
    });
}

#[derive(Default)]
struct GroupAccumulator {
    rates: Vec<f64>,
    total_sent: u64,
    total_clicks: u64,
    known_sends: bool,
    first_seen: Option<NaiveDate>,
    last_seen: Option<NaiveDate>,
    services: BTreeSet<String>,
}

/// Groups records by normalized message text, ranked.
pub fn group_messages<'a, I>(records: I) -> Vec<MessageGroup>
where
    I: IntoIterator<Item = &'a PerformanceRecord>,
{
    let mut map: BTreeMap<&str, GroupAccumulator> = BTreeMap::new();

    for record in records {
        let entry = map.entry(record.message_text.as_str()).or_default();
        entry.rates.push(record.click_rate);
        if let Some(sent) = record.sent_count {
            entry.total_sent = entry.total_sent.saturating_add(sent);
            entry.known_sends = true;
        }
        entry.total_clicks = entry
            .total_clicks
            .saturating_add(record.click_count.unwrap_or(0));
        if let Some(date) = record.send_date {
            entry.first_seen = Some(entry.first_seen.map_or(date, |d| d.min(date)));
            entry.last_seen = Some(entry.last_seen.map_or(date, |d| d.max(date)));
        }
        entry.services.insert(record.service.clone());
    }

    let mut groups: Vec<MessageGroup> = map
        .into_iter()
        .map(|(text, acc)| MessageGroup {
            message_text: text.to_string(),
            occurrences: acc.rates.len(),
            total_sent: acc.total_sent,
            total_clicks: acc.total_clicks,
            average_click_rate: mean(&acc.rates).unwrap_or_default(),
            max_click_rate: acc.rates.iter().copied().fold(f64::MIN, f64::max),
            min_click_rate: acc.rates.iter().copied().fold(f64::MAX, f64::min),
            pooled_click_rate: (acc.known_sends && acc.total_sent > 0)
                .then(|| acc.total_clicks as f64 / acc.total_sent as f64 * 100.0),
            first_seen: acc.first_seen,
            last_seen: acc.last_seen,
            services: acc.services,
        })
        .collect();

    rank_groups(&mut groups);
    groups
}

pub fn summarize_services(records: &[PerformanceRecord], top_n: usize) -> Vec<ServiceStat> {
    let mut map: BTreeMap<&str, Vec<&PerformanceRecord>> = BTreeMap::new();
    for record in records {
        map.entry(record.service.as_str()).or_default().push(record);
    }

    let mut summaries: Vec<ServiceStat> = map
        .into_iter()
        .map(|(service, members)| {
            let rates: Vec<f64> = members.iter().map(|r| r.click_rate).collect();
            let sends: Vec<f64> = members
                .iter()
                .filter_map(|r| r.sent_count)
                .map(|s| s as f64)
                .collect();
            let mut top_groups = group_messages(members.iter().copied());
            top_groups.truncate(top_n);

            ServiceStat {
                service: service.to_string(),
                record_count: members.len(),
                average_click_rate: mean(&rates).unwrap_or_default(),
                median_click_rate: median(&rates).unwrap_or_default(),
                average_sent: mean(&sends),
                top_groups,
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        b.average_click_rate
            .total_cmp(&a.average_click_rate)
            .then_with(|| a.service.cmp(&b.service))
    });
    summaries
}

/// One entry per weekday, Monday first; undated records are left out.
pub fn summarize_weekdays(records: &[PerformanceRecord], top_n: usize) -> Vec<WeekdayStat> {
    WEEKDAYS
        .into_iter()
        .map(|weekday| {
            let members: Vec<&PerformanceRecord> = records
                .iter()
                .filter(|r| r.send_date.map(|d| d.weekday()) == Some(weekday))
                .collect();
            let rates: Vec<f64> = members.iter().map(|r| r.click_rate).collect();
            let mut top_groups = group_messages(members.iter().copied());
            top_groups.truncate(top_n);

            WeekdayStat {
                weekday,
                record_count: members.len(),
                average_click_rate: mean(&rates),
                top_groups,
            }
        })
        .collect()
}

pub fn has_emoji(text: &str) -> bool {
    EMOJIS.iter().any(|emoji| text.contains(emoji))
}

pub fn emoji_effect(records: &[PerformanceRecord]) -> EmojiEffect {
    let (with, without): (Vec<&PerformanceRecord>, Vec<&PerformanceRecord>) =
        records.iter().partition(|r| has_emoji(&r.message_text));
    let with_rates: Vec<f64> = with.iter().map(|r| r.click_rate).collect();
    let without_rates: Vec<f64> = without.iter().map(|r| r.click_rate).collect();
    let with_emoji_mean = mean(&with_rates);
    let without_emoji_mean = mean(&without_rates);

    EmojiEffect {
        with_emoji: with.len(),
        without_emoji: without.len(),
        with_emoji_mean,
        without_emoji_mean,
        delta: with_emoji_mean.zip(without_emoji_mean).map(|(w, wo)| w - wo),
    }
}

fn bucket_stats<K, F>(buckets: &[K], dated: &[(NaiveDate, f64)], bucket_of: F) -> Vec<BucketStat<K>>
where
    K: Copy + PartialEq,
    F: Fn(NaiveDate) -> K,
{
    buckets
        .iter()
        .map(|&bucket| {
            let rates: Vec<f64> = dated
                .iter()
                .filter(|(date, _)| bucket_of(*date) == bucket)
                .map(|(_, rate)| *rate)
                .collect();
            BucketStat {
                bucket,
                record_count: rates.len(),
                average_click_rate: mean(&rates),
            }
        })
        .collect()
}

/// Highest average wins; ties keep the earlier bucket.
fn best_bucket<K: Copy>(stats: &[BucketStat<K>]) -> Option<BestBucket<K>> {
    stats
        .iter()
        .filter_map(|stat| {
            stat.average_click_rate.map(|average_click_rate| BestBucket {
                bucket: stat.bucket,
                average_click_rate,
            })
        })
        .reduce(|best, next| {
            if next.average_click_rate > best.average_click_rate {
                next
            } else {
                best
            }
        })
}

/// Month-period, payday, season and calendar-month patterns plus the best
/// bucket of each. Undated records are left out.
pub fn analyze_timing(records: &[PerformanceRecord], weekdays: &[WeekdayStat]) -> TimingAnalysis {
    let dated: Vec<(NaiveDate, f64)> = records
        .iter()
        .filter_map(|r| r.send_date.map(|date| (date, r.click_rate)))
        .collect();
    let months: Vec<u32> = (1..=12).collect();

    let month_periods = bucket_stats(&MonthPeriod::ALL, &dated, |d| MonthPeriod::of_day(d.day()));
    let payday = bucket_stats(&PaydayWindow::ALL, &dated, PaydayWindow::of_date);
    let seasons = bucket_stats(&Season::ALL, &dated, |d| Season::of_month(d.month()));
    let months = bucket_stats(&months, &dated, |d| d.month());

    let weekday_stats: Vec<BucketStat<Weekday>> = weekdays
        .iter()
        .map(|w| BucketStat {
            bucket: w.weekday,
            record_count: w.record_count,
            average_click_rate: w.average_click_rate,
        })
        .collect();

    let recommendation = TimingRecommendation {
        best_weekday: best_bucket(&weekday_stats),
        best_month_period: best_bucket(&month_periods),
        best_payday_window: best_bucket(&payday),
        best_season: best_bucket(&seasons),
    };

    TimingAnalysis {
        dated_records: dated.len(),
        month_periods,
        payday,
        seasons,
        months,
        recommendation,
    }
}

/// Compares rows sent to at least the median audience with smaller sends.
pub fn volume_split(records: &[PerformanceRecord]) -> Option<VolumeSplit> {
    let sized: Vec<(u64, f64)> = records
        .iter()
        .filter_map(|r| r.sent_count.map(|sent| (sent, r.click_rate)))
        .collect();
    let sends: Vec<f64> = sized.iter().map(|(sent, _)| *sent as f64).collect();
    let median_sent = median(&sends)?;

    let (large, small): (Vec<&(u64, f64)>, Vec<&(u64, f64)>) =
        sized.iter().partition(|(sent, _)| *sent as f64 >= median_sent);
    let segment = |rows: &[&(u64, f64)]| {
        let rates: Vec<f64> = rows.iter().map(|(_, rate)| *rate).collect();
        mean(&rates).map(|average_click_rate| VolumeSegment {
            record_count: rates.len(),
            average_click_rate,
        })
    };

    Some(VolumeSplit {
        median_sent,
        large: segment(&large)?,
        small: segment(&small)?,
    })
}

/// Lower and upper tertile cutoffs using exclusive-method interpolation.
fn tertile_cutoffs(values: &[f64]) -> Option<(f64, f64)> {
    const N: usize = 3;
    let mut data = values.to_vec();
    data.sort_by(f64::total_cmp);

    let len = data.len();
    match len {
        0 => None,
        1 => Some((data[0], data[0])),
        _ => {
            let m = len + 1;
            let cut = |i: usize| {
                let j = (i * m / N).clamp(1, len - 1);
                let delta = (i * m - j * N) as f64;
                (data[j - 1] * (N as f64 - delta) + data[j] * delta) / N as f64
            };
            Some((cut(1), cut(2)))
        }
    }
}

/// Splits services into high, medium and low response by their averages.
pub fn response_segments(services: &[ServiceStat]) -> Option<ResponseSegments> {
    let averages: Vec<f64> = services.iter().map(|s| s.average_click_rate).collect();
    let (low_cutoff, high_cutoff) = tertile_cutoffs(&averages)?;

    let mut segments = ResponseSegments {
        low_cutoff,
        high_cutoff,
        high: Vec::new(),
        medium: Vec::new(),
        low: Vec::new(),
    };
    for service in services {
        let name = service.service.clone();
        if service.average_click_rate >= high_cutoff {
            segments.high.push(name);
        } else if service.average_click_rate >= low_cutoff {
            segments.medium.push(name);
        } else {
            segments.low.push(name);
        }
    }
    Some(segments)
}

fn overview(records: &[PerformanceRecord], group_count: usize) -> Overview {
    let rates: Vec<f64> = records.iter().map(|r| r.click_rate).collect();
    let dates: Vec<NaiveDate> = records.iter().filter_map(|r| r.send_date).collect();
    let services: BTreeSet<&str> = records.iter().map(|r| r.service.as_str()).collect();

    let mut channel_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for channel in records.iter().filter_map(|r| r.channel.as_deref()) {
        *channel_counts.entry(channel).or_insert(0) += 1;
    }
    let mut channels: Vec<ChannelShare> = channel_counts
        .into_iter()
        .map(|(channel, count)| ChannelShare {
            channel: channel.to_string(),
            count,
        })
        .collect();
    channels.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.channel.cmp(&b.channel)));

    Overview {
        record_count: records.len(),
        group_count,
        service_count: services.len(),
        mean_click_rate: mean(&rates),
        median_click_rate: median(&rates),
        best_click_rate: rates.iter().copied().reduce(f64::max),
        worst_click_rate: rates.iter().copied().reduce(f64::min),
        first_date: dates.iter().min().copied(),
        last_date: dates.iter().max().copied(),
        channels,
    }
}

pub fn build_snapshot(records: &[PerformanceRecord], config: &AnalysisConfig) -> AnalysisSnapshot {
    let groups = group_messages(records);
    let overview = overview(records, groups.len());
    let high_performers = selector::select_high_performers(
        &groups,
        overview.mean_click_rate,
        &config.selector,
    );

    let services = summarize_services(records, config.top_n);
    let weekdays = summarize_weekdays(records, config.top_n);

    let snapshot = AnalysisSnapshot {
        id: Uuid::new_v4(),
        created_at: Utc::now(),
        keywords: keywords::score_keywords(records, &config.tiers),
        timing: analyze_timing(records, &weekdays),
        volume: volume_split(records),
        segments: response_segments(&services),
        emoji: emoji_effect(records),
        services,
        weekdays,
        high_performers,
        groups,
        overview,
    };

    debug!(
        snapshot_id = %snapshot.id,
        records = snapshot.overview.record_count,
        groups = snapshot.groups.len(),
        high_performers = snapshot.high_performers.groups.len(),
        "built analysis snapshot"
    );
    snapshot
}
