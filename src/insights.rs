use std::fmt::Write;

use serde::Serialize;

use crate::models::{AnalysisSnapshot, Tier};

/// Keywords used fewer times than this but beating the mean are flagged as underused.
const UNDERUSED_MATCHES: usize = 3;
const PREVIEW_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Overview,
    Services,
    Keywords,
    Weekdays,
    Timing,
    HighPerformers,
    Recommendations,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsightSection {
    pub kind: SectionKind,
    pub title: String,
    pub body: String,
}

impl InsightSection {
    fn new(kind: SectionKind, title: &str, body: String) -> Self {
        Self {
            kind,
            title: title.to_string(),
            body,
        }
    }
}

/// Builds the ordered insight sections. Output depends only on the snapshot's
/// aggregates, never on its id or creation time.
pub fn compose(snapshot: &AnalysisSnapshot) -> Vec<InsightSection> {
    vec![
        InsightSection::new(SectionKind::Overview, "Overall performance", overview(snapshot)),
        InsightSection::new(SectionKind::Services, "Performance by service", services(snapshot)),
        InsightSection::new(SectionKind::Keywords, "Effective keywords", keywords(snapshot)),
        InsightSection::new(SectionKind::Weekdays, "Performance by weekday", weekdays(snapshot)),
        InsightSection::new(SectionKind::Timing, "Timing and targeting", timing(snapshot)),
        InsightSection::new(
            SectionKind::HighPerformers,
            "High-performer patterns",
            high_performers(snapshot),
        ),
        InsightSection::new(
            SectionKind::Recommendations,
            "Recommendations",
            recommendations(snapshot),
        ),
    ]
}

fn preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(PREVIEW_CHARS).collect::<String>())
    }
}

fn overview(snapshot: &AnalysisSnapshot) -> String {
    let o = &snapshot.overview;
    let (Some(mean), Some(median), Some(best), Some(worst)) = (
        o.mean_click_rate,
        o.median_click_rate,
        o.best_click_rate,
        o.worst_click_rate,
    ) else {
        return "No rows were accepted, so there is nothing to summarize.".to_string();
    };

    let hp = &snapshot.high_performers;
    let mut body = format!(
        "Analyzed {} rows covering {} distinct messages across {} services. \
         The mean click rate is {:.2}% (median {:.2}%), ranging from {:.2}% to {:.2}%. \
         {} message groups ({:.1}% of all groups) cleared the high-performer threshold of {:.2}%.",
        o.record_count,
        o.group_count,
        o.service_count,
        mean,
        median,
        worst,
        best,
        hp.groups.len(),
        hp.groups.len() as f64 / o.group_count as f64 * 100.0,
        hp.threshold,
    );

    if let (Some(first), Some(last)) = (o.first_date, o.last_date) {
        let _ = write!(body, " Sends span {first} to {last}.");
    }
    let emoji = &snapshot.emoji;
    if let (Some(with), Some(without), Some(delta)) =
        (emoji.with_emoji_mean, emoji.without_emoji_mean, emoji.delta)
    {
        let _ = write!(
            body,
            " Messages with emoji average {:.2}% against {:.2}% without ({:+.2}pp).",
            with, without, delta
        );
    }
    body
}

fn services(snapshot: &AnalysisSnapshot) -> String {
    let Some(mean) = snapshot.overview.mean_click_rate else {
        return "No services to compare.".to_string();
    };
    let (Some(best), Some(worst)) = (snapshot.services.first(), snapshot.services.last()) else {
        return "No services to compare.".to_string();
    };

    if snapshot.services.len() == 1 {
        return format!(
            "Only '{}' appears in this dataset, averaging {:.2}% over {} rows.",
            best.service, best.average_click_rate, best.record_count
        );
    }

    format!(
        "'{}' leads with an average click rate of {:.2}% ({:+.2}pp vs the mean) over {} rows, \
         while '{}' trails at {:.2}% ({:+.2}pp). {} services were analyzed.",
        best.service,
        best.average_click_rate,
        best.average_click_rate - mean,
        best.record_count,
        worst.service,
        worst.average_click_rate,
        worst.average_click_rate - mean,
        snapshot.services.len(),
    )
}

fn keywords(snapshot: &AnalysisSnapshot) -> String {
    let Some(mean) = snapshot.overview.mean_click_rate else {
        return "No keyword statistics are available.".to_string();
    };
    let ranked = snapshot.ranked_keywords();
    let unmatched = snapshot.keywords.len() - ranked.len();

    let effective: Vec<String> = ranked
        .iter()
        .filter(|(_, perf)| perf.average_click_rate > mean)
        .take(3)
        .map(|(keyword, perf)| {
            format!(
                "'{}' ({}, {:.2}%, tier {})",
                keyword.copy_term(),
                keyword.label(),
                perf.average_click_rate,
                perf.tier.label()
            )
        })
        .collect();

    let mut body = if effective.is_empty() {
        format!("No tracked keyword beats the {mean:.2}% mean click rate.")
    } else {
        format!(
            "Keywords beating the {:.2}% mean, best first: {}.",
            mean,
            effective.join(", ")
        )
    };
    if unmatched > 0 {
        let _ = write!(body, " {unmatched} tracked keywords never appear in this dataset.");
    }
    body
}

fn weekdays(snapshot: &AnalysisSnapshot) -> String {
    let mut active: Vec<(chrono::Weekday, f64, usize)> = snapshot
        .weekdays
        .iter()
        .filter_map(|w| w.average_click_rate.map(|avg| (w.weekday, avg, w.record_count)))
        .collect();
    if active.is_empty() {
        return "No dated sends, so weekday performance is unknown.".to_string();
    }
    // Stable sort keeps Monday-first order among equal averages.
    active.sort_by(|a, b| b.1.total_cmp(&a.1));
    let best = active[0];
    let worst = active[active.len() - 1];

    if active.len() == 1 {
        return format!(
            "All dated sends fall on {}, averaging {:.2}% over {} rows.",
            best.0, best.1, best.2
        );
    }
    format!(
        "{} is the strongest weekday at {:.2}% over {} rows; {} is the weakest at {:.2}% over {} rows.",
        best.0, best.1, best.2, worst.0, worst.1, worst.2
    )
}

fn timing(snapshot: &AnalysisSnapshot) -> String {
    let best = &snapshot.timing.recommendation;
    let mut lines: Vec<String> = Vec::new();

    if let Some(day) = best.best_weekday {
        let rows = snapshot.weekday(day.bucket).map_or(0, |w| w.record_count);
        lines.push(format!(
            "Best weekday: {} at {:.2}% over {} rows.",
            day.bucket, day.average_click_rate, rows
        ));
    }
    if let Some(period) = best.best_month_period {
        lines.push(format!(
            "Best part of the month: {} at {:.2}%.",
            period.bucket.label(),
            period.average_click_rate
        ));
    }
    if let Some(window) = best.best_payday_window {
        lines.push(format!(
            "Best payday timing: {} at {:.2}%.",
            window.bucket.label(),
            window.average_click_rate
        ));
    }
    if let Some(season) = best.best_season {
        lines.push(format!(
            "Best season: {} at {:.2}%.",
            season.bucket.label(),
            season.average_click_rate
        ));
    }
    if lines.is_empty() {
        lines.push("No dated rows, so timing patterns are unknown.".to_string());
    }

    if let Some(volume) = &snapshot.volume {
        lines.push(format!(
            "Sends to at least {:.0} recipients average {:.2}% against {:.2}% for smaller sends.",
            volume.median_sent, volume.large.average_click_rate, volume.small.average_click_rate
        ));
    }
    if let Some(segments) = &snapshot.segments {
        let list = |names: &[String]| {
            if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            }
        };
        lines.push(format!(
            "High-response services (>= {:.2}%): {}; low-response (< {:.2}%): {}.",
            segments.high_cutoff,
            list(&segments.high),
            segments.low_cutoff,
            list(&segments.low)
        ));
    }
    lines.join("\n")
}

fn high_performers(snapshot: &AnalysisSnapshot) -> String {
    let hp = &snapshot.high_performers;
    let Some(top) = hp.groups.first() else {
        return format!(
            "No message group reached the {:.2}% threshold within the top {} ranked groups.",
            hp.threshold, hp.eligible_count
        );
    };
    let repeated = hp.groups.iter().filter(|g| g.occurrences > 1).count();

    format!(
        "The best message is \"{}\" at {:.2}% across {} rows. {} of {} high performers were sent \
         more than once, which marks them as proven copy.",
        preview(&top.message_text),
        top.average_click_rate,
        top.occurrences,
        repeated,
        hp.groups.len(),
    )
}

fn recommendations(snapshot: &AnalysisSnapshot) -> String {
    let Some(mean) = snapshot.overview.mean_click_rate else {
        return "Upload rows with click data to get recommendations.".to_string();
    };
    let mut items: Vec<String> = Vec::new();

    for (keyword, perf) in snapshot.ranked_keywords() {
        if perf.tier == Tier::High {
            items.push(format!(
                "promote keyword '{}' ({}), tier=high, {:+.2}pp vs mean",
                keyword.copy_term(),
                keyword.label(),
                perf.average_click_rate - mean
            ));
        }
    }

    let underused: Vec<String> = snapshot
        .ranked_keywords()
        .into_iter()
        .filter(|(_, perf)| {
            perf.average_click_rate > mean && perf.matching_message_count < UNDERUSED_MATCHES
        })
        .map(|(keyword, perf)| format!("'{}' ({} uses)", keyword.copy_term(), perf.matching_message_count))
        .collect();
    if !underused.is_empty() {
        items.push(format!("use effective but rare keywords more often: {}", underused.join(", ")));
    }

    let lagging: Vec<String> = snapshot
        .services
        .iter()
        .filter(|s| s.average_click_rate < mean)
        .map(|s| format!("'{}' ({:.2}%)", s.service, s.average_click_rate))
        .collect();
    if !lagging.is_empty() {
        items.push(format!("rework copy for services below the mean: {}", lagging.join(", ")));
    }

    let best_day = snapshot
        .weekdays
        .iter()
        .filter_map(|w| w.average_click_rate.map(|avg| (w.weekday, avg)))
        .reduce(|best, next| if next.1 > best.1 { next } else { best });
    if let Some((day, avg)) = best_day {
        items.push(format!("schedule key sends on {day} ({avg:.2}%, {:+.2}pp vs mean)", avg - mean));
    }

    let best = &snapshot.timing.recommendation;
    if let (Some(period), Some(window)) = (best.best_month_period, best.best_payday_window) {
        items.push(format!(
            "time finance offers for the {} ({:.2}%) within the {} ({:.2}%)",
            window.bucket.label(),
            window.average_click_rate,
            period.bucket.label(),
            period.average_click_rate
        ));
    }

    if let Some(volume) = &snapshot.volume {
        let large = volume.large.average_click_rate;
        let small = volume.small.average_click_rate;
        let (better, rate, other) = if large > small {
            ("large", large, small)
        } else {
            ("small", small, large)
        };
        if rate > other {
            items.push(format!(
                "favor {better} sends around the {:.0}-recipient median ({rate:.2}% vs {other:.2}%)",
                volume.median_sent
            ));
        }
    }

    if items.is_empty() {
        return "Performance is even across services, keywords and weekdays; no change stands out."
            .to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn rate_cell(rate: Option<f64>) -> String {
    rate.map(|r| format!("{r:.2}%")).unwrap_or_else(|| "-".to_string())
}

pub fn render_report(snapshot: &AnalysisSnapshot, source: Option<&str>) -> String {
    let mut output = String::new();
    let source_label = source.unwrap_or("uploaded CSV");

    let _ = writeln!(output, "# Notification Performance Report");
    let _ = writeln!(
        output,
        "Generated from {} ({} records, snapshot {})",
        source_label, snapshot.overview.record_count, snapshot.id
    );

    for section in compose(snapshot) {
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", section.title);
        let _ = writeln!(output, "{}", section.body);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Keyword Table");
    let _ = writeln!(output, "| keyword | term | matches | avg click rate | tier |");
    let _ = writeln!(output, "|---|---|---|---|---|");
    for stat in &snapshot.keywords {
        let (matches, tier) = match &stat.performance {
            Some(perf) => (perf.matching_message_count.to_string(), perf.tier.label()),
            None => ("-".to_string(), "-"),
        };
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} |",
            stat.keyword.label(),
            stat.keyword.copy_term(),
            matches,
            rate_cell(stat.average_click_rate()),
            tier
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Service Table");
    if snapshot.services.is_empty() {
        let _ = writeln!(output, "No services recorded.");
    } else {
        let _ = writeln!(output, "| service | rows | avg | median |");
        let _ = writeln!(output, "|---|---|---|---|");
        for service in &snapshot.services {
            let _ = writeln!(
                output,
                "| {} | {} | {:.2}% | {:.2}% |",
                service.service,
                service.record_count,
                service.average_click_rate,
                service.median_click_rate
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Weekday Table");
    let _ = writeln!(output, "| weekday | rows | avg |");
    let _ = writeln!(output, "|---|---|---|");
    for day in &snapshot.weekdays {
        let _ = writeln!(
            output,
            "| {} | {} | {} |",
            day.weekday,
            day.record_count,
            rate_cell(day.average_click_rate)
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Top Messages");
    if snapshot.high_performers.groups.is_empty() {
        let _ = writeln!(output, "No high performers in this dataset.");
    } else {
        for group in &snapshot.high_performers.groups {
            let _ = writeln!(
                output,
                "- \"{}\" {:.2}% across {} rows ({})",
                group.message_text,
                group.average_click_rate,
                group.occurrences,
                group.services.iter().cloned().collect::<Vec<_>>().join(", ")
            );
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::build_snapshot;
    use crate::config::AnalysisConfig;
    use crate::models::PerformanceRecord;
    use crate::test_support::{dated, record};

    fn sample_snapshot() -> AnalysisSnapshot {
        let records = vec![
            dated("(광고) 🎉 최대 혜택 확인하기", "신용대출", 14.0, (2025, 1, 1)),
            dated("(광고) 🎉 최대 혜택 확인하기", "신용대출", 13.0, (2025, 1, 8)),
            dated("(광고) 금리 비교해보세요", "주택담보대출", 6.0, (2025, 1, 2)),
            dated("(광고) 신용점수 조회", "신용점수조회", 4.0, (2025, 1, 3)),
            record("(광고) 한도 확인", "신용대출", 9.0),
        ];
        build_snapshot(&records, &AnalysisConfig::default())
    }

    #[test]
    fn sections_come_in_fixed_order() {
        let kinds: Vec<SectionKind> = compose(&sample_snapshot()).iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SectionKind::Overview,
                SectionKind::Services,
                SectionKind::Keywords,
                SectionKind::Weekdays,
                SectionKind::Timing,
                SectionKind::HighPerformers,
                SectionKind::Recommendations,
            ]
        );
    }

    #[test]
    fn output_is_stable_across_snapshots_of_the_same_data() {
        let first = compose(&sample_snapshot());
        let second = compose(&sample_snapshot());
        assert_eq!(first, second);
    }

    #[test]
    fn sections_cite_snapshot_numbers() {
        let sections = compose(&sample_snapshot());
        // Mean of 14, 13, 6, 4, 9.
        assert!(sections[0].body.contains("9.20%"));
        assert!(sections[1].body.contains("'신용대출' leads"));
        assert!(sections[3].body.contains("Wed is the strongest weekday at 13.50%"));
        assert!(sections[5].body.contains("13.50% across 2 rows"));

        let recommendations = &sections[6].body;
        assert!(recommendations.contains("promote keyword '혜택' (benefit), tier=high, +4.30pp vs mean"));
        assert!(recommendations.contains("'주택담보대출' (6.00%)"));
    }

    #[test]
    fn empty_snapshot_produces_placeholder_text() {
        let snapshot = build_snapshot(&[], &AnalysisConfig::default());
        let sections = compose(&snapshot);
        assert_eq!(sections.len(), 7);
        assert!(sections[0].body.contains("nothing to summarize"));
        assert!(sections[3].body.contains("unknown"));
        assert!(sections[4].body.contains("timing patterns are unknown"));
    }

    #[test]
    fn timing_section_and_recommendations_cite_buckets() {
        let records: Vec<PerformanceRecord> = [
            ("(광고) 급여일 혜택", "신용대출", 14.0, (2025, 1, 25), 5000),
            ("(광고) 월초 안내", "신용대출", 6.0, (2025, 2, 3), 3000),
            ("(광고) 월중 안내", "카드", 5.0, (2025, 2, 14), 100),
        ]
        .into_iter()
        .map(|(message, service, rate, date, sent)| PerformanceRecord {
            sent_count: Some(sent),
            ..dated(message, service, rate, date)
        })
        .collect();
        let snapshot = build_snapshot(&records, &AnalysisConfig::default());
        let sections = compose(&snapshot);
        let timing = &sections[4].body;

        // 2025-01-25 is a Saturday.
        assert!(timing.contains("Best weekday: Sat at 14.00% over 1 rows."));
        assert!(timing.contains("Best part of the month: late month (days 21-31) at 14.00%."));
        assert!(timing.contains("Best payday timing: payday (25th or month end) at 14.00%."));
        assert!(timing.contains("Best season: winter (Dec-Feb) at 8.33%."));
        assert!(timing.contains(
            "Sends to at least 3000 recipients average 10.00% against 5.00% for smaller sends."
        ));
        assert!(timing.contains("High-response services (>= "));

        let recommendations = &sections[6].body;
        assert!(recommendations.contains(
            "time finance offers for the payday (25th or month end) (14.00%) within the late month (days 21-31) (14.00%)"
        ));
        assert!(recommendations.contains("favor large sends around the 3000-recipient median (10.00% vs 5.00%)"));
    }

    #[test]
    fn report_contains_tables() {
        let report = render_report(&sample_snapshot(), Some("history.csv"));
        assert!(report.starts_with("# Notification Performance Report"));
        assert!(report.contains("Generated from history.csv (5 records"));
        assert!(report.contains("| benefit | 혜택 | 2 | 13.50% | high |"));
        assert!(report.contains("| discount | 할인 | - | - | - |"));
        assert!(report.contains("## Top Messages"));
    }
}
