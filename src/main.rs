use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod aggregate;
mod config;
mod error;
mod ingest;
mod insights;
mod keywords;
mod llm;
mod models;
mod selector;
mod service;
mod synthesizer;
#[cfg(test)]
mod test_support;

use config::AppConfig;
use ingest::ColumnMapping;
use llm::{CopyGenerator, OpenAiCompatGenerator};
use models::Tone;
use service::{AnalysisService, UploadSummary};
use synthesizer::{GenerationOutcome, GenerationRequest, Synthesizer};

#[derive(Parser)]
#[command(name = "notification-insights")]
#[command(about = "Click-rate analytics and copy generation for push notifications", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct InputArgs {
    /// Send-history CSV export
    #[arg(long)]
    csv: PathBuf,
    /// Explicit column mapping, e.g. `--map message=알림 문구`
    #[arg(long = "map", value_name = "FIELD=HEADER")]
    map: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a CSV and print the upload summary
    Analyze {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long)]
        json: bool,
    },
    /// Print natural-language insights
    Insights {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long)]
        json: bool,
    },
    /// Generate candidate messages grounded in the analysis
    Generate {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long)]
        description: String,
        #[arg(long)]
        service: Option<String>,
        #[arg(long)]
        audience: Option<String>,
        #[arg(long, value_enum, default_value_t = Tone::Promotional)]
        tone: Tone,
        #[arg(long = "keyword")]
        keywords: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Generate a markdown report
    Report {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,notification_insights=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("failed to load configuration")?;

    let weights = config.analysis.prediction.clone();
    let synthesizer = match &config.llm {
        Some(llm) => {
            info!(model = %llm.model, timeout_secs = llm.timeout.as_secs(), "external generation enabled");
            let generator: Arc<dyn CopyGenerator> = Arc::new(OpenAiCompatGenerator::new(llm));
            Synthesizer::new(generator, weights, llm.timeout)
        }
        None => Synthesizer::template_only(weights),
    };
    let service = AnalysisService::new(config.analysis, synthesizer);

    match cli.command {
        Commands::Analyze { input, json } => {
            let summary = load(&service, &input)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
        }
        Commands::Insights { input, json } => {
            load(&service, &input)?;
            let sections = service.insights()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sections)?);
            } else {
                for section in &sections {
                    println!("## {}\n{}\n", section.title, section.body);
                }
            }
        }
        Commands::Generate {
            input,
            description,
            service: target_service,
            audience,
            tone,
            keywords,
            json,
        } => {
            load(&service, &input)?;
            let request = GenerationRequest {
                description,
                service: target_service,
                audience,
                tone,
                keyword_hints: keywords,
            };
            let outcome = service.generate(&request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&outcome);
            }
        }
        Commands::Report { input, out } => {
            load(&service, &input)?;
            let source = input.csv.display().to_string();
            let report = service.report(Some(&source))?;
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn load(service: &AnalysisService, input: &InputArgs) -> anyhow::Result<UploadSummary> {
    let mapping = ColumnMapping::from_pairs(&input.map)?;
    let raw = read_input(&input.csv)?;
    let summary = service
        .upload(&raw, &mapping)
        .with_context(|| format!("failed to analyze {}", input.csv.display()))?;
    Ok(summary)
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_summary(summary: &UploadSummary) {
    println!(
        "Analyzed {} rows: {} accepted, {} rejected.",
        summary.total_rows, summary.accepted, summary.rejected
    );
    for (reason, count) in &summary.rejection_counts {
        println!("- rejected {count} rows: {reason}");
    }
    for row in &summary.rejected_rows {
        println!("  line {}: {}", row.line, row.reason);
    }
    if summary.rate_mismatches > 0 {
        println!(
            "{} rows had a click rate that disagrees with their counts.",
            summary.rate_mismatches
        );
    }
    if let Some(mean) = summary.overview.mean_click_rate {
        println!("Mean click rate {mean:.2}%, high-performer threshold {:.2}%.", summary.threshold);
    }

    if summary.high_performers.is_empty() {
        println!("No messages cleared the threshold.");
    } else {
        println!("High performers:");
        for group in &summary.high_performers {
            println!(
                "- {:.2}% x{} {}",
                group.average_click_rate, group.occurrences, group.message_text
            );
        }
    }

    println!("Keywords:");
    for stat in &summary.keywords {
        if let Some(perf) = &stat.performance {
            println!(
                "- {} ({}) {:.2}% over {} rows, tier {}",
                stat.keyword.copy_term(),
                stat.keyword.label(),
                perf.average_click_rate,
                perf.matching_message_count,
                perf.tier.label()
            );
        }
    }

    println!("Services:");
    for stat in &summary.services {
        println!(
            "- {} {:.2}% over {} rows",
            stat.service, stat.average_click_rate, stat.record_count
        );
    }

    println!("Weekdays:");
    for stat in &summary.weekdays {
        match stat.average_click_rate {
            Some(rate) => println!("- {} {:.2}% over {} rows", stat.weekday, rate, stat.record_count),
            None => println!("- {} no rows", stat.weekday),
        }
    }

    let best = &summary.timing.recommendation;
    if let Some(period) = best.best_month_period {
        println!(
            "Best part of the month: {} at {:.2}%.",
            period.bucket.label(),
            period.average_click_rate
        );
    }
    if let Some(window) = best.best_payday_window {
        println!("Best payday timing: {} at {:.2}%.", window.bucket.label(), window.average_click_rate);
    }
    if let Some(season) = best.best_season {
        println!("Best season: {} at {:.2}%.", season.bucket.label(), season.average_click_rate);
    }
    if let Some(volume) = &summary.volume {
        println!(
            "Sends >= {:.0}: {:.2}% over {} rows; smaller: {:.2}% over {} rows.",
            volume.median_sent,
            volume.large.average_click_rate,
            volume.large.record_count,
            volume.small.average_click_rate,
            volume.small.record_count
        );
    }
}

fn print_outcome(outcome: &GenerationOutcome) {
    match &outcome.fallback_reason {
        Some(reason) => println!("Template candidates ({reason}):"),
        None => println!("Candidates from {}:", outcome.generator),
    }
    for (i, candidate) in outcome.candidates.iter().enumerate() {
        println!(
            "{}. [{}] {}\n   predicted {:.2}% (confidence {:.2})\n   {}",
            i + 1,
            candidate.style,
            candidate.message,
            candidate.predicted_rate,
            candidate.confidence,
            candidate.reasoning
        );
    }
    if !outcome.related.is_empty() {
        println!("Related high performers:");
        for related in &outcome.related {
            println!(
                "- {:.2}% (match {}) {}",
                related.average_click_rate, related.match_score, related.message
            );
        }
    }
}
