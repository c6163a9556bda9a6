use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use reply_triage::channels::{ImapSmtpTransport, MailConfig, TerminalReviewer};
use reply_triage::config::TriageConfig;
use reply_triage::llm::{LlmConfig, create_provider};
use reply_triage::pipeline::{ReviewSummary, TriageReport};
use reply_triage::report;
use reply_triage::runner::Runner;
use reply_triage::store::NeedsResponseStore;

#[derive(Parser)]
#[command(name = "reply-triage")]
#[command(about = "Find mail that needs a reply, draft it, and send it in-thread")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify recent mail and write the needs-response set
    Triage {
        /// Look back this many hours instead of TRIAGE_LOOKBACK_HOURS
        #[arg(long)]
        lookback_hours: Option<u32>,
    },
    /// Draft and review replies for the needs-response set
    Review,
    /// Triage, then review
    Run {
        #[arg(long)]
        lookback_hours: Option<u32>,
    },
    /// Print the needs-response report from the last triage
    Report,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let _log_guard = init_tracing();

    let config = TriageConfig::from_env().context("Invalid triage configuration")?;

    match cli.command {
        Command::Report => {
            let store = NeedsResponseStore::new(config.needs_response_path());
            let snapshot = store
                .load()
                .await
                .context("Failed to read the needs-response set")?;
            let text = report::write_report(&config.report_path(), &snapshot.records).await?;
            println!("{text}");
        }
        Command::Triage { lookback_hours } => {
            let runner = build_runner(config)?;
            let triage = runner.triage(lookback(lookback_hours)).await.context("Triage failed")?;
            print_triage(&triage, &runner);
        }
        Command::Review => {
            let runner = build_runner(config)?;
            let mut reviewer = TerminalReviewer::stdin();
            let summary = runner.review(&mut reviewer).await.context("Review failed")?;
            print_review(&summary);
        }
        Command::Run { lookback_hours } => {
            let runner = build_runner(config)?;
            let triage = runner.triage(lookback(lookback_hours)).await.context("Triage failed")?;
            print_triage(&triage, &runner);

            if triage.records.is_empty() {
                return Ok(());
            }
            let mut reviewer = TerminalReviewer::stdin();
            let summary = runner.review(&mut reviewer).await.context("Review failed")?;
            print_review(&summary);
        }
    }

    Ok(())
}

fn build_runner(config: TriageConfig) -> anyhow::Result<Runner> {
    let mail = MailConfig::from_env().context("Invalid mailbox configuration")?;
    let llm_config = LlmConfig::from_env().context("Invalid LLM configuration")?;
    let llm = create_provider(&llm_config)?;

    let own_address = mail.from_address.clone();
    let transport = Arc::new(ImapSmtpTransport::new(mail));
    Ok(Runner::new(config, transport, llm, &own_address))
}

fn lookback(hours: Option<u32>) -> Option<chrono::Duration> {
    hours.map(|h| chrono::Duration::hours(i64::from(h)))
}

/// Stderr logging, plus a daily rolling file when `TRIAGE_LOG_DIR` is set.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing() -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("TRIAGE_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "reply-triage.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        _ => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

fn print_triage(triage: &TriageReport, runner: &Runner) {
    println!(
        "Fetched {}: {} need a response, {} already handled, {} filtered, {} not important.",
        triage.fetched,
        triage.records.len(),
        triage.duplicates,
        triage.filtered,
        triage.not_important
    );
    for failed in &triage.fetch_failures {
        eprintln!(
            "  Could not fetch {} #{}: {}",
            failed.folder, failed.id, failed.reason
        );
    }
    for failed in &triage.unclassified {
        eprintln!(
            "  Could not classify {} ({}): {}",
            failed.message_id, failed.key, failed.error
        );
    }
    println!("Report: {}", runner.config().report_path().display());
}

fn print_review(summary: &ReviewSummary) {
    println!(
        "Sent {}, skipped {}, {} send failure(s), {} draft failure(s).",
        summary.sent, summary.skipped, summary.send_failures, summary.draft_failures
    );
    if summary.interrupted {
        println!("Review stopped early; run `reply-triage review` to continue.");
    }
}
