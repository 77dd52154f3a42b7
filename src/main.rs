use biblio_harvester::config::HarvesterConfig;
use biblio_harvester::pipeline::delivery::DeliveryTracker;
use biblio_harvester::pipeline::ingestion::harvester::HarvestRun;
use biblio_harvester::pipeline::ingestion::translation_server::TranslationServer;
use biblio_harvester::pipeline::processing::scheduler::ConversionManager;
use biblio_harvester::pipeline::progress::ProgressFile;
use biblio_harvester::pipeline::sink::{OutputFormat, OutputSink};
use biblio_harvester::report::ErrorLogger;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "biblio_harvester")]
#[command(about = "Bibliographic metadata harvester for academic journal publishers")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Harvest the configured journals and write the output artifact
    Harvest {
        /// Path to the harvester config file
        #[arg(long, default_value = "harvester.conf")]
        config: PathBuf,
        /// Output file
        #[arg(long, default_value = "records.xml")]
        output: PathBuf,
        /// Output format: marcxml (default), json, or a translation-server
        /// export format such as bibtex or ris
        #[arg(long, default_value = "marcxml")]
        format: String,
        /// Specific journals to harvest (comma-separated); default: all
        #[arg(long)]
        journals: Option<String>,
        /// Delivery tracking database
        #[arg(long, default_value = "delivery_tracking.db")]
        tracking_db: PathBuf,
        /// Progress file, rewritten after each processed URL
        #[arg(long)]
        progress_file: Option<PathBuf>,
        /// Error report file written at the end of the run
        #[arg(long)]
        error_report: Option<PathBuf>,
        /// Maximum number of concurrently executing conversions
        #[arg(long, default_value_t = 8)]
        max_conversions: usize,
    },
}

async fn run_harvest(
    config_path: PathBuf,
    output: PathBuf,
    format: String,
    journals: Option<String>,
    tracking_db: PathBuf,
    progress_file: Option<PathBuf>,
    error_report: Option<PathBuf>,
    max_conversions: usize,
) -> anyhow::Result<()> {
    let config = HarvesterConfig::load(&config_path)?;
    let journal_filter: Option<Vec<String>> = journals
        .map(|list| list.split(',').map(|s| s.trim().to_string()).collect());

    let tracker = DeliveryTracker::open(&tracking_db)?;
    let manager = ConversionManager::new(max_conversions);
    let mut sink = OutputSink::new(OutputFormat::from_name(&format)?, &output);
    let mut error_logger = ErrorLogger::new();
    let progress = progress_file.map(ProgressFile::new);

    // All journals talk to the same translation server; the user agent comes
    // from the delivery group configuration.
    let user_agent = config
        .groups
        .values()
        .next()
        .map(|group| group.user_agent.clone())
        .unwrap_or_else(|| "biblio_harvester/0.1".to_string());
    let api = TranslationServer::new(
        &config.global.translation_server_url,
        &user_agent,
        config.global.download_timeout,
    )?;

    let totals = {
        let mut run = HarvestRun::new(
            &config.global,
            &api,
            &tracker,
            &manager,
            &mut sink,
            &mut error_logger,
            progress.as_ref(),
        );

        for journal in &config.journals {
            if let Some(filter) = &journal_filter {
                if !filter.contains(&journal.name) {
                    continue;
                }
            }
            let group = config.group_for(journal);
            let span = tracing::info_span!("journal", name = %journal.name);
            let _enter = span.enter();
            if let Err(e) = run.harvest_journal(journal, group).await {
                error!(journal = %journal.name, error = %e, "journal harvest failed");
            }
        }
        run.totals.clone()
    };

    let output_path = sink.finish(&api).await?;
    manager.shutdown().await;

    println!("\n📊 Harvest results:");
    println!("   Harvested URLs: {}", totals.harvested_urls);
    println!("   Generated records: {}", totals.generated_records);
    println!("   Written records: {}", totals.written_records);
    println!("   Previously delivered: {}", totals.previously_delivered);
    println!("   Skipped (exclusion filters): {}", totals.skipped_exclusion);
    println!("   Skipped (online-first): {}", totals.skipped_online_first);
    println!("   Skipped (early-view): {}", totals.skipped_early_view);
    println!("   Output file: {}", output_path.display());

    let error_counts = error_logger.error_counts_by_kind();
    if !error_counts.is_empty() {
        warn!("errors were encountered during the run");
        println!("\n⚠️  Errors by kind:");
        for (kind, count) in &error_counts {
            println!("   {}: {}", kind.as_str(), count);
        }
    }

    if let Some(report_path) = error_report {
        error_logger.write_report(&report_path)?;
        info!(path = %report_path.display(), "wrote error report");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    biblio_harvester::logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Harvest {
            config,
            output,
            format,
            journals,
            tracking_db,
            progress_file,
            error_report,
            max_conversions,
        } => {
            println!("🔄 Running harvest...");
            run_harvest(
                config,
                output,
                format,
                journals,
                tracking_db,
                progress_file,
                error_report,
                max_conversions,
            )
            .await?;
        }
    }

    Ok(())
}
