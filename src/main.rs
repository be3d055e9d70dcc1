use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use series_harvester::{
    jobs_from_catalog, AcquisitionManager, BrowserDriver, CatalogStore, Config, EpisodeJob,
    HarvestPipeline, HttpSegmentSource, LinkCrawler, PlaybackController, RunReport,
    StreamAssembler, WebDriverClient,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "series-harvester")]
#[command(version, about = "Harvest segmented video streams and catalog series hosting links")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the usual search locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover seasons, episodes and hosting links for a list of series
    Crawl {
        /// File with one series name per line
        #[arg(long)]
        series_file: PathBuf,
        /// Catalog file to extend
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Harvest catalogued episodes of one series
    Harvest {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        series: String,
        /// Output directory (defaults to output.base_dir)
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        season: Option<u32>,
        #[arg(long)]
        episode: Option<u32>,
    },
    /// Harvest a single hosting page
    Episode {
        #[arg(long)]
        url: String,
        /// Output directory (defaults to output.base_dir)
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long, default_value = "episode")]
        series: String,
        #[arg(long, default_value_t = 1)]
        season: u32,
        #[arg(long, default_value_t = 1)]
        episode: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("series_harvester={},warn", config.output.log_level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.validate()?;
    info!("🚀 Series Harvester starting...");
    info!("{}", config.summary());

    match cli.command {
        Commands::Crawl {
            series_file,
            catalog,
        } => crawl(config, &series_file, catalog).await,
        Commands::Harvest {
            catalog,
            series,
            output,
            season,
            episode,
        } => {
            let Some(entry) = CatalogStore::new(&catalog).find(&series).await? else {
                return Err(anyhow!(
                    "series '{}' is not in catalog {}",
                    series,
                    catalog.display()
                ));
            };
            let output = output.unwrap_or_else(|| config.output.base_dir.clone());
            let jobs = jobs_from_catalog(&entry, season, episode, &output);
            if jobs.is_empty() {
                warn!("No catalogued episodes match the selection");
                return Ok(());
            }
            harvest(&config, jobs, &output).await
        }
        Commands::Episode {
            url,
            output,
            series,
            season,
            episode,
        } => {
            let output = output.unwrap_or_else(|| config.output.base_dir.clone());
            let job = EpisodeJob::new(series, season, episode, vec![url], &output);
            harvest(&config, vec![job], &output).await
        }
    }
}

async fn crawl(mut config: Config, series_file: &Path, catalog: Option<PathBuf>) -> Result<()> {
    if let Some(catalog) = catalog {
        config.crawler.catalog_path = catalog;
    }

    let content = tokio::fs::read_to_string(series_file)
        .await
        .with_context(|| format!("reading series list {}", series_file.display()))?;
    let series: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect();
    info!("📋 {} series to crawl", series.len());

    let crawler = LinkCrawler::new(&config.crawler)?;
    let summary = crawler.run(&series).await?;
    info!("📊 {}", summary.report());
    Ok(())
}

async fn harvest(config: &Config, jobs: Vec<EpisodeJob>, report_dir: &Path) -> Result<()> {
    let browser = Arc::new(WebDriverClient::connect(&config.browser).await?);

    let source = Arc::new(HttpSegmentSource::new(&config.acquisition)?);
    let driver: Arc<dyn BrowserDriver> = browser.clone();
    let pipeline = HarvestPipeline::new(
        PlaybackController::new(driver, config.playback.clone()),
        AcquisitionManager::new(source, config.acquisition.max_concurrent_downloads),
        StreamAssembler::new(&config.assembly),
        config,
    );

    let report = pipeline.run(&jobs).await;
    log_results(&report);
    if config.output.save_report {
        report.save(report_dir).await?;
    }

    if let Err(e) = browser.quit().await {
        warn!("Failed to close browser session: {}", e);
    }
    Ok(())
}

fn log_results(report: &RunReport) {
    info!("🎉 Harvest completed in {:.2}s", report.total_time.as_secs_f64());
    info!("✅ Successful: {}", report.successful);
    info!("❌ Failed: {}", report.failed);
    for episode in report.episodes.iter().filter(|e| e.error_message.is_some()) {
        error!(
            "  {} [{}]: {}",
            episode.label,
            episode.failure_kind.as_deref().unwrap_or("unknown"),
            episode.error_message.as_deref().unwrap_or_default()
        );
    }
}
