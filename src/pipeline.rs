use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

use crate::acquisition::AcquisitionManager;
use crate::assembler::{StreamAssembler, RECOVERY_MANIFEST};
use crate::config::Config;
use crate::crawler::SeriesCatalog;
use crate::error::HarvestError;
use crate::models::{AssemblyResult, EpisodeJob};
use crate::output::{sanitize_filename, unique_file_path};
use crate::playback::{PlaybackController, PlaybackEnd, PlaybackReport};

pub const REPORT_FILE: &str = "harvest_report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Completed,
    Failed,
}

/// Outcome of one episode job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub label: String,
    pub series: String,
    pub season: u32,
    pub episode: u32,
    pub status: EpisodeStatus,
    /// Hosting page that delivered the segments
    pub hosting_url: Option<String>,
    pub page_title: Option<String>,
    pub playback_end: Option<PlaybackEnd>,
    pub segments_harvested: usize,
    pub segments_staged: usize,
    pub segment_failures: Vec<String>,
    pub staging_dir: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub output_size: Option<u64>,
    pub failure_kind: Option<String>,
    pub error_message: Option<String>,
    pub processing_time: Duration,
}

impl EpisodeReport {
    fn new(job: &EpisodeJob) -> Self {
        Self {
            label: job.label(),
            series: job.series.clone(),
            season: job.season,
            episode: job.episode,
            status: EpisodeStatus::Failed,
            hosting_url: None,
            page_title: None,
            playback_end: None,
            segments_harvested: 0,
            segments_staged: 0,
            segment_failures: Vec::new(),
            staging_dir: None,
            output_path: None,
            output_size: None,
            failure_kind: None,
            error_message: None,
            processing_time: Duration::ZERO,
        }
    }
}

/// Overall results of a harvesting run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_time: Duration,
    pub episodes: Vec<EpisodeReport>,
}

impl RunReport {
    /// Write the report as pretty JSON into `dir`
    pub async fn save(&self, dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(REPORT_FILE);
        let json_data = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, json_data).await?;
        info!("💾 Run report saved to: {}", path.display());
        Ok(path)
    }
}

/// Turn catalog entries into episode jobs. Films become season 0, numbered by
/// title order, and are included unless a season other than 0 is requested.
pub fn jobs_from_catalog(
    catalog: &SeriesCatalog,
    season: Option<u32>,
    episode: Option<u32>,
    output_dir: &Path,
) -> Vec<EpisodeJob> {
    let wanted_episode = |n: u32| episode.map_or(true, |e| e == n);
    let mut jobs = Vec::new();

    for entry in &catalog.seasons {
        if season.is_some_and(|s| s != entry.season_number) {
            continue;
        }
        for link in entry.episode_links.iter().filter(|l| wanted_episode(l.episode_number)) {
            jobs.push(EpisodeJob::new(
                catalog.series_name.clone(),
                entry.season_number,
                link.episode_number,
                link.links.ranked_urls(),
                output_dir,
            ));
        }
    }

    if season.map_or(true, |s| s == 0) {
        let mut films: Vec<_> = catalog.films.iter().collect();
        films.sort_by(|a, b| a.title.cmp(&b.title));
        for (index, film) in films.into_iter().enumerate() {
            let number = index as u32 + 1;
            if wanted_episode(number) {
                jobs.push(EpisodeJob::new(
                    catalog.series_name.clone(),
                    0,
                    number,
                    film.links.ranked_urls(),
                    output_dir,
                ));
            }
        }
    }

    jobs
}

/// Runs episode jobs one after another: playback, staging, assembly
pub struct HarvestPipeline {
    controller: PlaybackController,
    acquisition: AcquisitionManager,
    assembler: StreamAssembler,
    output_extension: String,
}

impl HarvestPipeline {
    pub fn new(
        controller: PlaybackController,
        acquisition: AcquisitionManager,
        assembler: StreamAssembler,
        config: &Config,
    ) -> Self {
        Self {
            controller,
            acquisition,
            assembler,
            output_extension: config.assembly.output_extension.clone(),
        }
    }

    /// Process every job in order. Episode failures are reported, never propagated.
    pub async fn run(&self, jobs: &[EpisodeJob]) -> RunReport {
        let started_at = Utc::now();
        let start_time = Instant::now();
        info!("🚀 Starting harvest of {} episode(s)", jobs.len());

        let mut episodes = Vec::with_capacity(jobs.len());
        for (index, job) in jobs.iter().enumerate() {
            info!("📹 Processing episode {}/{}: {}", index + 1, jobs.len(), job.label());
            episodes.push(self.process_job(job).await);
        }

        let successful = episodes
            .iter()
            .filter(|e| e.status == EpisodeStatus::Completed)
            .count();
        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            total: episodes.len(),
            successful,
            failed: episodes.len() - successful,
            total_time: start_time.elapsed(),
            episodes,
        };

        info!(
            "🏁 Harvest finished: {} succeeded, {} failed in {:.1}s",
            report.successful,
            report.failed,
            report.total_time.as_secs_f64()
        );
        report
    }

    /// Process one job inside its own `episode` span
    pub async fn process_job(&self, job: &EpisodeJob) -> EpisodeReport {
        let span = info_span!(
            "episode",
            series = %job.series,
            season = job.season,
            episode = job.episode
        );

        async {
            let start_time = Instant::now();
            let mut report = EpisodeReport::new(job);

            match self.harvest(job, &mut report).await {
                Ok(result) => {
                    report.status = EpisodeStatus::Completed;
                    report.output_path = Some(result.output_path.clone());
                    report.output_size = Some(result.size);
                    info!(
                        "✅ Completed: {} -> {} ({} bytes)",
                        report.label,
                        result.output_path.display(),
                        result.size
                    );
                }
                Err(e) => {
                    error!("❌ {} failed: {}", report.label, e);
                    if let HarvestError::AssemblyFailed { stderr, .. } = &e {
                        if !stderr.is_empty() {
                            warn!("Multiplexer stderr:\n{}", stderr);
                        }
                    }
                    report.failure_kind = Some(e.kind().to_string());
                    report.error_message = Some(e.to_string());
                }
            }

            report.processing_time = start_time.elapsed();
            report
        }
        .instrument(span)
        .await
    }

    async fn harvest(
        &self,
        job: &EpisodeJob,
        report: &mut EpisodeReport,
    ) -> crate::error::Result<AssemblyResult> {
        let playback = self.play_first_working_link(job).await?;
        report.hosting_url = Some(playback.url.clone());
        report.page_title = Some(playback.title.clone()).filter(|t| !t.is_empty());
        report.playback_end = Some(playback.end);
        report.segments_harvested = playback.segments.len();
        if playback.end == PlaybackEnd::Stalled {
            warn!("⚠️ Playback stalled, continuing with {} partial segment URI(s)", playback.segments.len());
        }

        tokio::fs::create_dir_all(&job.output_dir).await?;
        let stem = sanitize_filename(&job.label());
        let staging_dir = job.output_dir.join(format!("{}_segments", stem));
        report.staging_dir = Some(staging_dir.clone());

        let staged = self
            .acquisition
            .acquire(&playback.segments, &staging_dir)
            .await?;
        report.segments_staged = staged.assembly_inputs().len();
        report.segment_failures = staged.failures.iter().map(|e| e.to_string()).collect();

        let output = unique_file_path(&job.output_dir, &stem, &self.output_extension);
        let result = self.assembler.assemble(&staged, &staging_dir, &output).await;
        if result.is_err() {
            info!(
                "🧩 Staged segments kept in {} (see {})",
                staging_dir.display(),
                RECOVERY_MANIFEST
            );
        }
        result
    }

    /// Try the hosting links best first until one yields segments
    async fn play_first_working_link(&self, job: &EpisodeJob) -> crate::error::Result<PlaybackReport> {
        let mut last_error = HarvestError::LinkNotFound {
            series: job.series.clone(),
            item: job.label(),
            url: String::new(),
        };

        for (index, url) in job.hosting_links.iter().enumerate() {
            info!(
                "🔗 Hosting link {}/{}: {}",
                index + 1,
                job.hosting_links.len(),
                url
            );
            match self.controller.run(url).await {
                Ok(playback) => return Ok(playback),
                Err(e) => {
                    warn!("⚠️ Hosting link {} gave nothing: {}", url, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{SegmentSource, TS_SYNC_BYTE};
    use crate::browser::BrowserDriver;
    use crate::config::ConfigBuilder;
    use crate::crawler::{EpisodeLink, Film, HostingLink, StreamLinks};
    use crate::playback::fake::{FakeBrowser, FakeVideo};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingSource {
        requests: AtomicUsize,
    }

    #[async_trait]
    impl SegmentSource for CountingSource {
        async fn fetch(&self, _uri: &str, dest: &Path) -> crate::error::Result<u64> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            let body = vec![TS_SYNC_BYTE; 188];
            tokio::fs::write(dest, &body).await?;
            Ok(body.len() as u64)
        }
    }

    fn pipeline(browser: Arc<FakeBrowser>, source: Arc<CountingSource>) -> HarvestPipeline {
        let config = ConfigBuilder::new()
            .with_ffmpeg(PathBuf::from("/nonexistent/bin/ffmpeg"))
            .build();
        let driver: Arc<dyn BrowserDriver> = browser;
        HarvestPipeline::new(
            PlaybackController::new(driver, config.playback.clone()),
            AcquisitionManager::new(source, 4),
            StreamAssembler::new(&config.assembly),
            &config,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_start_downloads_nothing() {
        let browser = Arc::new(FakeBrowser::new(FakeVideo::never_loads()));
        let source = Arc::new(CountingSource::default());
        let pipeline = pipeline(browser.clone(), source.clone());
        let temp_dir = TempDir::new().unwrap();

        let job = EpisodeJob::new("Show", 1, 1, vec!["https://host.example/e/1".into()], temp_dir.path());
        let report = pipeline.run(&[job]).await;

        assert_eq!(report.failed, 1);
        let episode = &report.episodes[0];
        assert_eq!(episode.failure_kind.as_deref(), Some("playback_start_exhausted"));
        assert_eq!(source.requests.load(Ordering::SeqCst), 0);
        assert!(episode.staging_dir.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_link_falls_back_to_next_link() {
        let dead = "https://host.example/dead";
        let good = "https://host.example/good";
        let browser = Arc::new(FakeBrowser::new(FakeVideo::playable(12.0)).with_dead_link(dead));
        let source = Arc::new(CountingSource::default());
        let pipeline = pipeline(browser.clone(), source.clone());
        let temp_dir = TempDir::new().unwrap();

        let job = EpisodeJob::new("Show", 2, 5, vec![dead.into(), good.into()], temp_dir.path());
        let episode = pipeline.process_job(&job).await;

        assert_eq!(browser.navigations(), vec![dead.to_string(), good.to_string()]);
        assert_eq!(episode.hosting_url.as_deref(), Some(good));
        assert_eq!(episode.page_title.as_deref(), Some("Episode One"));
        assert_eq!(episode.playback_end, Some(PlaybackEnd::Finished));
        assert!(episode.segments_harvested > 0);
        assert_eq!(source.requests.load(Ordering::SeqCst), episode.segments_harvested);

        // The multiplexer is missing, so staged files stay for recovery
        assert_eq!(episode.status, EpisodeStatus::Failed);
        assert_eq!(episode.failure_kind.as_deref(), Some("assembly_failed"));
        let staging_dir = episode.staging_dir.clone().unwrap();
        assert_eq!(staging_dir, temp_dir.path().join("Show_S02E05_segments"));
        assert!(staging_dir.join(RECOVERY_MANIFEST).exists());
        assert!(!temp_dir.path().join("Show_S02E05.mp4").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_without_links_is_link_not_found() {
        let browser = Arc::new(FakeBrowser::new(FakeVideo::playable(5.0)));
        let pipeline = pipeline(browser.clone(), Arc::new(CountingSource::default()));
        let temp_dir = TempDir::new().unwrap();

        let episode = pipeline
            .process_job(&EpisodeJob::new("Show", 1, 1, vec![], temp_dir.path()))
            .await;
        assert_eq!(episode.failure_kind.as_deref(), Some("link_not_found"));
        assert!(browser.navigations().is_empty());
    }

    #[tokio::test]
    async fn test_report_is_written_as_json() {
        let temp_dir = TempDir::new().unwrap();
        let job = EpisodeJob::new("Show", 1, 1, vec![], temp_dir.path());
        let report = RunReport {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            total: 1,
            successful: 0,
            failed: 1,
            total_time: Duration::from_secs(3),
            episodes: vec![EpisodeReport::new(&job)],
        };

        let path = report.save(temp_dir.path()).await.unwrap();
        assert_eq!(path, temp_dir.path().join(REPORT_FILE));
        let loaded: RunReport = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(loaded.episodes[0].label, "Show S01E01");
        assert_eq!(loaded.episodes[0].status, EpisodeStatus::Failed);
    }

    fn links(n: u32) -> StreamLinks {
        StreamLinks {
            primary: HostingLink {
                service: "VOE".into(),
                url: format!("https://site.example/redirect/{}", n),
            },
            alternates: vec![HostingLink {
                service: "Vidoza".into(),
                url: format!("https://site.example/redirect/{}00", n),
            }],
        }
    }

    fn catalog() -> SeriesCatalog {
        let mut catalog = SeriesCatalog::new("Show", "https://site.example");
        for season in 1..=2 {
            let episodes = (1..=3)
                .map(|n| EpisodeLink {
                    episode_number: n,
                    page_url: format!("https://site.example/s{}e{}", season, n),
                    links: links(season * 10 + n),
                })
                .collect();
            catalog.merge_episodes(season, episodes);
        }
        catalog.merge_films(vec![
            Film {
                title: "Zeta".into(),
                page_url: "https://site.example/f/z".into(),
                links: links(90),
            },
            Film {
                title: "Alpha".into(),
                page_url: "https://site.example/f/a".into(),
                links: links(80),
            },
        ]);
        catalog
    }

    #[test]
    fn test_jobs_from_catalog_filters() {
        let catalog = catalog();
        let out = Path::new("/tmp/out");

        let all = jobs_from_catalog(&catalog, None, None, out);
        assert_eq!(all.len(), 8);
        assert_eq!(
            all[0].hosting_links,
            vec!["https://site.example/redirect/11", "https://site.example/redirect/1100"]
        );

        let season_two = jobs_from_catalog(&catalog, Some(2), None, out);
        assert_eq!(season_two.len(), 3);
        assert!(season_two.iter().all(|j| j.season == 2));

        let single = jobs_from_catalog(&catalog, Some(1), Some(3), out);
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].label(), "Show S01E03");

        let films = jobs_from_catalog(&catalog, Some(0), None, out);
        assert_eq!(films.len(), 2);
        assert_eq!(films[0].episode, 1);
        assert_eq!(films[0].hosting_links[0], "https://site.example/redirect/80");
    }
}
