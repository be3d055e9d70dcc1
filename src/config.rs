use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the series harvester
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Remote browser endpoint settings
    pub browser: BrowserConfig,

    /// Playback session state machine timings and strategies
    pub playback: PlaybackConfig,

    /// Segment download settings
    pub acquisition: AcquisitionConfig,

    /// External multiplexer settings
    pub assembly: AssemblyConfig,

    /// Link-discovery crawler settings
    pub crawler: CrawlerConfig,

    /// Output and logging settings
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// WebDriver endpoint URL (e.g. a Selenium hub)
    pub endpoint: String,

    /// Run the browser without a visible window
    pub headless: bool,

    /// Extra browser command line arguments
    pub extra_args: Vec<String>,

    /// Timeout for a single request to the endpoint in seconds
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Maximum wait for DOM readiness after navigation
    pub dom_ready_timeout_seconds: u64,

    /// Wall-clock window for getting playback started
    pub start_window_seconds: u64,

    /// Attempts per start strategy within one pass
    pub attempts_per_strategy: u32,

    /// Pause after a start attempt before reading the player state (ms)
    pub settle_millis: u64,

    /// Interval between monitoring polls
    pub poll_interval_seconds: u64,

    /// Playback counts as finished this close to the end (seconds)
    pub finish_threshold_seconds: f64,

    /// Position not advancing for this long means the stream stalled
    pub stall_threshold_seconds: u64,

    /// Safety stop when the duration never becomes known
    pub unknown_duration_ceiling_seconds: u64,

    /// Hard ceiling for the whole monitoring phase
    pub max_monitoring_seconds: u64,

    /// CSS selectors tried as play buttons, in priority order
    pub play_button_selectors: Vec<String>,

    /// Iframe sources that are legitimate players and must not be touched
    pub iframe_allow_list: Vec<String>,

    /// How deep nested iframes are entered during overlay dismissal
    pub max_iframe_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Maximum concurrent segment downloads
    pub max_concurrent_downloads: usize,

    /// Per-request timeout in seconds
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    /// Multiplexer executable (looked up on PATH when not absolute)
    pub ffmpeg_path: PathBuf,

    /// Container extension of the merged file
    pub output_extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Base URL of the catalog site
    pub base_url: String,

    /// Global cap on in-flight page fetches
    pub max_concurrent_requests: usize,

    /// Page request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Persisted catalog file
    pub catalog_path: PathBuf,

    /// Hosting services in preference order; the first one present becomes the primary link
    pub hosting_preference: Vec<String>,

    /// Pause between two series (milliseconds)
    pub series_pause_millis: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output directory for merged episodes
    pub base_dir: PathBuf,

    /// Log level used when RUST_LOG is not set
    pub log_level: String,

    /// Write a JSON run report next to the merged episodes
    pub save_report: bool,
}

impl PlaybackConfig {
    pub fn dom_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.dom_ready_timeout_seconds)
    }

    pub fn start_window(&self) -> Duration {
        Duration::from_secs(self.start_window_seconds)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_seconds)
    }

    pub fn unknown_duration_ceiling(&self) -> Duration {
        Duration::from_secs(self.unknown_duration_ceiling_seconds)
    }

    pub fn max_monitoring(&self) -> Duration {
        Duration::from_secs(self.max_monitoring_seconds)
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        // Try to load from various locations
        let config_paths = [
            "series-harvester.toml",
            "config/series-harvester.toml",
            "/etc/series-harvester/config.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str::<Config>(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config.with_env_overrides());
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        Self::from_env()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config file {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&config_str)?;
        Ok(config.with_env_overrides())
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self::default().with_env_overrides())
    }

    /// Apply HARVESTER_* environment overrides on top of this configuration
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var("SELENIUM_HUB_URL") {
            self.browser.endpoint = endpoint;
        }

        if let Ok(endpoint) = std::env::var("HARVESTER_WEBDRIVER_URL") {
            self.browser.endpoint = endpoint;
        }

        if let Ok(headless) = std::env::var("HARVESTER_HEADLESS") {
            self.browser.headless = !matches!(headless.as_str(), "0" | "false" | "no");
        }

        if let Ok(threads) = std::env::var("HARVESTER_DOWNLOAD_THREADS") {
            match threads.parse() {
                Ok(n) => self.acquisition.max_concurrent_downloads = n,
                Err(_) => tracing::warn!("Ignoring invalid HARVESTER_DOWNLOAD_THREADS={}", threads),
            }
        }

        if let Ok(limit) = std::env::var("HARVESTER_CRAWL_CONCURRENCY") {
            match limit.parse() {
                Ok(n) => self.crawler.max_concurrent_requests = n,
                Err(_) => tracing::warn!("Ignoring invalid HARVESTER_CRAWL_CONCURRENCY={}", limit),
            }
        }

        if let Ok(base_url) = std::env::var("HARVESTER_BASE_URL") {
            self.crawler.base_url = base_url;
        }

        if let Ok(catalog) = std::env::var("HARVESTER_CATALOG_PATH") {
            self.crawler.catalog_path = PathBuf::from(catalog);
        }

        if let Ok(ffmpeg) = std::env::var("HARVESTER_FFMPEG") {
            self.assembly.ffmpeg_path = PathBuf::from(ffmpeg);
        }

        if let Ok(output_dir) = std::env::var("HARVESTER_OUTPUT_DIR") {
            self.output.base_dir = PathBuf::from(output_dir);
        }

        if let Ok(log_level) = std::env::var("HARVESTER_LOG_LEVEL") {
            self.output.log_level = log_level;
        }

        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.browser.endpoint.trim().is_empty() {
            return Err(anyhow!("browser.endpoint must not be empty"));
        }

        if self.playback.dom_ready_timeout_seconds == 0 {
            return Err(anyhow!("dom_ready_timeout_seconds must be greater than 0"));
        }

        if self.playback.start_window_seconds == 0 || self.playback.attempts_per_strategy == 0 {
            return Err(anyhow!("playback start window and attempts must be greater than 0"));
        }

        if self.playback.play_button_selectors.is_empty() {
            return Err(anyhow!("play_button_selectors must not be empty"));
        }

        if self.playback.poll_interval_seconds == 0 {
            return Err(anyhow!("poll_interval_seconds must be greater than 0"));
        }

        if self.acquisition.max_concurrent_downloads == 0 {
            return Err(anyhow!("max_concurrent_downloads must be greater than 0"));
        }

        if self.crawler.max_concurrent_requests == 0 {
            return Err(anyhow!("max_concurrent_requests must be greater than 0"));
        }

        if self.crawler.hosting_preference.is_empty() {
            return Err(anyhow!("hosting_preference must name at least one service"));
        }

        url::Url::parse(&self.crawler.base_url)
            .map_err(|e| anyhow!("crawler.base_url is not a valid URL: {}", e))?;

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Series Harvester Configuration:\n\
            - WebDriver Endpoint: {}\n\
            - Headless: {}\n\
            - Download Workers: {}\n\
            - Crawl Concurrency: {}\n\
            - Multiplexer: {}\n\
            - Catalog: {}\n\
            - Output Directory: {}",
            self.browser.endpoint,
            self.browser.headless,
            self.acquisition.max_concurrent_downloads,
            self.crawler.max_concurrent_requests,
            self.assembly.ffmpeg_path.display(),
            self.crawler.catalog_path.display(),
            self.output.base_dir.display(),
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            browser: BrowserConfig {
                endpoint: "http://localhost:4444/wd/hub".to_string(),
                headless: true,
                extra_args: Vec::new(),
                request_timeout_seconds: 90,
            },
            playback: PlaybackConfig {
                dom_ready_timeout_seconds: 60,
                start_window_seconds: 60,
                attempts_per_strategy: 3,
                settle_millis: 500,
                poll_interval_seconds: 3,
                finish_threshold_seconds: 3.0,
                stall_threshold_seconds: 60,
                unknown_duration_ceiling_seconds: 2 * 3600,
                max_monitoring_seconds: 4 * 3600,
                play_button_selectors: vec![
                    "div.vjs-big-play-button".to_string(),
                    "button[title='Play Video']".to_string(),
                    "button.play-button".to_string(),
                    "button[aria-label='Play']".to_string(),
                    ".jw-icon-playback".to_string(),
                    "div.player-button.play".to_string(),
                    "div.plyr__controls button.plyr__controls__item--play".to_string(),
                ],
                iframe_allow_list: vec![
                    "youtube.com".to_string(),
                    "vimeo.com".to_string(),
                    "player.twitch.tv".to_string(),
                    "streamtape.com".to_string(),
                ],
                max_iframe_depth: 2,
            },
            acquisition: AcquisitionConfig {
                max_concurrent_downloads: 8,
                request_timeout_seconds: 60,
            },
            assembly: AssemblyConfig {
                ffmpeg_path: PathBuf::from("ffmpeg"),
                output_extension: "mp4".to_string(),
            },
            crawler: CrawlerConfig {
                base_url: "https://186.2.175.5".to_string(),
                max_concurrent_requests: 32,
                request_timeout_seconds: 10,
                catalog_path: PathBuf::from("storage/series/all_series_data.json"),
                hosting_preference: vec!["VOE".to_string(), "Vidoza".to_string()],
                series_pause_millis: 2000,
            },
            output: OutputConfig {
                base_dir: PathBuf::from("./output"),
                log_level: "info".to_string(),
                save_report: true,
            },
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.browser.endpoint = endpoint.into();
        self
    }

    pub fn with_download_workers(mut self, workers: usize) -> Self {
        self.config.acquisition.max_concurrent_downloads = workers;
        self
    }

    pub fn with_crawl_concurrency(mut self, limit: usize) -> Self {
        self.config.crawler.max_concurrent_requests = limit;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.crawler.base_url = base_url.into();
        self
    }

    pub fn with_catalog_path(mut self, path: PathBuf) -> Self {
        self.config.crawler.catalog_path = path;
        self
    }

    pub fn with_ffmpeg(mut self, path: PathBuf) -> Self {
        self.config.assembly.ffmpeg_path = path;
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.config.browser.headless = headless;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
