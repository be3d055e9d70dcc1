/// Link-discovery crawler: series structure, episode and movie hosting links,
/// resumable catalog persistence
pub mod catalog;
pub mod ledger;
pub mod parse;

pub use catalog::{
    series_slug, CatalogStore, EpisodeLink, Film, HostingLink, Season, SeriesCatalog, StreamLinks,
};
pub use ledger::{FailureKind, FailureLedger, FailureRecord};
pub use parse::{corrected_episode_count, StructureEntry, NAVIGATION_EXTRA_ENTRIES};

use crate::config::CrawlerConfig;
use crate::error::HarvestError;
use anyhow::{Context, Result};
use futures::future::join_all;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, warn, Instrument};
use url::Url;

/// A page fetch that failed, already classified for the ledger
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct PageError {
    pub kind: FailureKind,
    pub message: String,
}

impl PageError {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of one crawl run over a list of series
#[derive(Debug, Default)]
pub struct CrawlSummary {
    pub processed: usize,
    pub failed: usize,
    /// Episodes and films added to the catalog in this run
    pub new_items: usize,
    pub ledger: FailureLedger,
}

impl CrawlSummary {
    pub fn report(&self) -> String {
        format!(
            "Series processed: {}, failed: {}, new items: {}\n{}",
            self.processed,
            self.failed,
            self.new_items,
            self.ledger.summary()
        )
    }
}

pub struct LinkCrawler {
    client: Client,
    base_url: Url,
    preference: Vec<String>,
    limiter: Arc<Semaphore>,
    store: CatalogStore,
    series_pause: Duration,
}

impl LinkCrawler {
    pub fn new(config: &CrawlerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
            .danger_accept_invalid_certs(true)
            .build()
            .context("building crawler HTTP client")?;
        let base_url = Url::parse(&config.base_url)
            .with_context(|| format!("invalid crawler base URL {}", config.base_url))?;

        Ok(Self {
            client,
            base_url,
            preference: config.hosting_preference.clone(),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_requests.max(1))),
            store: CatalogStore::new(config.catalog_path.clone()),
            series_pause: Duration::from_millis(config.series_pause_millis),
        })
    }

    /// `{base}/serie/stream/{slug}/staffel-{season}/episode-{episode}`
    pub fn episode_url(&self, slug: &str, season: u32, episode: u32) -> String {
        format!(
            "{}/serie/stream/{}/staffel-{}/episode-{}",
            self.base_url.as_str().trim_end_matches('/'),
            slug,
            season,
            episode
        )
    }

    fn resolve(&self, href: &str) -> std::result::Result<String, PageError> {
        self.base_url
            .join(href)
            .map(|url| url.to_string())
            .map_err(|e| PageError::new(FailureKind::Parsing, format!("bad link {}: {}", href, e)))
    }

    /// GET a page under the global request cap
    async fn fetch_page(&self, url: &str) -> std::result::Result<String, PageError> {
        let _permit = self
            .limiter
            .acquire()
            .await
            .map_err(|e| PageError::new(FailureKind::Network, e.to_string()))?;

        debug!("🌐 GET {}", url);
        let response = self.client.get(url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(PageError::new(
                FailureKind::HttpStatus,
                format!("HTTP {}", status),
            ));
        }
        response.text().await.map_err(classify)
    }

    /// Hosting links of one episode or film page; `Ok(None)` when no preferred service is offered
    async fn fetch_item_links(&self, url: &str) -> std::result::Result<Option<StreamLinks>, PageError> {
        let html = self.fetch_page(url).await?;
        let services = parse::parse_hosting_services(&html, &self.base_url)
            .map_err(|e| PageError::new(FailureKind::Parsing, e.to_string()))?;
        Ok(parse::select_links(&services, &self.preference))
    }

    /// Build or extend the catalog of one series. Only items missing from
    /// `existing` are fetched; per-item failures go to `ledger`.
    pub async fn crawl_series(
        &self,
        series_name: &str,
        existing: Option<SeriesCatalog>,
        ledger: &mut FailureLedger,
    ) -> crate::error::Result<SeriesCatalog> {
        let slug = series_slug(series_name);
        let structure_url = self.episode_url(&slug, 1, 1);

        let structure_page = match self.fetch_page(&structure_url).await {
            Ok(html) => html,
            Err(e) => {
                ledger.record(FailureRecord::new(e.kind, series_name, &structure_url, e.message));
                return Err(HarvestError::StructureNotFound {
                    series: series_name.to_string(),
                    url: structure_url,
                });
            }
        };

        let structure = parse::parse_structure(&structure_page).unwrap_or_else(|e| {
            warn!("Failed to parse structure of {}: {}", series_name, e);
            Vec::new()
        });
        if structure.is_empty() {
            let err = HarvestError::StructureNotFound {
                series: series_name.to_string(),
                url: structure_url.clone(),
            };
            ledger.record(FailureRecord::new(
                FailureKind::StructureNotFound,
                series_name,
                &structure_url,
                err.to_string(),
            ));
            return Err(err);
        }

        info!(
            "📺 {}: {} season(s), {} movie collection(s)",
            series_name,
            structure.iter().filter(|e| matches!(e, StructureEntry::Season(_))).count(),
            structure.iter().filter(|e| matches!(e, StructureEntry::MovieCollection(_))).count()
        );

        let mut catalog = existing.unwrap_or_else(|| SeriesCatalog::new(series_name, self.base_url.as_str()));
        for entry in structure {
            match entry {
                StructureEntry::Season(season) => {
                    let first_page = (season == 1).then_some(structure_page.as_str());
                    self.crawl_season(&mut catalog, &slug, season, first_page, ledger)
                        .await;
                }
                StructureEntry::MovieCollection(href) => {
                    self.crawl_movies(&mut catalog, &href, ledger).await;
                }
            }
        }

        Ok(catalog)
    }

    async fn crawl_season(
        &self,
        catalog: &mut SeriesCatalog,
        slug: &str,
        season: u32,
        first_page: Option<&str>,
        ledger: &mut FailureLedger,
    ) {
        let series = catalog.series_name.clone();
        let season_url = self.episode_url(slug, season, 1);

        let page = match first_page {
            Some(html) => html.to_string(),
            None => match self.fetch_page(&season_url).await {
                Ok(html) => html,
                Err(e) => {
                    ledger.record(
                        FailureRecord::new(e.kind, &series, &season_url, e.message).season(season),
                    );
                    return;
                }
            },
        };

        let raw = match parse::count_episode_entries(&page, season) {
            Ok(raw) => raw,
            Err(e) => {
                ledger.record(
                    FailureRecord::new(FailureKind::Parsing, &series, &season_url, e.to_string())
                        .season(season),
                );
                return;
            }
        };
        let total = corrected_episode_count(raw);
        if total == 0 {
            ledger.record(
                FailureRecord::new(
                    FailureKind::NoEpisodes,
                    &series,
                    &season_url,
                    "no episode entries in the season navigation",
                )
                .season(season),
            );
            return;
        }

        let known = catalog.known_episodes(season);
        let missing: Vec<u32> = (1..=total).filter(|n| !known.contains(n)).collect();
        if missing.is_empty() {
            info!("✅ Season {}: all {} episodes already known", season, total);
            return;
        }
        info!(
            "🔍 Season {}: fetching {} of {} episodes",
            season,
            missing.len(),
            total
        );

        let fetches = missing.iter().map(|&episode| {
            let url = self.episode_url(slug, season, episode);
            async move {
                let result = self.fetch_item_links(&url).await;
                (episode, url, result)
            }
        });

        let mut found = Vec::new();
        for (episode, url, result) in join_all(fetches).await {
            match result {
                Ok(Some(links)) => found.push(EpisodeLink {
                    episode_number: episode,
                    page_url: url,
                    links,
                }),
                Ok(None) => {
                    let err = HarvestError::LinkNotFound {
                        series: series.clone(),
                        item: format!("S{:02}E{:02}", season, episode),
                        url: url.clone(),
                    };
                    ledger.record(
                        FailureRecord::new(FailureKind::LinkNotFound, &series, &url, err.to_string())
                            .episode(season, episode),
                    );
                }
                Err(e) => ledger.record(
                    FailureRecord::new(e.kind, &series, &url, e.message).episode(season, episode),
                ),
            }
        }

        let added = catalog.merge_episodes(season, found);
        info!("📥 Season {}: {} new episode(s)", season, added);
    }

    async fn crawl_movies(&self, catalog: &mut SeriesCatalog, href: &str, ledger: &mut FailureLedger) {
        let series = catalog.series_name.clone();
        let collection_url = match self.resolve(href) {
            Ok(url) => url,
            Err(e) => {
                ledger.record(FailureRecord::new(e.kind, &series, href, e.message));
                return;
            }
        };

        let page = match self.fetch_page(&collection_url).await {
            Ok(html) => html,
            Err(e) => {
                ledger.record(FailureRecord::new(e.kind, &series, &collection_url, e.message));
                return;
            }
        };
        let list = match parse::parse_movie_list(&page) {
            Ok(list) => list,
            Err(e) => {
                ledger.record(FailureRecord::new(
                    FailureKind::Parsing,
                    &series,
                    &collection_url,
                    e.to_string(),
                ));
                return;
            }
        };

        for element in &list.invalid {
            ledger.record(FailureRecord::new(
                FailureKind::InvalidElement,
                &series,
                &collection_url,
                format!("movie entry without link: {}", element.trim()),
            ));
        }

        let known = catalog.known_films();
        let mut pending = Vec::new();
        for movie in list.movies.into_iter().filter(|m| !known.contains(&m.title)) {
            match self.resolve(&movie.href) {
                Ok(url) => pending.push((movie.title, url)),
                Err(e) => ledger.record(
                    FailureRecord::new(e.kind, &series, &movie.href, e.message).film(&movie.title),
                ),
            }
        }
        if pending.is_empty() {
            info!("✅ Movies: nothing new for {}", series);
            return;
        }
        info!("🎬 Fetching {} movie page(s) for {}", pending.len(), series);

        let fetches = pending.into_iter().map(|(title, url)| async move {
            let result = self.fetch_item_links(&url).await;
            (title, url, result)
        });

        let mut found = Vec::new();
        for (title, url, result) in join_all(fetches).await {
            match result {
                Ok(Some(links)) => found.push(Film {
                    title,
                    page_url: url,
                    links,
                }),
                Ok(None) => {
                    let err = HarvestError::LinkNotFound {
                        series: series.clone(),
                        item: format!("film '{}'", title),
                        url: url.clone(),
                    };
                    ledger.record(
                        FailureRecord::new(FailureKind::LinkNotFound, &series, &url, err.to_string())
                            .film(&title),
                    );
                }
                Err(e) => ledger.record(
                    FailureRecord::new(e.kind, &series, &url, e.message).film(&title),
                ),
            }
        }

        let added = catalog.merge_films(found);
        info!("📥 Movies: {} new film(s)", added);
    }

    /// Crawl each series in turn, persisting the whole catalog after every series
    pub async fn run(&self, series_names: &[String]) -> Result<CrawlSummary> {
        let mut catalogs = self.store.load().await?;
        let mut summary = CrawlSummary::default();
        let total = series_names.len();

        for (index, name) in series_names.iter().enumerate() {
            let span = info_span!("series", name = %name, index = index + 1, total);
            let existing = catalogs
                .iter()
                .find(|c| c.slug() == series_slug(name))
                .cloned();
            let before = existing
                .as_ref()
                .map(|c| c.episode_count() + c.films.len())
                .unwrap_or(0);

            info!(parent: &span, "🚀 Crawling series {}/{}: {}", index + 1, total, name);
            match self
                .crawl_series(name, existing, &mut summary.ledger)
                .instrument(span.clone())
                .await
            {
                Ok(catalog) => {
                    summary.new_items += (catalog.episode_count() + catalog.films.len()).saturating_sub(before);
                    catalog::upsert(&mut catalogs, catalog);
                    self.store.save(&catalogs).await?;
                    summary.processed += 1;
                    info!(parent: &span, "💾 Catalog saved after {}", name);
                }
                Err(e) => {
                    error!(parent: &span, "❌ Skipping series {}: {}", name, e);
                    summary.failed += 1;
                }
            }

            if index + 1 < total && !self.series_pause.is_zero() {
                tokio::time::sleep(self.series_pause).await;
            }
        }

        info!(
            "🏁 Crawl finished: {} processed, {} failed, {} new items, {} recorded failures",
            summary.processed,
            summary.failed,
            summary.new_items,
            summary.ledger.len()
        );
        Ok(summary)
    }
}

fn classify(e: reqwest::Error) -> PageError {
    let kind = if e.is_timeout() {
        FailureKind::Timeout
    } else if e.is_status() {
        FailureKind::HttpStatus
    } else {
        FailureKind::Network
    };
    PageError::new(kind, e.to_string())
}
