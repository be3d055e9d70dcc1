/// Typed link catalog with resumable merge, and its JSON store
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// One hosting service offering an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostingLink {
    pub service: String,
    pub url: String,
}

/// Primary hosting link chosen by preference, plus every other link found
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLinks {
    pub primary: HostingLink,
    #[serde(default)]
    pub alternates: Vec<HostingLink>,
}

impl StreamLinks {
    /// Hosting URLs best first: primary, then alternates
    pub fn ranked_urls(&self) -> Vec<String> {
        std::iter::once(&self.primary)
            .chain(self.alternates.iter())
            .map(|link| link.url.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeLink {
    pub episode_number: u32,
    pub page_url: String,
    pub links: StreamLinks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Season {
    pub season_number: u32,
    #[serde(default)]
    pub episode_links: Vec<EpisodeLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Film {
    pub title: String,
    pub page_url: String,
    pub links: StreamLinks,
}

/// Everything known about one series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesCatalog {
    pub series_name: String,
    pub base_url: String,
    #[serde(default)]
    pub seasons: Vec<Season>,
    #[serde(default)]
    pub films: Vec<Film>,
}

/// URL slug of a series name: trimmed, spaces to `-`, lowercase
pub fn series_slug(name: &str) -> String {
    name.trim().replace(' ', "-").to_lowercase()
}

impl SeriesCatalog {
    pub fn new(series_name: &str, base_url: &str) -> Self {
        Self {
            series_name: series_name.to_string(),
            base_url: base_url.to_string(),
            seasons: Vec::new(),
            films: Vec::new(),
        }
    }

    pub fn slug(&self) -> String {
        series_slug(&self.series_name)
    }

    pub fn season(&self, number: u32) -> Option<&Season> {
        self.seasons.iter().find(|s| s.season_number == number)
    }

    /// Episode numbers already present for a season
    pub fn known_episodes(&self, season: u32) -> HashSet<u32> {
        self.season(season)
            .map(|s| s.episode_links.iter().map(|e| e.episode_number).collect())
            .unwrap_or_default()
    }

    pub fn known_films(&self) -> HashSet<String> {
        self.films.iter().map(|f| f.title.clone()).collect()
    }

    /// Add episodes that are not known yet; existing entries win. Returns how many were added.
    pub fn merge_episodes(&mut self, season_number: u32, episodes: Vec<EpisodeLink>) -> usize {
        let index = match self
            .seasons
            .iter()
            .position(|s| s.season_number == season_number)
        {
            Some(index) => index,
            None => {
                self.seasons.push(Season {
                    season_number,
                    episode_links: Vec::new(),
                });
                self.seasons.len() - 1
            }
        };

        let season = &mut self.seasons[index];
        let mut known: HashSet<u32> = season.episode_links.iter().map(|e| e.episode_number).collect();
        let mut added = 0;
        for episode in episodes {
            if known.insert(episode.episode_number) {
                season.episode_links.push(episode);
                added += 1;
            }
        }
        season.episode_links.sort_by_key(|e| e.episode_number);
        self.seasons.sort_by_key(|s| s.season_number);
        added
    }

    /// Add films whose titles are not known yet. Returns how many were added.
    pub fn merge_films(&mut self, films: Vec<Film>) -> usize {
        let mut known = self.known_films();
        let mut added = 0;
        for film in films {
            if known.insert(film.title.clone()) {
                self.films.push(film);
                added += 1;
            }
        }
        self.films.sort_by(|a, b| a.title.cmp(&b.title));
        added
    }

    pub fn episode_count(&self) -> usize {
        self.seasons.iter().map(|s| s.episode_links.len()).sum()
    }
}

/// Persisted catalog file: a pretty-printed JSON array of series
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all series. A missing file is an empty catalog; an unreadable one
    /// is moved aside to `<path>.corrupt` and also yields an empty catalog.
    pub async fn load(&self) -> Result<Vec<SeriesCatalog>> {
        if !self.path.exists() {
            info!("📁 No catalog at {}, starting empty", self.path.display());
            return Ok(Vec::new());
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading catalog {}", self.path.display()))?;

        match serde_json::from_str::<Vec<SeriesCatalog>>(&content) {
            Ok(catalogs) => {
                info!(
                    "📚 Loaded {} series from {}",
                    catalogs.len(),
                    self.path.display()
                );
                Ok(catalogs)
            }
            Err(e) => {
                let mut aside = self.path.clone().into_os_string();
                aside.push(".corrupt");
                let aside = PathBuf::from(aside);
                warn!(
                    "Failed to parse catalog {}: {}. Moving it to {}",
                    self.path.display(),
                    e,
                    aside.display()
                );
                tokio::fs::rename(&self.path, &aside).await?;
                Ok(Vec::new())
            }
        }
    }

    /// Rewrite the whole file atomically (temp file, then rename)
    pub async fn save(&self, catalogs: &[SeriesCatalog]) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json_content = serde_json::to_string_pretty(catalogs)?;
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        tokio::fs::write(&temp, json_content).await?;
        tokio::fs::rename(&temp, &self.path).await?;
        debug!("💾 Saved {} series to {}", catalogs.len(), self.path.display());
        Ok(())
    }

    /// Load and return the entry for one series, matched by slug
    pub async fn find(&self, series_name: &str) -> Result<Option<SeriesCatalog>> {
        let slug = series_slug(series_name);
        Ok(self.load().await?.into_iter().find(|c| c.slug() == slug))
    }
}

/// Replace or append the entry for `catalog`'s series
pub fn upsert(catalogs: &mut Vec<SeriesCatalog>, catalog: SeriesCatalog) {
    let slug = catalog.slug();
    match catalogs.iter_mut().find(|c| c.slug() == slug) {
        Some(existing) => *existing = catalog,
        None => catalogs.push(catalog),
    }
}
