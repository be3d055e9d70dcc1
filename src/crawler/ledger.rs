/// Run-level record of per-item crawler failures
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Network,
    Timeout,
    HttpStatus,
    Parsing,
    StructureNotFound,
    NoEpisodes,
    LinkNotFound,
    InvalidElement,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::HttpStatus => "http-status",
            Self::Parsing => "parsing",
            Self::StructureNotFound => "structure-not-found",
            Self::NoEpisodes => "no-episodes",
            Self::LinkNotFound => "link-not-found",
            Self::InvalidElement => "invalid-element",
        };
        f.write_str(name)
    }
}

/// One failed item with enough context to retry it by hand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub kind: FailureKind,
    pub series: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub film: Option<String>,
    pub url: String,
    pub message: String,
}

impl FailureRecord {
    pub fn new(kind: FailureKind, series: &str, url: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            series: series.to_string(),
            season: None,
            episode: None,
            film: None,
            url: url.to_string(),
            message: message.into(),
        }
    }

    pub fn season(mut self, season: u32) -> Self {
        self.season = Some(season);
        self
    }

    pub fn episode(mut self, season: u32, episode: u32) -> Self {
        self.season = Some(season);
        self.episode = Some(episode);
        self
    }

    pub fn film(mut self, title: &str) -> Self {
        self.film = Some(title.to_string());
        self
    }

    /// "Series S02E05", "Series film 'Title'" or just the series name
    pub fn item_label(&self) -> String {
        match (&self.film, self.season, self.episode) {
            (Some(title), _, _) => format!("{} film '{}'", self.series, title),
            (None, Some(season), Some(episode)) => {
                format!("{} S{:02}E{:02}", self.series, season, episode)
            }
            (None, Some(season), None) => format!("{} season {}", self.series, season),
            _ => self.series.clone(),
        }
    }
}

/// Failures collected over a whole crawl run. Only the sequential series loop writes to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureLedger {
    records: Vec<FailureRecord>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: FailureRecord) {
        tracing::warn!(
            "⚠️ [{}] {} at {}: {}",
            record.kind,
            record.item_label(),
            record.url,
            record.message
        );
        self.records.push(record);
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count_by_kind(&self) -> BTreeMap<FailureKind, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.records {
            *counts.entry(record.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Multi-line summary for the end of a run
    pub fn summary(&self) -> String {
        if self.records.is_empty() {
            return "No failures recorded".to_string();
        }

        let mut lines = vec![format!("{} failure(s):", self.records.len())];
        for (kind, count) in self.count_by_kind() {
            lines.push(format!("  {}: {}", kind, count));
        }
        for record in &self.records {
            lines.push(format!(
                "  - [{}] {} ({}): {}",
                record.kind,
                record.item_label(),
                record.url,
                record.message
            ));
        }
        lines.join("\n")
    }
}
