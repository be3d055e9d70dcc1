/// Core data model shared by the playback controller, the acquisition manager
/// and the assembler.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;

/// One unit of harvesting work: a single episode and the hosting pages that carry it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeJob {
    /// Human readable series name
    pub series: String,
    /// Season number (0 for films and specials)
    pub season: u32,
    /// Episode number within the season
    pub episode: u32,
    /// Hosting page URLs, best candidate first
    pub hosting_links: Vec<String>,
    /// Directory receiving the merged file and the staging directory
    pub output_dir: PathBuf,
}

impl EpisodeJob {
    pub fn new(
        series: impl Into<String>,
        season: u32,
        episode: u32,
        hosting_links: Vec<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            series: series.into(),
            season,
            episode,
            hosting_links,
            output_dir: output_dir.into(),
        }
    }

    /// "Series Name S01E02"
    pub fn label(&self) -> String {
        format!("{} S{:02}E{:02}", self.series.trim(), self.season, self.episode)
    }
}

/// What kind of resource a harvested URI points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegmentKind {
    /// MPEG-TS media segment
    TransportStream,
    /// Fragmented MP4 / CMAF media segment
    Fragment,
    /// HLS playlist
    HlsPlaylist,
    /// DASH manifest
    DashManifest,
}

fn chunk_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"chunk-\d+\.m4s").expect("static regex"))
}

fn numeric_ts_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/\d+\.ts$").expect("static regex"))
}

/// Numbered `seg-N...` resources without a `.ts` suffix
fn numbered_segment_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"/seg-\d+[^/]*$").expect("static regex"))
}

const NON_STREAM_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".ico", ".js", ".css", ".vtt", ".srt",
];

impl SegmentKind {
    /// Classify a URI by its path suffix and well-known segment naming patterns.
    /// Returns `None` for resources that carry no stream data.
    pub fn classify(uri: &str) -> Option<Self> {
        let path = match url::Url::parse(uri) {
            Ok(parsed) => parsed.path().to_ascii_lowercase(),
            Err(_) => uri
                .split(['?', '#'])
                .next()
                .unwrap_or(uri)
                .to_ascii_lowercase(),
        };

        if path.ends_with(".m3u8") {
            Some(Self::HlsPlaylist)
        } else if path.ends_with(".mpd") {
            Some(Self::DashManifest)
        } else if path.ends_with(".ts") || numeric_ts_pattern().is_match(&path) {
            Some(Self::TransportStream)
        } else if path.ends_with(".m4s")
            || chunk_pattern().is_match(&path)
            || path.contains("manifest.fmp4")
            || (path.ends_with(".mp4") && path.contains("segment"))
        {
            Some(Self::Fragment)
        } else if numbered_segment_pattern().is_match(&path)
            && !NON_STREAM_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
        {
            Some(Self::TransportStream)
        } else {
            None
        }
    }

    /// File extension used when staging a resource of this kind
    pub fn extension(&self) -> &'static str {
        match self {
            Self::TransportStream => "ts",
            Self::Fragment => "m4s",
            Self::HlsPlaylist => "m3u8",
            Self::DashManifest => "mpd",
        }
    }

    pub fn is_manifest(&self) -> bool {
        matches!(self, Self::HlsPlaylist | Self::DashManifest)
    }
}

/// A harvested network resource believed to carry stream data or a manifest.
/// Ordering is lexicographic on the URI, which is the canonical assembly order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentUri {
    pub uri: String,
    pub kind: SegmentKind,
}

impl SegmentUri {
    pub fn parse(uri: &str) -> Option<Self> {
        SegmentKind::classify(uri).map(|kind| Self {
            uri: uri.to_string(),
            kind,
        })
    }

    /// Stable staging file name: the same URI always maps to the same file
    pub fn staged_file_name(&self) -> String {
        format!("{:x}.{}", md5::compute(self.uri.as_bytes()), self.file_extension())
    }

    /// Extension of the URI path when it is a known stream extension,
    /// otherwise the default for the segment kind
    pub fn file_extension(&self) -> &'static str {
        let path = self
            .uri
            .split(['?', '#'])
            .next()
            .unwrap_or(&self.uri)
            .to_ascii_lowercase();
        ["ts", "m4s", "mp4", "mpd", "m3u8"]
            .into_iter()
            .find(|ext| path.ends_with(&format!(".{}", ext)))
            .unwrap_or_else(|| self.kind.extension())
    }
}

/// Container family of one episode's stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerMode {
    TransportStream,
    Fragmented,
}

/// Deduplicated, unordered set of harvested URIs for one episode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentSet {
    uris: HashSet<SegmentUri>,
}

impl SegmentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify and add one URI. Returns `true` if it was a new stream resource.
    pub fn insert_uri(&mut self, uri: &str) -> bool {
        match SegmentUri::parse(uri) {
            Some(segment) => self.uris.insert(segment),
            None => false,
        }
    }

    /// Merge a batch of raw URIs, returning how many were new
    pub fn merge<I, S>(&mut self, uris: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        uris.into_iter()
            .filter(|uri| self.insert_uri(uri.as_ref()))
            .count()
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.uris.iter().any(|s| s.uri == uri)
    }

    /// All URIs in canonical (lexicographic) order
    pub fn canonical_order(&self) -> Vec<SegmentUri> {
        let mut ordered: Vec<SegmentUri> = self.uris.iter().cloned().collect();
        ordered.sort();
        ordered
    }

    /// TS when any TS segment was seen, fragmented otherwise
    pub fn container_mode(&self) -> ContainerMode {
        if self
            .uris
            .iter()
            .any(|s| s.kind == SegmentKind::TransportStream)
        {
            ContainerMode::TransportStream
        } else {
            ContainerMode::Fragmented
        }
    }
}

impl<S: AsRef<str>> FromIterator<S> for SegmentSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = SegmentSet::new();
        set.merge(iter);
        set
    }
}

/// A downloaded segment on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedSegment {
    pub source: SegmentUri,
    pub path: PathBuf,
    pub size: u64,
    pub valid: bool,
    /// Why validation rejected the file, if it did
    pub invalid_reason: Option<String>,
}

/// Terminal artifact of one episode's assembly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyResult {
    pub output_path: PathBuf,
    pub success: bool,
    pub size: u64,
}
