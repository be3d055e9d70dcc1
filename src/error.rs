/// Failure taxonomy shared by the harvesting pipeline and the link crawler.
///
/// Every variant carries the identifiers needed to retry the failed unit by
/// hand. None of them aborts a multi-episode or multi-series run; callers
/// record the error and move on to the next unit.
use std::path::PathBuf;

use crate::browser::DriverError;

/// Result type for harvesting operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Error types for harvesting and crawling
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("page {url} did not become ready within {timeout_secs}s")]
    NavigationTimeout { url: String, timeout_secs: u64 },

    #[error("playback never started on {url} after {attempts} attempts in {elapsed_secs}s")]
    PlaybackStartExhausted {
        url: String,
        attempts: u32,
        elapsed_secs: u64,
    },

    #[error("no segment URIs harvested from {url}")]
    NoSegmentsHarvested { url: String },

    #[error("segment download failed for {uri}: {reason}")]
    SegmentDownloadFailed { uri: String, reason: String },

    #[error("staged segment {} for {uri} is invalid: {reason}", path.display())]
    SegmentInvalid {
        uri: String,
        path: PathBuf,
        reason: String,
    },

    #[error("assembly of {} failed: {reason}", output.display())]
    AssemblyFailed {
        output: PathBuf,
        reason: AssemblyFailure,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("no season or movie structure found for series '{series}' at {url}")]
    StructureNotFound { series: String, url: String },

    #[error("no hosting link found for {item} of '{series}' at {url}")]
    LinkNotFound {
        series: String,
        item: String,
        url: String,
    },

    #[error("browser endpoint error: {0}")]
    Browser(#[from] DriverError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why an assembly attempt was rejected
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AssemblyFailure {
    /// Nothing valid was left to hand to the multiplexer
    NoValidSegments,
    /// The multiplexer could not be spawned at all
    SpawnFailed(String),
    /// The multiplexer exited with a non-zero status
    NonZeroExit,
    /// Exit status zero, but the destination is missing or empty
    EmptyOutput,
}

impl std::fmt::Display for AssemblyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoValidSegments => write!(f, "no valid segments to assemble"),
            Self::SpawnFailed(e) => write!(f, "multiplexer could not be started: {}", e),
            Self::NonZeroExit => write!(f, "multiplexer exited with a non-zero status"),
            Self::EmptyOutput => write!(f, "multiplexer produced no output"),
        }
    }
}

impl HarvestError {
    /// Short machine-readable name of the failure category
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NavigationTimeout { .. } => "navigation_timeout",
            Self::PlaybackStartExhausted { .. } => "playback_start_exhausted",
            Self::NoSegmentsHarvested { .. } => "no_segments_harvested",
            Self::SegmentDownloadFailed { .. } => "segment_download_failed",
            Self::SegmentInvalid { .. } => "segment_invalid",
            Self::AssemblyFailed { .. } => "assembly_failed",
            Self::StructureNotFound { .. } => "structure_not_found",
            Self::LinkNotFound { .. } => "link_not_found",
            Self::Browser(_) => "browser",
            Self::Io(_) => "io",
        }
    }
}
