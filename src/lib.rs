/// Series Harvester
///
/// Drives a remote browser to start playback on hosting pages, harvests the
/// segment URIs the player requests, downloads and validates the segments and
/// merges them into one file. A companion crawler builds the resumable catalog
/// of series, seasons and hosting links that feeds the harvester.

pub mod acquisition;
pub mod assembler;
pub mod browser;
pub mod config;
pub mod crawler;
pub mod error;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod playback;

// Re-export main types for easy access
pub use crate::acquisition::{AcquisitionManager, HttpSegmentSource, SegmentSource};
pub use crate::assembler::StreamAssembler;
pub use crate::browser::{BrowserDriver, DriverError, WebDriverClient};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::crawler::{CatalogStore, LinkCrawler, SeriesCatalog};
pub use crate::error::HarvestError;
pub use crate::models::{AssemblyResult, EpisodeJob, SegmentSet, SegmentUri, StagedSegment};
pub use crate::pipeline::{jobs_from_catalog, HarvestPipeline, RunReport};
pub use crate::playback::{PlaybackController, PlaybackReport};
