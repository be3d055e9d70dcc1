//! Segment Acquisition Manager: bounded-concurrency download and validation
//! of harvested segment URIs.

use crate::config::AcquisitionConfig;
use crate::error::{HarvestError, Result};
use crate::models::{ContainerMode, SegmentSet, SegmentUri, StagedSegment};
use async_trait::async_trait;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, error, info, warn};

/// MPEG-TS packet sync byte
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Where segment bytes come from
#[async_trait]
pub trait SegmentSource: Send + Sync {
    /// Fetch `uri` and store its body at `dest`, returning the byte count.
    /// A failed fetch must not leave a file at `dest`.
    async fn fetch(&self, uri: &str, dest: &Path) -> Result<u64>;
}

/// Plain HTTP GET with the body streamed to disk
pub struct HttpSegmentSource {
    client: reqwest::Client,
}

impl HttpSegmentSource {
    pub fn new(config: &AcquisitionConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;
        Ok(Self { client })
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

#[async_trait]
impl SegmentSource for HttpSegmentSource {
    async fn fetch(&self, uri: &str, dest: &Path) -> Result<u64> {
        let failed = |reason: String| HarvestError::SegmentDownloadFailed {
            uri: uri.to_string(),
            reason,
        };

        let response = self
            .client
            .get(uri)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {}", status)));
        }

        let partial = part_path(dest);
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written = 0u64;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(failed(e.to_string()));
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, dest).await?;
        Ok(written)
    }
}

/// Aggregate download progress
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcquisitionProgress {
    pub completed: usize,
    pub failed: usize,
    pub total: usize,
}

impl AcquisitionProgress {
    pub fn percent(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            (self.completed + self.failed) * 100 / self.total
        }
    }
}

/// Outcome of staging one episode's segments
#[derive(Debug)]
pub struct AcquisitionReport {
    pub mode: ContainerMode,
    /// Every file on disk, valid or not, in canonical URI order
    pub staged: Vec<StagedSegment>,
    /// `SegmentDownloadFailed` and `SegmentInvalid` entries
    pub failures: Vec<HarvestError>,
    pub downloaded: usize,
    pub reused: usize,
}

impl AcquisitionReport {
    /// Valid media segments in canonical order; the only files the assembler may see
    pub fn assembly_inputs(&self) -> Vec<&StagedSegment> {
        self.staged
            .iter()
            .filter(|s| s.valid && !s.source.kind.is_manifest())
            .collect()
    }

    pub fn invalid(&self) -> Vec<&StagedSegment> {
        self.staged.iter().filter(|s| !s.valid).collect()
    }
}

/// Check a staged file: non-empty, and starting with the TS sync byte in TS mode.
/// Returns the size, or why the file is rejected.
pub async fn validate_staged_file(
    path: &Path,
    segment: &SegmentUri,
    mode: ContainerMode,
) -> std::result::Result<u64, String> {
    let size = tokio::fs::metadata(path)
        .await
        .map_err(|e| format!("cannot stat file: {}", e))?
        .len();
    if size == 0 {
        return Err("file is empty".to_string());
    }

    if mode == ContainerMode::TransportStream && !segment.kind.is_manifest() {
        let mut file = tokio::fs::File::open(path)
            .await
            .map_err(|e| format!("cannot open file: {}", e))?;
        let mut first = [0u8; 1];
        file.read_exact(&mut first)
            .await
            .map_err(|e| format!("cannot read first byte: {}", e))?;
        if first[0] != TS_SYNC_BYTE {
            return Err(format!(
                "first byte 0x{:02x} is not the MPEG-TS sync byte",
                first[0]
            ));
        }
    }

    Ok(size)
}

enum FetchOutcome {
    Reused,
    Downloaded,
    Failed(HarvestError),
}

/// Bounded-concurrency segment downloader
pub struct AcquisitionManager {
    source: Arc<dyn SegmentSource>,
    max_concurrent: usize,
    progress_tx: watch::Sender<AcquisitionProgress>,
}

impl AcquisitionManager {
    pub fn new(source: Arc<dyn SegmentSource>, max_concurrent: usize) -> Self {
        let (progress_tx, _) = watch::channel(AcquisitionProgress::default());
        Self {
            source,
            max_concurrent: max_concurrent.max(1),
            progress_tx,
        }
    }

    /// Progress of the current (or last) run
    pub fn subscribe(&self) -> watch::Receiver<AcquisitionProgress> {
        self.progress_tx.subscribe()
    }

    /// Stage every URI of the set into `dir`, then validate what is on disk
    pub async fn acquire(&self, segments: &SegmentSet, dir: &Path) -> Result<AcquisitionReport> {
        tokio::fs::create_dir_all(dir).await?;

        let ordered = segments.canonical_order();
        let mode = segments.container_mode();
        let total = ordered.len();

        info!(
            "⬇️ Staging {} segment URI(s) into {} ({} workers, {:?})",
            total,
            dir.display(),
            self.max_concurrent,
            mode
        );
        self.progress_tx.send_replace(AcquisitionProgress {
            completed: 0,
            failed: 0,
            total,
        });

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let (tx, mut rx) = mpsc::channel(self.max_concurrent);

        for segment in ordered.iter().cloned() {
            let source = Arc::clone(&self.source);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            let path = dir.join(segment.staged_file_name());

            tokio::spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => fetch_one(source.as_ref(), &segment, &path).await,
                    Err(e) => FetchOutcome::Failed(HarvestError::SegmentDownloadFailed {
                        uri: segment.uri.clone(),
                        reason: e.to_string(),
                    }),
                };

                if let Err(e) = tx.send((segment, path, outcome)).await {
                    error!("Failed to send download result: {}", e);
                }
            });
        }

        // Drop the original sender so the channel closes when all tasks finish
        drop(tx);

        let mut fetched = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut progress = AcquisitionProgress {
            completed: 0,
            failed: 0,
            total,
        };
        let mut downloaded = 0;
        let mut reused = 0;
        let mut last_logged = 0;

        while let Some((segment, path, outcome)) = rx.recv().await {
            match outcome {
                FetchOutcome::Reused => {
                    reused += 1;
                    progress.completed += 1;
                    fetched.push((segment, path));
                }
                FetchOutcome::Downloaded => {
                    downloaded += 1;
                    progress.completed += 1;
                    fetched.push((segment, path));
                }
                FetchOutcome::Failed(e) => {
                    warn!("❌ {}", e);
                    progress.failed += 1;
                    failures.push(e);
                }
            }

            self.progress_tx.send_replace(progress);
            let percent = progress.percent();
            if percent / 5 > last_logged / 5 {
                last_logged = percent;
                info!(
                    "📥 Download progress: {}% ({}/{}, {} failed)",
                    percent, progress.completed, total, progress.failed
                );
            }
        }

        let mut staged = Vec::with_capacity(fetched.len());
        for (segment, path) in fetched {
            let staged_segment = match validate_staged_file(&path, &segment, mode).await {
                Ok(size) => StagedSegment {
                    source: segment,
                    path,
                    size,
                    valid: true,
                    invalid_reason: None,
                },
                Err(reason) => {
                    let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
                    let err = HarvestError::SegmentInvalid {
                        uri: segment.uri.clone(),
                        path: path.clone(),
                        reason: reason.clone(),
                    };
                    warn!("⚠️ {}", err);
                    failures.push(err);
                    StagedSegment {
                        source: segment,
                        path,
                        size,
                        valid: false,
                        invalid_reason: Some(reason),
                    }
                }
            };
            staged.push(staged_segment);
        }
        staged.sort_by(|a, b| a.source.cmp(&b.source));

        let report = AcquisitionReport {
            mode,
            staged,
            failures,
            downloaded,
            reused,
        };

        info!(
            "✅ Staging done: {} downloaded, {} reused, {} valid, {} invalid, {} failed",
            report.downloaded,
            report.reused,
            report.assembly_inputs().len(),
            report.invalid().len(),
            progress.failed
        );
        Ok(report)
    }
}

async fn fetch_one(source: &dyn SegmentSource, segment: &SegmentUri, path: &Path) -> FetchOutcome {
    if let Ok(meta) = tokio::fs::metadata(path).await {
        if meta.is_file() && meta.len() > 0 {
            debug!("Already staged: {}", path.display());
            return FetchOutcome::Reused;
        }
    }

    match source.fetch(&segment.uri, path).await {
        Ok(bytes) => {
            debug!("Downloaded {} ({} bytes)", segment.uri, bytes);
            FetchOutcome::Downloaded
        }
        Err(HarvestError::Io(e)) => FetchOutcome::Failed(HarvestError::SegmentDownloadFailed {
            uri: segment.uri.clone(),
            reason: e.to_string(),
        }),
        Err(e) => FetchOutcome::Failed(e),
    }
}
