//! Stream Assembler: hands validated segments to an external multiplexer
//! through a concat manifest.

use crate::acquisition::AcquisitionReport;
use crate::config::AssemblyConfig;
use crate::error::{AssemblyFailure, HarvestError, Result};
use crate::models::{AssemblyResult, ContainerMode, StagedSegment};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Recovery copy of the manifest left in the staging directory after a failure
pub const RECOVERY_MANIFEST: &str = "concat_list.txt";

const OUTPUT_TAIL_LINES: usize = 10;

/// Concat manifest body: one `file '<absolute path>'` line per segment
pub fn build_manifest(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| {
            let escaped = path.to_string_lossy().replace('\'', r"'\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

/// Multiplexer arguments for a concat run
pub fn command_args(manifest: &Path, output: &Path, mode: ContainerMode) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-y", "-f", "concat", "-safe", "0", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(manifest.as_os_str().to_os_string());
    args.extend(["-c:v", "copy", "-c:a", "copy"].map(OsString::from));
    if mode == ContainerMode::TransportStream {
        args.extend(["-bsf:a", "aac_adtstoasc"].map(OsString::from));
    }
    args.extend(["-map_metadata", "-1"].map(OsString::from));
    args.push(output.as_os_str().to_os_string());
    args
}

fn tail(text: &[u8]) -> String {
    let text = String::from_utf8_lossy(text);
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(OUTPUT_TAIL_LINES)..].join("\n")
}

/// Merges staged segments into one container file
#[derive(Debug, Clone)]
pub struct StreamAssembler {
    ffmpeg: PathBuf,
}

impl StreamAssembler {
    pub fn new(config: &AssemblyConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg_path.clone(),
        }
    }

    /// Assemble the valid inputs of `report` into `output`.
    ///
    /// On success the staged files are deleted and `staging_dir` is removed if
    /// empty. On failure everything stays and a manifest copy is written to
    /// `staging_dir` for manual recovery.
    pub async fn assemble(
        &self,
        report: &AcquisitionReport,
        staging_dir: &Path,
        output: &Path,
    ) -> Result<AssemblyResult> {
        let inputs = report.assembly_inputs();
        if inputs.is_empty() {
            return Err(HarvestError::AssemblyFailed {
                output: output.to_path_buf(),
                reason: AssemblyFailure::NoValidSegments,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
            });
        }

        let mut paths = Vec::with_capacity(inputs.len());
        for segment in &inputs {
            paths.push(tokio::fs::canonicalize(&segment.path).await?);
        }
        let manifest_body = build_manifest(&paths);

        // Removed when dropped, on every return path below
        let mut manifest = tempfile::Builder::new()
            .prefix("concat_")
            .suffix(".txt")
            .tempfile()?;
        manifest.write_all(manifest_body.as_bytes())?;
        manifest.flush()?;

        info!(
            "🎬 Assembling {} segment(s) into {}",
            inputs.len(),
            output.display()
        );

        let args = command_args(manifest.path(), output, report.mode);
        let run = tokio::process::Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(std::process::Stdio::null())
            .output()
            .await;

        let run = match run {
            Ok(run) => run,
            Err(e) => {
                self.preserve_manifest(staging_dir, &manifest_body).await;
                return Err(HarvestError::AssemblyFailed {
                    output: output.to_path_buf(),
                    reason: AssemblyFailure::SpawnFailed(format!(
                        "{}: {}",
                        self.ffmpeg.display(),
                        e
                    )),
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            }
        };

        let stdout = tail(&run.stdout);
        let stderr = tail(&run.stderr);
        let size = tokio::fs::metadata(output)
            .await
            .map(|m| m.len())
            .unwrap_or(0);

        let failure = if !run.status.success() {
            // A partial file from a failed run must not look like a result
            let _ = tokio::fs::remove_file(output).await;
            Some(AssemblyFailure::NonZeroExit)
        } else if size == 0 {
            Some(AssemblyFailure::EmptyOutput)
        } else {
            None
        };

        if let Some(reason) = failure {
            warn!(
                "❌ Multiplexer failed for {} (exit {:?})\nstdout:\n{}\nstderr:\n{}",
                output.display(),
                run.status.code(),
                stdout,
                stderr
            );
            self.preserve_manifest(staging_dir, &manifest_body).await;
            return Err(HarvestError::AssemblyFailed {
                output: output.to_path_buf(),
                reason,
                exit_code: run.status.code(),
                stdout,
                stderr,
            });
        }

        debug!("Multiplexer stdout:\n{}\nstderr:\n{}", stdout, stderr);
        info!("✅ Merged {} ({} bytes)", output.display(), size);

        cleanup_staging(&report.staged, staging_dir).await;

        Ok(AssemblyResult {
            output_path: output.to_path_buf(),
            success: true,
            size,
        })
    }

    async fn preserve_manifest(&self, staging_dir: &Path, body: &str) {
        let copy = staging_dir.join(RECOVERY_MANIFEST);
        match tokio::fs::write(&copy, body).await {
            Ok(()) => info!("💾 Manifest kept for recovery: {}", copy.display()),
            Err(e) => warn!("Could not keep manifest at {}: {}", copy.display(), e),
        }
    }
}

/// Delete valid staged files; invalid ones stay for diagnostics
async fn cleanup_staging(staged: &[StagedSegment], staging_dir: &Path) {
    for segment in staged.iter().filter(|s| s.valid) {
        if let Err(e) = tokio::fs::remove_file(&segment.path).await {
            debug!("Could not delete {}: {}", segment.path.display(), e);
        }
    }

    // A manifest kept by an earlier failed run is obsolete now
    let recovery = staging_dir.join(RECOVERY_MANIFEST);
    if recovery.exists() {
        if let Err(e) = tokio::fs::remove_file(&recovery).await {
            debug!("Could not delete {}: {}", recovery.display(), e);
        }
    }

    match tokio::fs::remove_dir(staging_dir).await {
        Ok(()) => debug!("Removed staging directory {}", staging_dir.display()),
        Err(_) => debug!(
            "Staging directory {} kept (not empty)",
            staging_dir.display()
        ),
    }
}
