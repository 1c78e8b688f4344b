//! Chunk planning: which sub-ranges of a recording are transcribed independently.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use crate::audio::AudioSlicer;
use crate::error::{Error, Result};

/// A planned sub-range of the source recording.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkSpan {
    pub offset: f64,
    /// `None` means "until the end of the recording" (duration unknown).
    pub length: Option<f64>,
}

/// An extracted chunk, consumed by exactly one backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkWindow {
    pub path: PathBuf,
    /// Start of this chunk in the source timebase, in seconds.
    pub offset: f64,
}

impl ChunkWindow {
    /// The whole source file as a single window.
    pub fn whole(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            offset: 0.0,
        }
    }
}

/// Compute the chunk spans covering a recording.
///
/// Unknown, non-positive or short durations yield a single span from zero.
pub fn plan(
    total_duration: Option<f64>,
    chunk_duration: f64,
    min_duration_for_chunking: f64,
) -> Result<Vec<ChunkSpan>> {
    if !(chunk_duration > 0.0) || !chunk_duration.is_finite() {
        return Err(Error::InvalidArgument(format!(
            "chunk duration must be positive (got {chunk_duration})"
        )));
    }

    let total = match total_duration {
        Some(d) if d.is_finite() && d > 0.0 => d,
        _ => {
            return Ok(vec![ChunkSpan {
                offset: 0.0,
                length: None,
            }])
        }
    };

    if total <= min_duration_for_chunking {
        return Ok(vec![ChunkSpan {
            offset: 0.0,
            length: Some(total),
        }]);
    }

    let count = (total / chunk_duration).ceil() as usize;
    let spans = (0..count)
        // multiply rather than accumulate so offsets don't drift
        .map(|i| i as f64 * chunk_duration)
        .filter(|offset| *offset < total)
        .map(|offset| ChunkSpan {
            offset,
            length: Some(chunk_duration.min(total - offset)),
        })
        .collect();
    Ok(spans)
}

/// Extract each span into `dir`, dropping spans whose extraction fails.
///
/// A single span never touches the slicer. If every extraction fails the
/// whole source file is returned as the only window.
pub async fn extract_windows(
    source: &Path,
    spans: &[ChunkSpan],
    slicer: &dyn AudioSlicer,
    dir: &Path,
) -> Vec<ChunkWindow> {
    if spans.len() <= 1 {
        return vec![ChunkWindow::whole(source)];
    }

    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_else(|| ".wav".to_string());

    let mut windows = Vec::with_capacity(spans.len());
    for (i, span) in spans.iter().enumerate() {
        let dest = dir.join(format!("chunk_{i:04}{ext}"));
        let Some(length) = span.length else {
            warn!(index = i, "span without a length cannot be sliced");
            continue;
        };
        match slicer.slice(source, span.offset, length, &dest).await {
            Ok(()) => {
                debug!(index = i, offset = span.offset, length, "extracted chunk");
                windows.push(ChunkWindow {
                    path: dest,
                    offset: span.offset,
                });
            }
            Err(e) => warn!(index = i, offset = span.offset, error = %e, "skipping chunk"),
        }
    }

    if windows.is_empty() {
        warn!("no chunk could be extracted; sending the whole file");
        return vec![ChunkWindow::whole(source)];
    }

    info!(chunks = windows.len(), planned = spans.len(), "chunks ready");
    windows
}

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Per-run scratch directory, removed with all contents when dropped.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Create a fresh directory under `parent`. Names include the pid, a
    /// timestamp and a process-wide counter.
    pub fn create(parent: &Path) -> Result<Self> {
        let path = parent.join(format!(
            "wav2elan-chunks-{}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos(),
            SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to clean up scratch dir");
            }
        }
    }
}
