//! Chunked transcription: plan, dispatch in parallel, shift, merge.

use std::path::Path;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::audio::AudioSlicer;
use crate::backend::Backend;
use crate::chunk::{self, ChunkWindow, ScratchDir};
use crate::config::PipelineOptions;
use crate::error::{Error, Result};
use crate::progress::{report, report_step, ProgressEvent, ProgressSink, Step};
use crate::retry::with_retry;
use crate::types::{Hints, TranscriptionResult};

/// Transcription client tying the planner, chunk workers and retry together.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use wav2elan::{Ffmpeg, GeminiBackend, Hints, Pipeline};
///
/// # async fn run() -> wav2elan::Result<()> {
/// let backend = GeminiBackend::from_env()?;
/// let pipeline = Pipeline::new(Arc::new(backend), Arc::new(Ffmpeg));
/// let result = pipeline
///     .transcribe("interview.mp3".as_ref(), &Hints::new().speaker_count(2), None)
///     .await?;
/// print!("{}", result.to_lines());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Pipeline {
    backend: Arc<dyn Backend>,
    slicer: Arc<dyn AudioSlicer>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(backend: Arc<dyn Backend>, slicer: Arc<dyn AudioSlicer>) -> Self {
        Self {
            backend,
            slicer,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Transcribe `audio`, retrying failed attempts with backoff.
    ///
    /// The duration is probed once. Whether the run is chunked is decided from
    /// that probe and stays fixed for every attempt.
    pub async fn transcribe(
        &self,
        audio: &Path,
        hints: &Hints,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<TranscriptionResult> {
        let duration = self.slicer.duration(audio).await;
        let chunked = duration.is_some_and(|d| d > self.options.min_duration_for_chunking);
        info!(
            path = %audio.display(),
            duration_secs = ?duration,
            chunked,
            "starting transcription"
        );

        with_retry(&self.options.retry, |attempt| async move {
            debug!(attempt = attempt + 1, "transcription attempt");
            if chunked {
                self.run_chunked(audio, duration, hints, progress).await
            } else {
                self.run_single(audio, hints, progress).await
            }
        })
        .await
    }

    /// One chunked pass without retry. Probes the duration itself.
    pub async fn transcribe_chunked(
        &self,
        audio: &Path,
        hints: &Hints,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<TranscriptionResult> {
        let duration = self.slicer.duration(audio).await;
        self.run_chunked(audio, duration, hints, progress).await
    }

    async fn run_single(
        &self,
        audio: &Path,
        hints: &Hints,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<TranscriptionResult> {
        report_step(progress, Step::Uploading);
        report_step(progress, Step::Transcribing);
        let result = self.backend.transcribe(audio, hints).await?;
        report_step(progress, Step::Processing);
        report_step(progress, Step::Done);
        Ok(result)
    }

    async fn run_chunked(
        &self,
        audio: &Path,
        duration: Option<f64>,
        hints: &Hints,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<TranscriptionResult> {
        report_step(progress, Step::Uploading);

        let spans = chunk::plan(
            duration,
            self.options.chunk_duration,
            self.options.min_duration_for_chunking,
        )?;

        // Owned by this call; removed on every exit path.
        let scratch = if spans.len() > 1 {
            Some(ScratchDir::create(&self.options.resolve_scratch_dir())?)
        } else {
            None
        };
        let windows = match &scratch {
            Some(dir) => {
                chunk::extract_windows(audio, &spans, self.slicer.as_ref(), dir.path()).await
            }
            None => vec![ChunkWindow::whole(audio)],
        };
        let omitted = if windows.len() == 1 && windows[0].path == audio {
            0
        } else {
            spans.len() - windows.len()
        };

        report_step(progress, Step::Transcribing);

        let mut result = if windows.len() == 1 {
            let window = &windows[0];
            let mut result = self.backend.transcribe(&window.path, hints).await?;
            if window.offset != 0.0 {
                result = result.shifted(window.offset);
            }
            result
        } else {
            self.dispatch(&windows, hints, progress).await?
        };
        result.dropped_chunks += omitted;

        report_step(progress, Step::Processing);
        drop(scratch);
        info!(
            segments = result.segments.len(),
            dropped_chunks = result.dropped_chunks,
            "transcription complete"
        );
        report_step(progress, Step::Done);
        Ok(result)
    }

    /// Run one backend call per window with at most `max_parallel_chunks` in flight.
    async fn dispatch(
        &self,
        windows: &[ChunkWindow],
        hints: &Hints,
        progress: Option<&dyn ProgressSink>,
    ) -> Result<TranscriptionResult> {
        let total = windows.len();
        let backend = &self.backend;

        let outcomes: Vec<(usize, Result<TranscriptionResult>)> =
            stream::iter(windows.iter().enumerate())
                .map(|(index, window)| async move {
                    let outcome = backend
                        .transcribe(&window.path, hints)
                        .await
                        .map(|r| r.shifted(window.offset));
                    match &outcome {
                        Ok(r) => {
                            debug!(index, segments = r.segments.len(), "chunk done");
                            report(progress, ProgressEvent::ChunkDone { index, total });
                        }
                        Err(e) => {
                            warn!(index, offset = window.offset, error = %e, "chunk failed, dropping it");
                            report(
                                progress,
                                ProgressEvent::ChunkFailed {
                                    index,
                                    total,
                                    error: e.to_string(),
                                },
                            );
                        }
                    }
                    (index, outcome)
                })
                .buffer_unordered(self.options.max_parallel_chunks.max(1))
                .collect()
                .await;

        let mut succeeded = Vec::with_capacity(total);
        let mut failed = 0;
        let mut last_error: Option<Error> = None;
        for (index, outcome) in outcomes {
            match outcome {
                Ok(result) => succeeded.push((index, result)),
                Err(e) => {
                    failed += 1;
                    // keep a retryable error once one is seen
                    if last_error.as_ref().map_or(true, |prev| !prev.is_retryable()) {
                        last_error = Some(e);
                    }
                }
            }
        }

        if succeeded.is_empty() {
            let last = last_error
                .unwrap_or_else(|| Error::Backend("no chunks were dispatched".into()));
            return Err(Error::AllChunksFailed {
                failed,
                last: Box::new(last),
            });
        }
        if failed > 0 {
            warn!(failed, total, "partial transcription");
        }

        let mut merged = merge_chunk_results(succeeded);
        merged.dropped_chunks += failed;
        Ok(merged)
    }
}

/// Combine per-chunk results (already in the global timebase) into one.
///
/// Chunks are ordered by their earliest segment start, chunks without segments
/// last, ties broken by window index. Completion order never matters.
pub fn merge_chunk_results(mut chunks: Vec<(usize, TranscriptionResult)>) -> TranscriptionResult {
    chunks.sort_by(|(ia, a), (ib, b)| {
        let ka = a.earliest_start().unwrap_or(f64::INFINITY);
        let kb = b.earliest_start().unwrap_or(f64::INFINITY);
        ka.total_cmp(&kb).then(ia.cmp(ib))
    });

    let mut merged = TranscriptionResult::default();
    let mut summaries = Vec::new();
    for (_, chunk) in chunks {
        if let Some(summary) = chunk.summary.filter(|s| !s.trim().is_empty()) {
            summaries.push(summary);
        }
        merged.detected_languages.extend(&chunk.detected_languages);
        merged.dropped_chunks += chunk.dropped_chunks;
        merged.coerced_segments += chunk.coerced_segments;
        merged.segments.extend(chunk.segments);
    }
    if !summaries.is_empty() {
        merged.summary = Some(summaries.join(" "));
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LanguageTag, TimeInterval, TranscriptSegment};

    fn chunk(starts: &[f64], summary: Option<&str>) -> TranscriptionResult {
        let segments = starts
            .iter()
            .map(|&s| {
                TranscriptSegment::new(TimeInterval { start: s, end: s + 1.0 }, "A", format!("at {s}"))
            })
            .collect();
        TranscriptionResult {
            summary: summary.map(String::from),
            ..TranscriptionResult::new(segments)
        }
    }

    fn starts(result: &TranscriptionResult) -> Vec<f64> {
        result.segments.iter().map(|s| s.start).collect()
    }

    #[test]
    fn test_merge_orders_by_earliest_start() {
        let merged = merge_chunk_results(vec![
            (0, chunk(&[40.0, 41.0], None)),
            (1, chunk(&[0.0, 5.0], None)),
            (2, chunk(&[80.0], None)),
        ]);
        assert_eq!(starts(&merged), [0.0, 5.0, 40.0, 41.0, 80.0]);
    }

    #[test]
    fn test_merge_puts_empty_chunks_last() {
        let merged = merge_chunk_results(vec![
            (0, chunk(&[], Some("silence"))),
            (1, chunk(&[10.0], Some("talk"))),
        ]);
        assert_eq!(starts(&merged), [10.0]);
        assert_eq!(merged.summary.as_deref(), Some("talk silence"));
    }

    #[test]
    fn test_merge_keeps_segment_order_within_chunk() {
        // not re-sorted inside a chunk
        let merged = merge_chunk_results(vec![(0, chunk(&[3.0, 1.0], None))]);
        assert_eq!(starts(&merged), [3.0, 1.0]);
    }

    #[test]
    fn test_merge_ties_keep_window_order() {
        let mut a = chunk(&[5.0], None);
        a.segments[0].text = "first".into();
        let mut b = chunk(&[5.0], None);
        b.segments[0].text = "second".into();
        let merged = merge_chunk_results(vec![(1, b), (0, a)]);
        assert_eq!(merged.segments[0].text, "first");
    }

    #[test]
    fn test_merge_summary_absent_when_no_chunk_has_one() {
        let merged = merge_chunk_results(vec![(0, chunk(&[0.0], None)), (1, chunk(&[1.0], Some("  ")))]);
        assert_eq!(merged.summary, None);
    }

    #[test]
    fn test_merge_unions_languages_first_seen() {
        let mut a = chunk(&[0.0], None);
        a.detected_languages.insert(LanguageTag::new("English", "en"));
        let mut b = chunk(&[300.0], None);
        b.detected_languages.insert(LanguageTag::new("Inglés", "en"));
        b.detected_languages.insert(LanguageTag::new("Spanish", "es"));
        b.coerced_segments = 2;

        let merged = merge_chunk_results(vec![(1, b), (0, a)]);
        let names: Vec<_> = merged.detected_languages.iter().map(|t| t.name.clone()).collect();
        assert_eq!(names, ["English", "Spanish"]);
        assert_eq!(merged.coerced_segments, 2);
    }
}
