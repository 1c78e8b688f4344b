//! Turning raw diarizer output into backend windows, and transcribing them.

use std::ops::Range;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::backend::{WindowBackend, WindowTranscript};
use crate::config::DiarizationOptions;
use crate::error::{Error, Result};
use crate::segments::{merge_adjacent, split_all};
use crate::types::{Hints, TimeInterval, TranscriptSegment, TranscriptionResult, Turn};

/// A speaker turn ready for dispatch, with its position in the sample buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct DiarizedWindow {
    pub turn: Turn,
    pub samples: Range<usize>,
}

/// Clean raw turns into bounded, sample-addressed windows.
///
/// Turns shorter than `min_seg_seconds` are dropped, same-speaker neighbours
/// merged, long turns split to `max_seg_seconds`, and each window clipped to
/// the buffer. Windows that collapse after clipping are discarded.
pub fn reconcile(
    raw_turns: &[Turn],
    options: &DiarizationOptions,
    total_samples: usize,
    max_window_seconds: f64,
) -> Result<Vec<DiarizedWindow>> {
    if options.max_seg_seconds > max_window_seconds {
        return Err(Error::InvalidArgument(format!(
            "max segment length {}s exceeds the backend limit of {max_window_seconds}s",
            options.max_seg_seconds
        )));
    }

    let kept: Vec<Turn> = raw_turns
        .iter()
        .filter(|t| t.start.is_finite() && t.end.is_finite())
        .filter(|t| t.duration() >= options.min_seg_seconds && t.duration() > 0.0)
        .cloned()
        .collect();
    if kept.len() < raw_turns.len() {
        debug!(dropped = raw_turns.len() - kept.len(), "dropped short turns");
    }

    let merged = merge_adjacent(&kept, options.merge_gap_seconds);
    let split = split_all(&merged, options.max_seg_seconds)?;

    let rate = options.sample_rate as f64;
    let to_sample = |t: f64| ((t * rate).round().max(0.0) as usize).min(total_samples);

    let windows: Vec<DiarizedWindow> = split
        .into_iter()
        .filter_map(|turn| {
            let samples = to_sample(turn.start)..to_sample(turn.end);
            if samples.is_empty() {
                return None;
            }
            let turn = Turn::new(
                samples.start as f64 / rate,
                samples.end as f64 / rate,
                turn.speaker,
            );
            Some(DiarizedWindow { turn, samples })
        })
        .collect();

    info!(
        raw = raw_turns.len(),
        merged = merged.len(),
        windows = windows.len(),
        "reconciled diarization"
    );
    Ok(windows)
}

/// Transcribe `samples` one speaker window at a time, in a single batched call.
///
/// Output timestamps are absolute: each window's start is added to the
/// relative word times the backend reports.
pub async fn transcribe_diarized(
    backend: &dyn WindowBackend,
    samples: &[f32],
    raw_turns: &[Turn],
    options: &DiarizationOptions,
    hints: &Hints,
    word_timestamps: bool,
) -> Result<TranscriptionResult> {
    let windows = reconcile(
        raw_turns,
        options,
        samples.len(),
        backend.max_window_seconds(),
    )?;
    if windows.is_empty() {
        info!("no speech windows survived reconciliation");
        return Ok(TranscriptionResult::default());
    }

    let batch: Vec<Vec<f32>> = windows
        .iter()
        .map(|w| samples[w.samples.clone()].to_vec())
        .collect();
    let mut outputs = backend
        .transcribe_windows(batch, options.sample_rate, hints, word_timestamps)
        .await?;

    if outputs.len() != windows.len() {
        warn!(
            expected = windows.len(),
            got = outputs.len(),
            "backend returned the wrong number of transcripts, padding with empty text"
        );
        outputs.resize_with(windows.len(), WindowTranscript::default);
    }

    let segments = windows
        .into_iter()
        .zip(outputs)
        .map(|(window, output)| {
            let turn = window.turn;
            let interval = TimeInterval {
                start: turn.start,
                end: turn.end,
            };
            let segment = TranscriptSegment::new(interval, turn.speaker, output.text.trim());
            match output.words.filter(|_| word_timestamps) {
                Some(words) => segment.with_words(
                    words.iter().map(|w| w.shifted(turn.start)).collect(),
                ),
                None => segment,
            }
        })
        .collect();

    Ok(TranscriptionResult::new(segments))
}

/// Parse raw turns from a JSON array of `{start, end, speaker}` objects.
pub fn parse_turns_json(json: &str) -> Result<Vec<Turn>> {
    Ok(serde_json::from_str(json)?)
}

pub fn load_turns_json(path: &Path) -> Result<Vec<Turn>> {
    let json = std::fs::read_to_string(path)?;
    parse_turns_json(&json)
}
