use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Hints, TranscriptionResult, WordTimestamp};

/// Longest window a [`WindowBackend`] accepts unless it says otherwise.
pub const DEFAULT_MAX_WINDOW_SECS: f64 = 40.0;

/// A speech-to-text service that transcribes whole audio files.
///
/// Implementations own their client state; the pipeline receives them
/// explicitly (usually as `Arc<dyn Backend>`). Timestamps in the returned
/// result are relative to the start of `audio`.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn transcribe(&self, audio: &Path, hints: &Hints) -> Result<TranscriptionResult>;
}

/// Transcript of one sample window. Word times are relative to the window start.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowTranscript {
    pub text: String,
    pub words: Option<Vec<WordTimestamp>>,
}

impl WindowTranscript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            words: None,
        }
    }

    pub fn with_words(mut self, words: Vec<WordTimestamp>) -> Self {
        self.words = Some(words);
        self
    }
}

/// A model that transcribes pre-cut sample windows in one batched call.
///
/// Used by the diarized path, where window boundaries come from speaker turns.
/// The returned vector is positionally aligned with `windows`.
#[async_trait]
pub trait WindowBackend: Send + Sync {
    /// Hard ceiling on a single window's length in seconds.
    fn max_window_seconds(&self) -> f64 {
        DEFAULT_MAX_WINDOW_SECS
    }

    async fn transcribe_windows(
        &self,
        windows: Vec<Vec<f32>>,
        sample_rate: u32,
        hints: &Hints,
        word_timestamps: bool,
    ) -> Result<Vec<WindowTranscript>>;
}
