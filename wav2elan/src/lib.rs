//! Speaker-attributed transcription of long recordings, exported as JSONL or ELAN.
//!
//! **wav2elan** does not recognise speech itself. It orchestrates a speech
//! backend: long files are cut into chunks, transcribed concurrently with
//! retry, and reassembled on one absolute timeline. Diarizer output can be
//! reconciled into clean speaker windows and transcribed by a local model.
//! Results export to line-delimited JSON or an ELAN `.eaf` timeline.
//!
//! # Quick start
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> wav2elan::Result<()> {
//! // Needs GEMINI_API_KEY and ffmpeg on PATH
//! let result = wav2elan::transcribe_file("meeting.mp3").await?;
//! print!("{}", result.to_lines());
//!
//! wav2elan::write_eaf(
//!     "meeting.eaf".as_ref(),
//!     "meeting.mp3".as_ref(),
//!     &result.segments,
//!     &wav2elan::EafConfig::default(),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod backend;
pub mod chunk;
pub mod config;
pub mod diarization;
pub mod elan;
pub mod error;
pub mod gemini;
pub mod jsonl;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod segments;
pub mod types;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use audio::{AudioSlicer, Ffmpeg};
pub use backend::{Backend, WindowBackend, WindowTranscript};
pub use config::{DiarizationOptions, PipelineOptions};
pub use diarization::{reconcile, transcribe_diarized};
pub use elan::{build_timeline, write_eaf, EafConfig, TimelineDocument};
pub use error::{Error, Result};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use jsonl::JsonlEncoder;
pub use pipeline::Pipeline;
pub use progress::{ProgressEvent, ProgressSink, Step};
pub use retry::RetryPolicy;
pub use segments::{merge_adjacent, split_by_max_duration};
pub use types::{
    Emotion, Hints, SegmentDetails, TimeInterval, TranscriptSegment, TranscriptionResult, Turn,
    WordTimestamp,
};
#[cfg(feature = "whisper")]
pub use whisper::WhisperBackend;

use std::path::Path;
use std::sync::Arc;

/// Transcribe a local file with the Gemini backend and default options.
pub async fn transcribe_file(path: impl AsRef<Path>) -> Result<TranscriptionResult> {
    transcribe_file_with_options(path, &Hints::default(), PipelineOptions::default()).await
}

/// Transcribe a local file with the Gemini backend, hints and custom options.
pub async fn transcribe_file_with_options(
    path: impl AsRef<Path>,
    hints: &Hints,
    options: PipelineOptions,
) -> Result<TranscriptionResult> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::AudioNotFound {
            path: path.to_path_buf(),
        });
    }

    let backend = GeminiBackend::from_env()?;
    Pipeline::new(Arc::new(backend), Arc::new(Ffmpeg))
        .with_options(options)
        .transcribe(path, hints, None)
        .await
}
