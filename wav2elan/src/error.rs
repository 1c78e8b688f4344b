use std::path::PathBuf;

/// All errors that can occur in wav2elan.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("transcription failed after {attempts} attempts: {source}")]
    ExhaustedRetries {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// `last` is a retryable chunk error when there was one, otherwise the
    /// last fatal one.
    #[error("all {failed} chunks failed to transcribe: {last}")]
    AllChunksFailed {
        failed: usize,
        #[source]
        last: Box<Error>,
    },

    #[error("malformed backend output: {0}")]
    MalformedOutput(String),

    #[error("audio decoding error: {0}")]
    AudioDecode(String),

    #[error("audio file not found: {path}")]
    AudioNotFound { path: PathBuf },

    #[error("GEMINI_API_KEY not set; get a key from https://aistudio.google.com/apikey")]
    MissingApiKey,

    #[cfg(feature = "whisper")]
    #[error("whisper error: {0}")]
    Whisper(#[from] whisper_rs::WhisperError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Caller mistakes and missing inputs are fatal; everything coming out of
    /// a backend call (network, HTTP status, decoding of its output) is not.
    pub fn is_retryable(&self) -> bool {
        if let Error::AllChunksFailed { last, .. } = self {
            return last.is_retryable();
        }
        !matches!(
            self,
            Error::InvalidArgument(_)
                | Error::MissingApiKey
                | Error::AudioNotFound { .. }
                | Error::ExhaustedRetries { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
