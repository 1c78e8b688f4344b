use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

/// Width of each chunk window for long recordings (5 minutes).
pub const DEFAULT_CHUNK_DURATION_SECS: f64 = 300.0;
/// Recordings at or below this length are sent whole (6 minutes).
pub const DEFAULT_MIN_DURATION_FOR_CHUNKING_SECS: f64 = 360.0;
/// Maximum number of backend calls in flight at once.
pub const DEFAULT_MAX_PARALLEL_CHUNKS: usize = 4;

fn positive(name: &str, value: f64) -> Result<f64> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(Error::InvalidArgument(format!(
            "{name} must be a positive number of seconds (got {value})"
        )))
    }
}

/// Options for the chunked transcription pipeline.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub chunk_duration: f64,
    pub min_duration_for_chunking: f64,
    pub max_parallel_chunks: usize,
    pub retry: RetryPolicy,
    /// Where per-run chunk directories are created (default: system temp dir).
    pub scratch_dir: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            chunk_duration: DEFAULT_CHUNK_DURATION_SECS,
            min_duration_for_chunking: DEFAULT_MIN_DURATION_FOR_CHUNKING_SECS,
            max_parallel_chunks: DEFAULT_MAX_PARALLEL_CHUNKS,
            retry: RetryPolicy::default(),
            scratch_dir: None,
        }
    }
}

impl PipelineOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_duration(mut self, secs: f64) -> Result<Self> {
        self.chunk_duration = positive("chunk duration", secs)?;
        Ok(self)
    }

    pub fn min_duration_for_chunking(mut self, secs: f64) -> Result<Self> {
        if !(secs >= 0.0) {
            return Err(Error::InvalidArgument(format!(
                "minimum duration for chunking must be >= 0 (got {secs})"
            )));
        }
        self.min_duration_for_chunking = secs;
        Ok(self)
    }

    pub fn max_parallel_chunks(mut self, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(Error::InvalidArgument(
                "max parallel chunks must be at least 1".into(),
            ));
        }
        self.max_parallel_chunks = n;
        Ok(self)
    }

    pub fn max_attempts(mut self, n: u32) -> Result<Self> {
        self.retry = RetryPolicy::new(n)?.base_delay(self.retry.base_delay);
        Ok(self)
    }

    pub fn backoff_base(mut self, delay: Duration) -> Self {
        self.retry.base_delay = delay;
        self
    }

    pub fn scratch_dir(mut self, dir: PathBuf) -> Self {
        self.scratch_dir = Some(dir);
        self
    }

    /// Resolve the scratch directory, defaulting to the system temp dir.
    pub fn resolve_scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Options for reconciling raw diarization turns into backend windows.
#[derive(Debug, Clone)]
pub struct DiarizationOptions {
    /// Raw turns shorter than this are treated as diarizer noise.
    pub min_seg_seconds: f64,
    /// Same-speaker turns separated by at most this gap are merged.
    pub merge_gap_seconds: f64,
    /// Upper bound on a single backend window.
    pub max_seg_seconds: f64,
    pub sample_rate: u32,
}

impl Default for DiarizationOptions {
    fn default() -> Self {
        Self {
            min_seg_seconds: 0.2,
            merge_gap_seconds: 0.2,
            max_seg_seconds: 30.0,
            sample_rate: 16_000,
        }
    }
}

impl DiarizationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn min_seg_seconds(mut self, secs: f64) -> Result<Self> {
        if !(secs >= 0.0) {
            return Err(Error::InvalidArgument(format!(
                "minimum segment length must be >= 0 (got {secs})"
            )));
        }
        self.min_seg_seconds = secs;
        Ok(self)
    }

    pub fn merge_gap_seconds(mut self, secs: f64) -> Result<Self> {
        if !(secs >= 0.0) {
            return Err(Error::InvalidArgument(format!(
                "merge gap must be >= 0 (got {secs})"
            )));
        }
        self.merge_gap_seconds = secs;
        Ok(self)
    }

    /// Positivity is checked here; the backend ceiling is checked when the
    /// options are used against a concrete backend.
    pub fn max_seg_seconds(mut self, secs: f64) -> Result<Self> {
        self.max_seg_seconds = positive("maximum segment length", secs)?;
        Ok(self)
    }

    pub fn sample_rate(mut self, hz: u32) -> Result<Self> {
        if hz == 0 {
            return Err(Error::InvalidArgument("sample rate must be positive".into()));
        }
        self.sample_rate = hz;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let opts = PipelineOptions::default();
        assert_eq!(opts.chunk_duration, 300.0);
        assert_eq!(opts.min_duration_for_chunking, 360.0);
        assert_eq!(opts.max_parallel_chunks, 4);
        assert_eq!(opts.retry.max_attempts, 3);
    }

    #[test]
    fn test_pipeline_builder_validates() {
        assert!(PipelineOptions::new().chunk_duration(0.0).is_err());
        assert!(PipelineOptions::new().chunk_duration(f64::INFINITY).is_err());
        assert!(PipelineOptions::new().max_parallel_chunks(0).is_err());
        assert!(PipelineOptions::new().max_attempts(0).is_err());
        assert!(PipelineOptions::new().min_duration_for_chunking(-1.0).is_err());

        let opts = PipelineOptions::new()
            .chunk_duration(120.0)
            .and_then(|o| o.max_parallel_chunks(2))
            .and_then(|o| o.max_attempts(5))
            .unwrap()
            .backoff_base(Duration::from_millis(10));
        assert_eq!(opts.chunk_duration, 120.0);
        assert_eq!(opts.max_parallel_chunks, 2);
        assert_eq!(opts.retry.max_attempts, 5);
        assert_eq!(opts.retry.base_delay, Duration::from_millis(10));
    }

    #[test]
    fn test_max_attempts_keeps_backoff_base() {
        let opts = PipelineOptions::new()
            .backoff_base(Duration::from_millis(250))
            .max_attempts(4)
            .unwrap();
        assert_eq!(opts.retry.base_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_scratch_dir_default() {
        assert_eq!(
            PipelineOptions::default().resolve_scratch_dir(),
            std::env::temp_dir()
        );
        let custom = PipelineOptions::new().scratch_dir(PathBuf::from("/var/tmp/w2e"));
        assert_eq!(custom.resolve_scratch_dir(), PathBuf::from("/var/tmp/w2e"));
    }

    #[test]
    fn test_diarization_defaults() {
        let opts = DiarizationOptions::default();
        assert_eq!(opts.min_seg_seconds, 0.2);
        assert_eq!(opts.merge_gap_seconds, 0.2);
        assert_eq!(opts.max_seg_seconds, 30.0);
        assert_eq!(opts.sample_rate, 16_000);
    }

    #[test]
    fn test_diarization_builder_validates() {
        assert!(DiarizationOptions::new().max_seg_seconds(0.0).is_err());
        assert!(DiarizationOptions::new().min_seg_seconds(-0.1).is_err());
        assert!(DiarizationOptions::new().merge_gap_seconds(f64::NAN).is_err());
        assert!(DiarizationOptions::new().sample_rate(0).is_err());
        assert!(DiarizationOptions::new().max_seg_seconds(12.5).is_ok());
    }
}
