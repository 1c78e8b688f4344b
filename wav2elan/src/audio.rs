use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Maximum audio duration in seconds (8 hours).
/// Prevents unbounded memory allocation when decoding to samples.
const MAX_AUDIO_DURATION_SECS: f64 = 8.0 * 3600.0;

/// Duration probing and slicing of audio files.
///
/// Both operations are best-effort from the pipeline's point of view: an
/// unknown duration disables chunking and a failed slice drops that window.
#[async_trait]
pub trait AudioSlicer: Send + Sync {
    /// Duration in seconds, or `None` when it cannot be determined.
    async fn duration(&self, path: &Path) -> Option<f64>;

    /// Write `length` seconds of `path` starting at `offset` to `dest`.
    async fn slice(&self, path: &Path, offset: f64, length: f64, dest: &Path) -> Result<()>;
}

/// [`AudioSlicer`] backed by the `ffprobe` and `ffmpeg` binaries on `PATH`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ffmpeg;

#[async_trait]
impl AudioSlicer for Ffmpeg {
    async fn duration(&self, path: &Path) -> Option<f64> {
        let output = Command::new("ffprobe")
            .args(["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0"])
            .arg(path)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                let duration = parse_duration(&String::from_utf8_lossy(&out.stdout));
                debug!(path = %path.display(), ?duration, "probed duration");
                duration
            }
            Ok(out) => {
                debug!(path = %path.display(), status = %out.status, "ffprobe failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "could not run ffprobe; chunking disabled");
                None
            }
        }
    }

    async fn slice(&self, path: &Path, offset: f64, length: f64, dest: &Path) -> Result<()> {
        // Stream copy is fast but fails on some containers; re-encode as a fallback.
        let copied = run_ffmpeg_slice(path, offset, length, dest, true).await;
        match copied {
            Ok(()) => Ok(()),
            Err(e) => {
                debug!(error = %e, offset, "stream copy failed, re-encoding chunk");
                run_ffmpeg_slice(path, offset, length, dest, false).await
            }
        }
    }
}

async fn run_ffmpeg_slice(
    path: &Path,
    offset: f64,
    length: f64,
    dest: &Path,
    stream_copy: bool,
) -> Result<()> {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-nostdin", "-y", "-i"])
        .arg(path)
        .args(["-ss", &offset.to_string(), "-t", &length.to_string()]);
    if stream_copy {
        cmd.args(["-c", "copy"]);
    }
    cmd.arg(dest);

    let output = cmd.output().await.map_err(ffmpeg_spawn_error)?;
    check_status(&output)
}

fn ffmpeg_spawn_error(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::AudioDecode("ffmpeg not found; install it with: apt install ffmpeg".into())
    } else {
        Error::AudioDecode(format!("failed to run ffmpeg: {e}"))
    }
}

fn check_status(output: &Output) -> Result<()> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    // Limit error message length to avoid dumping huge stderr
    let stderr_truncated: String = stderr.chars().take(1000).collect();
    Err(Error::AudioDecode(format!("ffmpeg failed: {stderr_truncated}")))
}

/// Parse ffprobe's `format=duration` output. Non-positive values count as unknown.
fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Decode any audio file to mono f32 samples at `sample_rate` via ffmpeg.
///
/// Used by the diarized path, which addresses audio by sample index.
pub async fn load_samples(path: &Path, sample_rate: u32) -> Result<Vec<f32>> {
    info!(path = %path.display(), sample_rate, "loading audio");

    if !path.exists() {
        return Err(Error::AudioNotFound {
            path: path.to_path_buf(),
        });
    }

    let output = Command::new("ffmpeg")
        .args(["-nostdin", "-threads", "0", "-i"])
        .arg(path)
        .args([
            "-f",
            "s16le",
            "-ac",
            "1",
            "-acodec",
            "pcm_s16le",
            "-ar",
            &sample_rate.to_string(),
            "-",
        ])
        .output()
        .await
        .map_err(ffmpeg_spawn_error)?;

    check_status(&output)?;

    if output.stdout.is_empty() {
        return Err(Error::AudioDecode("ffmpeg produced no output".into()));
    }

    let samples = pcm_s16le_to_f32(&output.stdout);
    let duration = samples.len() as f64 / sample_rate as f64;
    if duration > MAX_AUDIO_DURATION_SECS {
        return Err(Error::AudioDecode(format!(
            "audio too long ({duration:.0}s); maximum supported duration is {MAX_AUDIO_DURATION_SECS:.0}s"
        )));
    }

    info!(duration_secs = format!("{duration:.1}"), "audio ready");
    Ok(samples)
}

/// Convert s16le bytes to f32 samples, normalized to [-1.0, 1.0].
fn pcm_s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| {
            let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
            sample as f32 / 32768.0
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500.123000\n"), Some(500.123));
        assert_eq!(parse_duration("  12 "), Some(12.0));
        assert_eq!(parse_duration("N/A"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("0.000000"), None);
        assert_eq!(parse_duration("-3"), None);
    }

    #[test]
    fn test_pcm_conversion() {
        let bytes = [0x00, 0x00, 0xff, 0x7f, 0x00, 0x80, 0x01];
        let samples = pcm_s16le_to_f32(&bytes);
        // trailing odd byte is ignored
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - 32767.0 / 32768.0).abs() < 1e-6);
        assert_eq!(samples[2], -1.0);
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let path = PathBuf::from("/nonexistent/does_not_exist.wav");
        let result = load_samples(&path, 16_000).await;
        assert!(matches!(result, Err(Error::AudioNotFound { .. })));
    }

    #[tokio::test]
    async fn test_duration_of_missing_file_is_unknown() {
        let path = PathBuf::from("/nonexistent/does_not_exist.wav");
        assert_eq!(Ffmpeg.duration(&path).await, None);
    }

    #[cfg(unix)]
    #[test]
    fn test_check_status_truncates_stderr() {
        use std::os::unix::process::ExitStatusExt;
        let output = Output {
            status: std::process::ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: vec![b'x'; 5000],
        };
        let err = check_status(&output).unwrap_err().to_string();
        assert!(err.len() < 1100);
    }
}
