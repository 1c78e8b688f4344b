//! Local [`WindowBackend`] built on whisper.cpp.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::backend::{WindowBackend, WindowTranscript};
use crate::error::{Error, Result};
use crate::types::{Hints, WordTimestamp};

/// whisper.cpp only accepts 16 kHz mono input.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;
/// Whisper decodes 30 s context windows; a little slack keeps short overruns intact.
pub const WHISPER_MAX_WINDOW_SECS: f64 = 40.0;

#[derive(Debug, Clone, Default)]
struct DecodeSettings {
    n_threads: Option<u32>,
    beam_size: Option<u32>,
}

/// Shares one loaded model across calls; each window gets its own state.
#[derive(Clone)]
pub struct WhisperBackend {
    ctx: Arc<WhisperContext>,
    settings: DecodeSettings,
}

impl WhisperBackend {
    /// Load a ggml model from `model_path`.
    pub fn new(model_path: &Path, gpu: bool) -> Result<Self> {
        info!(model = %model_path.display(), gpu, "loading whisper model");

        let mut ctx_params = WhisperContextParameters::new();
        ctx_params.use_gpu(gpu);

        let path = model_path
            .to_str()
            .ok_or_else(|| Error::InvalidArgument("model path contains invalid UTF-8".into()))?;
        let ctx = WhisperContext::new_with_params(path, ctx_params)?;
        Ok(Self {
            ctx: Arc::new(ctx),
            settings: DecodeSettings::default(),
        })
    }

    pub fn n_threads(mut self, n: u32) -> Self {
        self.settings.n_threads = Some(n);
        self
    }

    /// Beam search instead of greedy decoding.
    pub fn beam_size(mut self, size: u32) -> Self {
        self.settings.beam_size = Some(size);
        self
    }
}

fn build_params<'a>(
    settings: &DecodeSettings,
    language: Option<&'a str>,
    word_timestamps: bool,
) -> FullParams<'a, 'a> {
    let mut params = match settings.beam_size {
        Some(beam_size) => FullParams::new(SamplingStrategy::BeamSearch {
            beam_size: beam_size as i32,
            patience: -1.0,
        }),
        None => FullParams::new(SamplingStrategy::Greedy { best_of: 5 }),
    };

    match language {
        Some(code) => params.set_language(Some(code)),
        None => params.set_detect_language(true),
    }
    params.set_token_timestamps(word_timestamps);
    if let Some(n) = settings.n_threads {
        params.set_n_threads(n as i32);
    }

    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);
    params
}

fn transcribe_window(
    ctx: &WhisperContext,
    settings: &DecodeSettings,
    samples: &[f32],
    language: Option<&str>,
    word_timestamps: bool,
) -> Result<WindowTranscript> {
    let mut state = ctx.create_state()?;
    state.full(build_params(settings, language, word_timestamps), samples)?;

    let mut texts = Vec::new();
    let mut words = Vec::new();
    for i in 0..state.full_n_segments() {
        let segment = state
            .get_segment(i)
            .ok_or_else(|| Error::Backend(format!("segment {i} not found")))?;
        let text = segment
            .to_str_lossy()
            .map_err(|e| Error::Backend(format!("segment text error: {e}")))?;
        texts.push(text.trim().to_string());

        if !word_timestamps {
            continue;
        }
        for t in 0..segment.n_tokens() {
            let Some(token) = segment.get_token(t) else {
                continue;
            };
            let Ok(token_text) = token.to_str_lossy() else {
                continue;
            };
            // special tokens
            let trimmed = token_text.trim();
            if trimmed.is_empty() || trimmed.starts_with('[') || trimmed.starts_with('<') {
                continue;
            }
            let data = token.token_data();
            words.push(WordTimestamp {
                word: trimmed.to_string(),
                start: data.t0 as f64 / 100.0,
                end: data.t1 as f64 / 100.0,
            });
        }
    }

    let transcript = WindowTranscript::new(texts.join(" ").trim());
    Ok(if word_timestamps {
        transcript.with_words(words)
    } else {
        transcript
    })
}

#[async_trait]
impl WindowBackend for WhisperBackend {
    fn max_window_seconds(&self) -> f64 {
        WHISPER_MAX_WINDOW_SECS
    }

    async fn transcribe_windows(
        &self,
        windows: Vec<Vec<f32>>,
        sample_rate: u32,
        hints: &Hints,
        word_timestamps: bool,
    ) -> Result<Vec<WindowTranscript>> {
        if sample_rate != WHISPER_SAMPLE_RATE {
            return Err(Error::InvalidArgument(format!(
                "whisper needs {WHISPER_SAMPLE_RATE} Hz audio (got {sample_rate} Hz)"
            )));
        }

        let ctx = Arc::clone(&self.ctx);
        let settings = self.settings.clone();
        let language = hints.language.clone();
        info!(windows = windows.len(), "running whisper");

        tokio::task::spawn_blocking(move || {
            windows
                .iter()
                .enumerate()
                .map(|(i, samples)| {
                    debug!(window = i, samples = samples.len(), "decoding window");
                    transcribe_window(&ctx, &settings, samples, language.as_deref(), word_timestamps)
                })
                .collect::<Result<Vec<_>>>()
        })
        .await
        .map_err(|e| Error::Backend(format!("whisper worker panicked: {e}")))?
    }
}
