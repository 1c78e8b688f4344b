use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use wav2elan::gemini::DEFAULT_MODEL;
use wav2elan::{
    EafConfig, Ffmpeg, GeminiBackend, GeminiConfig, Hints, JsonlEncoder, Pipeline,
    PipelineOptions, ProgressEvent, TranscriptionResult,
};

#[derive(Parser)]
#[command(
    name = "wav2elan",
    about = "Speaker-attributed transcription of long recordings, exported as JSONL or ELAN"
)]
struct Cli {
    /// Audio file to transcribe.
    input: PathBuf,

    /// Output format for stdout.
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Language hint (e.g. "en", "de").
    #[arg(short, long)]
    language: Option<String>,

    /// Approximate number of speakers.
    #[arg(long)]
    speakers: Option<u32>,

    /// Gemini model name.
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Chunk width in seconds for long recordings.
    #[arg(long, default_value = "300")]
    chunk_seconds: f64,

    /// Recordings up to this length are sent whole.
    #[arg(long, default_value = "360")]
    min_chunking_seconds: f64,

    /// Maximum concurrent backend calls.
    #[arg(long, default_value = "4")]
    parallel: usize,

    /// Attempts before giving up.
    #[arg(long, default_value = "3")]
    max_attempts: u32,

    /// Also write line-delimited JSON to this file.
    #[arg(long)]
    output_jsonl: Option<PathBuf>,

    /// Also write an ELAN timeline to this file.
    #[arg(long)]
    output_eaf: Option<PathBuf>,

    /// AUTHOR attribute of the ELAN document.
    #[arg(long)]
    eaf_author: Option<String>,

    /// Include word timestamps in JSONL output.
    #[arg(long)]
    word_timestamps: bool,

    /// Diarization turns (JSON array of {start, end, speaker}); switches to local whisper mode.
    #[cfg(feature = "whisper")]
    #[arg(long, requires = "whisper_model")]
    turns: Option<PathBuf>,

    /// Path to a ggml whisper model.
    #[cfg(feature = "whisper")]
    #[arg(long)]
    whisper_model: Option<PathBuf>,

    /// Disable GPU acceleration for whisper.
    #[cfg(feature = "whisper")]
    #[arg(long)]
    no_gpu: bool,

    /// Turns shorter than this are treated as noise.
    #[cfg(feature = "whisper")]
    #[arg(long, default_value = "0.2")]
    min_seg_seconds: f64,

    /// Longest window sent to whisper.
    #[cfg(feature = "whisper")]
    #[arg(long, default_value = "30")]
    max_seg_seconds: f64,

    /// Same-speaker turns closer than this are merged.
    #[cfg(feature = "whisper")]
    #[arg(long, default_value = "0.2")]
    merge_gap_seconds: f64,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Text,
    Jsonl,
}

fn exit_with(e: impl Display) -> ! {
    eprintln!("Error: {e}");
    std::process::exit(1);
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .expect("valid template"),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wav2elan=info".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    if !cli.input.exists() {
        exit_with(format!("audio file not found: {}", cli.input.display()));
    }

    let mut hints = Hints::new();
    if let Some(language) = &cli.language {
        hints = hints.language(language);
    }
    if let Some(n) = cli.speakers {
        hints = hints.speaker_count(n);
    }

    let options = PipelineOptions::new()
        .chunk_duration(cli.chunk_seconds)
        .and_then(|o| o.min_duration_for_chunking(cli.min_chunking_seconds))
        .and_then(|o| o.max_parallel_chunks(cli.parallel))
        .and_then(|o| o.max_attempts(cli.max_attempts))
        .unwrap_or_else(|e| exit_with(e));

    #[cfg(feature = "whisper")]
    let result = match &cli.turns {
        Some(turns) => diarized::run(&cli, turns, &hints, &options).await,
        None => run_pipeline(&cli, &hints, options).await,
    };
    #[cfg(not(feature = "whisper"))]
    let result = run_pipeline(&cli, &hints, options).await;

    let result = result.unwrap_or_else(|e| exit_with(e));

    eprintln!(
        "Transcription complete: {} segments, {} languages",
        result.segments.len(),
        result.detected_languages.len(),
    );
    if result.dropped_chunks > 0 {
        eprintln!(
            "Warning: {} chunk(s) could not be transcribed and are missing from the output",
            result.dropped_chunks
        );
    }
    if let Some(summary) = &result.summary {
        eprintln!("Summary: {summary}");
    }

    write_outputs(&cli, &result).unwrap_or_else(|e| exit_with(e));
}

async fn run_pipeline(
    cli: &Cli,
    hints: &Hints,
    options: PipelineOptions,
) -> wav2elan::Result<TranscriptionResult> {
    let backend = GeminiBackend::new(GeminiConfig::new().model(&cli.model))?;
    let pipeline = Pipeline::new(Arc::new(backend), Arc::new(Ffmpeg)).with_options(options);

    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let pb = spinner();
    let progress = {
        let pb = pb.clone();
        tokio::spawn(async move {
            let mut done = 0;
            while let Some(event) = rx.recv().await {
                match event {
                    ProgressEvent::Step { step } => pb.set_message(step.to_string()),
                    ProgressEvent::ChunkDone { total, .. } => {
                        done += 1;
                        pb.set_message(format!("transcribing: chunk {done}/{total}"));
                    }
                    ProgressEvent::ChunkFailed { index, total, error } => {
                        pb.println(format!("chunk {}/{total} failed: {error}", index + 1));
                    }
                }
            }
        })
    };

    let result = pipeline.transcribe(&cli.input, hints, Some(&tx)).await;
    drop(tx);
    let _ = progress.await;
    pb.finish_and_clear();
    result
}

#[cfg(feature = "whisper")]
mod diarized {
    use std::path::Path;

    use wav2elan::audio::load_samples;
    use wav2elan::diarization::load_turns_json;
    use wav2elan::retry::with_retry;
    use wav2elan::{
        transcribe_diarized, DiarizationOptions, Error, Hints, PipelineOptions,
        TranscriptionResult, WhisperBackend,
    };

    use super::{spinner, Cli};

    pub async fn run(
        cli: &Cli,
        turns: &Path,
        hints: &Hints,
        options: &PipelineOptions,
    ) -> wav2elan::Result<TranscriptionResult> {
        let model = cli
            .whisper_model
            .as_deref()
            .ok_or_else(|| Error::InvalidArgument("--turns needs --whisper-model".into()))?;

        let diarization = DiarizationOptions::new()
            .min_seg_seconds(cli.min_seg_seconds)?
            .merge_gap_seconds(cli.merge_gap_seconds)?
            .max_seg_seconds(cli.max_seg_seconds)?;

        let raw_turns = load_turns_json(turns)?;
        let samples = load_samples(&cli.input, diarization.sample_rate).await?;
        let backend = WhisperBackend::new(model, !cli.no_gpu)?;

        let pb = spinner();
        pb.set_message(format!("transcribing {} turns", raw_turns.len()));
        let result = with_retry(&options.retry, |_| {
            transcribe_diarized(
                &backend,
                &samples,
                &raw_turns,
                &diarization,
                hints,
                cli.word_timestamps,
            )
        })
        .await;
        pb.finish_and_clear();
        result
    }
}

fn write_outputs(cli: &Cli, result: &TranscriptionResult) -> wav2elan::Result<()> {
    match cli.format {
        OutputFormat::Text => print!("{}", result.to_lines()),
        OutputFormat::Jsonl => JsonlEncoder::new(std::io::stdout().lock())
            .include_words(cli.word_timestamps)
            .write_all(&result.segments)?,
    }

    if let Some(path) = &cli.output_jsonl {
        let file = std::io::BufWriter::new(std::fs::File::create(path)?);
        JsonlEncoder::new(file)
            .include_words(cli.word_timestamps)
            .write_all(&result.segments)?;
        eprintln!("Written to {}", path.display());
    }

    if let Some(path) = &cli.output_eaf {
        let mut config = EafConfig::new();
        if let Some(author) = &cli.eaf_author {
            config = config.author(author);
        }
        wav2elan::write_eaf(path, &cli.input, &result.segments, &config)?;
        eprintln!("Written to {}", path.display());
    }
    Ok(())
}
