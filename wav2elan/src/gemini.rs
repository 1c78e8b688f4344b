//! Cloud [`Backend`] talking to the Gemini `generateContent` REST API.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::types::{
    DetectedLanguages, Emotion, Hints, LanguageTag, SegmentDetails, TimeInterval,
    TranscriptSegment, TranscriptionResult,
};

pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com";
/// Files below this size are sent inline; larger ones go through the upload API.
pub const DEFAULT_INLINE_LIMIT_BYTES: u64 = 20 * 1024 * 1024;
/// Summary of the placeholder result returned for unparseable output.
pub const PARSE_FAILURE_SUMMARY: &str = "Failed to parse transcription";

const API_KEY_ENV: &str = "GEMINI_API_KEY";
const DEFAULT_SPEAKER: &str = "Speaker 1";

const PROMPT: &str = "\
Process the audio file and generate a detailed transcription.

Requirements:
1. Identify distinct speakers (e.g., Speaker 1, Speaker 2, or names if context allows). Count and report the total number of speakers.
2. Provide accurate start and end timestamps for each segment (Format: MM:SS).
3. Create SHORT segments: one sentence or phrase per segment (typically 2-10 seconds each). Split at natural pauses and sentence endings.
4. For EACH segment, list ALL languages used in the \"languages\" array, primary language first.
5. If the segment contains any non-English content, provide an English translation in the translation field; otherwise set translation to null.
6. Identify the primary emotion of the speaker in EACH segment, exactly one of: happy, sad, angry, neutral. Also list all emotions detected across the audio in \"detected_emotions\".
7. Provide a brief summary of the entire audio including the number of speakers and the overall emotional tone.
8. Preserve all punctuation and special characters exactly as spoken.

Each segment must have both a start and an end time. Prefer many short segments over few long ones.";

/// Connection settings for [`GeminiBackend`].
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// Falls back to `GEMINI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub model: String,
    pub endpoint: String,
    pub inline_limit_bytes: u64,
    pub timeout: Duration,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            inline_limit_bytes: DEFAULT_INLINE_LIMIT_BYTES,
            timeout: Duration::from_secs(600),
        }
    }
}

impl GeminiConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn inline_limit_bytes(mut self, bytes: u64) -> Self {
        self.inline_limit_bytes = bytes;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Speaker-attributed transcription through a hosted multimodal model.
pub struct GeminiBackend {
    config: GeminiConfig,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .filter(|k| !k.trim().is_empty())
            .ok_or(Error::MissingApiKey)?;
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    /// Default settings with the key taken from `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self> {
        Self::new(GeminiConfig::default())
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn base_url(&self) -> &str {
        self.config.endpoint.trim_end_matches('/')
    }

    /// The audio `part` of the request: inline base64 or an uploaded file reference.
    async fn audio_part(&self, audio: &Path) -> Result<Value> {
        let mime = mime_type(audio);
        let size = tokio::fs::metadata(audio).await?.len();

        if size < self.config.inline_limit_bytes {
            let bytes = tokio::fs::read(audio).await?;
            debug!(size, mime, "sending audio inline");
            Ok(json!({
                "inline_data": {
                    "mime_type": mime,
                    "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                }
            }))
        } else {
            let uri = self.upload(audio, mime, size).await?;
            Ok(json!({
                "file_data": {
                    "mime_type": mime,
                    "file_uri": uri,
                }
            }))
        }
    }

    /// Resumable upload through the Files API. Returns the file URI.
    async fn upload(&self, audio: &Path, mime: &str, size: u64) -> Result<String> {
        let display_name = audio
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        info!(size, file = %display_name, "uploading audio");

        let start = self
            .client
            .post(format!("{}/upload/v1beta/files", self.base_url()))
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await?;
        let start = check_response(start).await?;
        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::Backend("upload session returned no upload URL".into()))?;

        let bytes = tokio::fs::read(audio).await?;
        let finished = self
            .client
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await?;
        let body: Value = check_response(finished).await?.json().await?;

        body.pointer("/file/uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::Backend("upload response carried no file URI".into()))
    }

    async fn generate(&self, audio_part: Value, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url(),
            self.config.model
        );
        let body = json!({
            "contents": [{
                "parts": [audio_part, { "text": prompt }]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": response_schema(),
            }
        });

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let body: Value = check_response(response).await?.json().await?;
        Ok(candidate_text(&body))
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    async fn transcribe(&self, audio: &Path, hints: &Hints) -> Result<TranscriptionResult> {
        if !audio.exists() {
            return Err(Error::AudioNotFound {
                path: audio.to_path_buf(),
            });
        }

        let part = self.audio_part(audio).await?;
        let prompt = build_prompt(hints);
        debug!(model = %self.config.model, path = %audio.display(), "calling generateContent");
        let text = self.generate(part, &prompt).await?;
        Ok(parse_response(&text))
    }
}

async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(1000).collect();
    Err(Error::Backend(format!("Gemini API error {status}: {body}")))
}

/// Concatenated text parts of the first candidate; empty if there are none.
fn candidate_text(body: &Value) -> String {
    body.pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .unwrap_or_default()
}

/// Upload MIME type by extension, defaulting to `audio/wav`.
pub fn mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp3" => "audio/mp3",
        "aiff" => "audio/aiff",
        "aac" => "audio/aac",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        _ => "audio/wav",
    }
}

/// Base prompt plus an "Additional hints" list for whichever hints are set.
pub fn build_prompt(hints: &Hints) -> String {
    let mut lines = Vec::new();
    if let Some(language) = hints.language.as_deref().filter(|l| !l.trim().is_empty()) {
        lines.push(format!("- The audio is primarily in {}.", language.trim()));
    }
    if let Some(count) = hints.speaker_count {
        lines.push(format!(
            "- There are approximately {count} speaker(s) in the audio."
        ));
    }

    if lines.is_empty() {
        PROMPT.to_string()
    } else {
        format!("{PROMPT}\n\nAdditional hints:\n{}", lines.join("\n"))
    }
}

/// `MM:SS`, `HH:MM:SS` or plain seconds. Anything else is 0.
pub fn parse_timestamp(s: &str) -> f64 {
    let parts: Vec<&str> = s.trim().split(':').collect();
    let parsed = match parts.as_slice() {
        [m, sec] => m
            .trim()
            .parse::<u64>()
            .ok()
            .zip(sec.trim().parse::<f64>().ok())
            .map(|(m, sec)| m as f64 * 60.0 + sec),
        [h, m, sec] => match (
            h.trim().parse::<u64>(),
            m.trim().parse::<u64>(),
            sec.trim().parse::<f64>(),
        ) {
            (Ok(h), Ok(m), Ok(sec)) => Some(h as f64 * 3600.0 + m as f64 * 60.0 + sec),
            _ => None,
        },
        [raw] => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|t| t.is_finite()).unwrap_or(0.0)
}

fn timestamp_value(value: &Value) -> f64 {
    match value {
        Value::String(s) => parse_timestamp(s),
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawResponse {
    summary: Option<String>,
    segments: Vec<RawSegment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSegment {
    speaker: Option<String>,
    timestamp_start: Value,
    timestamp_end: Value,
    content: Option<String>,
    languages: Vec<RawLanguage>,
    language: Option<String>,
    language_code: Option<String>,
    translation: Option<String>,
    emotion: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawLanguage {
    name: String,
    code: String,
}

fn extract_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Some(value);
    }
    let start = text.find("```json")? + "```json".len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    serde_json::from_str(rest[..end].trim()).ok()
}

fn decode(text: &str) -> Result<RawResponse> {
    let value = extract_json(text)
        .ok_or_else(|| Error::MalformedOutput("response is not JSON".into()))?;
    serde_json::from_value(value).map_err(|e| Error::MalformedOutput(e.to_string()))
}

fn parse_failure(error: &Error) -> TranscriptionResult {
    warn!(error = %error, "returning empty result");
    TranscriptionResult {
        summary: Some(PARSE_FAILURE_SUMMARY.to_string()),
        ..TranscriptionResult::default()
    }
}

/// Turn the model's JSON text into a result, never failing.
///
/// Unparseable output yields an empty result with [`PARSE_FAILURE_SUMMARY`].
/// Segments with `end <= start` are stretched to one second and counted.
pub fn parse_response(text: &str) -> TranscriptionResult {
    let raw = match decode(text) {
        Ok(raw) => raw,
        Err(e) => return parse_failure(&e),
    };

    let mut detected = DetectedLanguages::new();
    let mut coerced_segments = 0;
    let mut segments = Vec::with_capacity(raw.segments.len());

    for (index, seg) in raw.segments.into_iter().enumerate() {
        let start = timestamp_value(&seg.timestamp_start);
        let end = timestamp_value(&seg.timestamp_end);
        let (interval, coerced) = TimeInterval::coerced(start, end);
        if coerced {
            warn!(index, start, end, "degenerate segment timestamps, stretched to 1s");
            coerced_segments += 1;
        }

        let languages: Vec<LanguageTag> = if !seg.languages.is_empty() {
            seg.languages
                .into_iter()
                .map(|l| {
                    let name = if l.name.is_empty() { l.code.clone() } else { l.name };
                    LanguageTag::new(name, l.code)
                })
                .collect()
        } else {
            match seg.language_code.filter(|c| !c.is_empty()) {
                Some(code) => {
                    let name = seg.language.unwrap_or_else(|| code.clone());
                    vec![LanguageTag::new(name, code)]
                }
                None => Vec::new(),
            }
        };
        for tag in &languages {
            detected.insert(tag.clone());
        }

        let details = SegmentDetails {
            languages,
            emotion: seg
                .emotion
                .as_deref()
                .map(Emotion::from_label)
                .unwrap_or_default(),
            translation: seg
                .translation
                .filter(|t| !t.trim().is_empty() && t.trim() != "null"),
        };

        let speaker = seg
            .speaker
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SPEAKER.to_string());
        segments.push(
            TranscriptSegment::new(interval, speaker, seg.content.unwrap_or_default())
                .with_details(details),
        );
    }

    TranscriptionResult {
        summary: raw.summary.filter(|s| !s.is_empty()),
        segments,
        detected_languages: detected,
        dropped_chunks: 0,
        coerced_segments,
    }
}

fn response_schema() -> Value {
    let emotions = json!(["happy", "sad", "angry", "neutral"]);
    json!({
        "type": "OBJECT",
        "properties": {
            "summary": {
                "type": "STRING",
                "description": "A concise summary of the audio including number of speakers and overall tone."
            },
            "detected_emotions": {
                "type": "ARRAY",
                "items": { "type": "STRING", "enum": emotions }
            },
            "speaker_count": { "type": "INTEGER" },
            "segments": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "speaker": { "type": "STRING" },
                        "timestamp_start": { "type": "STRING", "description": "MM:SS" },
                        "timestamp_end": { "type": "STRING", "description": "MM:SS" },
                        "content": { "type": "STRING" },
                        "languages": {
                            "type": "ARRAY",
                            "items": {
                                "type": "OBJECT",
                                "properties": {
                                    "name": { "type": "STRING" },
                                    "code": { "type": "STRING" }
                                },
                                "required": ["name", "code"]
                            }
                        },
                        "translation": { "type": "STRING", "nullable": true },
                        "emotion": { "type": "STRING", "enum": emotions }
                    },
                    "required": [
                        "speaker", "timestamp_start", "timestamp_end",
                        "content", "languages", "emotion"
                    ]
                }
            }
        },
        "required": ["summary", "detected_emotions", "speaker_count", "segments"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(parse_timestamp("01:30"), 90.0);
        assert_eq!(parse_timestamp("1:02:03"), 3723.0);
        assert_eq!(parse_timestamp("00:05.5"), 5.5);
        assert_eq!(parse_timestamp("42.25"), 42.25);
        assert_eq!(parse_timestamp(""), 0.0);
        assert_eq!(parse_timestamp("soon"), 0.0);
        assert_eq!(parse_timestamp("1:2:3:4"), 0.0);
    }

    #[test]
    fn test_mime_type() {
        assert_eq!(mime_type(Path::new("a.MP3")), "audio/mp3");
        assert_eq!(mime_type(Path::new("a.m4a")), "audio/mp4");
        assert_eq!(mime_type(Path::new("a.flac")), "audio/flac");
        assert_eq!(mime_type(Path::new("a.webm")), "audio/wav");
        assert_eq!(mime_type(Path::new("noext")), "audio/wav");
    }

    #[test]
    fn test_prompt_without_hints() {
        let prompt = build_prompt(&Hints::new());
        assert!(!prompt.contains("Additional hints"));
    }

    #[test]
    fn test_prompt_with_hints() {
        let prompt = build_prompt(&Hints::new().language("es").speaker_count(3));
        assert!(prompt.ends_with(
            "Additional hints:\n- The audio is primarily in es.\n- There are approximately 3 speaker(s) in the audio."
        ));
    }

    #[test]
    fn test_parse_full_response() {
        let text = r#"{
            "summary": "Two speakers chat.",
            "detected_emotions": ["happy"],
            "speaker_count": 2,
            "segments": [
                {"speaker": "Speaker 1", "timestamp_start": "00:03", "timestamp_end": "00:07",
                 "content": "Hola, how are you?",
                 "languages": [{"name": "Spanish", "code": "es"}, {"name": "English", "code": "en"}],
                 "translation": "Hello, how are you?", "emotion": "happy"},
                {"speaker": "Speaker 2", "timestamp_start": "00:08", "timestamp_end": "00:09",
                 "content": "Fine.", "languages": [{"name": "English", "code": "en"}],
                 "translation": null, "emotion": "neutral"}
            ]
        }"#;

        let result = parse_response(text);
        assert_eq!(result.summary.as_deref(), Some("Two speakers chat."));
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[0].start, 3.0);
        assert_eq!(result.segments[0].end, 7.0);

        let details = result.segments[0].details.as_ref().unwrap();
        assert_eq!(details.primary_language().unwrap().code, "es");
        assert_eq!(details.emotion, Emotion::Happy);
        assert_eq!(details.translation.as_deref(), Some("Hello, how are you?"));
        assert_eq!(result.segments[1].details.as_ref().unwrap().translation, None);

        let codes: Vec<_> = result.detected_languages.iter().map(|t| t.code.as_str()).collect();
        assert_eq!(codes, ["es", "en"]);
        assert_eq!(result.coerced_segments, 0);
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "Here you go:\n```json\n{\"summary\": \"ok\", \"segments\": []}\n```\n";
        let result = parse_response(text);
        assert_eq!(result.summary.as_deref(), Some("ok"));
        assert!(result.segments.is_empty());
    }

    #[test]
    fn test_parse_garbage_falls_back() {
        let result = parse_response("I could not process this audio.");
        assert_eq!(result.summary.as_deref(), Some(PARSE_FAILURE_SUMMARY));
        assert!(result.segments.is_empty());

        let result = parse_response(r#"{"segments": "nope"}"#);
        assert_eq!(result.summary.as_deref(), Some(PARSE_FAILURE_SUMMARY));
    }

    #[test]
    fn test_decode_reports_malformed_output() {
        assert!(matches!(
            decode("not json at all"),
            Err(Error::MalformedOutput(msg)) if msg.contains("not JSON")
        ));
        assert!(matches!(
            decode(r#"{"segments": 7}"#),
            Err(Error::MalformedOutput(_))
        ));
        assert!(decode(r#"{"segments": []}"#).is_ok());
    }

    #[test]
    fn test_parse_coerces_degenerate_timestamps() {
        let text = r#"{"segments": [
            {"timestamp_start": "00:10", "timestamp_end": "00:10", "content": "a"},
            {"timestamp_start": "00:12", "timestamp_end": "00:11", "content": "b"},
            {"timestamp_start": "00:13", "timestamp_end": "00:14", "content": "c"}
        ]}"#;
        let result = parse_response(text);
        assert_eq!(result.coerced_segments, 2);
        assert_eq!(result.segments[0].end, 11.0);
        assert_eq!(result.segments[1].end, 13.0);
        assert_eq!(result.segments[2].end, 14.0);
    }

    #[test]
    fn test_parse_defaults_and_legacy_language() {
        let text = r#"{"segments": [
            {"timestamp_start": 1.5, "timestamp_end": 2.5, "content": "Bonjour",
             "language": "French", "language_code": "fr"}
        ]}"#;
        let result = parse_response(text);
        let seg = &result.segments[0];
        assert_eq!(seg.speaker, "Speaker 1");
        assert_eq!(seg.start, 1.5);
        let details = seg.details.as_ref().unwrap();
        assert_eq!(details.emotion, Emotion::Neutral);
        assert_eq!(details.languages, vec![LanguageTag::new("French", "fr")]);
        assert!(result.detected_languages.contains("fr"));
        assert_eq!(result.summary, None);
    }

    #[test]
    fn test_candidate_text_joins_parts() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"a\":" }, { "text": "1}" }] } }]
        });
        assert_eq!(candidate_text(&body), "{\"a\":1}");
        assert_eq!(candidate_text(&json!({ "promptFeedback": {} })), "");
    }

    #[test]
    fn test_missing_api_key() {
        let config = GeminiConfig::new().api_key("   ");
        // a blank explicit key wins over the environment and is rejected
        assert!(matches!(GeminiBackend::new(config), Err(Error::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_transcribe_missing_file() {
        let backend = GeminiBackend::new(GeminiConfig::new().api_key("test-key")).unwrap();
        let result = backend
            .transcribe(Path::new("/nonexistent/audio.wav"), &Hints::new())
            .await;
        assert!(matches!(result, Err(Error::AudioNotFound { .. })));
    }
}
