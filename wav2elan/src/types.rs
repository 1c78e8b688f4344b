use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Duration given to a segment whose backend timestamps collapse to `end <= start`.
pub const MIN_COERCED_DURATION_SECS: f64 = 1.0;

/// A half-open time range in seconds. `end > start` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: f64,
    pub end: f64,
}

impl TimeInterval {
    /// Validated constructor; rejects negative starts and empty or inverted ranges.
    pub fn new(start: f64, end: f64) -> Result<Self> {
        if !start.is_finite() || !end.is_finite() {
            return Err(Error::InvalidArgument(format!(
                "interval bounds must be finite (got {start}..{end})"
            )));
        }
        if start < 0.0 {
            return Err(Error::InvalidArgument(format!(
                "interval start must be >= 0 (got {start})"
            )));
        }
        if end <= start {
            return Err(Error::InvalidArgument(format!(
                "interval end must be after start (got {start}..{end})"
            )));
        }
        Ok(Self { start, end })
    }

    /// Build an interval from untrusted backend timestamps.
    ///
    /// Negative starts clamp to zero and a collapsed range is stretched to
    /// [`MIN_COERCED_DURATION_SECS`]. The flag reports whether the end was coerced.
    pub fn coerced(start: f64, end: f64) -> (Self, bool) {
        let start = if start.is_finite() { start.max(0.0) } else { 0.0 };
        if end.is_finite() && end > start {
            (Self { start, end }, false)
        } else {
            (
                Self {
                    start,
                    end: start + MIN_COERCED_DURATION_SECS,
                },
                true,
            )
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Translate by `offset` seconds. Never rescales.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

/// A labeled time interval attributed to one speaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

impl Turn {
    pub fn new(start: f64, end: f64, speaker: impl Into<String>) -> Self {
        Self {
            start,
            end,
            speaker: speaker.into(),
        }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn interval(&self) -> TimeInterval {
        TimeInterval {
            start: self.start,
            end: self.end,
        }
    }
}

/// A single word with timing, in the same timebase as its parent segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

impl WordTimestamp {
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            word: self.word.clone(),
            start: self.start + offset,
            end: self.end + offset,
        }
    }
}

/// Per-segment emotion label reported by backends that support it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Happy,
    Sad,
    Angry,
    #[default]
    Neutral,
}

impl Emotion {
    /// Parse a backend label; anything unrecognised is treated as neutral.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "happy" => Emotion::Happy,
            "sad" => Emotion::Sad,
            "angry" => Emotion::Angry,
            _ => Emotion::Neutral,
        }
    }
}

/// A language as reported by a backend, e.g. `("English", "en")`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageTag {
    pub name: String,
    pub code: String,
}

impl LanguageTag {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }
}

/// Optional attributes only some backends produce.
///
/// Plain local backends leave [`TranscriptSegment::details`] as `None`; richer
/// cloud backends fill this record instead of growing ad hoc fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentDetails {
    /// Every language used in the segment, primary first.
    pub languages: Vec<LanguageTag>,
    pub emotion: Emotion,
    pub translation: Option<String>,
}

impl SegmentDetails {
    pub fn primary_language(&self) -> Option<&LanguageTag> {
        self.languages.first()
    }
}

/// A speaker-attributed transcript segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<WordTimestamp>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<SegmentDetails>,
}

impl TranscriptSegment {
    pub fn new(
        interval: TimeInterval,
        speaker: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            start: interval.start,
            end: interval.end,
            speaker: speaker.into(),
            text: text.into(),
            words: None,
            details: None,
        }
    }

    pub fn with_words(mut self, words: Vec<WordTimestamp>) -> Self {
        self.words = Some(words);
        self
    }

    pub fn with_details(mut self, details: SegmentDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Re-express this segment, including nested words, `offset` seconds later.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            start: self.start + offset,
            end: self.end + offset,
            speaker: self.speaker.clone(),
            text: self.text.clone(),
            words: self
                .words
                .as_ref()
                .map(|words| words.iter().map(|w| w.shifted(offset)).collect()),
            details: self.details.clone(),
        }
    }
}

/// Languages detected across a result, unique by code, first-seen name wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectedLanguages(Vec<LanguageTag>);

impl DetectedLanguages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the code is empty or already present. Returns whether it was added.
    pub fn insert(&mut self, tag: LanguageTag) -> bool {
        if tag.code.is_empty() || self.contains(&tag.code) {
            return false;
        }
        self.0.push(tag);
        true
    }

    pub fn contains(&self, code: &str) -> bool {
        self.0.iter().any(|t| t.code == code)
    }

    pub fn extend(&mut self, other: &DetectedLanguages) {
        for tag in &other.0 {
            self.insert(tag.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &LanguageTag> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Advisory request hints; backends may ignore them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hints {
    /// Language code or name, e.g. "en".
    pub language: Option<String>,
    pub speaker_count: Option<u32>,
}

impl Hints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn speaker_count(mut self, count: u32) -> Self {
        self.speaker_count = Some(count);
        self
    }
}

/// Complete transcription result for one backend call or one merged run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub summary: Option<String>,
    pub segments: Vec<TranscriptSegment>,
    #[serde(default)]
    pub detected_languages: DetectedLanguages,
    /// Chunks dropped after failing; non-zero only for partial chunked runs.
    #[serde(default)]
    pub dropped_chunks: usize,
    /// Segments whose degenerate timestamps were stretched to the minimum duration.
    #[serde(default)]
    pub coerced_segments: usize,
}

impl TranscriptionResult {
    pub fn new(segments: Vec<TranscriptSegment>) -> Self {
        Self {
            segments,
            ..Self::default()
        }
    }

    /// Copy of this result with every timestamp moved `offset` seconds later.
    pub fn shifted(&self, offset: f64) -> Self {
        Self {
            summary: self.summary.clone(),
            segments: self.segments.iter().map(|s| s.shifted(offset)).collect(),
            detected_languages: self.detected_languages.clone(),
            dropped_chunks: self.dropped_chunks,
            coerced_segments: self.coerced_segments,
        }
    }

    /// Start of the earliest segment, if any.
    pub fn earliest_start(&self) -> Option<f64> {
        self.segments
            .iter()
            .map(|s| s.start)
            .min_by(|a, b| a.total_cmp(b))
    }

    /// Full text (all segments concatenated).
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// One `[start-end] speaker: text` line per segment.
    pub fn to_lines(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            out.push_str(&format!(
                "[{:.2}-{:.2}] {}: {}\n",
                seg.start,
                seg.end,
                seg.speaker,
                seg.text.trim()
            ));
        }
        out
    }

    /// Format as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Format as pretty-printed JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(start: f64, end: f64, speaker: &str, text: &str) -> TranscriptSegment {
        TranscriptSegment::new(TimeInterval { start, end }, speaker, text)
    }

    #[test]
    fn test_interval_rejects_empty_and_inverted() {
        assert!(TimeInterval::new(1.0, 1.0).is_err());
        assert!(TimeInterval::new(2.0, 1.0).is_err());
        assert!(TimeInterval::new(-0.5, 1.0).is_err());
        assert!(TimeInterval::new(f64::NAN, 1.0).is_err());
        assert!(TimeInterval::new(0.0, 0.5).is_ok());
    }

    #[test]
    fn test_interval_coercion() {
        let (iv, coerced) = TimeInterval::coerced(5.0, 5.0);
        assert!(coerced);
        assert_eq!(iv, TimeInterval { start: 5.0, end: 6.0 });

        let (iv, coerced) = TimeInterval::coerced(5.0, 3.0);
        assert!(coerced);
        assert_eq!(iv.end, 6.0);

        let (iv, coerced) = TimeInterval::coerced(1.0, 2.5);
        assert!(!coerced);
        assert_eq!(iv, TimeInterval { start: 1.0, end: 2.5 });
    }

    #[test]
    fn test_segment_shift_moves_words_and_keeps_original() {
        let seg = segment(3.0, 7.0, "Speaker 1", "hello there").with_words(vec![
            WordTimestamp {
                word: "hello".into(),
                start: 3.0,
                end: 3.5,
            },
            WordTimestamp {
                word: "there".into(),
                start: 3.6,
                end: 4.0,
            },
        ]);

        let moved = seg.shifted(300.0);
        assert_eq!(moved.start, 303.0);
        assert_eq!(moved.end, 307.0);
        assert_eq!(moved.text, "hello there");
        let words = moved.words.as_ref().unwrap();
        assert_eq!(words[0].start, 303.0);
        assert_eq!(words[1].end, 304.0);

        // original untouched
        assert_eq!(seg.start, 3.0);
        assert_eq!(seg.words.as_ref().unwrap()[0].start, 3.0);
    }

    #[test]
    fn test_detected_languages_first_seen_wins() {
        let mut langs = DetectedLanguages::new();
        assert!(langs.insert(LanguageTag::new("English", "en")));
        assert!(!langs.insert(LanguageTag::new("Englisch", "en")));
        assert!(!langs.insert(LanguageTag::new("Unknown", "")));
        assert!(langs.insert(LanguageTag::new("Spanish", "es")));

        let names: Vec<_> = langs.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["English", "Spanish"]);
    }

    #[test]
    fn test_emotion_from_label() {
        assert_eq!(Emotion::from_label("Happy"), Emotion::Happy);
        assert_eq!(Emotion::from_label(" angry "), Emotion::Angry);
        assert_eq!(Emotion::from_label("bored"), Emotion::Neutral);
    }

    #[test]
    fn test_emotion_serializes_lowercase() {
        let json = serde_json::to_string(&Emotion::Sad).unwrap();
        assert_eq!(json, "\"sad\"");
    }

    #[test]
    fn test_earliest_start() {
        let mut result = TranscriptionResult::default();
        assert_eq!(result.earliest_start(), None);
        result.segments = vec![segment(4.0, 5.0, "A", "b"), segment(2.0, 3.0, "A", "a")];
        assert_eq!(result.earliest_start(), Some(2.0));
    }

    #[test]
    fn test_to_lines() {
        let result = TranscriptionResult::new(vec![segment(0.0, 1.234, "SPEAKER_0", " hi ")]);
        assert_eq!(result.to_lines(), "[0.00-1.23] SPEAKER_0: hi\n");
    }

    #[test]
    fn test_json_omits_absent_optionals() {
        let result = TranscriptionResult::new(vec![segment(0.0, 1.0, "A", "x")]);
        let json = result.to_json().unwrap();
        assert!(!json.contains("\"words\""));
        assert!(!json.contains("\"details\""));
    }
}
