use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::types::{TranscriptSegment, WordTimestamp};

/// One output line: `start, end, speaker, text[, words]`.
#[derive(Debug, Serialize)]
struct Row<'a> {
    start: f64,
    end: f64,
    speaker: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    words: Option<&'a [WordTimestamp]>,
}

/// Streams segments as line-delimited JSON, one object per line.
///
/// Each line is flushed as soon as it is written so pipes see output promptly.
/// Non-ASCII text is written verbatim.
pub struct JsonlEncoder<W: Write> {
    w: W,
    include_words: bool,
    written: usize,
}

impl<W: Write> JsonlEncoder<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            include_words: false,
            written: 0,
        }
    }

    /// Emit `words` for segments that have them.
    pub fn include_words(mut self, yes: bool) -> Self {
        self.include_words = yes;
        self
    }

    pub fn write_segment(&mut self, seg: &TranscriptSegment) -> Result<()> {
        let row = Row {
            start: seg.start,
            end: seg.end,
            speaker: &seg.speaker,
            text: &seg.text,
            words: seg
                .words
                .as_deref()
                .filter(|_| self.include_words),
        };
        serde_json::to_writer(&mut self.w, &row)?;
        self.w.write_all(b"\n")?;
        self.w.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn write_all(&mut self, segments: &[TranscriptSegment]) -> Result<()> {
        for seg in segments {
            self.write_segment(seg)?;
        }
        Ok(())
    }

    /// Number of lines written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

/// Render segments as a JSONL string.
pub fn to_jsonl(segments: &[TranscriptSegment], include_words: bool) -> Result<String> {
    let mut enc = JsonlEncoder::new(Vec::new()).include_words(include_words);
    enc.write_all(segments)?;
    Ok(String::from_utf8_lossy(&enc.into_inner()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeInterval;

    fn seg(start: f64, end: f64, speaker: &str, text: &str) -> TranscriptSegment {
        TranscriptSegment::new(TimeInterval { start, end }, speaker, text)
    }

    fn with_words() -> TranscriptSegment {
        seg(1.0, 2.0, "SPEAKER_01", "héllo").with_words(vec![WordTimestamp {
            word: "héllo".into(),
            start: 1.0,
            end: 1.8,
        }])
    }

    #[test]
    fn test_one_object_per_line() {
        let out = to_jsonl(&[seg(0.0, 1.5, "A", "hi"), seg(1.5, 3.0, "B", "yo")], false).unwrap();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], r#"{"start":0.0,"end":1.5,"speaker":"A","text":"hi"}"#);

        let parsed: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed["speaker"], "B");
    }

    #[test]
    fn test_words_only_when_requested() {
        let without = to_jsonl(&[with_words()], false).unwrap();
        assert!(!without.contains("\"words\""));

        let with = to_jsonl(&[with_words()], true).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(with.trim()).unwrap();
        assert_eq!(parsed["words"][0]["word"], "héllo");
        assert_eq!(parsed["words"][0]["end"], 1.8);
    }

    #[test]
    fn test_words_absent_on_segment_is_omitted() {
        let out = to_jsonl(&[seg(0.0, 1.0, "A", "x")], true).unwrap();
        assert!(!out.contains("\"words\""));
    }

    #[test]
    fn test_non_ascii_is_verbatim() {
        let out = to_jsonl(&[seg(0.0, 1.0, "A", "日本語")], false).unwrap();
        assert!(out.contains("日本語"));
    }

    #[test]
    fn test_encoder_counts_and_streams() {
        let mut buf = Vec::new();
        {
            let mut enc = JsonlEncoder::new(&mut buf);
            enc.write_segment(&seg(0.0, 1.0, "A", "a")).unwrap();
            enc.write_segment(&seg(1.0, 2.0, "A", "b")).unwrap();
            assert_eq!(enc.written(), 2);
        }
        assert_eq!(buf.iter().filter(|&&b| b == b'\n').count(), 2);
    }
}
