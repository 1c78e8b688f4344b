//! ELAN (`.eaf`) timeline export.
//!
//! [`build_timeline`] is a pure transform from segments to a
//! [`TimelineDocument`]; [`TimelineDocument::to_xml`] serializes it.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::Result;
use crate::types::TranscriptSegment;

pub const EAF_SCHEMA_LOCATION: &str = "http://www.mpi.nl/tools/elan/EAFv3.0.xsd";
const XSI_NAMESPACE: &str = "http://www.w3.org/2001/XMLSchema-instance";
const TRANSCRIPTION_TYPE: &str = "transcription";
const WORD_TYPE: &str = "word";

/// Seconds to integer milliseconds, rounding half away from zero, floored at 0.
pub fn ms_from_seconds(seconds: f64) -> u64 {
    let ms = (seconds * 1000.0).round();
    if ms.is_finite() && ms > 0.0 {
        ms as u64
    } else {
        0
    }
}

/// Deduplicated time anchors. Ids are issued from 1 in first-request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeSlotTable {
    ids: HashMap<u64, usize>,
    values: Vec<u64>,
}

impl TimeSlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot id for `seconds`, allocating one on first request.
    pub fn slot_for(&mut self, seconds: f64) -> usize {
        self.slot_for_ms(ms_from_seconds(seconds))
    }

    pub fn slot_for_ms(&mut self, ms: u64) -> usize {
        if let Some(&id) = self.ids.get(&ms) {
            return id;
        }
        self.values.push(ms);
        let id = self.values.len();
        self.ids.insert(ms, id);
        id
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `(id, milliseconds)` pairs in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.values.iter().enumerate().map(|(i, &ms)| (i + 1, ms))
    }

    pub fn value_of(&self, id: usize) -> Option<u64> {
        id.checked_sub(1).and_then(|i| self.values.get(i)).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierKind {
    Transcription,
    Word,
}

impl TierKind {
    fn linguistic_type(self) -> &'static str {
        match self {
            TierKind::Transcription => TRANSCRIPTION_TYPE,
            TierKind::Word => WORD_TYPE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub id: usize,
    pub start_slot: usize,
    pub end_slot: usize,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tier {
    pub id: String,
    pub speaker: String,
    pub kind: TierKind,
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimelineDocument {
    pub media_path: PathBuf,
    pub time_slots: TimeSlotTable,
    pub tiers: Vec<Tier>,
}

/// Group segments into per-speaker tiers over a shared slot table.
///
/// Speakers appear in first-seen order. Each speaker gets a transcription
/// tier, plus a `<speaker>_words` tier when any of their segments carry words.
/// Annotation ids are global: a segment's annotation, then its words.
pub fn build_timeline(media_path: &Path, segments: &[TranscriptSegment]) -> TimelineDocument {
    let mut speakers: Vec<&str> = Vec::new();
    let mut by_speaker: HashMap<&str, Vec<&TranscriptSegment>> = HashMap::new();
    for seg in segments {
        by_speaker
            .entry(seg.speaker.as_str())
            .or_insert_with(|| {
                speakers.push(seg.speaker.as_str());
                Vec::new()
            })
            .push(seg);
    }

    let mut slots = TimeSlotTable::new();
    let mut tiers = Vec::with_capacity(speakers.len() * 2);
    let mut next_id = 1;

    for speaker in speakers {
        let mut tier = Tier {
            id: speaker.to_string(),
            speaker: speaker.to_string(),
            kind: TierKind::Transcription,
            annotations: Vec::new(),
        };
        let mut words = Tier {
            id: format!("{speaker}_words"),
            speaker: speaker.to_string(),
            kind: TierKind::Word,
            annotations: Vec::new(),
        };

        for seg in by_speaker.get(speaker).into_iter().flatten() {
            tier.annotations.push(Annotation {
                id: next_id,
                start_slot: slots.slot_for(seg.start),
                end_slot: slots.slot_for(seg.end),
                value: seg.text.clone(),
            });
            next_id += 1;

            for word in seg.words.iter().flatten() {
                words.annotations.push(Annotation {
                    id: next_id,
                    start_slot: slots.slot_for(word.start),
                    end_slot: slots.slot_for(word.end),
                    value: word.word.clone(),
                });
                next_id += 1;
            }
        }

        tiers.push(tier);
        if !words.annotations.is_empty() {
            tiers.push(words);
        }
    }

    TimelineDocument {
        media_path: media_path.to_path_buf(),
        time_slots: slots,
        tiers,
    }
}

/// Header settings for the written `.eaf` file.
#[derive(Debug, Clone)]
pub struct EafConfig {
    pub author: Option<String>,
    pub time_units: String,
    pub schema_location: String,
    pub version: String,
    pub format: String,
    /// Document date; the current time when unset.
    pub date: Option<DateTime<Utc>>,
}

impl Default for EafConfig {
    fn default() -> Self {
        Self {
            author: None,
            time_units: "milliseconds".to_string(),
            schema_location: EAF_SCHEMA_LOCATION.to_string(),
            version: "3.0".to_string(),
            format: "3.0".to_string(),
            date: None,
        }
    }
}

impl EafConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }
}

/// Exporter MIME guess by extension.
pub fn guess_mime_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        _ => "application/octet-stream",
    }
}

/// `file://` URI for an absolute path, percent-encoding everything but
/// unreserved characters and `/`. A leading drive letter keeps its `:`.
pub fn file_uri(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut uri = String::from("file://");
    if !raw.starts_with('/') {
        uri.push('/');
    }
    let bytes = raw.as_bytes();
    let rest = match bytes {
        [drive, b':', ..] if drive.is_ascii_alphabetic() => {
            uri.push(*drive as char);
            uri.push(':');
            &bytes[2..]
        }
        _ => bytes,
    };
    for &byte in rest {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                uri.push(byte as char)
            }
            _ => {
                let _ = write!(uri, "%{byte:02X}");
            }
        }
    }
    uri
}

/// Escape text for element content and attribute values.
/// Characters XML 1.0 cannot represent are dropped.
pub fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' | '\n' | '\r' => out.push(c),
            c if (c as u32) < 0x20 => {}
            c => out.push(c),
        }
    }
    out
}

fn absolute(path: &Path) -> Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(p) => Ok(p),
        Err(_) => Ok(std::path::absolute(path)?),
    }
}

impl TimelineDocument {
    /// Serialize as an EAF 3.0 document.
    pub fn to_xml(&self, config: &EafConfig) -> Result<String> {
        let date = config.date.unwrap_or_else(Utc::now);
        let media_name = self
            .media_path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let media_url = file_uri(&absolute(&self.media_path)?);

        let mut xml = String::new();
        // writing into a String cannot fail
        let _ = self.write_xml(&mut xml, config, &date, &media_url, &media_name);
        Ok(xml)
    }

    fn write_xml(
        &self,
        xml: &mut String,
        config: &EafConfig,
        date: &DateTime<Utc>,
        media_url: &str,
        media_name: &str,
    ) -> std::fmt::Result {
        writeln!(xml, r#"<?xml version="1.0" encoding="UTF-8"?>"#)?;
        writeln!(
            xml,
            r#"<ANNOTATION_DOCUMENT AUTHOR="{}" DATE="{}" FORMAT="{}" VERSION="{}" xmlns:xsi="{XSI_NAMESPACE}" xsi:noNamespaceSchemaLocation="{}">"#,
            escape_xml(config.author.as_deref().unwrap_or("")),
            date.format("%Y-%m-%dT%H:%M:%SZ"),
            escape_xml(&config.format),
            escape_xml(&config.version),
            escape_xml(&config.schema_location),
        )?;

        writeln!(
            xml,
            r#"  <HEADER MEDIA_FILE="" TIME_UNITS="{}">"#,
            escape_xml(&config.time_units)
        )?;
        writeln!(
            xml,
            r#"    <MEDIA_DESCRIPTOR MEDIA_URL="{}" MIME_TYPE="{}" RELATIVE_MEDIA_URL="{}"/>"#,
            escape_xml(media_url),
            guess_mime_type(&self.media_path),
            escape_xml(media_name),
        )?;
        writeln!(xml, "  </HEADER>")?;

        if self.time_slots.is_empty() {
            writeln!(xml, "  <TIME_ORDER/>")?;
        } else {
            writeln!(xml, "  <TIME_ORDER>")?;
            for (id, ms) in self.time_slots.iter() {
                writeln!(xml, r#"    <TIME_SLOT TIME_SLOT_ID="ts{id}" TIME_VALUE="{ms}"/>"#)?;
            }
            writeln!(xml, "  </TIME_ORDER>")?;
        }

        for tier in &self.tiers {
            let open = format!(
                r#"TIER LINGUISTIC_TYPE_REF="{}" PARTICIPANT="{}" TIER_ID="{}""#,
                tier.kind.linguistic_type(),
                escape_xml(&tier.speaker),
                escape_xml(&tier.id),
            );
            if tier.annotations.is_empty() {
                writeln!(xml, "  <{open}/>")?;
                continue;
            }
            writeln!(xml, "  <{open}>")?;
            for a in &tier.annotations {
                writeln!(xml, "    <ANNOTATION>")?;
                writeln!(
                    xml,
                    r#"      <ALIGNABLE_ANNOTATION ANNOTATION_ID="a{}" TIME_SLOT_REF1="ts{}" TIME_SLOT_REF2="ts{}">"#,
                    a.id, a.start_slot, a.end_slot
                )?;
                writeln!(
                    xml,
                    "        <ANNOTATION_VALUE>{}</ANNOTATION_VALUE>",
                    escape_xml(&a.value)
                )?;
                writeln!(xml, "      </ALIGNABLE_ANNOTATION>")?;
                writeln!(xml, "    </ANNOTATION>")?;
            }
            writeln!(xml, "  </TIER>")?;
        }

        for kind in [TierKind::Transcription, TierKind::Word] {
            writeln!(
                xml,
                r#"  <LINGUISTIC_TYPE GRAPHIC_REFERENCES="false" LINGUISTIC_TYPE_ID="{}" TIME_ALIGNABLE="true"/>"#,
                kind.linguistic_type()
            )?;
        }
        writeln!(xml, r#"  <LOCALE LANGUAGE_CODE="und"/>"#)?;
        writeln!(xml, "</ANNOTATION_DOCUMENT>")
    }

    pub fn write(&self, output: &Path, config: &EafConfig) -> Result<()> {
        std::fs::write(output, self.to_xml(config)?)?;
        info!(
            path = %output.display(),
            tiers = self.tiers.len(),
            slots = self.time_slots.len(),
            "wrote EAF"
        );
        Ok(())
    }
}

/// Build the timeline for `segments` and write it to `output`.
pub fn write_eaf(
    output: &Path,
    media_path: &Path,
    segments: &[TranscriptSegment],
    config: &EafConfig,
) -> Result<()> {
    build_timeline(media_path, segments).write(output, config)
}
