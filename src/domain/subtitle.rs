use std::fmt;
use std::str::FromStr;

use super::{Segment, TranscriptionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubtitleFormat {
    Srt,
    Vtt,
}

impl SubtitleFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "srt",
            SubtitleFormat::Vtt => "vtt",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            SubtitleFormat::Srt => "application/x-subrip",
            SubtitleFormat::Vtt => "text/vtt",
        }
    }
}

impl FromStr for SubtitleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "srt" => Ok(SubtitleFormat::Srt),
            "vtt" => Ok(SubtitleFormat::Vtt),
            _ => Err(format!("Invalid subtitle format: {}", s)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubtitleError {
    #[error("result has no segments to render")]
    NoSegments,
    #[error("malformed subtitle input: {0}")]
    Malformed(String),
}

/// Renders the stored result as SubRip text. Timestamps carry
/// millisecond precision; segment order follows the stored order.
pub fn render_srt(result: &TranscriptionResult) -> Result<String, SubtitleError> {
    if result.segments.is_empty() {
        return Err(SubtitleError::NoSegments);
    }
    let mut out = String::new();
    for (index, segment) in result.segments.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            SrtTimestamp(segment.start),
            SrtTimestamp(segment.end),
            segment.text.trim()
        ));
    }
    Ok(out)
}

/// Renders the stored result as WebVTT text.
pub fn render_vtt(result: &TranscriptionResult) -> Result<String, SubtitleError> {
    if result.segments.is_empty() {
        return Err(SubtitleError::NoSegments);
    }
    let mut out = String::from("WEBVTT\n\n");
    for segment in &result.segments {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            VttTimestamp(segment.start),
            VttTimestamp(segment.end),
            segment.text.trim()
        ));
    }
    Ok(out)
}

/// Parses SubRip text back into segments. Diagnostics are not part of
/// the subtitle format and come back empty.
pub fn parse_srt(input: &str) -> Result<Vec<Segment>, SubtitleError> {
    let mut segments = Vec::new();
    for block in input.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
        let mut lines = block.lines();
        let index_line = lines
            .next()
            .ok_or_else(|| SubtitleError::Malformed("missing index line".into()))?;
        let id: i64 = index_line
            .trim()
            .parse()
            .map_err(|_| SubtitleError::Malformed(format!("bad index: {}", index_line)))?;
        let timing = lines
            .next()
            .ok_or_else(|| SubtitleError::Malformed("missing timing line".into()))?;
        let (start_raw, end_raw) = timing
            .split_once("-->")
            .ok_or_else(|| SubtitleError::Malformed(format!("bad timing: {}", timing)))?;
        let start = parse_srt_timestamp(start_raw.trim())?;
        let end = parse_srt_timestamp(end_raw.trim())?;
        let text = lines.collect::<Vec<_>>().join("\n");
        segments.push(Segment {
            id: id - 1,
            start,
            end,
            text,
            diagnostics: serde_json::Map::new(),
        });
    }
    if segments.is_empty() {
        return Err(SubtitleError::Malformed("no cues found".into()));
    }
    Ok(segments)
}

fn parse_srt_timestamp(raw: &str) -> Result<f64, SubtitleError> {
    let (clock, millis) = raw
        .split_once(',')
        .ok_or_else(|| SubtitleError::Malformed(format!("bad timestamp: {}", raw)))?;
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(SubtitleError::Malformed(format!("bad timestamp: {}", raw)));
    }
    let hours: f64 = parts[0]
        .parse()
        .map_err(|_| SubtitleError::Malformed(format!("bad hours: {}", raw)))?;
    let minutes: f64 = parts[1]
        .parse()
        .map_err(|_| SubtitleError::Malformed(format!("bad minutes: {}", raw)))?;
    let seconds: f64 = parts[2]
        .parse()
        .map_err(|_| SubtitleError::Malformed(format!("bad seconds: {}", raw)))?;
    let ms: f64 = millis
        .parse()
        .map_err(|_| SubtitleError::Malformed(format!("bad millis: {}", raw)))?;
    Ok(hours * 3600.0 + minutes * 60.0 + seconds + ms / 1000.0)
}

struct SrtTimestamp(f64);

impl fmt::Display for SrtTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_ms = (self.0.max(0.0) * 1000.0).round() as u64;
        let (h, m, s, ms) = split_ms(total_ms);
        write!(f, "{:02}:{:02}:{:02},{:03}", h, m, s, ms)
    }
}

struct VttTimestamp(f64);

impl fmt::Display for VttTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total_ms = (self.0.max(0.0) * 1000.0).round() as u64;
        let (h, m, s, ms) = split_ms(total_ms);
        write!(f, "{:02}:{:02}:{:02}.{:03}", h, m, s, ms)
    }
}

fn split_ms(total_ms: u64) -> (u64, u64, u64, u64) {
    let ms = total_ms % 1000;
    let total_s = total_ms / 1000;
    (total_s / 3600, (total_s % 3600) / 60, total_s % 60, ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> TranscriptionResult {
        TranscriptionResult {
            text: "hello world".into(),
            segments: vec![
                Segment {
                    id: 0,
                    start: 0.0,
                    end: 2.48,
                    text: "hello".into(),
                    diagnostics: serde_json::Map::new(),
                },
                Segment {
                    id: 1,
                    start: 2.48,
                    end: 5.903,
                    text: "world".into(),
                    diagnostics: serde_json::Map::new(),
                },
            ],
            info: serde_json::Map::new(),
        }
    }

    #[test]
    fn srt_timestamps_carry_millisecond_precision() {
        let srt = render_srt(&sample_result()).unwrap();
        assert!(srt.contains("00:00:02,480 --> 00:00:05,903"));
    }

    #[test]
    fn vtt_starts_with_header_and_uses_dots() {
        let vtt = render_vtt(&sample_result()).unwrap();
        assert!(vtt.starts_with("WEBVTT\n"));
        assert!(vtt.contains("00:00:02.480 --> 00:00:05.903"));
    }

    #[test]
    fn srt_round_trips_segment_boundaries() {
        let original = sample_result();
        let srt = render_srt(&original).unwrap();
        let parsed = parse_srt(&srt).unwrap();
        assert_eq!(parsed.len(), original.segments.len());
        for (a, b) in parsed.iter().zip(original.segments.iter()) {
            assert!((a.start - b.start).abs() < 0.001);
            assert!((a.end - b.end).abs() < 0.001);
            assert_eq!(a.text, b.text);
        }
    }

    #[test]
    fn empty_result_is_rejected() {
        let empty = TranscriptionResult {
            text: String::new(),
            segments: vec![],
            info: serde_json::Map::new(),
        };
        assert!(matches!(render_srt(&empty), Err(SubtitleError::NoSegments)));
    }
}
