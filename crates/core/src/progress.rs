//! Progress-line parsing for the external tool's diagnostic stream.
//!
//! With `-v info` the tool periodically writes status lines such as
//!
//! ```text
//! frame=   50 fps= 25 q=28.0 size=     256kB time=00:00:02.00 bitrate=1048.6kbits/s speed=1.01x
//! ```
//!
//! usually terminated by `\r` rather than `\n`. [`LineSplitter`] turns raw
//! stderr chunks into lines and [`ProgressParser`] turns a recognised line
//! into a [`ProgressUpdate`]. Anything else is a parse miss, never an error.

use serde::Serialize;

/// Leading token of a parseable progress line.
pub const PROGRESS_MARKER: &str = "frame=";

// Positions within a progress line split on '='.
const FRAME_FIELD: usize = 1;
const FPS_FIELD: usize = 2;
const TIME_FIELD: usize = 5;
const SPEED_FIELD: usize = 7;

/// Point-in-time progress snapshot forwarded to the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    /// Frames-per-second; `None` when the tool reports `N/A`.
    pub fps: Option<f64>,
    pub frame: u64,
    /// Encoded timestamp, verbatim (e.g. `00:00:02.00`).
    pub time: String,
    /// Speed multiplier; `None` when the tool reports `N/A`.
    pub speed: Option<f64>,
    /// `frame / expected * 100`, unbounded above 100.
    pub percent: f64,
}

/// Parses progress lines against an expected total frame count.
#[derive(Debug, Clone, Copy)]
pub struct ProgressParser {
    expected_frames: f64,
}

impl ProgressParser {
    /// The expected count may be fractional. Zero, negative and non-finite
    /// counts are treated as one.
    pub fn new(expected_frames: f64) -> Self {
        let expected_frames = if expected_frames.is_finite() && expected_frames > 0.0 {
            expected_frames
        } else {
            1.0
        };
        Self { expected_frames }
    }

    /// Parse one line; `None` if it is not a well-formed progress line.
    pub fn parse_line(&self, line: &str) -> Option<ProgressUpdate> {
        if !line.starts_with(PROGRESS_MARKER) {
            return None;
        }
        let fields: Vec<&str> = line.split('=').collect();

        let frame = leading_integer(fields.get(FRAME_FIELD)?)?;
        let fps = fields.get(FPS_FIELD).and_then(|f| leading_float(f));
        let time = fields
            .get(TIME_FIELD)?
            .split(' ')
            .next()
            .unwrap_or_default()
            .to_string();
        let speed = fields.get(SPEED_FIELD).and_then(|f| leading_float(f));
        let percent = frame as f64 / self.expected_frames * 100.0;

        Some(ProgressUpdate {
            fps,
            frame,
            time,
            speed,
            percent,
        })
    }
}

/// Splits a byte stream into lines on `\r` or `\n`.
///
/// Partial trailing data is held until the next chunk or [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every line it completes. Empty lines are
    /// dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\r' || byte == b'\n' {
                self.flush_into(&mut lines);
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Return whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.flush_into(&mut lines);
        lines.pop()
    }

    fn flush_into(&mut self, lines: &mut Vec<String>) {
        if !self.pending.is_empty() {
            lines.push(String::from_utf8_lossy(&self.pending).into_owned());
            self.pending.clear();
        }
    }
}

/// Leading unsigned integer after optional whitespace (`"  50 fps"` → 50).
fn leading_integer(field: &str) -> Option<u64> {
    let field = field.trim_start();
    let end = field
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(field.len());
    field[..end].parse().ok()
}

/// Leading decimal number after optional whitespace (`"1.01x"` → 1.01).
fn leading_float(field: &str) -> Option<f64> {
    let field = field.trim_start();
    let mut end = 0;
    let mut seen_dot = false;
    for (i, c) in field.char_indices() {
        match c {
            '0'..='9' => end = i + 1,
            '-' | '+' if i == 0 => {}
            '.' if !seen_dot => seen_dot = true,
            _ => break,
        }
    }
    field[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "frame=   50 fps= 25 q=28.0 size=     256kB time=00:00:02.00 \
                        bitrate=1048.6kbits/s speed=1.01x";

    #[test]
    fn parses_standard_progress_line() {
        let update = ProgressParser::new(100.0).parse_line(LINE).expect("update");

        assert_eq!(update.frame, 50);
        assert_eq!(update.fps, Some(25.0));
        assert_eq!(update.time, "00:00:02.00");
        assert_eq!(update.speed, Some(1.01));
        assert!((update.percent - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn percent_is_unbounded_above_hundred() {
        let update = ProgressParser::new(25.0).parse_line(LINE).unwrap();
        assert!((update.percent - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_expected_frames_counts_as_one() {
        let update = ProgressParser::new(0.0).parse_line(LINE).unwrap();
        assert!((update.percent - 5000.0).abs() < f64::EPSILON);

        let update = ProgressParser::new(-3.0).parse_line(LINE).unwrap();
        assert!((update.percent - 5000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn fractional_expected_frames() {
        let update = ProgressParser::new(62.5).parse_line(LINE).unwrap();
        assert!((update.percent - 80.0).abs() < 1e-9);
    }

    #[test]
    fn unavailable_speed_is_none() {
        let line = "frame=    1 fps=0.0 q=0.0 size=       0kB time=00:00:00.00 \
                    bitrate=N/A speed=N/A";
        let update = ProgressParser::new(10.0).parse_line(line).unwrap();
        assert_eq!(update.fps, Some(0.0));
        assert_eq!(update.speed, None);
    }

    #[test]
    fn lines_without_marker_are_ignored() {
        let parser = ProgressParser::new(100.0);
        assert!(parser.parse_line("Input #0, png_pipe, from 'x':").is_none());
        assert!(parser.parse_line(" frame=1").is_none());
    }

    #[test]
    fn truncated_progress_line_is_a_miss() {
        let parser = ProgressParser::new(100.0);
        assert!(parser.parse_line("frame=   50 fps= 25 q=28.0").is_none());
        assert!(parser.parse_line("frame=abc fps=1 q=1 size=1 time=1 bitrate=1 speed=1").is_none());
    }

    #[test]
    fn splitter_handles_carriage_returns_and_partial_chunks() {
        let mut splitter = LineSplitter::new();

        assert_eq!(splitter.push(b"frame=1 a\rfra"), vec!["frame=1 a"]);
        assert_eq!(splitter.push(b"me=2 b\r\nlast"), vec!["frame=2 b"]);
        assert_eq!(splitter.finish().as_deref(), Some("last"));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn leading_number_helpers() {
        assert_eq!(leading_integer("  42 fps"), Some(42));
        assert_eq!(leading_integer(" fps"), None);
        assert_eq!(leading_float(" 29.97 q"), Some(29.97));
        assert_eq!(leading_float("1.5x"), Some(1.5));
        assert_eq!(leading_float("N/A"), None);
    }
}
