//! Mapping from lines of the generated markdown back to the files they came from.
//!
//! The markdown sent to the worker may be stitched together from several
//! source files (includes, shortcodes). The worker uses these ranges to report
//! errors and progress against the original file and line.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Origin of a single markdown line. `line` is zero-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub file: String,
    pub line: usize,
}

impl SourcePosition {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

/// A run of consecutive markdown lines with a common origin. All line numbers are one-based and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRange {
    pub lines: [usize; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_lines: Option<[usize; 2]>,
}

impl SourceRange {
    /// Range over markdown lines `start..=end` with no known origin.
    pub fn unmapped(start: usize, end: usize) -> Self {
        Self {
            lines: [start, end],
            file: None,
            source_lines: None,
        }
    }

    fn starting_at(index: usize, position: Option<SourcePosition>) -> Self {
        let line = index + 1;
        match position {
            Some(position) => Self {
                lines: [line, line],
                file: Some(position.file),
                source_lines: Some([position.line + 1, position.line + 1]),
            },
            None => Self::unmapped(line, line),
        }
    }

    /// Extend by one line if `position` directly follows this range in the same file.
    fn try_extend(&mut self, index: usize, position: &SourcePosition) -> bool {
        let (Some(file), Some(source_lines)) = (&self.file, &mut self.source_lines) else {
            return false;
        };
        // `source_lines[1]` is one-based, so it equals the zero-based index of the next line.
        if *file != position.file || source_lines[1] != position.line {
            return false;
        }
        source_lines[1] = position.line + 1;
        self.lines[1] = index + 1;
        true
    }
}

/// Group per-line origins into contiguous ranges, in markdown order.
///
/// Lines without an origin each become their own range with no file.
pub fn build_source_ranges<I>(positions: I) -> Vec<SourceRange>
where
    I: IntoIterator<Item = Option<SourcePosition>>,
{
    let mut ranges = Vec::new();
    let mut current: Option<SourceRange> = None;

    for (index, position) in positions.into_iter().enumerate() {
        if let (Some(range), Some(position)) = (current.as_mut(), position.as_ref()) {
            if range.try_extend(index, position) {
                continue;
            }
        }
        if let Some(range) = current.take() {
            ranges.push(range);
        }
        current = Some(SourceRange::starting_at(index, position));
    }

    if let Some(range) = current {
        ranges.push(range);
    }
    ranges
}

/// One line of the markdown handed to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedLine {
    pub text: String,
    pub origin: Option<SourcePosition>,
}

/// The markdown of a render target together with its line origins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedDocument {
    lines: Vec<MappedLine>,
}

impl MappedDocument {
    pub fn new(lines: Vec<MappedLine>) -> Self {
        Self { lines }
    }

    /// Document whose every line maps to the same line of `file`.
    pub fn from_file(file: &Path, text: &str) -> Self {
        let name = file.to_string_lossy().into_owned();
        let lines = text
            .lines()
            .enumerate()
            .map(|(index, line)| MappedLine {
                text: line.to_string(),
                origin: Some(SourcePosition::new(name.clone(), index)),
            })
            .collect();
        Self { lines }
    }

    pub fn lines(&self) -> &[MappedLine] {
        &self.lines
    }

    pub fn source_ranges(&self) -> Vec<SourceRange> {
        build_source_ranges(self.lines.iter().map(|line| line.origin.clone()))
    }
}
