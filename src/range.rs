//! Numbered line listings for inspecting part of a file.
//!
//! Lines are split on `\n`, `\r\n`, `\r` and the other line boundaries
//! Python's `str.splitlines` knows: `\x0b`, `\x0c`, `\x1c`..=`\x1e`,
//! `\u{85}`, `\u{2028}` and `\u{2029}`. A terminator at the very end of the
//! text does not start a new, empty line.

use crate::document::{DocumentError, TextDocument};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RangeError {
    #[error("Invalid line range [{start}, {end}]: lines are 1-indexed and start must not exceed end")]
    InvalidRange { start: usize, end: usize },

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Failed to write listing: {0}")]
    Output(#[source] std::io::Error),
}

/// Inclusive, 1-indexed line range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    start: usize,
    end: usize,
}

impl LineRange {
    pub fn new(start: usize, end: usize) -> Result<Self, RangeError> {
        if start == 0 || start > end {
            return Err(RangeError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        (self.start..=self.end).contains(&index)
    }
}

/// One line of a listing, without its terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NumberedLine<'a> {
    pub index: usize,
    pub line: &'a str,
}

/// Iterator over the lines of a text using universal newlines.
#[derive(Debug, Clone)]
pub struct UniversalLines<'a> {
    rest: &'a str,
}

pub fn universal_lines(text: &str) -> UniversalLines<'_> {
    UniversalLines { rest: text }
}

fn is_line_break(c: char) -> bool {
    matches!(
        c,
        '\n' | '\r' | '\x0b' | '\x0c' | '\x1c'..='\x1e' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

impl<'a> Iterator for UniversalLines<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        match self.rest.char_indices().find(|&(_, c)| is_line_break(c)) {
            Some((idx, c)) => {
                let line = &self.rest[..idx];
                let terminator = if self.rest[idx..].starts_with("\r\n") {
                    2
                } else {
                    c.len_utf8()
                };
                self.rest = &self.rest[idx + terminator..];
                Some(line)
            }
            None => {
                let line = self.rest;
                self.rest = "";
                Some(line)
            }
        }
    }
}

/// Lazily yield the lines of `text` whose index falls in `range`.
///
/// Iteration stops as soon as the range end is passed.
pub fn lines_in_range(text: &str, range: LineRange) -> impl Iterator<Item = NumberedLine<'_>> {
    universal_lines(text)
        .enumerate()
        .map(|(idx, line)| NumberedLine {
            index: idx + 1,
            line,
        })
        .skip_while(move |numbered| numbered.index < range.start())
        .take_while(move |numbered| range.contains(numbered.index))
}

/// How a listing is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListingFormat {
    /// `600: "line content"`
    #[default]
    Human,
    /// One JSON object per line: `{"index":600,"line":"..."}`
    JsonLines,
}

/// Prints a numbered slice of one file.
#[derive(Debug, Clone)]
pub struct RangePrinter {
    pub file: PathBuf,
    pub range: LineRange,
}

impl RangePrinter {
    pub fn new(file: impl Into<PathBuf>, range: LineRange) -> Self {
        Self {
            file: file.into(),
            range,
        }
    }

    /// Read the file and write its listing to `out`. Returns the number of
    /// lines written.
    pub fn print<W: Write>(&self, out: &mut W, format: ListingFormat) -> Result<usize, RangeError> {
        let document = TextDocument::read(&self.file)?;
        let mut count = 0;
        for numbered in lines_in_range(document.content(), self.range) {
            match format {
                ListingFormat::Human => {
                    writeln!(out, "{}: {:?}", numbered.index, numbered.line)
                        .map_err(RangeError::Output)?;
                }
                ListingFormat::JsonLines => {
                    let json = serde_json::to_string(&numbered)
                        .map_err(|e| RangeError::Output(e.into()))?;
                    writeln!(out, "{json}").map_err(RangeError::Output)?;
                }
            }
            count += 1;
        }
        tracing::debug!(
            file = %self.file.display(),
            start = self.range.start(),
            end = self.range.end(),
            lines = count,
            "printed line range"
        );
        Ok(count)
    }
}
