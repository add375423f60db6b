//! CSV document reading.
//!
//! Wraps the `csv` crate with the conventions uploads follow: the first record
//! is the header, blank lines are skipped, leading blanks before a field are
//! dropped, and rows may have any width (width is checked against the header
//! during coercion so the error can name the row).
//!
//! Quoting is strict. A quote may only open a field (after optional leading
//! blanks), a closing quote must be followed by a delimiter or end of line,
//! and every opened quote must be closed. The `csv` crate tolerates all three,
//! so the document is checked before it is handed over.

use crate::error::{IngestError, Result};
use csv::{ReaderBuilder, StringRecord};
use std::io::Cursor;

/// One data row with its position in the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRow {
    /// 1-based data row number (the header is row 0).
    pub number: usize,
    /// 1-based line in the document where the row starts.
    pub line: u64,
    /// Cells as written. Quoted cells keep their whitespace.
    pub cells: Vec<String>,
}

/// Reader over an uploaded CSV document.
pub struct UploadReader {
    inner: csv::Reader<Cursor<Vec<u8>>>,
    record: StringRecord,
    rows_read: usize,
}

impl UploadReader {
    /// Check the document's quoting and create a reader over it.
    pub fn new(document: &[u8]) -> Result<Self> {
        let normalized = strip_field_blanks(document)?;
        let inner = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(Cursor::new(normalized));
        Ok(Self {
            inner,
            record: StringRecord::new(),
            rows_read: 0,
        })
    }

    /// Read the header row. Returns `None` for an empty document.
    pub fn read_header(&mut self) -> Result<Option<Vec<String>>> {
        match self.read_record()? {
            Some(_) => Ok(Some(cells(&self.record))),
            None => Ok(None),
        }
    }

    /// Read the next data row, or `None` at end of input.
    pub fn next_row(&mut self) -> Result<Option<DataRow>> {
        match self.read_record()? {
            Some(line) => {
                self.rows_read += 1;
                Ok(Some(DataRow {
                    number: self.rows_read,
                    line,
                    cells: cells(&self.record),
                }))
            }
            None => Ok(None),
        }
    }

    fn read_record(&mut self) -> Result<Option<u64>> {
        let more = self
            .inner
            .read_record(&mut self.record)
            .map_err(malformed)?;
        if !more {
            return Ok(None);
        }
        let line = self.record.position().map(|p| p.line()).unwrap_or(0);
        Ok(Some(line))
    }
}

impl Iterator for UploadReader {
    type Item = Result<DataRow>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_row().transpose()
    }
}

/// Validate quoting and drop the blanks in front of every field.
///
/// Newlines are never removed, so line numbers reported by the `csv` crate
/// still match the original document.
fn strip_field_blanks(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        while matches!(input.get(i), Some(b' ' | b'\t')) {
            i += 1;
        }

        if input.get(i) == Some(&b'"') {
            let opened = i;
            out.push(b'"');
            i += 1;
            loop {
                match input.get(i) {
                    None => {
                        return Err(bad_quote(input, opened, "quoted field is never closed"))
                    }
                    Some(b'"') if input.get(i + 1) == Some(&b'"') => {
                        out.extend_from_slice(b"\"\"");
                        i += 2;
                    }
                    Some(b'"') => {
                        out.push(b'"');
                        i += 1;
                        break;
                    }
                    Some(&b) => {
                        out.push(b);
                        i += 1;
                    }
                }
            }
            if !matches!(input.get(i), None | Some(b',' | b'\r' | b'\n')) {
                return Err(bad_quote(input, i, "unexpected character after closing quote"));
            }
        } else {
            while let Some(&b) = input.get(i) {
                match b {
                    b',' | b'\r' | b'\n' => break,
                    b'"' => return Err(bad_quote(input, i, "bare quote in unquoted field")),
                    _ => {
                        out.push(b);
                        i += 1;
                    }
                }
            }
        }

        // Delimiter or line terminator
        if let Some(&b) = input.get(i) {
            out.push(b);
            i += 1;
        }
    }

    Ok(out)
}

fn bad_quote(input: &[u8], offset: usize, message: &str) -> IngestError {
    let line = input[..offset].iter().filter(|&&b| b == b'\n').count() as u64 + 1;
    IngestError::MalformedCsv {
        line: Some(line),
        message: message.to_string(),
    }
}

fn cells(record: &StringRecord) -> Vec<String> {
    record.iter().map(str::to_string).collect()
}

fn malformed(err: csv::Error) -> IngestError {
    IngestError::MalformedCsv {
        line: err.position().map(|p| p.line()),
        message: err.to_string(),
    }
}
