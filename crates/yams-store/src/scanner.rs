use crate::parse_timestamp;
use chrono::NaiveDateTime;
use std::io::{self, BufRead};
use tracing::debug;

/// A well-formed `TIMESTAMP NAME` line from the image list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub timestamp: NaiveDateTime,
    pub image_name: String,
}

/// Parse one image-list line.
///
/// Returns `None` for anything that is not exactly two whitespace-separated
/// fields with a parseable timestamp first. Such lines are skipped, not errors.
pub fn parse_list_line(line: &str) -> Option<ListEntry> {
    let mut fields = line.split_whitespace();
    let (Some(ts), Some(name), None) = (fields.next(), fields.next(), fields.next()) else {
        return None;
    };
    let timestamp = parse_timestamp(ts).ok()?;
    Some(ListEntry {
        timestamp,
        image_name: name.to_owned(),
    })
}

/// One-line-at-a-time scanner over the image list.
///
/// Mirrors a classic scanner loop: call [`scan`](Self::scan) until it returns
/// `false`, read the current line with [`text`](Self::text), then check
/// [`err`](Self::err) to tell end-of-input from a read failure.
///
/// A line that is not valid UTF-8 is yielded as an empty line, which
/// [`parse_list_line`] rejects like any other malformed line.
pub struct ImageListScanner<R> {
    reader: R,
    buf: Vec<u8>,
    line: String,
    lineno: u64,
    err: Option<io::Error>,
    done: bool,
}

impl<R: BufRead> ImageListScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line: String::new(),
            lineno: 0,
            err: None,
            done: false,
        }
    }

    pub fn scan(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.buf.clear();
        self.line.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                false
            }
            Ok(_) => {
                self.lineno += 1;
                match std::str::from_utf8(&self.buf) {
                    Ok(text) => self.line.push_str(text.trim_end_matches(['\n', '\r'])),
                    Err(e) => debug!("image list line {}: not UTF-8: {e}", self.lineno),
                }
                true
            }
            Err(e) => {
                self.line.clear();
                self.err = Some(e);
                self.done = true;
                false
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.line
    }

    pub fn err(&self) -> Option<&io::Error> {
        self.err.as_ref()
    }

    pub fn take_err(&mut self) -> Option<io::Error> {
        self.err.take()
    }
}
