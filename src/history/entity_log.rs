use crate::fix::{format_time, parse_time, LocationFix};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Column header written as the first line of every new log
pub const HEADER: [&str; 8] = [
    "time",
    "latitude",
    "longitude",
    "horizontalAccuracy",
    "street",
    "number",
    "city",
    "country",
];

/// Bytes read per step while scanning backward for the last line
const SCAN_BLOCK: u64 = 4096;

/// Append-only CSV history for a single entity
pub struct EntityLog {
    path: PathBuf,
    file: File,

    /// Existing file ended mid-line; terminate it before the next row
    needs_newline: bool,
}

/// Result of opening a log: the handle plus the recovered last timestamp
pub struct OpenedLog {
    pub log: EntityLog,
    pub last_seen: Option<DateTime<Local>>,
    pub created: bool,
}

impl EntityLog {
    /// Create the log with its header row, or open an existing one for append
    /// and recover the timestamp of its final data row.
    pub fn open_or_create(path: &Path) -> Result<OpenedLog> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => {
                let mut log = EntityLog {
                    path: path.to_path_buf(),
                    file,
                    needs_newline: false,
                };
                log.write_line(&encode_record(&HEADER))?;
                Ok(OpenedLog {
                    log,
                    last_seen: None,
                    created: true,
                })
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Self::open_existing(path),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to create log file {}", path.display()))
            }
        }
    }

    fn open_existing(path: &Path) -> Result<OpenedLog> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;

        let tail = read_tail(&mut file)
            .with_context(|| format!("Failed to read last line of {}", path.display()))?;

        let mut log = EntityLog {
            path: path.to_path_buf(),
            file,
            needs_newline: !tail.terminated,
        };

        let last_seen = match tail.last_line {
            Some(line) => parse_last_seen(&line)
                .with_context(|| format!("Corrupt last row in {}", path.display()))?,
            None => {
                // Empty or only blank lines: start over with a header
                log.file
                    .set_len(0)
                    .with_context(|| format!("Failed to truncate log file {}", path.display()))?;
                log.needs_newline = false;
                log.write_line(&encode_record(&HEADER))?;
                None
            }
        };

        Ok(OpenedLog {
            log,
            last_seen,
            created: false,
        })
    }

    /// Append one row. The write goes straight to the file; nothing is buffered.
    pub fn append(&mut self, time: &DateTime<Local>, fix: &LocationFix) -> Result<()> {
        let time = format_time(time);
        let latitude = format!("{:.6}", fix.latitude);
        let longitude = format!("{:.6}", fix.longitude);
        let accuracy = format!("{:.6}", fix.horizontal_accuracy);

        let record = encode_record(&[
            time.as_str(),
            latitude.as_str(),
            longitude.as_str(),
            accuracy.as_str(),
            fix.street.as_str(),
            fix.number.as_str(),
            fix.city.as_str(),
            fix.country.as_str(),
        ]);
        self.write_line(&record)
    }

    fn write_line(&mut self, record: &str) -> Result<()> {
        let mut line = String::with_capacity(record.len() + 2);
        if self.needs_newline {
            line.push('\n');
        }
        line.push_str(record);
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .with_context(|| format!("Failed to write to log file {}", self.path.display()))?;
        self.needs_newline = false;
        Ok(())
    }

    /// Flush to disk and release the handle
    pub fn close(self) -> Result<()> {
        self.file
            .sync_all()
            .with_context(|| format!("Failed to sync log file {}", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Last non-blank line of a file and whether the file ends with a terminator
#[derive(Debug, PartialEq)]
pub(crate) struct Tail {
    pub last_line: Option<String>,
    pub terminated: bool,
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

/// Scan backward from end-of-file for the last non-blank line.
///
/// Reads fixed-size blocks from the end so the cost does not grow with the
/// length of the log.
pub(crate) fn read_tail<R: Read + Seek>(reader: &mut R) -> Result<Tail> {
    let len = reader.seek(SeekFrom::End(0))?;
    if len == 0 {
        return Ok(Tail {
            last_line: None,
            terminated: true,
        });
    }

    let mut line: Vec<u8> = Vec::new();
    let mut terminated = false;
    let mut in_line = false;
    let mut pos = len;

    while pos > 0 {
        let start = pos.saturating_sub(SCAN_BLOCK);
        let mut buf = vec![0u8; (pos - start) as usize];
        reader.seek(SeekFrom::Start(start))?;
        reader.read_exact(&mut buf)?;
        if pos == len {
            terminated = buf.last().copied().is_some_and(is_terminator);
        }
        pos = start;

        let mut end = buf.len();
        if !in_line {
            while end > 0 && is_terminator(buf[end - 1]) {
                end -= 1;
            }
            if end == 0 {
                continue;
            }
            in_line = true;
        }

        match buf[..end].iter().rposition(|b| is_terminator(*b)) {
            Some(idx) => {
                line.splice(0..0, buf[idx + 1..end].iter().copied());
                break;
            }
            None => {
                line.splice(0..0, buf[..end].iter().copied());
            }
        }
    }

    if !in_line {
        return Ok(Tail {
            last_line: None,
            terminated,
        });
    }

    let line = String::from_utf8(line).context("Last line is not valid UTF-8")?;
    Ok(Tail {
        last_line: Some(line),
        terminated,
    })
}

/// Timestamp of a log line's first field. The header line has none.
pub(crate) fn parse_last_seen(line: &str) -> Result<Option<DateTime<Local>>> {
    let first = line.split(',').next().unwrap_or_default();
    if first == HEADER[0] {
        return Ok(None);
    }
    parse_time(first).map(Some)
}

/// Join fields into one CSV record (no line terminator).
///
/// Line breaks inside a field become spaces so every record stays on one
/// line, which last-line recovery relies on. Fields containing a delimiter or
/// quote, or starting with whitespace, are quoted with embedded quotes doubled.
pub fn encode_record(fields: &[&str]) -> String {
    let mut out = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let field = field.replace(['\r', '\n'], " ");
        if needs_quotes(&field) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&field);
        }
    }
    out
}

fn needs_quotes(field: &str) -> bool {
    if field.is_empty() {
        return false;
    }
    field.contains([',', '"']) || field.starts_with([' ', '\t'])
}
