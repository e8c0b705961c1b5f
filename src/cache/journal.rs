//! Journal Module
//!
//! Encodes and decodes the append-only journal and performs the atomic
//! rebuild used by compaction.
//!
//! # Format
//! ```text
//! disk_cache.journal
//! 1
//! <app version>
//! <value count>
//!
//! DIRTY key1
//! CLEAN key1 832 21054
//! READ key1
//! REMOVE key1
//! ```

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use crate::cache::{delete_if_exists, validate_key, LineReader};
use crate::error::{CacheError, Result};

// == Public Constants ==
/// Live journal file name
pub const JOURNAL_FILE: &str = "journal";
/// Journal written during a rebuild before it is swapped in
pub const JOURNAL_FILE_TEMP: &str = "journal.tmp";
/// Previous journal kept while the rebuilt one is swapped in
pub const JOURNAL_FILE_BACKUP: &str = "journal.bkp";

/// First header line
pub const MAGIC: &str = "disk_cache.journal";
/// Second header line
pub const VERSION: &str = "1";

const CLEAN: &str = "CLEAN";
const DIRTY: &str = "DIRTY";
const REMOVE: &str = "REMOVE";
const READ: &str = "READ";

// == Journal Header ==
/// The five header lines every journal starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalHeader {
    pub app_version: u32,
    pub value_count: usize,
}

impl JournalHeader {
    pub fn new(app_version: u32, value_count: usize) -> Self {
        Self {
            app_version,
            value_count,
        }
    }

    /// Writes the header, including the trailing blank line.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writeln!(writer, "{}", MAGIC)?;
        writeln!(writer, "{}", VERSION)?;
        writeln!(writer, "{}", self.app_version)?;
        writeln!(writer, "{}", self.value_count)?;
        writeln!(writer)
    }

    /// Reads the header from `reader` and checks it against `self`.
    ///
    /// Any difference, including a header cut short, is a `HeaderMismatch`.
    pub fn verify<R: Read>(&self, reader: &mut LineReader<R>) -> Result<()> {
        let expected: [(&'static str, String); 5] = [
            ("magic", MAGIC.to_string()),
            ("version", VERSION.to_string()),
            ("app version", self.app_version.to_string()),
            ("value count", self.value_count.to_string()),
            ("blank line", String::new()),
        ];

        for (field, expected) in expected {
            let found = reader.read_line()?;
            if found.as_deref() != Some(expected.as_str()) {
                return Err(CacheError::HeaderMismatch {
                    field,
                    expected,
                    found: found.unwrap_or_else(|| "<end of journal>".to_string()),
                });
            }
        }
        Ok(())
    }
}

// == Journal Record ==
/// One body line of the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// An edit started; not yet resolved
    Dirty(String),
    /// An entry was published with the given per-slot lengths
    Clean { key: String, lengths: Vec<u64> },
    /// An entry was deleted
    Remove(String),
    /// An entry was read
    Read(String),
}

impl JournalRecord {
    /// Parses one body line for a cache with `value_count` slots.
    pub fn parse(line: &str, value_count: usize) -> Result<Self> {
        let invalid = || CacheError::InvalidJournalLine(line.to_string());

        let (command, rest) = line.split_once(' ').ok_or_else(invalid)?;
        let (key, lengths) = match rest.split_once(' ') {
            Some((key, lengths)) => (key, Some(lengths)),
            None => (rest, None),
        };
        if validate_key(key).is_err() {
            return Err(invalid());
        }

        match (command, lengths) {
            (CLEAN, Some(lengths)) => {
                let lengths = lengths
                    .split(' ')
                    .map(|part| part.parse::<u64>())
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|_| invalid())?;
                if lengths.len() != value_count {
                    return Err(invalid());
                }
                Ok(JournalRecord::Clean {
                    key: key.to_string(),
                    lengths,
                })
            }
            (DIRTY, None) => Ok(JournalRecord::Dirty(key.to_string())),
            (REMOVE, None) => Ok(JournalRecord::Remove(key.to_string())),
            (READ, None) => Ok(JournalRecord::Read(key.to_string())),
            _ => Err(invalid()),
        }
    }
}

impl fmt::Display for JournalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JournalRecord::Dirty(key) => write!(f, "{} {}", DIRTY, key),
            JournalRecord::Remove(key) => write!(f, "{} {}", REMOVE, key),
            JournalRecord::Read(key) => write!(f, "{} {}", READ, key),
            JournalRecord::Clean { key, lengths } => {
                write!(f, "{} {}", CLEAN, key)?;
                for length in lengths {
                    write!(f, " {}", length)?;
                }
                Ok(())
            }
        }
    }
}

// == Journal Writer ==
/// Buffered append handle on the live journal.
#[derive(Debug)]
pub struct JournalWriter {
    writer: BufWriter<File>,
}

impl JournalWriter {
    /// Opens `path` for appending.
    pub fn open_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Buffers one record; call `flush` to make it durable.
    pub fn append(&mut self, record: &JournalRecord) -> Result<()> {
        writeln!(self.writer, "{}", record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

// == Rebuild ==
/// Writes a compact journal holding `records` and atomically swaps it in.
///
/// The new journal is written to `journal.tmp` first. The live journal is
/// then renamed to `journal.bkp`, the temp file renamed to `journal`, and the
/// backup deleted, so a crash at any point leaves either the live journal or
/// the backup complete. Returns an append handle on the new journal.
pub fn rebuild<I>(directory: &Path, header: &JournalHeader, records: I) -> Result<JournalWriter>
where
    I: IntoIterator<Item = JournalRecord>,
{
    let journal = directory.join(JOURNAL_FILE);
    let temp = directory.join(JOURNAL_FILE_TEMP);
    let backup = directory.join(JOURNAL_FILE_BACKUP);

    {
        let mut writer = BufWriter::new(File::create(&temp)?);
        header.write_to(&mut writer)?;
        for record in records {
            writeln!(writer, "{}", record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    if journal.exists() {
        delete_if_exists(&backup)?;
        fs::rename(&journal, &backup)?;
    }
    fs::rename(&temp, &journal)?;
    delete_if_exists(&backup)?;

    JournalWriter::open_append(&journal)
}
