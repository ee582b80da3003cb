//! Artifact naming convention.
//!
//! Every backup is stored as `<database>_<YYYYMMDD>_<HHMMSS>.sql.gz`. The
//! database name may itself contain underscores, so parsing always splits
//! the last two segments off the right-hand side.

use chrono::{NaiveDateTime, Timelike};
use serde::Serialize;
use std::path::PathBuf;
use std::time::SystemTime;

pub const DUMP_EXTENSION: &str = ".sql";
pub const COMPRESSED_EXTENSION: &str = ".sql.gz";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactName {
    pub database: String,
    pub created_at: NaiveDateTime,
    pub compressed: bool,
}

impl ArtifactName {
    /// Name for a fresh, uncompressed dump. Sub-second precision is dropped.
    pub fn new(database: impl Into<String>, created_at: NaiveDateTime) -> Self {
        Self {
            database: database.into(),
            created_at: created_at.with_nanosecond(0).unwrap_or(created_at),
            compressed: false,
        }
    }

    pub fn timestamp_token(&self) -> String {
        self.created_at.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn dump_file_name(&self) -> String {
        format!("{}_{}{}", self.database, self.timestamp_token(), DUMP_EXTENSION)
    }

    pub fn compressed_file_name(&self) -> String {
        format!("{}_{}{}", self.database, self.timestamp_token(), COMPRESSED_EXTENSION)
    }

    pub fn file_name(&self) -> String {
        if self.compressed {
            self.compressed_file_name()
        } else {
            self.dump_file_name()
        }
    }

    pub fn parse(file_name: &str) -> Option<Self> {
        let (stem, compressed) = if let Some(stem) = file_name.strip_suffix(COMPRESSED_EXTENSION) {
            (stem, true)
        } else if let Some(stem) = file_name.strip_suffix(DUMP_EXTENSION) {
            (stem, false)
        } else {
            return None;
        };

        let mut parts = stem.rsplitn(3, '_');
        let time = parts.next()?;
        let date = parts.next()?;
        let database = parts.next()?;

        if database.is_empty() || !is_digits(date, 8) || !is_digits(time, 6) {
            return None;
        }

        let created_at =
            NaiveDateTime::parse_from_str(&format!("{date}_{time}"), TIMESTAMP_FORMAT).ok()?;

        Some(Self {
            database: database.to_string(),
            created_at,
            compressed,
        })
    }
}

fn is_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}

/// A compressed artifact found in the archive directory.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub name: ArtifactName,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.name.file_name()
    }
}
