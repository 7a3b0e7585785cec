use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

const PARQUET_MAGIC: &[u8] = b"PAR1";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const SNIFF_BYTES: u64 = 8 * 1024;

/// Serializations the decoder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum SourceFormat {
    Parquet,
    Csv,
    CsvGzip,
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFormat::Parquet => f.write_str("parquet"),
            SourceFormat::Csv => f.write_str("csv"),
            SourceFormat::CsvGzip => f.write_str("csv_gzip"),
        }
    }
}

impl SourceFormat {
    /// Identify the format from the leading bytes of `path`.
    pub fn sniff(path: &Path, origin: &str) -> Result<Self, DecodeError> {
        let io_err = |source| DecodeError::Io {
            origin: origin.to_string(),
            path: path.to_path_buf(),
            source,
        };
        let mut head = Vec::with_capacity(SNIFF_BYTES as usize);
        File::open(path)
            .map_err(io_err)?
            .take(SNIFF_BYTES)
            .read_to_end(&mut head)
            .map_err(io_err)?;

        Self::from_leading_bytes(&head).ok_or_else(|| DecodeError::UnrecognizedFormat {
            origin: origin.to_string(),
            reason: if head.is_empty() {
                "file is empty".to_string()
            } else {
                "content is neither Parquet, gzip nor UTF-8 text".to_string()
            },
        })
    }

    fn from_leading_bytes(head: &[u8]) -> Option<Self> {
        if head.is_empty() {
            return None;
        }
        if head.starts_with(PARQUET_MAGIC) {
            return Some(SourceFormat::Parquet);
        }
        if head.starts_with(GZIP_MAGIC) {
            return Some(SourceFormat::CsvGzip);
        }
        if head.contains(&0) {
            return None;
        }
        match std::str::from_utf8(head) {
            Ok(_) => Some(SourceFormat::Csv),
            // the sample may end in the middle of a multi-byte character
            Err(e) if e.error_len().is_none() => Some(SourceFormat::Csv),
            Err(_) => None,
        }
    }
}
