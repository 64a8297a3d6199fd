//! Line-delimited JSON loading.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};

use docql_core::datum::Datum;

use crate::error::{Result, StorageError};

/// Parse one document per non-blank line.
pub fn read_documents<R: Read>(reader: R) -> Result<Vec<Datum>> {
    let mut out = Vec::new();
    for (i, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let doc: Datum = serde_json::from_str(&line).map_err(|source| StorageError::Malformed {
            line: i + 1,
            source,
        })?;
        out.push(doc);
    }
    Ok(out)
}

pub fn read_path(path: &str) -> Result<Vec<Datum>> {
    read_documents(File::open(path)?)
}
