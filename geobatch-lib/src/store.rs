//! Resolved/pending store management.
//!
//! Parses the persisted `key<TAB>lon<TAB>lat` store and the raw corpus
//! listing, and splits the corpus into what is already resolved and what
//! still needs a request. The split itself is a pure function; file access
//! lives in the two `read_*` helpers.

use crate::error::GeobatchError;
use crate::types::{
    Coordinate, LocationKey, PendingSet, ResolvedEntry, ResolvedStore, UNDEFINED_SENTINEL,
};
use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Parse one persisted store record.
///
/// Returns `None` for rows missing a coordinate field, carrying the
/// `undefined` sentinel, or holding anything that is not a finite number.
pub fn parse_store_line(line: &str) -> Option<ResolvedEntry> {
    let mut fields = line.trim_end_matches(['\n', '\r']).split('\t');
    let key = LocationKey::new(fields.next()?)?;
    let longitude = parse_coordinate_field(fields.next()?)?;
    let latitude = parse_coordinate_field(fields.next()?)?;

    Some(ResolvedEntry {
        key,
        coordinate: Coordinate::new(longitude, latitude)?,
    })
}

fn parse_coordinate_field(field: &str) -> Option<f64> {
    let field = field.trim();
    if field.is_empty() || field == UNDEFINED_SENTINEL {
        return None;
    }
    field.parse::<f64>().ok()
}

/// Format one store record, newline-terminated.
///
/// Floats use Rust's shortest round-trip representation, so reading the line
/// back yields the same coordinate.
pub fn format_store_line(entry: &ResolvedEntry) -> String {
    format!(
        "{}\t{}\t{}\n",
        entry.key, entry.coordinate.longitude, entry.coordinate.latitude
    )
}

/// Extract the candidate place name from one corpus line.
///
/// The key is the last tab-separated field, or the second-to-last when the
/// last one is a parenthesised annotation such as `(studio)`. Lines with
/// fewer than two fields are headers or noise and yield `None`.
pub fn corpus_key(line: &str) -> Option<LocationKey> {
    let fields: Vec<&str> = line.trim_end_matches(['\n', '\r']).split('\t').collect();
    if fields.len() < 2 {
        return None;
    }

    let last = fields[fields.len() - 1];
    let candidate = if last.starts_with('(') {
        fields[fields.len() - 2]
    } else {
        last
    };

    LocationKey::new(candidate)
}

/// Split the corpus into resolved and pending keys.
///
/// Malformed persisted rows are dropped. Every corpus key that is not
/// already resolved lands in the pending set exactly once, in the order it
/// was first seen.
pub fn load_stores<K, L, S>(corpus_keys: K, persisted_lines: L) -> (ResolvedStore, PendingSet)
where
    K: IntoIterator<Item = LocationKey>,
    L: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut resolved = ResolvedStore::new();
    let mut dropped = 0usize;
    for line in persisted_lines {
        let line = line.as_ref();
        if line.trim().is_empty() {
            continue;
        }
        match parse_store_line(line) {
            Some(entry) => resolved.insert_loaded(entry),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        debug!(dropped, "skipped malformed persisted rows");
    }

    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    for key in corpus_keys {
        if resolved.contains(&key) || !seen.insert(key.clone()) {
            continue;
        }
        pending.push(key);
    }

    (resolved, PendingSet::from_ordered(pending))
}

/// Read the persisted store into raw lines.
///
/// A missing file is a `FileError` like any other read failure.
pub async fn read_persisted_store<P: AsRef<Path>>(path: P) -> Result<Vec<String>, GeobatchError> {
    let path = path.as_ref();
    let mut lines = Vec::new();
    for_each_line(path, |line| lines.push(line.to_string()))
        .await
        .map_err(|e| {
            let message = if e.kind() == ErrorKind::NotFound {
                "Persisted store not found".to_string()
            } else {
                format!("Failed to read persisted store: {}", e)
            };
            GeobatchError::file_error(path.to_string_lossy(), message)
        })?;

    info!(path = %path.display(), rows = lines.len(), "loaded persisted store");
    Ok(lines)
}

/// Read the corpus listing and extract candidate keys in scan order.
///
/// Duplicates are kept; `load_stores` drops them.
pub async fn read_corpus<P: AsRef<Path>>(path: P) -> Result<Vec<LocationKey>, GeobatchError> {
    let path = path.as_ref();
    let mut keys = Vec::new();
    let scanned = for_each_line(path, |line| keys.extend(corpus_key(line)))
        .await
        .map_err(|e| {
            GeobatchError::file_error(
                path.to_string_lossy(),
                format!("Failed to read corpus: {}", e),
            )
        })?;

    info!(path = %path.display(), lines = scanned, candidates = keys.len(), "read corpus");
    Ok(keys)
}

// Listings are often Latin-1 or mixed; undecodable bytes become U+FFFD.
// Lines are decoded one at a time so the file is never held in memory whole.
async fn for_each_line<F>(path: &Path, mut visit: F) -> std::io::Result<usize>
where
    F: FnMut(&str),
{
    let mut reader = BufReader::new(tokio::fs::File::open(path).await?);
    let mut buf = Vec::new();
    let mut count = 0usize;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        visit(line.trim_end_matches(['\n', '\r']));
        count += 1;
    }

    Ok(count)
}
