//! Core data types for batched geocoding.
//!
//! This module defines the keys, coordinates and stores a run works on, the
//! run configuration, and the progress/report values handed back to callers.

use crate::error::{FailureKind, GeobatchError, GeocodeFailure};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Sentinel the listings use for "no value".
pub const UNDEFINED_SENTINEL: &str = "undefined";

/// A normalized place name, the unit of resolution work.
///
/// Construction trims surrounding whitespace and rejects the empty string and
/// the `undefined` sentinel, so every `LocationKey` in a store is usable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LocationKey(String);

impl LocationKey {
    pub fn new(raw: &str) -> Option<Self> {
        let normalized = raw.trim();
        if normalized.is_empty() || normalized == UNDEFINED_SENTINEL {
            None
        } else {
            Some(Self(normalized.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A resolved position, longitude first as in the persisted store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinate {
    pub longitude: f64,
    pub latitude: f64,
}

impl Coordinate {
    /// Build a coordinate, rejecting NaN and infinities.
    pub fn new(longitude: f64, latitude: f64) -> Option<Self> {
        if longitude.is_finite() && latitude.is_finite() {
            Some(Self {
                longitude,
                latitude,
            })
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntry {
    pub key: LocationKey,
    pub coordinate: Coordinate,
}

/// All known name → coordinate pairs, in insertion order.
///
/// Loaded rows come first in file order, followed by keys resolved during the
/// run in the order their windows completed. Iteration order is what the
/// checkpoint writer serializes, so two snapshots of an unchanged store are
/// byte-identical.
#[derive(Debug, Clone, Default)]
pub struct ResolvedStore {
    entries: Vec<ResolvedEntry>,
    index: HashMap<LocationKey, usize>,
}

impl ResolvedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row read from the persisted store.
    ///
    /// A later row for an already loaded key replaces the earlier value but
    /// keeps its position.
    pub fn insert_loaded(&mut self, entry: ResolvedEntry) {
        match self.index.get(&entry.key) {
            Some(&position) => self.entries[position].coordinate = entry.coordinate,
            None => {
                self.index.insert(entry.key.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Record a freshly resolved key. Never overwrites an existing value.
    ///
    /// Returns `true` if the key was inserted.
    pub fn promote(&mut self, key: LocationKey, coordinate: Coordinate) -> bool {
        if self.index.contains_key(&key) {
            return false;
        }
        self.index.insert(key.clone(), self.entries.len());
        self.entries.push(ResolvedEntry { key, coordinate });
        true
    }

    pub fn get(&self, key: &LocationKey) -> Option<Coordinate> {
        self.index
            .get(key)
            .map(|&position| self.entries[position].coordinate)
    }

    pub fn contains(&self, key: &LocationKey) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedEntry> {
        self.entries.iter()
    }
}

/// Keys awaiting resolution, duplicate-free, in corpus scan order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingSet {
    keys: Vec<LocationKey>,
}

impl PendingSet {
    pub(crate) fn from_ordered(keys: Vec<LocationKey>) -> Self {
        Self { keys }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocationKey> {
        self.keys.iter()
    }

    /// Consecutive windows of at most `width` keys. `width` is raised to 1.
    pub fn windows(&self, width: usize) -> std::slice::Chunks<'_, LocationKey> {
        self.keys.chunks(width.max(1))
    }

    /// Number of windows `windows(width)` yields.
    pub fn window_count(&self, width: usize) -> usize {
        self.keys.len().div_ceil(width.max(1))
    }
}

/// A key whose request cycle ended without coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    pub key: LocationKey,
    pub failure: GeocodeFailure,
}

impl FailureRecord {
    pub fn kind(&self) -> FailureKind {
        self.failure.kind()
    }
}

/// Snapshot of run progress, emitted after every completed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// 1-based index of the window that just completed
    pub window: usize,
    pub total_windows: usize,
    /// Pending keys whose request cycle has finished
    pub processed: usize,
    /// Size of the pending set at the start of the run
    pub total: usize,
    /// Keys promoted into the resolved store so far
    pub resolved: usize,
    /// Cumulative failure count
    pub errors: usize,
}

/// Everything a finished run hands back to its caller.
#[derive(Debug)]
pub struct RunReport {
    /// Loaded entries plus everything resolved during the run
    pub resolved: ResolvedStore,
    /// Every failed key with its cause, in window order
    pub errors: Vec<FailureRecord>,
    pub windows: usize,
    pub processed: usize,
    pub newly_resolved: usize,
    /// Successful checkpoint writes, the final one included
    pub checkpoints_written: usize,
    pub checkpoint_failures: usize,
    /// Outcome of the checkpoint taken after the last window
    pub final_checkpoint: Result<(), GeobatchError>,
}

impl RunReport {
    /// Failure counts grouped by kind.
    pub fn error_counts(&self) -> HashMap<FailureKind, usize> {
        let mut counts = HashMap::new();
        for record in &self.errors {
            *counts.entry(record.kind()).or_insert(0) += 1;
        }
        counts
    }
}

/// Which JSON shape the provider answers with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// `results[0].geometry.location.{lng,lat}` with a top-level `status`
    Google,
    /// `candidates[0].location.{x,y}`
    ArcGis,
}

impl PayloadFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "google" => Some(Self::Google),
            "arcgis" => Some(Self::ArcGis),
            _ => None,
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadFormat::Google => write!(f, "google"),
            PayloadFormat::ArcGis => write!(f, "arcgis"),
        }
    }
}

pub const DEFAULT_BASE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";
pub const MAX_CONCURRENCY: usize = 100;

/// Settings for one geocoding run.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    /// Previously resolved entries to load
    pub store_in: PathBuf,
    /// Where checkpoints are written
    pub store_out: PathBuf,
    /// Raw place-name listing
    pub corpus: PathBuf,

    /// Provider endpoint, without query string
    pub base_url: String,
    /// Query parameter carrying the place name
    pub query_param: String,
    /// Appended as `key=` when set
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub format: PayloadFormat,

    /// Window width W: requests in flight at once
    /// Default: 10, Range: 1-100
    pub concurrency: usize,
    /// Checkpoint after every K completed windows
    /// Default: 50
    pub checkpoint_every: usize,
    /// Per-request timeout
    /// Default: 10 seconds
    #[serde(skip)]
    pub timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            store_in: PathBuf::from("geocodes.list"),
            store_out: PathBuf::from("geocodes2.list"),
            corpus: PathBuf::from("locations.list"),
            base_url: DEFAULT_BASE_URL.to_string(),
            query_param: "address".to_string(),
            api_key: None,
            format: PayloadFormat::Google,
            concurrency: 10,
            checkpoint_every: 50,
            timeout: Duration::from_secs(10),
        }
    }
}

impl RunConfig {
    /// Set the window width, clamped to 1..=100.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.clamp(1, MAX_CONCURRENCY);
        self
    }

    /// Set the checkpoint cadence in windows (at least 1).
    pub fn with_checkpoint_every(mut self, windows: usize) -> Self {
        self.checkpoint_every = windows.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_query_param<S: Into<String>>(mut self, query_param: S) -> Self {
        self.query_param = query_param.into();
        self
    }

    pub fn with_api_key<S: Into<String>>(mut self, api_key: S) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_format(mut self, format: PayloadFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_paths<P: Into<PathBuf>>(mut self, store_in: P, store_out: P, corpus: P) -> Self {
        self.store_in = store_in.into();
        self.store_out = store_out.into();
        self.corpus = corpus.into();
        self
    }
}
