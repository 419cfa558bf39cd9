//! Windowed batch dispatcher.
//!
//! This module drives a whole run: it walks the pending set in fixed-width
//! windows, resolves every key of a window concurrently, and only advances
//! once every request in the window has finished. All store mutations happen
//! here, after the join, so in-flight requests never share mutable state.

use crate::checkpoint::Checkpointer;
use crate::provider::Geocoder;
use crate::types::{FailureRecord, PendingSet, Progress, ResolvedStore, RunConfig, RunReport};
use futures_util::future::join_all;
use tracing::{info, warn};

/// Resolves a pending set with at most `width` requests in flight.
///
/// # Example
///
/// ```rust,no_run
/// use geobatch_lib::{load_stores, BatchDispatcher, CheckpointWriter, GeocodeClient, RunConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = RunConfig::default().with_concurrency(10);
///     let (resolved, pending) = load_stores(Vec::new(), Vec::<String>::new());
///
///     let dispatcher = BatchDispatcher::with_config(
///         GeocodeClient::with_config(&config)?,
///         CheckpointWriter::new(&config.store_out),
///         &config,
///     );
///     let report = dispatcher.run(resolved, pending).await;
///     println!("{} resolved, {} failed", report.newly_resolved, report.errors.len());
///     Ok(())
/// }
/// ```
pub struct BatchDispatcher<G, C> {
    geocoder: G,
    checkpointer: C,
    /// Window width W
    width: usize,
    /// Checkpoint after every K completed windows
    checkpoint_every: usize,
}

impl<G: Geocoder, C: Checkpointer> BatchDispatcher<G, C> {
    pub fn with_config(geocoder: G, checkpointer: C, config: &RunConfig) -> Self {
        Self {
            geocoder,
            checkpointer,
            width: config.concurrency.max(1),
            checkpoint_every: config.checkpoint_every.max(1),
        }
    }

    /// Resolve every pending key and return the final state of the run.
    pub async fn run(&self, resolved: ResolvedStore, pending: PendingSet) -> RunReport {
        self.run_with_progress(resolved, pending, |_| {}).await
    }

    /// Like [`run`](Self::run), calling `on_progress` after every window.
    ///
    /// The run never aborts on a per-key failure or a failed periodic
    /// checkpoint; both are recorded in the returned report.
    pub async fn run_with_progress<F>(
        &self,
        mut resolved: ResolvedStore,
        pending: PendingSet,
        mut on_progress: F,
    ) -> RunReport
    where
        F: FnMut(&Progress),
    {
        let total = pending.len();
        let total_windows = pending.window_count(self.width);
        let mut errors: Vec<FailureRecord> = Vec::new();
        let mut processed = 0usize;
        let mut newly_resolved = 0usize;
        let mut checkpoints_written = 0usize;
        let mut checkpoint_failures = 0usize;

        info!(
            pending = total,
            already_resolved = resolved.len(),
            width = self.width,
            windows = total_windows,
            "starting run"
        );

        for (index, window) in pending.windows(self.width).enumerate() {
            // Join barrier: the next window starts only after all of these finish.
            let outcomes = join_all(window.iter().map(|key| async move {
                let outcome = self.geocoder.resolve(key).await;
                (key, outcome)
            }))
            .await;

            for (key, outcome) in outcomes {
                match outcome {
                    Ok(coordinate) => {
                        if resolved.promote(key.clone(), coordinate) {
                            newly_resolved += 1;
                        }
                    }
                    Err(failure) => errors.push(FailureRecord {
                        key: key.clone(),
                        failure,
                    }),
                }
            }
            processed += window.len();

            let progress = Progress {
                window: index + 1,
                total_windows,
                processed,
                total,
                resolved: newly_resolved,
                errors: errors.len(),
            };
            info!(
                processed,
                total,
                errors = errors.len(),
                "window {}/{} done",
                progress.window,
                total_windows
            );
            on_progress(&progress);

            let completed = index + 1;
            if completed % self.checkpoint_every == 0 && completed < total_windows {
                match self.checkpointer.persist(&resolved).await {
                    Ok(()) => checkpoints_written += 1,
                    Err(e) => {
                        checkpoint_failures += 1;
                        warn!(window = completed, error = %e, "checkpoint failed, continuing");
                    }
                }
            }
        }

        let final_checkpoint = self.checkpointer.persist(&resolved).await;
        match &final_checkpoint {
            Ok(()) => checkpoints_written += 1,
            Err(e) => {
                checkpoint_failures += 1;
                warn!(error = %e, "final checkpoint failed");
            }
        }

        info!(
            processed,
            newly_resolved,
            errors = errors.len(),
            total_resolved = resolved.len(),
            "run finished"
        );

        RunReport {
            resolved,
            errors,
            windows: total_windows,
            processed,
            newly_resolved,
            checkpoints_written,
            checkpoint_failures,
            final_checkpoint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, GeobatchError, GeocodeFailure};
    use crate::store::load_stores;
    use crate::types::{Coordinate, LocationKey};
    use std::collections::HashMap;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Start(String),
        End(String),
    }

    /// Answers from a table; unknown keys get `EmptyResult`.
    #[derive(Default)]
    struct FakeGeocoder {
        outcomes: HashMap<String, Result<Coordinate, GeocodeFailure>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        events: Mutex<Vec<Event>>,
    }

    impl FakeGeocoder {
        fn resolving_all(keys: &[String]) -> Self {
            let outcomes = keys
                .iter()
                .enumerate()
                .map(|(i, k)| (k.clone(), Ok(Coordinate::new(i as f64, 1.0).unwrap())))
                .collect();
            Self {
                outcomes,
                ..Default::default()
            }
        }

        fn with_outcome(mut self, key: &str, outcome: Result<Coordinate, GeocodeFailure>) -> Self {
            self.outcomes.insert(key.to_string(), outcome);
            self
        }
    }

    impl Geocoder for FakeGeocoder {
        fn resolve(
            &self,
            key: &LocationKey,
        ) -> impl Future<Output = Result<Coordinate, GeocodeFailure>> + Send {
            let key = key.as_str().to_string();
            async move {
                self.events.lock().unwrap().push(Event::Start(key.clone()));
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);

                tokio::task::yield_now().await;

                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.events.lock().unwrap().push(Event::End(key.clone()));
                self.outcomes
                    .get(&key)
                    .cloned()
                    .unwrap_or(Err(GeocodeFailure::EmptyResult))
            }
        }
    }

    /// Records the store size at every persist; fails on the listed calls (1-based).
    #[derive(Default)]
    struct RecordingCheckpointer {
        sizes: Mutex<Vec<usize>>,
        fail_on: Vec<usize>,
    }

    impl Checkpointer for RecordingCheckpointer {
        fn persist(
            &self,
            store: &ResolvedStore,
        ) -> impl Future<Output = Result<(), GeobatchError>> + Send {
            let size = store.len();
            async move {
                let mut sizes = self.sizes.lock().unwrap();
                sizes.push(size);
                if self.fail_on.contains(&sizes.len()) {
                    Err(GeobatchError::io_failure("memory", "disk full"))
                } else {
                    Ok(())
                }
            }
        }
    }

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("place-{i:03}")).collect()
    }

    fn pending_of(names: &[String]) -> (ResolvedStore, PendingSet) {
        let keys = names.iter().map(|n| LocationKey::new(n).unwrap());
        load_stores(keys, Vec::<String>::new())
    }

    fn dispatcher<'a>(
        geocoder: &'a FakeGeocoder,
        checkpointer: &'a RecordingCheckpointer,
        width: usize,
        every: usize,
    ) -> BatchDispatcher<&'a FakeGeocoder, &'a RecordingCheckpointer> {
        let config = RunConfig::default()
            .with_concurrency(width)
            .with_checkpoint_every(every);
        BatchDispatcher::with_config(geocoder, checkpointer, &config)
    }

    #[tokio::test]
    async fn test_window_count_is_ceiling() {
        for (n, width, expected) in [(0, 3, 0), (1, 3, 1), (3, 3, 1), (7, 3, 3), (9, 3, 3), (10, 1, 10)] {
            let keys = names(n);
            let geocoder = FakeGeocoder::resolving_all(&keys);
            let checkpointer = RecordingCheckpointer::default();
            let (resolved, pending) = pending_of(&keys);

            let mut seen = Vec::new();
            let report = dispatcher(&geocoder, &checkpointer, width, 50)
                .run_with_progress(resolved, pending, |p| seen.push(p.window))
                .await;

            assert_eq!(report.windows, expected, "n={n} width={width}");
            assert_eq!(seen, (1..=expected).collect::<Vec<_>>());
            assert_eq!(report.processed, n);
        }
    }

    #[tokio::test]
    async fn test_in_flight_never_exceeds_width() {
        let keys = names(23);
        let geocoder = FakeGeocoder::resolving_all(&keys);
        let checkpointer = RecordingCheckpointer::default();
        let (resolved, pending) = pending_of(&keys);

        dispatcher(&geocoder, &checkpointer, 5, 50)
            .run(resolved, pending)
            .await;

        assert_eq!(geocoder.max_in_flight.load(Ordering::SeqCst), 5);
        assert_eq!(geocoder.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_window_starts_after_previous_completes() {
        let keys = names(10);
        let width = 4;
        let geocoder = FakeGeocoder::resolving_all(&keys);
        let checkpointer = RecordingCheckpointer::default();
        let (resolved, pending) = pending_of(&keys);

        dispatcher(&geocoder, &checkpointer, width, 50)
            .run(resolved, pending)
            .await;

        let window_of: HashMap<&str, usize> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.as_str(), i / width))
            .collect();
        let window_size = |w: usize| keys.len().saturating_sub(w * width).min(width);

        let mut ended = vec![0usize; keys.len().div_ceil(width)];
        for event in geocoder.events.lock().unwrap().iter() {
            match event {
                Event::Start(k) => {
                    let w = window_of[k.as_str()];
                    if w > 0 {
                        assert_eq!(ended[w - 1], window_size(w - 1), "{k} started early");
                    }
                    assert_eq!(ended[w], 0, "{k} started after its window began finishing");
                }
                Event::End(k) => ended[window_of[k.as_str()]] += 1,
            }
        }
    }

    #[tokio::test]
    async fn test_single_failure_does_not_block_others() {
        let keys = names(6);
        let geocoder = FakeGeocoder::resolving_all(&keys)
            .with_outcome(&keys[1], Err(GeocodeFailure::transport("connection reset")))
            .with_outcome(&keys[4], Err(GeocodeFailure::protocol("not json")));
        let checkpointer = RecordingCheckpointer::default();
        let (resolved, pending) = pending_of(&keys);

        let report = dispatcher(&geocoder, &checkpointer, 3, 50)
            .run(resolved, pending)
            .await;

        assert_eq!(report.newly_resolved, 4);
        assert_eq!(report.resolved.len(), 4);
        let failed: Vec<(&str, FailureKind)> = report
            .errors
            .iter()
            .map(|r| (r.key.as_str(), r.kind()))
            .collect();
        assert_eq!(
            failed,
            vec![
                (keys[1].as_str(), FailureKind::TransportFailure),
                (keys[4].as_str(), FailureKind::ProtocolFailure),
            ]
        );
        for record in &report.errors {
            assert!(!report.resolved.contains(&record.key));
        }
    }

    #[tokio::test]
    async fn test_checkpoint_cadence_and_monotonic_sizes() {
        let keys = names(25);
        let geocoder = FakeGeocoder::resolving_all(&keys);
        let checkpointer = RecordingCheckpointer::default();
        let (resolved, pending) = pending_of(&keys);

        // 13 windows of 2: periodic after windows 5 and 10, then the final one.
        let report = dispatcher(&geocoder, &checkpointer, 2, 5)
            .run(resolved, pending)
            .await;

        let sizes = checkpointer.sizes.lock().unwrap().clone();
        assert_eq!(sizes, vec![10, 20, 25]);
        assert_eq!(report.checkpoints_written, 3);
        assert!(sizes.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[tokio::test]
    async fn test_no_duplicate_checkpoint_on_last_window() {
        let keys = names(20);
        let geocoder = FakeGeocoder::resolving_all(&keys);
        let checkpointer = RecordingCheckpointer::default();
        let (resolved, pending) = pending_of(&keys);

        dispatcher(&geocoder, &checkpointer, 2, 5)
            .run(resolved, pending)
            .await;

        assert_eq!(*checkpointer.sizes.lock().unwrap(), vec![10, 20]);
    }

    #[tokio::test]
    async fn test_empty_pending_still_checkpoints() {
        let geocoder = FakeGeocoder::default();
        let checkpointer = RecordingCheckpointer::default();
        let (resolved, pending) = load_stores(
            vec![LocationKey::new("Paris").unwrap()],
            vec!["Paris\t2.35\t48.85"],
        );

        let report = dispatcher(&geocoder, &checkpointer, 10, 50)
            .run(resolved, pending)
            .await;

        assert_eq!(report.windows, 0);
        assert_eq!(report.resolved.len(), 1);
        assert!(report.final_checkpoint.is_ok());
        assert_eq!(*checkpointer.sizes.lock().unwrap(), vec![1]);
        assert!(geocoder.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_checkpoint_does_not_abort_run() {
        let keys = names(8);
        let geocoder = FakeGeocoder::resolving_all(&keys);
        let checkpointer = RecordingCheckpointer {
            fail_on: vec![1],
            ..Default::default()
        };
        let (resolved, pending) = pending_of(&keys);

        let report = dispatcher(&geocoder, &checkpointer, 2, 1)
            .run(resolved, pending)
            .await;

        assert_eq!(report.processed, 8);
        assert_eq!(report.checkpoint_failures, 1);
        assert_eq!(report.checkpoints_written, 3);
        assert!(report.final_checkpoint.is_ok());
        assert_eq!(*checkpointer.sizes.lock().unwrap(), vec![2, 4, 6, 8]);
    }

    #[tokio::test]
    async fn test_final_checkpoint_failure_is_reported() {
        let keys = names(3);
        let geocoder = FakeGeocoder::resolving_all(&keys);
        let checkpointer = RecordingCheckpointer {
            fail_on: vec![1],
            ..Default::default()
        };
        let (resolved, pending) = pending_of(&keys);

        let report = dispatcher(&geocoder, &checkpointer, 10, 50)
            .run(resolved, pending)
            .await;

        assert!(matches!(
            report.final_checkpoint,
            Err(GeobatchError::IoFailure { .. })
        ));
        assert_eq!(report.resolved.len(), 3);
    }

    #[tokio::test]
    async fn test_progress_counts_are_cumulative() {
        let keys = names(5);
        let geocoder = FakeGeocoder::resolving_all(&keys)
            .with_outcome(&keys[0], Err(GeocodeFailure::EmptyResult))
            .with_outcome(&keys[3], Err(GeocodeFailure::EmptyResult));
        let checkpointer = RecordingCheckpointer::default();
        let (resolved, pending) = pending_of(&keys);

        let mut progress = Vec::new();
        dispatcher(&geocoder, &checkpointer, 2, 50)
            .run_with_progress(resolved, pending, |p| progress.push(*p))
            .await;

        let summary: Vec<(usize, usize, usize)> = progress
            .iter()
            .map(|p| (p.processed, p.errors, p.resolved))
            .collect();
        assert_eq!(summary, vec![(2, 1, 1), (4, 2, 2), (5, 2, 3)]);
        assert!(progress.iter().all(|p| p.total == 5 && p.total_windows == 3));
    }
}
