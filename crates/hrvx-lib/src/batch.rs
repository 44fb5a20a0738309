//! Batch scheduling: map process-and-cache over case directories with
//! a bounded worker pool and a per-case deadline.
//!
//! Failures are isolated per case. A worker that outlives its deadline
//! is abandoned: the main loop stops waiting for it and raises an
//! abandon flag, which the worker checks right before the cache write
//! so a late result can never be published.

use crate::cache::CaseCache;
use crate::case::{self, is_case_id, Case, ProcessOptions};
use crate::error::{DiscoveryError, Error};
use crate::io::source::SignalSource;
use log::{info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// A case directory found under the data root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCase {
    pub dir: PathBuf,
    pub pathology: String,
    pub id: String,
}

/// Find `<pathology>_<case-id>/<case-id>` directories under `root`,
/// sorted by (pathology, id). `pathology` filters by label prefix and
/// `limit` truncates after sorting.
pub fn discover_cases(
    root: &Path,
    pathology: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<DiscoveredCase>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::MissingRoot(root.to_path_buf()));
    }
    let mut found = Vec::new();
    let entries = fs::read_dir(root)
        .map_err(|source| DiscoveryError::Io { path: root.to_path_buf(), source })?;
    for entry in entries {
        let entry = entry
            .map_err(|source| DiscoveryError::Io { path: root.to_path_buf(), source })?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = match path.file_name().and_then(|s| s.to_str()) {
            Some(name) => name,
            None => continue,
        };
        let (label, id) = match name.rsplit_once('_') {
            Some(split) => split,
            None => continue,
        };
        if label.is_empty() || !is_case_id(id) {
            continue;
        }
        if let Some(prefix) = pathology {
            if !label.starts_with(prefix) {
                continue;
            }
        }
        found.push(DiscoveredCase {
            dir: path.join(id),
            pathology: label.to_string(),
            id: id.to_string(),
        });
    }
    found.sort_by(|a, b| (&a.pathology, &a.id).cmp(&(&b.pathology, &b.id)));
    if let Some(n) = limit {
        found.truncate(n);
    }
    Ok(found)
}

/// Options governing one batch run.
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub process: ProcessOptions,
    /// Minimum samples for a segment to qualify.
    pub sig_thresh: u64,
    /// Worker pool size.
    pub workers: usize,
    /// Per-case processing deadline.
    pub case_timeout: Duration,
}

impl BatchOptions {
    pub fn new(process: ProcessOptions) -> Self {
        Self {
            process,
            sig_thresh: 1000,
            workers: thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            case_timeout: Duration::from_secs(1800),
        }
    }
}

/// Outcome tally of one batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    /// Cases processed and written to the cache.
    pub cached: usize,
    /// Cases skipped because their entry already existed.
    pub hits: usize,
    /// Cases skipped for signal reasons (no usable channel).
    pub skipped: usize,
    /// Cases that failed discovery, processing, or the cache write.
    pub failed: usize,
    /// Cases abandoned at the deadline.
    pub timed_out: usize,
}

enum CaseOutcome {
    Cached,
    Skipped,
    Failed,
}

struct InFlight {
    label: String,
    abandon: Arc<AtomicBool>,
    deadline: Instant,
}

/// Bounded worker pool over case directories.
pub struct BatchRunner<S> {
    source: S,
    cache: CaseCache,
    opts: BatchOptions,
}

impl<S: SignalSource + Clone + 'static> BatchRunner<S> {
    pub fn new(source: S, cache: CaseCache, opts: BatchOptions) -> Self {
        Self { source, cache, opts }
    }

    /// Process every case directory. One case failing, timing out, or
    /// being skipped never aborts its siblings.
    pub fn run(&self, case_dirs: &[PathBuf]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let workers = self.opts.workers.max(1);
        let (tx, rx) = mpsc::channel::<(u64, CaseOutcome)>();
        let mut in_flight: HashMap<u64, InFlight> = HashMap::new();
        let mut ticket: u64 = 0;
        let mut next = 0;

        while next < case_dirs.len() || !in_flight.is_empty() {
            while in_flight.len() < workers && next < case_dirs.len() {
                let dir = case_dirs[next].clone();
                next += 1;
                if let Some(id) = case_id_of(&dir) {
                    if self.cache.contains(&id) {
                        info!("cache hit for {id}, skipping");
                        summary.hits += 1;
                        continue;
                    }
                }
                let abandon = Arc::new(AtomicBool::new(false));
                let worker = InFlight {
                    label: dir.display().to_string(),
                    abandon: abandon.clone(),
                    deadline: Instant::now() + self.opts.case_timeout,
                };
                let worker_tx = tx.clone();
                let source = self.source.clone();
                let cache = self.cache.clone();
                let opts = self.opts;
                let this_ticket = ticket;
                ticket += 1;
                thread::spawn(move || {
                    let outcome = process_and_cache(&source, &cache, &opts, &dir, &abandon);
                    let _ = worker_tx.send((this_ticket, outcome));
                });
                in_flight.insert(this_ticket, worker);
            }
            if in_flight.is_empty() {
                continue;
            }
            let now = Instant::now();
            let wait = in_flight
                .values()
                .map(|w| w.deadline.saturating_duration_since(now))
                .min()
                .unwrap_or(Duration::from_millis(10));
            match rx.recv_timeout(wait) {
                Ok((id, outcome)) => {
                    // a result from an already-abandoned worker is dropped
                    if in_flight.remove(&id).is_some() {
                        match outcome {
                            CaseOutcome::Cached => summary.cached += 1,
                            CaseOutcome::Skipped => summary.skipped += 1,
                            CaseOutcome::Failed => summary.failed += 1,
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    let expired: Vec<u64> = in_flight
                        .iter()
                        .filter(|(_, w)| w.deadline <= now)
                        .map(|(&id, _)| id)
                        .collect();
                    for id in expired {
                        if let Some(worker) = in_flight.remove(&id) {
                            worker.abandon.store(true, Ordering::Relaxed);
                            warn!(
                                "case at {} timed out after {:?}, worker abandoned",
                                worker.label, self.opts.case_timeout
                            );
                            summary.timed_out += 1;
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        info!(
            "batch done: {} cached, {} hits, {} skipped, {} failed, {} timed out",
            summary.cached, summary.hits, summary.skipped, summary.failed, summary.timed_out
        );
        summary
    }
}

fn process_and_cache<S: SignalSource>(
    source: &S,
    cache: &CaseCache,
    opts: &BatchOptions,
    dir: &Path,
    abandon: &AtomicBool,
) -> CaseOutcome {
    let case = match Case::discover(source, dir, opts.sig_thresh) {
        Ok(case) => case,
        Err(err) => {
            warn!("discovery failed for {}: {err}", dir.display());
            return CaseOutcome::Failed;
        }
    };
    let processed = match case::process(source, case, &opts.process) {
        Ok(processed) => processed,
        Err(Error::Signal(err)) => {
            warn!("{err}");
            return CaseOutcome::Skipped;
        }
        Err(err) => {
            warn!("processing failed for {}: {err}", dir.display());
            return CaseOutcome::Failed;
        }
    };
    if abandon.load(Ordering::Relaxed) {
        return CaseOutcome::Skipped;
    }
    match cache.save(&processed) {
        Ok(_) => CaseOutcome::Cached,
        Err(err) => {
            warn!("cache write failed for {}: {err}", processed.case.id);
            CaseOutcome::Failed
        }
    }
}

fn case_id_of(dir: &Path) -> Option<String> {
    dir.file_name()
        .and_then(|s| s.to_str())
        .filter(|name| is_case_id(name))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{AnalysisMode, AnalysisWindows, ProcessOptions};
    use crate::analysis::window::WindowConfig;
    use crate::detectors::peaks::PeakConfig;
    use crate::io::source::mem::{MemRecord, MemSource};
    use crate::io::source::{RecordingEntry, RecordingHeader};
    use crate::signal::TimeSeries;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn bump_channel(fs: f64, beats: usize) -> Vec<f64> {
        let period = (0.8 * fs) as usize;
        let mut data = vec![0.0; period * (beats + 1)];
        for b in 1..=beats {
            data[b * period] = 1.0;
        }
        data
    }

    fn small_batch_options() -> BatchOptions {
        let process = ProcessOptions {
            mode: AnalysisMode::Full,
            windows: AnalysisWindows {
                linear: WindowConfig::new(8, 0.5).unwrap(),
                nonlinear: WindowConfig::new(8, 0.5).unwrap(),
            },
            peaks: PeakConfig::default(),
        };
        let mut opts = BatchOptions::new(process);
        opts.sig_thresh = 0;
        opts.workers = 2;
        opts
    }

    fn mem_case(records: &mut BTreeMap<PathBuf, MemRecord>, dir: &Path, channels: &[&str]) {
        records.insert(
            dir.join("3000001_0001"),
            MemRecord {
                fs: 125.0,
                length: 4000,
                channels: channels
                    .iter()
                    .map(|c| (c.to_string(), bump_channel(125.0, 30)))
                    .collect(),
            },
        );
    }

    fn data_tree(root: &Path, labels: &[(&str, &str)]) -> Vec<PathBuf> {
        labels
            .iter()
            .map(|(pathology, id)| {
                let dir = root.join(format!("{pathology}_{id}")).join(id);
                fs::create_dir_all(&dir).unwrap();
                dir
            })
            .collect()
    }

    #[test]
    fn discovery_sorts_filters_and_limits() {
        let tmp = tempdir().unwrap();
        let root = tmp.path();
        data_tree(
            root,
            &[
                ("myocardial_infarction", "p000003"),
                ("atrial_fibrillation", "p000001"),
                ("congestive_heartfailure", "p000002"),
                ("atrial_fibrillation", "p000009"),
            ],
        );
        fs::create_dir_all(root.join("not_a_case")).unwrap();
        fs::write(root.join("stray.txt"), "x").unwrap();

        let all = discover_cases(root, None, None).unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["p000001", "p000009", "p000002", "p000003"]);
        assert_eq!(all[0].pathology, "atrial_fibrillation");
        assert!(all[0].dir.ends_with("atrial_fibrillation_p000001/p000001"));

        let filtered = discover_cases(root, Some("atrial"), None).unwrap();
        assert_eq!(filtered.len(), 2);

        let limited = discover_cases(root, None, Some(3)).unwrap();
        assert_eq!(limited.len(), 3);

        let err = discover_cases(&root.join("missing"), None, None).unwrap_err();
        assert!(matches!(err, DiscoveryError::MissingRoot(_)));
    }

    #[test]
    fn runner_caches_good_cases_and_isolates_bad_ones() {
        let tmp = tempdir().unwrap();
        let dirs = data_tree(
            tmp.path().join("data").as_path(),
            &[
                ("atrial_fibrillation", "p000001"),
                ("congestive_heartfailure", "p000002"),
                ("myocardial_infarction", "p000003"),
            ],
        );
        let mut records = BTreeMap::new();
        mem_case(&mut records, &dirs[0], &["II", "RESP"]);
        mem_case(&mut records, &dirs[1], &["V"]);
        // p000003 has only non-cardiac channels and must be skipped
        mem_case(&mut records, &dirs[2], &["RESP", "PLETH"]);
        let source = MemSource::new(records);

        let cache = CaseCache::open(tmp.path().join("cache")).unwrap();
        let runner = BatchRunner::new(source, cache.clone(), small_batch_options());
        let summary = runner.run(&dirs);

        assert_eq!(summary.cached, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.timed_out, 0);
        assert!(cache.contains("p000001"));
        assert!(cache.contains("p000002"));
        assert!(!cache.contains("p000003"));

        // second run over the same directories is all cache hits
        let summary = runner.run(&dirs);
        assert_eq!(summary.hits, 2);
        assert_eq!(summary.cached, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn discovery_failure_counts_as_failed() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("data").join("oddly-named").join("p000001");
        fs::create_dir_all(&dir).unwrap();
        let cache = CaseCache::open(tmp.path().join("cache")).unwrap();
        let runner = BatchRunner::new(MemSource::default(), cache, small_batch_options());
        let summary = runner.run(&[dir]);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.cached, 0);
    }

    /// Source whose channel reads stall long enough to blow a short
    /// deadline.
    #[derive(Clone)]
    struct SlowSource {
        inner: MemSource,
        delay: Duration,
    }

    impl SignalSource for SlowSource {
        fn list_recordings(
            &self,
            case_dir: &Path,
            min_length: u64,
        ) -> Result<Vec<RecordingEntry>, DiscoveryError> {
            self.inner.list_recordings(case_dir, min_length)
        }

        fn read_header(&self, record: &Path) -> Result<RecordingHeader, DiscoveryError> {
            self.inner.read_header(record)
        }

        fn read_channel(&self, record: &Path, channel: &str) -> Result<TimeSeries, Error> {
            thread::sleep(self.delay);
            self.inner.read_channel(record, channel)
        }
    }

    #[test]
    fn deadline_abandons_the_worker_and_blocks_its_cache_write() {
        let tmp = tempdir().unwrap();
        let dirs = data_tree(
            tmp.path().join("data").as_path(),
            &[("atrial_fibrillation", "p000001")],
        );
        let mut records = BTreeMap::new();
        mem_case(&mut records, &dirs[0], &["II"]);
        let source = SlowSource {
            inner: MemSource::new(records),
            delay: Duration::from_millis(250),
        };

        let cache = CaseCache::open(tmp.path().join("cache")).unwrap();
        let mut opts = small_batch_options();
        opts.case_timeout = Duration::from_millis(25);
        let runner = BatchRunner::new(source, cache.clone(), opts);

        let started = Instant::now();
        let summary = runner.run(&dirs);
        assert!(started.elapsed() < Duration::from_millis(200), "run did not detach");
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.cached, 0);

        // give the abandoned worker time to finish and prove it stayed quiet
        thread::sleep(Duration::from_millis(400));
        assert!(!cache.contains("p000001"));
    }
}
