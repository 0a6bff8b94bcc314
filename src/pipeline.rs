//! Bounded-concurrency acquisition: skip-if-present → fetch (retry, fallback)
//! → store → transform → emit, one spawned task per asset.
//!
//! A task takes a semaphore permit *before* it is spawned and keeps it until
//! its record is written, so `submit` blocks the producer whenever
//! `concurrency` tasks are in flight. Per-asset failures end up in the
//! task's outcome; only an output write error leaves the pipeline.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, warn};

use crate::assets::AssetTask;
use crate::emit::{Emitter, OutputError};
use crate::fetch::{Fetch, FetchError};
use crate::store::LocalStore;
use crate::transform::{Bounds, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Store,
    Transform,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetch => "fetch",
            Stage::Store => "store",
            Stage::Transform => "transform",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetOutcome {
    /// Raw bytes are on disk; transform pending.
    Downloaded { path: PathBuf },
    /// Already on disk before this run; nothing fetched.
    Skipped {
        path: PathBuf,
        byte_size: u64,
        dimensions: Option<(u32, u32)>,
    },
    Transformed {
        width: u32,
        height: u32,
        byte_size: u64,
    },
    Failed { stage: Stage, cause: String },
}

/// Terminal outcome of one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub task: AssetTask,
    pub outcome: AssetOutcome,
    /// Fetch attempts over all candidate URLs.
    pub attempts: u32,
    /// URL the bytes came from.
    pub source_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub concurrency: usize,
    /// Attempts per candidate URL.
    pub retries: u32,
    pub retry_backoff: Duration,
    pub fetch_timeout: Duration,
    pub skip_existing: bool,
    pub bounds: Bounds,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub submitted: u64,
    pub transformed: u64,
    pub skipped: u64,
    pub failed_fetch: u64,
    pub failed_store: u64,
    pub failed_transform: u64,
    /// Tasks that panicked before reaching an outcome.
    pub crashed: u64,
    pub bytes_written: u64,
    pub fetch_attempts: u64,
}

impl PipelineStats {
    pub fn failed(&self) -> u64 {
        self.failed_fetch + self.failed_store + self.failed_transform + self.crashed
    }

    fn record(&mut self, report: &TaskReport) {
        self.fetch_attempts += report.attempts as u64;
        match &report.outcome {
            AssetOutcome::Transformed { byte_size, .. } => {
                self.transformed += 1;
                self.bytes_written += byte_size;
            }
            AssetOutcome::Skipped { .. } => self.skipped += 1,
            AssetOutcome::Failed { stage, .. } => match stage {
                Stage::Fetch => self.failed_fetch += 1,
                Stage::Store => self.failed_store += 1,
                Stage::Transform => self.failed_transform += 1,
            },
            AssetOutcome::Downloaded { .. } => {}
        }
    }
}

struct Fetched {
    bytes: Vec<u8>,
    url: String,
}

/// Shared, immutable part of the pipeline that every task runs against.
pub struct Worker {
    fetcher: Arc<dyn Fetch>,
    transformer: Arc<dyn Transform>,
    store: LocalStore,
    settings: PipelineSettings,
}

impl Worker {
    pub fn new(
        fetcher: Arc<dyn Fetch>,
        transformer: Arc<dyn Transform>,
        store: LocalStore,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            fetcher,
            transformer,
            store,
            settings,
        }
    }

    /// Drive one task to its terminal outcome. Never fails.
    pub async fn acquire(&self, task: AssetTask) -> TaskReport {
        let path = self.store.path(&task.local_path);

        if self.settings.skip_existing {
            if let Some(byte_size) = self.store.existing_size(&task.local_path).await {
                debug!("{} already present ({} bytes)", task.identifier, byte_size);
                let transformer = Arc::clone(&self.transformer);
                let on_disk = path.clone();
                let dimensions = tokio::task::spawn_blocking(move || transformer.dimensions(&on_disk))
                    .await
                    .unwrap_or(None);
                return report(task, AssetOutcome::Skipped { path, byte_size, dimensions }, 0, None);
            }
        }

        let mut attempts = 0;
        let fetched = match self.fetch_with_fallback(&task, &mut attempts).await {
            Ok(f) => f,
            Err(e) => {
                let outcome = AssetOutcome::Failed {
                    stage: Stage::Fetch,
                    cause: e.to_string(),
                };
                return report(task, outcome, attempts, None);
            }
        };
        let source = Some(fetched.url);
        debug!("Got {}, length: {}", task.identifier, fetched.bytes.len());

        if let Err(e) = self.store.write(&task.local_path, &fetched.bytes).await {
            let outcome = AssetOutcome::Failed {
                stage: Stage::Store,
                cause: format!("{}: {}", path.display(), e),
            };
            return report(task, outcome, attempts, source);
        }
        transition(&task, &AssetOutcome::Downloaded { path: path.clone() });

        let original_size = fetched.bytes.len() as u64;
        let transformer = Arc::clone(&self.transformer);
        let bounds = self.settings.bounds;
        let bytes = fetched.bytes;
        let result = tokio::task::spawn_blocking(move || transformer.transform(&bytes, bounds)).await;

        let outcome = match result {
            Ok(Ok(t)) => {
                let byte_size = match t.bytes {
                    Some(resized) => {
                        let size = resized.len() as u64;
                        if let Err(e) = self.store.write(&task.local_path, &resized).await {
                            let outcome = AssetOutcome::Failed {
                                stage: Stage::Store,
                                cause: format!("{}: {}", path.display(), e),
                            };
                            return report(task, outcome, attempts, source);
                        }
                        size
                    }
                    None => original_size,
                };
                AssetOutcome::Transformed {
                    width: t.width,
                    height: t.height,
                    byte_size,
                }
            }
            // original bytes stay on disk
            Ok(Err(e)) => AssetOutcome::Failed {
                stage: Stage::Transform,
                cause: e.to_string(),
            },
            Err(e) => AssetOutcome::Failed {
                stage: Stage::Transform,
                cause: format!("transform task panicked: {}", e),
            },
        };
        report(task, outcome, attempts, source)
    }

    /// Try each URL in order. Transient errors are retried on the same URL
    /// up to `retries` times; a definite error moves on to the next URL.
    async fn fetch_with_fallback(&self, task: &AssetTask, attempts: &mut u32) -> Result<Fetched, FetchError> {
        let retries = self.settings.retries.max(1);
        let mut last_error = None;

        for url in &task.urls {
            debug!("Trying to get: {}", url);
            for attempt in 1..=retries {
                *attempts += 1;
                match self.fetcher.fetch(url, self.settings.fetch_timeout).await {
                    Ok(bytes) => {
                        return Ok(Fetched {
                            bytes,
                            url: url.clone(),
                        })
                    }
                    Err(e) if e.is_transient() => {
                        warn!("{} (attempt {}/{})", e, attempt, retries);
                        last_error = Some(e);
                        if attempt < retries {
                            tokio::time::sleep(self.backoff(attempt)).await;
                        }
                    }
                    Err(e) => {
                        debug!("{}, trying next URL", e);
                        last_error = Some(e);
                        break;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Definite {
            url: String::new(),
            reason: format!("no candidate URLs for {}", task.identifier),
        }))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << (attempt - 1).min(10);
        self.settings.retry_backoff.saturating_mul(factor)
    }
}

fn transition(task: &AssetTask, outcome: &AssetOutcome) {
    debug!("{} (line {}) -> {:?}", task.identifier, task.line, outcome);
}

fn report(task: AssetTask, outcome: AssetOutcome, attempts: u32, source_url: Option<String>) -> TaskReport {
    transition(&task, &outcome);
    TaskReport {
        task,
        outcome,
        attempts,
        source_url,
    }
}

/// The scheduling side: permits, running tasks and the tally.
pub struct Pipeline {
    worker: Arc<Worker>,
    emitter: Arc<Emitter>,
    permits: Arc<Semaphore>,
    running: JoinSet<Result<TaskReport, OutputError>>,
    stats: PipelineStats,
    output_error: Option<OutputError>,
}

impl Pipeline {
    pub fn new(worker: Worker, emitter: Arc<Emitter>) -> Self {
        let permits = Arc::new(Semaphore::new(worker.settings.concurrency.max(1)));
        Self {
            worker: Arc::new(worker),
            emitter,
            permits,
            running: JoinSet::new(),
            stats: PipelineStats::default(),
            output_error: None,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.running.len()
    }

    /// Schedule a task, waiting for a free slot first.
    ///
    /// Fails only when an earlier task could not write its record.
    pub async fn submit(&mut self, task: AssetTask) -> Result<(), OutputError> {
        self.reap();
        if let Some(e) = self.output_error.take() {
            return Err(e);
        }

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .expect("pipeline semaphore is never closed");
        self.stats.submitted += 1;

        let worker = Arc::clone(&self.worker);
        let emitter = Arc::clone(&self.emitter);
        self.running.spawn(async move {
            let report = worker.acquire(task).await;
            let emitted = emitter.emit(&report);
            drop(permit);
            emitted.map(|_| report)
        });
        Ok(())
    }

    /// Wait for every in-flight task, then hand back the tally.
    pub async fn drain(&mut self) -> Result<PipelineStats, OutputError> {
        while let Some(joined) = self.running.join_next().await {
            self.collect(joined);
        }
        match self.output_error.take() {
            Some(e) => Err(e),
            None => Ok(self.stats.clone()),
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    fn reap(&mut self) {
        while let Some(joined) = self.running.try_join_next() {
            self.collect(joined);
        }
    }

    fn collect(&mut self, joined: Result<Result<TaskReport, OutputError>, JoinError>) {
        match joined {
            Ok(Ok(report)) => self.stats.record(&report),
            Ok(Err(e)) => {
                error!("Output failed: {}", e);
                if self.output_error.is_none() {
                    self.output_error = Some(e);
                }
            }
            Err(e) => {
                error!("Worker task died: {}", e);
                self.stats.crashed += 1;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::emit::tests::{BrokenSink, SharedBuf};
    use crate::emit::OutputFormat;
    use crate::transform::{TransformError, Transformed};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    pub enum Behaviour {
        Ok,
        Transient,
        Definite,
        Panic,
    }

    /// Answers per URL and counts calls; unknown URLs succeed.
    #[derive(Default)]
    pub struct StubFetcher {
        pub behaviour: HashMap<String, Behaviour>,
        pub calls: Mutex<HashMap<String, usize>>,
        pub delay: Duration,
        pub in_flight: AtomicUsize,
        pub peak: AtomicUsize,
    }

    impl StubFetcher {
        pub fn with(pairs: &[(&str, Behaviour)]) -> Self {
            Self {
                behaviour: pairs.iter().map(|(u, b)| (u.to_string(), *b)).collect(),
                ..Default::default()
            }
        }

        pub fn calls(&self, url: &str) -> usize {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }
    }

    #[async_trait]
    impl Fetch for StubFetcher {
        async fn fetch(&self, url: &str, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
            *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let url = url.to_string();
            match self.behaviour.get(&url).copied().unwrap_or(Behaviour::Ok) {
                Behaviour::Ok => Ok(format!("bytes of {}", url).into_bytes()),
                Behaviour::Transient => Err(FetchError::Transient {
                    url,
                    reason: "connection refused".into(),
                }),
                Behaviour::Definite => Err(FetchError::Definite {
                    url,
                    reason: "HTTP 404 Not Found".into(),
                }),
                Behaviour::Panic => panic!("fetcher blew up on {}", url),
            }
        }
    }

    /// Reports fixed dimensions and halves the payload; `fail` makes every call an error.
    pub struct StubTransformer {
        pub fail: bool,
    }

    impl Transform for StubTransformer {
        fn transform(&self, bytes: &[u8], bounds: Bounds) -> Result<Transformed, TransformError> {
            if self.fail {
                return Err(TransformError::Io(std::io::Error::other("cannot decode")));
            }
            Ok(Transformed {
                bytes: Some(bytes[..bytes.len() / 2].to_vec()),
                width: bounds.max_width,
                height: bounds.max_height / 2,
            })
        }

        fn dimensions(&self, _path: &Path) -> Option<(u32, u32)> {
            Some((1, 1))
        }
    }

    pub fn settings(concurrency: usize, retries: u32) -> PipelineSettings {
        PipelineSettings {
            concurrency,
            retries,
            retry_backoff: Duration::ZERO,
            fetch_timeout: Duration::from_secs(1),
            skip_existing: true,
            bounds: Bounds {
                max_width: 640,
                max_height: 480,
            },
        }
    }

    fn task(name: &str, urls: &[&str]) -> AssetTask {
        AssetTask {
            identifier: name.to_string(),
            urls: urls.iter().map(|u| u.to_string()).collect(),
            local_path: crate::assets::derive_local_path(name),
            line: 1,
        }
    }

    fn worker(fetcher: Arc<StubFetcher>, root: &Path, retries: u32, fail_transform: bool) -> Worker {
        Worker::new(
            fetcher,
            Arc::new(StubTransformer { fail: fail_transform }),
            LocalStore::new(root),
            settings(4, retries),
        )
    }

    #[tokio::test]
    async fn success_writes_transformed_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        let w = worker(Arc::clone(&fetcher), dir.path(), 3, false);

        let r = w.acquire(task("a.png", &["https://a/a.png"])).await;
        let expected = "bytes of https://a/a.png".len() as u64 / 2;
        assert_eq!(
            r.outcome,
            AssetOutcome::Transformed {
                width: 640,
                height: 240,
                byte_size: expected
            }
        );
        assert_eq!(r.attempts, 1);
        assert_eq!(r.source_url.as_deref(), Some("https://a/a.png"));
        let on_disk = std::fs::read(dir.path().join(crate::assets::derive_local_path("a.png"))).unwrap();
        assert_eq!(on_disk.len() as u64, expected);
    }

    #[tokio::test]
    async fn existing_file_is_skipped_without_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let rel = crate::assets::derive_local_path("a.png");
        LocalStore::new(dir.path()).write(&rel, b"already").await.unwrap();

        let fetcher = Arc::new(StubFetcher::default());
        let w = worker(Arc::clone(&fetcher), dir.path(), 3, false);
        let r = w.acquire(task("a.png", &["https://a/a.png"])).await;

        assert_eq!(
            r.outcome,
            AssetOutcome::Skipped {
                path: dir.path().join(&rel),
                byte_size: 7,
                dimensions: Some((1, 1)),
            }
        );
        assert_eq!(fetcher.total_calls(), 0);
        assert_eq!(r.attempts, 0);
    }

    #[tokio::test]
    async fn skip_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let rel = crate::assets::derive_local_path("a.png");
        LocalStore::new(dir.path()).write(&rel, b"already").await.unwrap();

        let fetcher = Arc::new(StubFetcher::default());
        let mut s = settings(1, 1);
        s.skip_existing = false;
        let w = Worker::new(
            fetcher.clone(),
            Arc::new(StubTransformer { fail: false }),
            LocalStore::new(dir.path()),
            s,
        );
        let r = w.acquire(task("a.png", &["https://a/a.png"])).await;
        assert!(matches!(r.outcome, AssetOutcome::Transformed { .. }));
        assert_eq!(fetcher.total_calls(), 1);
    }

    #[tokio::test]
    async fn definite_error_falls_back_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::with(&[("A", Behaviour::Definite), ("B", Behaviour::Ok)]));
        let w = worker(Arc::clone(&fetcher), dir.path(), 5, false);

        let r = w.acquire(task("a.png", &["A", "B"])).await;
        assert!(matches!(r.outcome, AssetOutcome::Transformed { .. }), "{:?}", r.outcome);
        assert_eq!(r.source_url.as_deref(), Some("B"));
        assert_eq!(fetcher.calls("A"), 1);
        assert_eq!(fetcher.calls("B"), 1);
    }

    #[tokio::test]
    async fn transient_errors_retry_then_give_up() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::with(&[("A", Behaviour::Transient)]));
        let w = worker(Arc::clone(&fetcher), dir.path(), 4, false);

        let r = w.acquire(task("a.png", &["A"])).await;
        assert!(
            matches!(&r.outcome, AssetOutcome::Failed { stage: Stage::Fetch, cause } if cause.contains("connection refused")),
            "{:?}",
            r.outcome
        );
        assert_eq!(fetcher.calls("A"), 4);
        assert_eq!(r.attempts, 4);
        assert!(!dir.path().join(&r.task.local_path).exists());
    }

    #[tokio::test]
    async fn transient_on_first_url_then_second_url() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::with(&[("A", Behaviour::Transient), ("B", Behaviour::Ok)]));
        let w = worker(Arc::clone(&fetcher), dir.path(), 2, false);

        let r = w.acquire(task("a.png", &["A", "B"])).await;
        assert_eq!(r.source_url.as_deref(), Some("B"));
        assert_eq!(fetcher.calls("A"), 2);
        assert_eq!(r.attempts, 3);
    }

    #[tokio::test]
    async fn all_urls_definite() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::with(&[("A", Behaviour::Definite), ("B", Behaviour::Definite)]));
        let w = worker(Arc::clone(&fetcher), dir.path(), 3, false);

        let r = w.acquire(task("a.png", &["A", "B"])).await;
        assert!(matches!(r.outcome, AssetOutcome::Failed { stage: Stage::Fetch, .. }));
        assert_eq!(r.attempts, 2);
    }

    #[tokio::test]
    async fn transform_failure_keeps_download() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        let w = worker(Arc::clone(&fetcher), dir.path(), 1, true);

        let r = w.acquire(task("a.svg", &["U"])).await;
        assert!(matches!(r.outcome, AssetOutcome::Failed { stage: Stage::Transform, .. }));
        let on_disk = std::fs::read(dir.path().join(&r.task.local_path)).unwrap();
        assert_eq!(on_disk, b"bytes of U");
    }

    #[tokio::test]
    async fn no_urls_is_a_fetch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let w = worker(Arc::new(StubFetcher::default()), dir.path(), 1, false);
        let r = w.acquire(task("a.png", &[])).await;
        assert!(matches!(r.outcome, AssetOutcome::Failed { stage: Stage::Fetch, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_ceiling_holds() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let buf = SharedBuf::default();
        let emitter = Arc::new(Emitter::new(Box::new(buf.clone()), OutputFormat::Lines, "image"));
        let w = Worker::new(
            fetcher.clone(),
            Arc::new(StubTransformer { fail: false }),
            LocalStore::new(dir.path()),
            settings(3, 1),
        );
        let mut pipeline = Pipeline::new(w, emitter);

        for i in 0..20 {
            let name = format!("f{}.png", i);
            pipeline.submit(task(&name, &[&format!("https://u/{}", name)])).await.unwrap();
        }
        let stats = pipeline.drain().await.unwrap();

        assert_eq!(stats.submitted, 20);
        assert_eq!(stats.transformed, 20);
        let peak = fetcher.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency {}", peak);
        assert!(peak >= 1);
        assert_eq!(buf.contents().lines().count(), 20);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::with(&[("bad", Behaviour::Definite)]));
        let buf = SharedBuf::default();
        let emitter = Arc::new(Emitter::new(Box::new(buf.clone()), OutputFormat::Lines, "image"));
        let mut pipeline = Pipeline::new(worker(fetcher, dir.path(), 2, false), emitter);

        pipeline.submit(task("one.png", &["good1"])).await.unwrap();
        pipeline.submit(task("two.png", &["bad"])).await.unwrap();
        pipeline.submit(task("three.png", &["good3"])).await.unwrap();
        let stats = pipeline.drain().await.unwrap();

        assert_eq!(stats.transformed, 2);
        assert_eq!(stats.failed_fetch, 1);
        assert_eq!(stats.failed(), 1);
        let out = buf.contents();
        assert_eq!(out.lines().count(), 2);
        assert!(!out.contains("two.png"));
    }

    #[tokio::test]
    async fn panicked_task_is_not_a_stage_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(StubFetcher::with(&[("boom", Behaviour::Panic)]));
        let buf = SharedBuf::default();
        let emitter = Arc::new(Emitter::new(Box::new(buf.clone()), OutputFormat::Lines, "image"));
        let mut pipeline = Pipeline::new(worker(fetcher, dir.path(), 1, false), emitter);

        pipeline.submit(task("a.png", &["boom"])).await.unwrap();
        pipeline.submit(task("b.png", &["fine"])).await.unwrap();
        let stats = pipeline.drain().await.unwrap();

        assert_eq!(stats.crashed, 1);
        assert_eq!(stats.failed_transform, 0);
        assert_eq!(stats.failed_fetch, 0);
        assert_eq!(stats.failed(), 1);
        assert_eq!(stats.transformed, 1);
        assert_eq!(buf.contents().lines().count(), 1);
    }

    #[tokio::test]
    async fn output_error_surfaces() {
        let dir = tempfile::tempdir().unwrap();
        let emitter = Arc::new(Emitter::new(Box::new(BrokenSink), OutputFormat::Lines, "image"));
        let mut pipeline = Pipeline::new(worker(Arc::new(StubFetcher::default()), dir.path(), 1, false), emitter);

        pipeline.submit(task("a.png", &["U"])).await.unwrap();
        assert!(matches!(pipeline.drain().await, Err(OutputError::Write(_))));
    }

    #[test]
    fn backoff_doubles() {
        let mut s = settings(1, 5);
        s.retry_backoff = Duration::from_millis(100);
        let w = Worker::new(
            Arc::new(StubFetcher::default()),
            Arc::new(StubTransformer { fail: false }),
            LocalStore::new("/tmp"),
            s,
        );
        assert_eq!(w.backoff(1), Duration::from_millis(100));
        assert_eq!(w.backoff(2), Duration::from_millis(200));
        assert_eq!(w.backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Fetch.to_string(), "fetch");
        assert_eq!(Stage::Transform.to_string(), "transform");
    }
}
