//! One run over one dump: parse, filter, submit, drain, close the output.
//!
//! The dump is read on a blocking thread that hands parsed pages over a
//! bounded channel. The driver task filters them and submits tasks, waiting
//! in `Pipeline::submit` whenever every slot is taken; the reader in turn
//! stalls once the channel is full.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::assets::PageFilter;
use crate::config::{MalformedPolicy, Settings};
use crate::dump::{DumpError, DumpReader, PageRecord, ReaderOptions, SiteInfo};
use crate::emit::{Emitter, OutputError};
use crate::pipeline::{Pipeline, PipelineStats, Worker};

const RATE_EVERY: u64 = 1000;
/// Parsed pages buffered between the reader thread and the driver.
const READ_AHEAD: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    AwaitingSchema,
    ParsingSiteInfo,
    StreamingPages,
    Draining,
    Done,
    Failed,
}

#[derive(Debug, Error)]
pub enum RunFailure {
    #[error(transparent)]
    Dump(#[from] DumpError),
    #[error(transparent)]
    Output(#[from] OutputError),
}

impl RunFailure {
    /// One-line message for the log, worded by what went wrong.
    pub fn describe(&self, line: u64) -> String {
        match self {
            RunFailure::Dump(e) => format!("Failed to parse, line {}: {}", line, e),
            RunFailure::Output(e) => format!("Failed to write output after line {}: {}", line, e),
        }
    }
}

/// A run that stopped early. Records emitted before the failure are framed
/// and flushed.
#[derive(Debug, Error)]
#[error("failed at line {line}: {source}")]
pub struct RunError {
    pub line: u64,
    /// First line that still needs processing; pass back as `--resume`.
    pub resume_from: u64,
    #[source]
    pub source: RunFailure,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Page blocks read, including resumed-past and rejected ones.
    pub pages: u64,
    /// Tasks handed to the pipeline.
    pub tasks: u64,
    /// Tracked pages the filter could not turn into a task.
    pub rejected: u64,
    /// Malformed pages skipped under the `skip` policy.
    pub malformed: u64,
    /// Pages before the resume line.
    pub resumed_past: u64,
    pub records: u64,
    pub lines: u64,
    pub pipeline: PipelineStats,
    pub elapsed: Duration,
}

pub struct Driver {
    filter: PageFilter,
    pipeline: Pipeline,
    emitter: Arc<Emitter>,
    reader_options: ReaderOptions,
    on_malformed: MalformedPolicy,
    resume_from: u64,
    progress: ProgressBar,
    state: DriverState,
}

impl Driver {
    pub fn new(settings: &Settings, worker: Worker, emitter: Arc<Emitter>, show_progress: bool) -> Self {
        let progress = if show_progress {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {pos} pages ({per_sec}) {msg}")
                    .unwrap(),
            );
            pb.enable_steady_tick(Duration::from_millis(200));
            pb
        } else {
            ProgressBar::hidden()
        };

        Self {
            filter: PageFilter::new(&settings.namespaces, settings.url_templates(), &settings.extensions),
            pipeline: Pipeline::new(worker, Arc::clone(&emitter)),
            emitter,
            reader_options: settings.reader_options(),
            on_malformed: settings.on_malformed,
            resume_from: settings.resume_from,
            progress,
            state: DriverState::AwaitingSchema,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Process a whole dump. In-flight work is always drained and the
    /// output suffix written, whether the run succeeds or not.
    pub async fn run<R: BufRead + Send + 'static>(&mut self, input: R) -> Result<RunSummary, RunError> {
        let t0 = Instant::now();
        let mut summary = RunSummary::default();
        let mut last_started = self.resume_from;

        let (tx, mut rx) = mpsc::channel(READ_AHEAD);
        let reader = DumpReader::new(input, self.reader_options.clone());
        let skip_malformed = self.on_malformed == MalformedPolicy::Skip;
        let producer = tokio::task::spawn_blocking(move || produce(reader, tx, skip_malformed));

        let consumed = match self.emitter.begin() {
            Ok(()) => self.stream(&mut rx, &mut summary, &mut last_started).await,
            Err(e) => Err(e),
        };
        // a reader still blocked on a full channel sees it closed and stops
        drop(rx);
        let (lines, parsed) = match producer.await {
            Ok(done) => done,
            Err(e) => {
                error!("Dump reader died: {}", e);
                (last_started, Err(DumpError::Protocol("dump reader thread panicked")))
            }
        };

        let streamed = match (consumed, parsed) {
            (Err(e), _) => Err((RunFailure::Output(e), last_started)),
            (Ok(()), Err(e)) => {
                let resume_from = e.resume_line(lines);
                Err((RunFailure::Dump(e), resume_from))
            }
            (Ok(()), Ok(())) => Ok(()),
        };

        if streamed.is_ok() {
            self.set_state(DriverState::Draining);
        }
        let drained = self.pipeline.drain().await;
        let finished = self.emitter.finish();
        self.progress.finish_and_clear();

        summary.pipeline = self.pipeline.stats().clone();
        summary.records = self.emitter.records_written();
        summary.lines = lines;
        summary.elapsed = t0.elapsed();

        // the first failure wins; later ones are only logged
        let failure = match (streamed, drained, finished) {
            (Ok(()), Ok(_), Ok(())) => None,
            (Err(f), drained, finished) => {
                if let Err(e) = drained.map(|_| ()).and(finished) {
                    warn!("Also failed while closing output: {}", e);
                }
                Some(f)
            }
            (Ok(()), Err(e), _) | (Ok(()), Ok(_), Err(e)) => Some((RunFailure::Output(e), last_started)),
        };

        match failure {
            None => {
                self.set_state(DriverState::Done);
                info!(
                    "Done: {} pages, {} tasks, {} records in {:.1}s",
                    summary.pages,
                    summary.tasks,
                    summary.records,
                    summary.elapsed.as_secs_f64()
                );
                Ok(summary)
            }
            Some((source, resume_from)) => {
                self.set_state(DriverState::Failed);
                error!("{}", source.describe(lines));
                error!("You can set --resume {} after fixing the problem", resume_from);
                Err(RunError {
                    line: lines,
                    resume_from,
                    source,
                    summary,
                })
            }
        }
    }

    async fn stream(
        &mut self,
        rx: &mut mpsc::Receiver<Parsed>,
        summary: &mut RunSummary,
        last_started: &mut u64,
    ) -> Result<(), OutputError> {
        let mut site = None;
        let started = Instant::now();

        while let Some(parsed) = rx.recv().await {
            let page = match parsed {
                Parsed::Schema => {
                    self.set_state(DriverState::ParsingSiteInfo);
                    continue;
                }
                Parsed::Site(info) => {
                    self.filter.check_site(&info);
                    self.set_state(DriverState::StreamingPages);
                    site = Some(info);
                    continue;
                }
                Parsed::Skipped(e) => {
                    warn!("Skipping: {}", e);
                    summary.malformed += 1;
                    continue;
                }
                Parsed::Page(page) => page,
            };
            // the reader sends Site before any page
            let Some(site) = site.as_ref() else {
                continue;
            };

            summary.pages += 1;
            self.progress.inc(1);
            if summary.pages % RATE_EVERY == 0 {
                let secs = started.elapsed().as_secs_f64().max(f64::EPSILON);
                info!(
                    "{} pages, {:.1} pages/s, {} in flight",
                    summary.pages,
                    summary.pages as f64 / secs,
                    self.pipeline.in_flight()
                );
            }

            trace!(
                "page {:?} {:?} at lines {}-{}",
                page.id,
                page.title,
                page.start_line,
                page.end_line
            );
            if page.start_line < self.resume_from {
                summary.resumed_past += 1;
                continue;
            }
            *last_started = page.start_line;
            self.handle_page(site, page, summary).await?;
        }
        Ok(())
    }

    async fn handle_page(&mut self, site: &SiteInfo, page: PageRecord, summary: &mut RunSummary) -> Result<(), OutputError> {
        let task = match self.filter.select(&page, site) {
            Ok(Some(task)) => task,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!("Rejected page at line {}: {}", page.start_line, e);
                summary.rejected += 1;
                return Ok(());
            }
        };

        self.progress.set_message(task.identifier.clone());
        summary.tasks += 1;
        self.pipeline.submit(task).await
    }

    fn set_state(&mut self, next: DriverState) {
        debug!("driver: {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// What the reader thread hands to the driver, in dump order.
enum Parsed {
    Schema,
    Site(SiteInfo),
    Page(PageRecord),
    /// A malformed page dropped under the `skip` policy.
    Skipped(DumpError),
}

/// Reader thread body. Returns the last line read and how reading ended;
/// a closed channel (the driver gave up) is not an error here.
fn produce<R: BufRead>(
    mut reader: DumpReader<R>,
    tx: mpsc::Sender<Parsed>,
    skip_malformed: bool,
) -> (u64, Result<(), DumpError>) {
    let result = read_all(&mut reader, &tx, skip_malformed);
    (reader.line_no(), result)
}

fn read_all<R: BufRead>(
    reader: &mut DumpReader<R>,
    tx: &mpsc::Sender<Parsed>,
    skip_malformed: bool,
) -> Result<(), DumpError> {
    reader.read_schema()?;
    if tx.blocking_send(Parsed::Schema).is_err() {
        return Ok(());
    }
    let site = reader.read_site_info()?;
    if tx.blocking_send(Parsed::Site(site)).is_err() {
        return Ok(());
    }

    loop {
        let parsed = match reader.next_page() {
            Ok(Some(page)) => Parsed::Page(page),
            Ok(None) => return Ok(()),
            Err(e @ DumpError::MalformedRecord { .. }) if skip_malformed => Parsed::Skipped(e),
            Err(e) => return Err(e),
        };
        if tx.blocking_send(parsed).is_err() {
            debug!("Driver stopped, reader quits at line {}", reader.line_no());
            return Ok(());
        }
    }
}

/// Totals of a `scan`.
#[derive(Debug, Default)]
pub struct ScanSummary {
    pub pages: u64,
    pub tasks: u64,
    pub rejected: u64,
    pub listed: u64,
}

/// Parse a dump and write one `identifier<TAB>path<TAB>first URL` line per
/// task, without touching the network. `limit` caps the listed lines only.
pub fn scan<R: BufRead, W: Write>(
    input: R,
    settings: &Settings,
    limit: Option<u64>,
    out: &mut W,
) -> Result<ScanSummary, DumpError> {
    let filter = PageFilter::new(&settings.namespaces, settings.url_templates(), &settings.extensions);
    let mut reader = DumpReader::new(input, settings.reader_options());
    let mut summary = ScanSummary::default();

    reader.for_each_page(|site, page| {
        if summary.pages == 0 {
            filter.check_site(site);
        }
        summary.pages += 1;
        match filter.select(&page, site) {
            Ok(Some(task)) => {
                summary.tasks += 1;
                if limit.map_or(true, |n| summary.listed < n) {
                    let url = task.urls.first().map(String::as_str).unwrap_or("-");
                    writeln!(out, "{}\t{}\t{}", task.identifier, task.local_path.display(), url)
                        .map_err(|source| DumpError::Io { line: page.start_line, source })?;
                    summary.listed += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Rejected page at line {}: {}", page.start_line, e);
                summary.rejected += 1;
            }
        }
        Ok(())
    })?;
    Ok(summary)
}
