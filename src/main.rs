mod assets;
mod config;
mod driver;
mod dump;
mod emit;
mod fetch;
mod pipeline;
mod store;
mod transform;

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};

use crate::assets::{to_identifier, PageFilter};
use crate::config::{MalformedPolicy, Settings};
use crate::driver::{Driver, RunSummary};
use crate::emit::{Emitter, OutputFormat};
use crate::fetch::HttpFetcher;
use crate::pipeline::Worker;
use crate::store::LocalStore;
use crate::transform::ImageTransformer;

#[derive(Parser)]
#[command(name = "mwdump_images", about = "Download the images referenced by a MediaWiki XML dump")]
struct Cli {
    /// Settings file (toml, yaml or json); MWIMG_* variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a dump, download + resize its files, write image records
    Run(RunArgs),
    /// Parse a dump and list the files it would download
    Scan {
        /// Dump file (.xml or .xml.bz2), stdin if absent or "-"
        input: Option<PathBuf>,
        /// Max files to list (all pages are still parsed)
        #[arg(short = 'n', long)]
        limit: Option<u64>,
    },
    /// Show the local path and download URLs of one file name
    Locate {
        /// File name, with or without spaces (e.g. "Example.png")
        name: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Dump file (.xml or .xml.bz2), stdin if absent or "-"
    input: Option<PathBuf>,
    /// Write records here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Root directory for downloaded files
    #[arg(short = 'd', long)]
    output_dir: Option<PathBuf>,
    /// Downloads in flight at once
    #[arg(short = 'j', long)]
    concurrency: Option<usize>,
    /// Attempts per URL on transient errors
    #[arg(long)]
    retries: Option<u32>,
    /// Per-attempt fetch timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long)]
    max_width: Option<u32>,
    #[arg(long)]
    max_height: Option<u32>,
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,
    /// Don't download pages starting before this line
    #[arg(long)]
    resume: Option<u64>,
    /// Download even when the file is already on disk
    #[arg(long)]
    no_skip: bool,
    /// Keep downloaded files at their original size
    #[arg(long)]
    no_resize: bool,
    /// Log and skip unparseable pages instead of stopping
    #[arg(long)]
    skip_malformed: bool,
    /// Download every file type, not only jpg/jpeg/png/gif/bmp
    #[arg(long)]
    all_files: bool,
    /// Download URL pattern with {h1}, {h2}, {name}; repeat for fallbacks
    #[arg(long = "url-template")]
    url_templates: Vec<String>,
    /// Namespace key to download; repeatable (default: 6)
    #[arg(long = "namespace")]
    namespaces: Vec<i32>,
    /// No progress spinner
    #[arg(short, long)]
    quiet: bool,
}

impl RunArgs {
    fn apply(&self, s: &mut Settings) {
        if let Some(dir) = &self.output_dir {
            s.output_dir = dir.clone();
        }
        if let Some(n) = self.concurrency {
            s.concurrency = n;
        }
        if let Some(n) = self.retries {
            s.retries = n;
        }
        if let Some(secs) = self.timeout {
            s.fetch_timeout_secs = secs;
        }
        if let Some(w) = self.max_width {
            s.max_width = w;
        }
        if let Some(h) = self.max_height {
            s.max_height = h;
        }
        if let Some(f) = self.format {
            s.format = f;
        }
        if let Some(line) = self.resume {
            s.resume_from = line;
        }
        if self.no_skip {
            s.skip_existing = false;
        }
        if self.no_resize {
            s.resize = false;
        }
        if self.skip_malformed {
            s.on_malformed = MalformedPolicy::Skip;
        }
        if !self.url_templates.is_empty() {
            s.url_templates = self.url_templates.clone();
        }
        if !self.namespaces.is_empty() {
            s.namespaces = self.namespaces.clone();
        }
        if self.all_files {
            s.extensions.clear();
        }
        if self.quiet {
            s.progress = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout may carry the records
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Run(args) => {
            args.apply(&mut settings);
            settings.validate()?;
            run(&settings, args.input.as_deref(), args.output.as_deref()).await
        }
        Commands::Scan { input, limit } => {
            settings.validate()?;
            let reader = dump::open_input(input.as_deref()).context("Failed to open dump")?;
            let mut out = io::stdout().lock();
            let s = driver::scan(reader, &settings, limit, &mut out)?;
            out.flush()?;
            eprintln!(
                "{} pages, {} files ({} listed, {} rejected)",
                s.pages, s.tasks, s.listed, s.rejected
            );
            Ok(())
        }
        Commands::Locate { name } => {
            settings.validate()?;
            let filter = PageFilter::new(&settings.namespaces, settings.url_templates(), &[]);
            let task = filter.task_for(to_identifier(name.trim()), 0);
            println!("{}", settings.output_dir.join(&task.local_path).display());
            for url in &task.urls {
                println!("{}", url);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        eprintln!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn run(settings: &Settings, input: Option<&Path>, output: Option<&Path>) -> anyhow::Result<()> {
    let reader = dump::open_input(input).context("Failed to open dump")?;
    let sink: Box<dyn Write + Send> = match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout()),
    };

    let store = LocalStore::new(&settings.output_dir);
    info!(
        "Saving images under {} ({} at a time)",
        store.root().display(),
        settings.concurrency
    );
    let worker = Worker::new(
        Arc::new(HttpFetcher::new(
            &settings.user_agent,
            settings.connect_timeout(),
            settings.max_file_bytes,
        )?),
        Arc::new(ImageTransformer::new(settings.resize)),
        store,
        settings.pipeline_settings(),
    );
    let emitter = Arc::new(Emitter::new(sink, settings.format, settings.sql_table.clone()));
    let mut driver = Driver::new(settings, worker, emitter, settings.progress);

    let outcome = driver.run(reader).await;
    debug!("Driver finished in state {:?}", driver.state());
    match outcome {
        Ok(summary) => {
            print_summary(&summary);
            Ok(())
        }
        Err(e) => {
            print_summary(&e.summary);
            eprintln!("Re-run with --resume {} to continue", e.resume_from);
            Err(e.into())
        }
    }
}

fn print_summary(s: &RunSummary) {
    let p = &s.pipeline;
    eprintln!(
        "Read {} lines, {} pages ({} before resume line, {} malformed, {} rejected)",
        s.lines, s.pages, s.resumed_past, s.malformed, s.rejected
    );
    eprintln!(
        "Files: {} submitted, {} saved, {} already present, {} failed ({} fetch, {} store, {} transform, {} crashed)",
        p.submitted,
        p.transformed,
        p.skipped,
        p.failed(),
        p.failed_fetch,
        p.failed_store,
        p.failed_transform,
        p.crashed
    );
    eprintln!(
        "Wrote {} records, {} bytes of images, {} fetch attempts",
        s.records, p.bytes_written, p.fetch_attempts
    );
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
