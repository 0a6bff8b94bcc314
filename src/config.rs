//! Run settings: built-in defaults, then an optional settings file, then
//! `MWIMG_*` environment variables, then command-line flags.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

use crate::assets::{UrlTemplate, NAME_PLACEHOLDER};
use crate::dump::ReaderOptions;
use crate::emit::OutputFormat;
use crate::pipeline::PipelineSettings;
use crate::transform::Bounds;

pub const ENV_PREFIX: &str = "MWIMG";
pub const DEFAULT_URL_TEMPLATE: &str = "https://upload.wikimedia.org/wikipedia/commons/{h1}/{h2}/{name}";
pub const DEFAULT_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "bmp"];
pub const DEFAULT_USER_AGENT: &str = concat!("mwdump_images/", env!("CARGO_PKG_VERSION"));

/// What to do with a page block that does not parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    #[default]
    Abort,
    Skip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Namespace keys whose pages are downloaded (6 = File)
    pub namespaces: Vec<i32>,
    /// Download URL patterns, tried in order; `{h1}`, `{h2}`, `{name}` are substituted
    pub url_templates: Vec<String>,
    /// Only these file extensions; an empty list downloads every file type
    pub extensions: Vec<String>,
    /// Root of the bucketed file tree
    pub output_dir: PathBuf,
    /// Resize to fit this box
    pub max_width: u32,
    pub max_height: u32,
    /// Shrink oversized images; otherwise files are stored as downloaded
    pub resize: bool,
    /// Tasks in flight at once
    pub concurrency: usize,
    /// Per-attempt fetch timeout (seconds)
    pub fetch_timeout_secs: u64,
    /// Connect timeout (seconds)
    pub connect_timeout_secs: u64,
    /// Downloads larger than this many bytes are given up
    pub max_file_bytes: u64,
    /// Attempts per URL on transient errors
    pub retries: u32,
    /// First retry delay (milliseconds), doubled per attempt
    pub retry_backoff_ms: u64,
    /// Don't download files that already exist locally
    pub skip_existing: bool,
    pub format: OutputFormat,
    /// Table name used in SQL output
    pub sql_table: String,
    /// Accepted dump schema versions
    pub schema_versions: Vec<String>,
    /// Expected `<generator>`; a mismatch only warns
    pub expected_generator: Option<String>,
    pub on_malformed: MalformedPolicy,
    /// Pages starting before this line are not downloaded
    pub resume_from: u64,
    pub user_agent: String,
    /// Show the progress spinner
    pub progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            namespaces: vec![6],
            url_templates: vec![DEFAULT_URL_TEMPLATE.to_string()],
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            output_dir: PathBuf::from("./images"),
            max_width: 1024,
            max_height: 1024,
            resize: true,
            concurrency: 8,
            fetch_timeout_secs: 60,
            connect_timeout_secs: 10,
            max_file_bytes: 64 * 1024 * 1024,
            retries: 3,
            retry_backoff_ms: 500,
            skip_existing: true,
            format: OutputFormat::Sql,
            sql_table: "image".to_string(),
            schema_versions: ReaderOptions::default().schema_versions,
            expected_generator: None,
            on_malformed: MalformedPolicy::Abort,
            resume_from: 0,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            progress: true,
        }
    }
}

impl Settings {
    /// Defaults ← settings file ← environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("namespaces")
                .with_list_parse_key("url_templates")
                .with_list_parse_key("extensions")
                .with_list_parse_key("schema_versions"),
        );

        let settings: Settings = builder
            .build()
            .context("Failed to read settings")?
            .try_deserialize()
            .context("Invalid settings")?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.namespaces.is_empty(), "at least one namespace must be tracked");
        ensure!(!self.url_templates.is_empty(), "at least one URL template is required");
        for t in &self.url_templates {
            ensure!(
                t.contains(NAME_PLACEHOLDER),
                "URL template {:?} has no {} placeholder",
                t,
                NAME_PLACEHOLDER
            );
        }
        ensure!(self.concurrency >= 1, "concurrency must be at least 1");
        ensure!(self.retries >= 1, "retries must be at least 1");
        ensure!(
            self.max_width > 0 && self.max_height > 0,
            "bounding box must be non-empty"
        );
        ensure!(self.fetch_timeout_secs > 0, "fetch timeout must be positive");
        ensure!(self.max_file_bytes > 0, "max_file_bytes must be positive");
        ensure!(!self.schema_versions.is_empty(), "no schema versions accepted");
        ensure!(
            self.sql_table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'),
            "bad SQL table name {:?}",
            self.sql_table
        );
        Ok(())
    }

    pub fn url_templates(&self) -> Vec<UrlTemplate> {
        self.url_templates.iter().map(UrlTemplate::new).collect()
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            schema_versions: self.schema_versions.clone(),
            expected_generator: self.expected_generator.clone(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            concurrency: self.concurrency,
            retries: self.retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            skip_existing: self.skip_existing,
            bounds: Bounds {
                max_width: self.max_width,
                max_height: self.max_height,
            },
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}
