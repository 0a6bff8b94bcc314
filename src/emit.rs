//! Reconstruction records for acquired files.
//!
//! Workers finish in any order, so records come out in completion order, not
//! dump order. Every record is rendered first and then written with a single
//! `write_all` under the sink lock.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::pipeline::{AssetOutcome, TaskReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `INSERT` statements for the MediaWiki `image` table, wrapped in a transaction
    #[default]
    Sql,
    /// `name<TAB>width<TAB>height<TAB>size`
    Lines,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("writing output: {0}")]
    Write(#[from] io::Error),
    #[error("output sink lock poisoned")]
    Poisoned,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ImageRecord<'a> {
    pub name: &'a str,
    pub width: u32,
    pub height: u32,
    pub size: u64,
    pub media_type: &'static str,
    pub mime: String,
    /// True when the file was already on disk before this run.
    pub existing: bool,
}

impl<'a> ImageRecord<'a> {
    /// Record for a terminal outcome; failures and intermediate states have none.
    pub fn from_report(report: &'a TaskReport) -> Option<Self> {
        let (width, height, size, existing) = match &report.outcome {
            AssetOutcome::Transformed {
                width,
                height,
                byte_size,
            } => (*width, *height, *byte_size, false),
            AssetOutcome::Skipped {
                byte_size,
                dimensions,
                ..
            } => {
                let (w, h) = dimensions.unwrap_or((0, 0));
                (w, h, *byte_size, true)
            }
            AssetOutcome::Downloaded { .. } | AssetOutcome::Failed { .. } => return None,
        };
        let (media_type, mime) = mime_for(&report.task.identifier);
        Some(Self {
            name: &report.task.identifier,
            width,
            height,
            size,
            media_type,
            mime,
            existing,
        })
    }

    fn mime_parts(&self) -> (&str, &str) {
        self.mime.split_once('/').unwrap_or(("unknown", "unknown"))
    }
}

fn mime_for(name: &str) -> (&'static str, String) {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_lowercase()).unwrap_or_default();
    if ext == "svg" {
        return ("DRAWING", "image/svg+xml".to_string());
    }
    match ImageFormat::from_extension(&ext) {
        Some(format) => ("BITMAP", format.to_mime_type().to_string()),
        None => ("UNKNOWN", "unknown/unknown".to_string()),
    }
}

fn sql_quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "''"))
}

/// Shared, mutex-guarded output sink.
pub struct Emitter {
    sink: Mutex<Box<dyn Write + Send>>,
    format: OutputFormat,
    table: String,
    timestamp: String,
    written: AtomicU64,
}

impl Emitter {
    pub fn new(sink: Box<dyn Write + Send>, format: OutputFormat, table: impl Into<String>) -> Self {
        Self {
            sink: Mutex::new(sink),
            format,
            table: table.into(),
            timestamp: chrono::Utc::now().format("%Y%m%d%H%M%S").to_string(),
            written: AtomicU64::new(0),
        }
    }

    pub fn records_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Opening frame (`BEGIN;` for SQL).
    pub fn begin(&self) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Sql => self.write("BEGIN;\n"),
            _ => Ok(()),
        }
    }

    /// Closing frame, then flush.
    pub fn finish(&self) -> Result<(), OutputError> {
        if self.format == OutputFormat::Sql {
            self.write("COMMIT;\n")?;
        }
        let mut sink = self.sink.lock().map_err(|_| OutputError::Poisoned)?;
        sink.flush()?;
        Ok(())
    }

    /// Write the record for `report`. Returns whether a record was written.
    pub fn emit(&self, report: &TaskReport) -> Result<bool, OutputError> {
        if let AssetOutcome::Failed { stage, cause } = &report.outcome {
            error!(
                "Could not get {} (line {}, {} stage): {}",
                report.task.identifier, report.task.line, stage, cause
            );
            return Ok(false);
        }

        let Some(record) = ImageRecord::from_report(report) else {
            return Ok(false);
        };
        let rendered = self.render(&record)?;
        self.write(&rendered)?;
        self.written.fetch_add(1, Ordering::Relaxed);
        debug!("Emitted {}", record.name);
        Ok(true)
    }

    fn render(&self, r: &ImageRecord) -> Result<String, OutputError> {
        let line = match self.format {
            OutputFormat::Sql => {
                let (major, minor) = r.mime_parts();
                format!(
                    "INSERT INTO {} (img_name,img_size,img_width,img_height,img_metadata,img_bits,\
                     img_media_type,img_major_mime,img_minor_mime,img_description,img_timestamp) \
                     VALUES ({},{},{},{},'',8,'{}',{},{},'',{});\n",
                    self.table,
                    sql_quote(r.name),
                    r.size,
                    r.width,
                    r.height,
                    r.media_type,
                    sql_quote(major),
                    sql_quote(minor),
                    sql_quote(&self.timestamp),
                )
            }
            OutputFormat::Lines => format!("{}\t{}\t{}\t{}\n", r.name, r.width, r.height, r.size),
            OutputFormat::Json => {
                let mut json = serde_json::to_string(r).map_err(io::Error::from)?;
                json.push('\n');
                json
            }
        };
        Ok(line)
    }

    fn write(&self, text: &str) -> Result<(), OutputError> {
        let mut sink = self.sink.lock().map_err(|_| OutputError::Poisoned)?;
        sink.write_all(text.as_bytes())?;
        sink.flush()?;
        Ok(())
    }
}
