use std::io::BufRead;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};

use super::page::{parse_page, PageRecord};
use super::siteinfo::{parse_site_info, SiteInfo};
use super::DumpError;

static ROOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^<mediawiki\s[^>]*xmlns="http://www\.mediawiki\.org/xml/export-([0-9.]+)/""#).unwrap()
});
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\sversion="([0-9.]+)""#).unwrap());

const PAGE_START: &str = "<page>";
const PAGE_END: &str = "</page>";
const SITEINFO_END: &str = "</siteinfo>";
const DOCUMENT_END: &str = "</mediawiki>";

#[derive(Debug, Clone)]
pub struct ReaderOptions {
    /// Accepted export schema versions, e.g. `0.10`.
    pub schema_versions: Vec<String>,
    /// Generator string the dump is expected to carry; a mismatch only warns.
    pub expected_generator: Option<String>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            schema_versions: vec!["0.10".to_string(), "0.11".to_string()],
            expected_generator: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Schema,
    SiteInfo,
    Pages,
    Finished,
}

/// Line-oriented reader over a MediaWiki XML dump.
///
/// Holds at most one page worth of lines. `line_no` counts every line read,
/// starting at 1 for the first line, and is the coordinate used to resume.
pub struct DumpReader<R> {
    input: R,
    options: ReaderOptions,
    line: String,
    fragment: String,
    line_no: u64,
    phase: Phase,
}

impl<R: BufRead> DumpReader<R> {
    pub fn new(input: R, options: ReaderOptions) -> Self {
        Self {
            input,
            options,
            line: String::new(),
            fragment: String::new(),
            line_no: 0,
            phase: Phase::Schema,
        }
    }

    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// Read the next raw line into `self.line`. Returns false at end of stream.
    fn advance(&mut self) -> Result<bool, DumpError> {
        self.line.clear();
        let n = self
            .input
            .read_line(&mut self.line)
            .map_err(|source| DumpError::Io {
                line: self.line_no + 1,
                source,
            })?;
        if n == 0 {
            return Ok(false);
        }
        self.line_no += 1;
        Ok(true)
    }

    /// Check the root `<mediawiki>` marker on the first non-empty line.
    pub fn read_schema(&mut self) -> Result<(), DumpError> {
        if self.phase != Phase::Schema {
            return Err(DumpError::Protocol("schema already checked"));
        }

        loop {
            if !self.advance()? {
                return Err(DumpError::Schema {
                    line: self.line_no,
                    reason: "empty stream".into(),
                });
            }
            let trimmed = self.line.trim();
            if trimmed.is_empty() || trimmed.starts_with("<?xml") {
                continue;
            }
            self.check_root(trimmed.to_string())?;
            self.phase = Phase::SiteInfo;
            return Ok(());
        }
    }

    fn check_root(&self, line: String) -> Result<(), DumpError> {
        let fail = |reason: String| DumpError::Schema {
            line: self.line_no,
            reason,
        };

        let export = ROOT_RE
            .captures(&line)
            .map(|c| c[1].to_string())
            .ok_or_else(|| fail(format!("expected <mediawiki xmlns=...>, found {:?}", truncate(&line, 80))))?;
        let version = VERSION_RE
            .captures(&line)
            .map(|c| c[1].to_string())
            .ok_or_else(|| fail("missing version attribute".into()))?;

        if export != version {
            return Err(fail(format!(
                "namespace export-{} does not match version {}",
                export, version
            )));
        }
        if !self.options.schema_versions.iter().any(|v| *v == version) {
            return Err(fail(format!(
                "unsupported schema version {} (accepted: {})",
                version,
                self.options.schema_versions.join(", ")
            )));
        }
        debug!("Schema version {}", version);
        Ok(())
    }

    /// Accumulate lines up to `</siteinfo>` and parse them.
    pub fn read_site_info(&mut self) -> Result<SiteInfo, DumpError> {
        if self.phase != Phase::SiteInfo {
            return Err(DumpError::Protocol("siteinfo must follow the schema line"));
        }

        self.fragment.clear();
        loop {
            if !self.advance()? {
                return Err(DumpError::SiteInfo {
                    line: self.line_no,
                    reason: "stream ended before </siteinfo>".into(),
                });
            }
            self.fragment.push_str(&self.line);
            if self.line.trim() == SITEINFO_END {
                break;
            }
        }

        let site = parse_site_info(self.fragment.trim()).map_err(|reason| DumpError::SiteInfo {
            line: self.line_no,
            reason,
        })?;
        self.fragment.clear();

        if let Some(expected) = &self.options.expected_generator {
            if *expected != site.generator {
                warn!(
                    "Expected generator: {}, generator found: {}",
                    expected, site.generator
                );
            }
        }
        info!(
            "Now parsing dump: {} ({}), {} namespaces",
            site.site_name.as_deref().unwrap_or("(unnamed site)"),
            site.base.as_deref().unwrap_or("no base URL"),
            site.namespaces.len()
        );
        debug!("Generator {}, title case {:?}", site.generator, site.case);

        self.phase = Phase::Pages;
        Ok(site)
    }

    /// Next page of the dump, or `None` once `</mediawiki>` (or end of stream) is reached.
    ///
    /// A `MalformedRecord` error leaves the reader positioned after the bad
    /// block, so the caller may keep going.
    pub fn next_page(&mut self) -> Result<Option<PageRecord>, DumpError> {
        match self.phase {
            Phase::Pages => {}
            Phase::Finished => return Ok(None),
            _ => return Err(DumpError::Protocol("pages requested before siteinfo was parsed")),
        }

        loop {
            if !self.advance()? {
                warn!("Stream ended at line {} without {}", self.line_no, DOCUMENT_END);
                self.phase = Phase::Finished;
                return Ok(None);
            }

            let trimmed = self.line.trim();
            if trimmed == PAGE_START {
                return self.read_page().map(Some);
            } else if trimmed == DOCUMENT_END {
                debug!("Successfully finished parsing at line {}", self.line_no);
                self.phase = Phase::Finished;
                return Ok(None);
            } else if !trimmed.is_empty() {
                debug!("Did not understand line {}: {}", self.line_no, truncate(trimmed, 80));
            }
        }
    }

    fn read_page(&mut self) -> Result<PageRecord, DumpError> {
        let start_line = self.line_no;
        self.fragment.clear();
        self.fragment.push_str(&self.line);

        loop {
            if !self.advance()? {
                self.phase = Phase::Finished;
                return Err(DumpError::UnterminatedRecord { start_line });
            }
            self.fragment.push_str(&self.line);
            if self.line.trim() == PAGE_END {
                break;
            }
        }

        let page = parse_page(&self.fragment, start_line, self.line_no).map_err(|reason| {
            DumpError::MalformedRecord {
                start_line,
                line: self.line_no,
                reason,
            }
        });
        self.fragment.clear();
        page
    }

    /// Drive the whole dump, handing each page to `handler`.
    ///
    /// Stops at the first error from the reader or the handler. Returns the
    /// site info and the number of pages handled.
    pub fn for_each_page<F>(&mut self, mut handler: F) -> Result<(SiteInfo, u64), DumpError>
    where
        F: FnMut(&SiteInfo, PageRecord) -> Result<(), DumpError>,
    {
        self.read_schema()?;
        let site = self.read_site_info()?;
        let mut pages = 0;
        while let Some(page) = self.next_page()? {
            handler(&site, page)?;
            pages += 1;
        }
        Ok((site, pages))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}
