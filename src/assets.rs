//! Turns file pages into download tasks.
//!
//! The local layout and the upload URLs both use MediaWiki's hashed
//! directories: `md5(name)` gives `h1 = digest[0]` and `h2 = digest[0..2]`,
//! so `Example.png` (digest `701dd9...`) lives under `7/70/Example.png`.

use std::collections::HashSet;
use std::path::PathBuf;

use thiserror::Error;

use crate::dump::{PageRecord, SiteInfo};

pub const NAME_PLACEHOLDER: &str = "{name}";

/// A file page ready for the acquisition pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetTask {
    /// File name without namespace prefix, spaces as underscores.
    pub identifier: String,
    /// Candidate download URLs, first choice first.
    pub urls: Vec<String>,
    /// Path relative to the output directory.
    pub local_path: PathBuf,
    /// Line of the `<page>` marker this task came from.
    pub line: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("page has no <ns>")]
    MissingNamespace,
    #[error("page in namespace {0} has no <title>")]
    MissingTitle(i32),
    #[error("namespace {0} is not declared in siteinfo")]
    UndeclaredNamespace(i32),
    #[error("title {title:?} does not start with {prefix:?}")]
    UnexpectedTitle { title: String, prefix: String },
    #[error("file name {0:?} is not a single path component")]
    UnsafeName(String),
}

/// Lowercase MD5 hex digest of the identifier's UTF-8 bytes.
pub fn digest(identifier: &str) -> String {
    format!("{:x}", md5::compute(identifier.as_bytes()))
}

/// The two bucket directory names for an identifier.
pub fn buckets(identifier: &str) -> (String, String) {
    let hex = digest(identifier);
    (hex[..1].to_string(), hex[..2].to_string())
}

/// `h1/h2/identifier`; depends on nothing but the identifier.
pub fn derive_local_path(identifier: &str) -> PathBuf {
    let (h1, h2) = buckets(identifier);
    [h1.as_str(), h2.as_str(), identifier].iter().collect()
}

/// Database-key form of a title: spaces become underscores.
pub fn to_identifier(name: &str) -> String {
    name.trim().replace(' ', "_")
}

/// True when the identifier can only name a file directly inside its bucket.
pub fn is_safe_name(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier != "."
        && identifier != ".."
        && !identifier.contains(['/', '\\', '\0'])
}

/// A download URL pattern with `{h1}`, `{h2}` and `{name}` placeholders.
#[derive(Debug, Clone)]
pub struct UrlTemplate(String);

impl UrlTemplate {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    pub fn render(&self, h1: &str, h2: &str, identifier: &str) -> String {
        self.0
            .replace("{h1}", h1)
            .replace("{h2}", h2)
            .replace(NAME_PLACEHOLDER, &urlencoding::encode(identifier))
    }
}

pub struct PageFilter {
    namespaces: HashSet<i32>,
    templates: Vec<UrlTemplate>,
    extensions: Vec<String>,
}

impl PageFilter {
    pub fn new(namespaces: &[i32], templates: Vec<UrlTemplate>, extensions: &[String]) -> Self {
        Self {
            namespaces: namespaces.iter().copied().collect(),
            templates,
            extensions: extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Tracked namespaces the dump does not declare. Logged, not fatal.
    pub fn check_site(&self, site: &SiteInfo) -> Vec<i32> {
        let mut missing: Vec<i32> = self
            .namespaces
            .iter()
            .copied()
            .filter(|ns| site.namespace_name(*ns).is_none())
            .collect();
        missing.sort_unstable();
        for ns in &missing {
            tracing::error!("Dump does not specify namespace: {}", ns);
        }
        missing
    }

    /// Build a task for a tracked page, `None` for everything else.
    pub fn select(&self, page: &PageRecord, site: &SiteInfo) -> Result<Option<AssetTask>, FilterError> {
        let ns = page.namespace.ok_or(FilterError::MissingNamespace)?;
        if !self.namespaces.contains(&ns) {
            return Ok(None);
        }

        let title = page.title.as_deref().ok_or(FilterError::MissingTitle(ns))?;
        let name = site
            .namespace_name(ns)
            .ok_or(FilterError::UndeclaredNamespace(ns))?;
        let prefix = format!("{}:", name);
        let identifier = title
            .strip_prefix(&prefix)
            .map(to_identifier)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| FilterError::UnexpectedTitle {
                title: title.to_string(),
                prefix: prefix.clone(),
            })?;

        if !is_safe_name(&identifier) {
            return Err(FilterError::UnsafeName(identifier));
        }

        if !self.wants_extension(&identifier) {
            tracing::debug!("Skipping {} (extension not tracked)", identifier);
            return Ok(None);
        }

        Ok(Some(self.task_for(identifier, page.start_line)))
    }

    /// Task for a bare file name, outside of any dump.
    pub fn task_for(&self, identifier: String, line: u64) -> AssetTask {
        let (h1, h2) = buckets(&identifier);
        let urls = self
            .templates
            .iter()
            .map(|t| t.render(&h1, &h2, &identifier))
            .collect();
        AssetTask {
            local_path: derive_local_path(&identifier),
            identifier,
            urls,
            line,
        }
    }

    fn wants_extension(&self, identifier: &str) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        match identifier.rsplit_once('.') {
            Some((_, ext)) => self.extensions.contains(&ext.to_lowercase()),
            None => false,
        }
    }
}
