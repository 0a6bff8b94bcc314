pub mod page;
pub mod reader;
pub mod siteinfo;

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use bzip2::read::MultiBzDecoder;
use thiserror::Error;

pub use page::PageRecord;
pub use reader::{DumpReader, ReaderOptions};
pub use siteinfo::SiteInfo;

const READ_BUFFER: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum DumpError {
    #[error("illegal schema at line {line}: {reason}")]
    Schema { line: u64, reason: String },

    #[error("bad siteinfo at line {line}: {reason}")]
    SiteInfo { line: u64, reason: String },

    #[error("malformed page starting at line {start_line} (read up to line {line}): {reason}")]
    MalformedRecord {
        start_line: u64,
        line: u64,
        reason: String,
    },

    /// The stream ended inside a `<page>` block.
    #[error("page starting at line {start_line} is not closed before end of stream")]
    UnterminatedRecord { start_line: u64 },

    #[error("{0}")]
    Protocol(&'static str),

    #[error("read error at line {line}: {source}")]
    Io {
        line: u64,
        #[source]
        source: io::Error,
    },
}

impl DumpError {
    /// Line an operator should hand back to `--resume` after fixing the input.
    pub fn resume_line(&self, current: u64) -> u64 {
        match self {
            DumpError::MalformedRecord { start_line, .. }
            | DumpError::UnterminatedRecord { start_line } => *start_line,
            _ => current,
        }
    }
}

/// Open a dump for line reading. `None` or `-` is standard input; `.bz2` files are decompressed,
/// including multistream dumps (several bzip2 streams back to back).
pub fn open_input(path: Option<&Path>) -> io::Result<Box<dyn BufRead + Send>> {
    let path = match path {
        Some(p) if p != Path::new("-") => p,
        _ => {
            return Ok(Box::new(BufReader::with_capacity(READ_BUFFER, io::stdin())));
        }
    };

    let file = File::open(path)?;
    let is_bz2 = path.extension().map(|e| e == "bz2").unwrap_or(false);
    if is_bz2 {
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER, MultiBzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER, file)))
    }
}

/// Open/close depth tracking shared by the fragment parsers.
#[derive(Default)]
pub(crate) struct ElementStack {
    names: Vec<Vec<u8>>,
}

impl ElementStack {
    pub fn push(&mut self, name: &[u8]) {
        self.names.push(name.to_vec());
    }

    pub fn pop(&mut self) {
        self.names.pop();
    }

    pub fn depth(&self) -> usize {
        self.names.len()
    }

    /// True when the open elements are exactly `path`.
    pub fn at(&self, path: &[&[u8]]) -> bool {
        self.names.len() == path.len() && self.names.iter().zip(path).all(|(a, b)| a == b)
    }
}
