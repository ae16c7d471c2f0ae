//! Demultiplexes MC_DataTool binary conversions (a text header followed by
//! interleaved signed 16 bit samples) into one mono wav file per channel.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

pub mod catalog;
pub mod container;
mod error;
pub mod extract;
pub mod header;
pub mod structs;

pub use catalog::{ChannelCatalog, ExtractionRegistry};
pub use container::{output_path, read_wav};
pub use error::{McdError, Result};
pub use extract::{extract, ExtractOptions, ExtractSummary, DEFAULT_BUFFER_SAMPLES};
pub use header::{parse_header, RecordingHeader};

/// Highest channel id (exclusive) accepted on the command line.
pub const MAX_CHANNELS: u32 = 256;

/// A raw recording whose header is already parsed, positioned at the first frame.
pub struct Recording<R> {
    header: RecordingHeader,
    reader: R,
}

impl Recording<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| McdError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(BufReader::new(file))
    }
}

impl<R: BufRead> Recording<R> {
    pub fn new(mut reader: R) -> Result<Self> {
        let header = parse_header(&mut reader)?;
        Ok(Self { header, reader })
    }

    pub fn header(&self) -> &RecordingHeader {
        &self.header
    }

    pub fn catalog(&self) -> &ChannelCatalog {
        &self.header.catalog
    }

    /// Consumes the remaining frames, see [`extract()`].
    pub fn extract(
        mut self,
        registry: &ExtractionRegistry,
        options: &ExtractOptions,
        stem: &str,
    ) -> Result<ExtractSummary> {
        extract(&mut self.reader, &self.header, registry, options, stem)
    }
}
