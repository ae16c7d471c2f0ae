use std::{io, path::PathBuf};

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum McdError {
    #[error("header line {line}: {reason}")]
    HeaderFormat { line: usize, reason: String },
    #[error("invalid channel in stream list {token:?}: {reason}")]
    ChannelList { token: String, reason: &'static str },
    #[error("corrupt header, file ends at header line {line}")]
    TruncatedHeader { line: usize },
    #[error("recording does not contain channel {channel}")]
    UnknownChannel { channel: u32, available: Vec<u32> },
    #[error("can't open {path:?}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("short write to {path:?}: {source}")]
    ShortWrite { path: PathBuf, source: io::Error },
    #[error("end of file reached prematurely, likely corrupt: {values} values != {expected}")]
    TruncatedStream { values: usize, expected: usize },
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("{path:?} is too large for a wav container: {len} bytes")]
    ContainerTooLarge { path: PathBuf, len: u64 },
    #[error("declared sample rate {rate} is too high for a 16 bit wav header")]
    SampleRateTooHigh { rate: u32 },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Binary(#[from] binrw::Error),
}

impl McdError {
    pub(crate) fn header(line: usize, reason: impl Into<String>) -> Self {
        Self::HeaderFormat {
            line,
            reason: reason.into(),
        }
    }

    pub(crate) fn channel_list(token: &str, reason: &'static str) -> Self {
        Self::ChannelList {
            token: token.to_string(),
            reason,
        }
    }
}

pub type Result<T> = std::result::Result<T, McdError>;
