use std::io::BufRead;

use log::debug;

use crate::{
    catalog::ChannelCatalog,
    error::{McdError, Result},
};

pub const HEADER_ID: &str = "MC_DataTool binary conversion";
pub const SAMPLE_RATE_VAR: &str = "Sample rate = ";
pub const STREAMS_VAR: &str = "Streams = ";
pub const HEADER_END: &str = "EOH";
pub const ELECTRODE_STEM: &str = "El_";
/// channel tokens must be shorter than this, including the stem
pub const MAX_TOKEN_LEN: usize = 10;

/// Everything the 8 line text preamble of a raw recording declares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingHeader {
    pub sample_rate: u32,
    pub catalog: ChannelCatalog,
    /// the free-form lines 1, 2, 4 and 5, in order
    pub comments: Vec<String>,
}

struct HeaderLines<'a, R> {
    reader: &'a mut R,
    index: usize,
    buf: Vec<u8>,
}

impl<'a, R: BufRead> HeaderLines<'a, R> {
    fn new(reader: &'a mut R) -> Self {
        Self {
            reader,
            index: 0,
            buf: Vec::new(),
        }
    }

    /// returns the line number and the line without trailing CR/LF
    fn next_line(&mut self) -> Result<(usize, String)> {
        let index = self.index;
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            return Err(McdError::TruncatedHeader { line: index });
        }
        self.index += 1;
        let mut end = self.buf.len();
        while end > 0 && matches!(self.buf[end - 1], b'\r' | b'\n') {
            end -= 1;
        }
        Ok((index, String::from_utf8_lossy(&self.buf[..end]).into_owned()))
    }

    fn next_comment(&mut self, comments: &mut Vec<String>) -> Result<()> {
        let (_, line) = self.next_line()?;
        debug!("header: {line}");
        comments.push(line);
        Ok(())
    }
}

/// Parses the preamble, leaving `reader` at the first byte of sample data.
pub fn parse_header<R: BufRead>(reader: &mut R) -> Result<RecordingHeader> {
    let mut lines = HeaderLines::new(reader);
    let mut comments = Vec::with_capacity(4);

    let (index, id) = lines.next_line()?;
    if id != HEADER_ID {
        return Err(McdError::header(
            index,
            format!("first header line != {HEADER_ID}"),
        ));
    }
    lines.next_comment(&mut comments)?;
    lines.next_comment(&mut comments)?;

    let (index, rate_line) = lines.next_line()?;
    let sample_rate = rate_line
        .strip_prefix(SAMPLE_RATE_VAR)
        .ok_or_else(|| {
            McdError::header(
                index,
                format!("sample rate does not begin with: {SAMPLE_RATE_VAR}"),
            )
        })
        .and_then(|rest| {
            parse_leading_u32(rest).ok_or_else(|| {
                McdError::header(index, format!("sample rate is not a number: {rate_line}"))
            })
        })?;

    lines.next_comment(&mut comments)?;
    lines.next_comment(&mut comments)?;

    let (index, streams_line) = lines.next_line()?;
    let streams = streams_line.strip_prefix(STREAMS_VAR).ok_or_else(|| {
        McdError::header(
            index,
            format!("list of channels does not begin with: {STREAMS_VAR}"),
        )
    })?;
    let catalog = decode_channels(streams)?;
    debug!("channels in datafile: {}", catalog.len());

    let (index, end) = lines.next_line()?;
    if end != HEADER_END {
        return Err(McdError::header(
            index,
            format!("last header line != {HEADER_END}"),
        ));
    }

    Ok(RecordingHeader {
        sample_rate,
        catalog,
        comments,
    })
}

/// Decodes a `;` separated list like `El_12;El_13;El_21`.
pub fn decode_channels(list: &str) -> Result<ChannelCatalog> {
    list.split(';')
        .map(decode_channel)
        .collect::<Result<Vec<_>>>()
        .map(ChannelCatalog::new)
}

fn decode_channel(token: &str) -> Result<u32> {
    if token.is_empty() {
        return Err(McdError::channel_list(token, "empty channel name"));
    }
    if token.len() >= MAX_TOKEN_LEN {
        return Err(McdError::channel_list(token, "channel name too long"));
    }
    let number = token
        .strip_prefix(ELECTRODE_STEM)
        .ok_or_else(|| McdError::channel_list(token, "channel name lacks the El_ stem"))?;
    parse_leading_u32(number)
        .ok_or_else(|| McdError::channel_list(token, "invalid channel number"))
}

/// Reads the leading decimal number, skipping leading whitespace and ignoring
/// anything after the digits, so `" 25000 Hz"` yields 25000.
fn parse_leading_u32(s: &str) -> Option<u32> {
    let s = s.trim_start();
    let s = s.strip_prefix('+').unwrap_or(s);
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    s[..digits].parse().ok()
}
