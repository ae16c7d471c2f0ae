use std::{
    fs::File,
    io::{BufWriter, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use binrw::{BinReaderExt, BinResult, BinWriterExt, Endian};
use log::{debug, info};

use crate::{
    error::{McdError, Result},
    structs::{WaveHeader, WaveLimit},
};

/// `<stem>_<channel>_S<speed>.wav`, the speed rounded to a whole number.
pub fn output_path(stem: &str, channel_id: u32, speed: f32) -> PathBuf {
    PathBuf::from(format!("{stem}_{channel_id}_S{speed:.0}.wav"))
}

pub(crate) fn encode_samples(samples: &[i16], endian: Endian, out: &mut Vec<u8>) {
    out.clear();
    out.reserve(samples.len() * 2);
    for sample in samples {
        let bytes = match endian {
            Endian::Little => sample.to_le_bytes(),
            Endian::Big => sample.to_be_bytes(),
        };
        out.extend_from_slice(&bytes);
    }
}

enum SinkState {
    Unopened,
    Streaming(BufWriter<File>),
    Finalized,
}

/// One mono wav output. The file is created with a zeroed header on the first
/// append, and the real header is written over it by `finalize`.
pub struct WavSink {
    path: PathBuf,
    endian: Endian,
    state: SinkState,
    scratch: Vec<u8>,
}

impl WavSink {
    pub fn new(path: PathBuf, endian: Endian) -> Self {
        Self {
            path,
            endian,
            state: SinkState::Unopened,
            scratch: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_created(&self) -> bool {
        !matches!(self.state, SinkState::Unopened)
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.state, SinkState::Finalized)
    }

    fn short_write(&self, source: std::io::Error) -> McdError {
        McdError::ShortWrite {
            path: self.path.clone(),
            source,
        }
    }

    fn create(&self) -> Result<BufWriter<File>> {
        let file = File::create(&self.path).map_err(|source| McdError::Open {
            path: self.path.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&[0; WaveHeader::BYTE_LEN])
            .map_err(|e| self.short_write(e))?;
        info!("created {:?}", self.path);
        Ok(writer)
    }

    /// Appends samples, creating the file on the first call.
    pub fn append(&mut self, samples: &[i16]) -> Result<()> {
        if let SinkState::Unopened = self.state {
            self.state = SinkState::Streaming(self.create()?);
        }
        let mut scratch = std::mem::take(&mut self.scratch);
        encode_samples(samples, self.endian, &mut scratch);
        let result = match &mut self.state {
            SinkState::Streaming(writer) => writer.write_all(&scratch),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "output is already finalized",
            )),
        };
        self.scratch = scratch;
        result.map_err(|e| self.short_write(e))
    }

    /// Writes the final header in place. Sinks that never got created stay
    /// untouched, finalizing twice is a no-op.
    pub fn finalize(&mut self, sample_rate: u32) -> Result<()> {
        let writer = match std::mem::replace(&mut self.state, SinkState::Finalized) {
            SinkState::Streaming(writer) => writer,
            SinkState::Unopened => {
                self.state = SinkState::Unopened;
                return Ok(());
            }
            SinkState::Finalized => return Ok(()),
        };
        let mut file = writer
            .into_inner()
            .map_err(|e| self.short_write(e.into_error()))?;
        let file_len = file.seek(SeekFrom::End(0))?;
        debug!("{:?}: {file_len} bytes", self.path);
        let header = WaveHeader::mono_pcm16(sample_rate, file_len).map_err(|limit| match limit {
            WaveLimit::FileLength(len) => McdError::ContainerTooLarge {
                path: self.path.clone(),
                len,
            },
            WaveLimit::SampleRate(rate) => McdError::SampleRateTooHigh { rate },
        })?;
        file.seek(SeekFrom::Start(0))?;
        file.write_type(&header, self.endian).map_err(|e| match e {
            binrw::Error::Io(e) => self.short_write(e),
            e => McdError::Binary(e),
        })?;
        file.flush().map_err(|e| self.short_write(e))?;
        Ok(())
    }
}

/// Reads a mono 16 bit wav written with `endian` back into its header and samples.
pub fn read_wav<R: Read + Seek>(
    reader: &mut R,
    endian: Endian,
) -> BinResult<(WaveHeader, Vec<i16>)> {
    let header: WaveHeader = reader.read_type(endian)?;
    if !header.is_mono_pcm16() {
        return Err(binrw::Error::AssertFail {
            pos: 0,
            message: format!("not a mono 16 bit PCM wav: {header:?}"),
        });
    }
    let count = header.data_size as usize / 2;
    let mut samples = Vec::with_capacity(count);
    for _ in 0..count {
        samples.push(reader.read_type::<i16>(endian)?);
    }
    Ok((header, samples))
}
