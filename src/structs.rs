use binrw::binrw;

// canonical 44 byte RIFF/WAVE header: RIFF chunk, 16 byte fmt chunk, data chunk header.
// no endianness is fixed here, it's picked when reading/writing

#[binrw]
#[brw(magic = b"RIFF")]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WaveHeader {
    // total file size - 8
    pub riff_size: u32,
    #[brw(magic = b"WAVEfmt ")]
    pub fmt_size: u32,
    // 1 = PCM
    pub audio_format: u16,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
    // total file size - 44
    #[brw(magic = b"data")]
    pub data_size: u32,
}

/// Which header field can't represent the requested value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveLimit {
    FileLength(u64),
    SampleRate(u32),
}

impl WaveHeader {
    pub const BYTE_LEN: usize = 44;
    pub const BITS_PER_SAMPLE: u16 = 16;

    pub fn byte_len() -> u32 {
        Self::BYTE_LEN as u32
    }

    /// Header of a mono 16 bit PCM file that is `file_len` bytes long in total.
    pub fn mono_pcm16(sample_rate: u32, file_len: u64) -> Result<Self, WaveLimit> {
        let channel_count = 1;
        let block_align = Self::BITS_PER_SAMPLE * channel_count / 8;
        let size_field = |header_part: u64| {
            file_len
                .checked_sub(header_part)
                .and_then(|size| u32::try_from(size).ok())
                .ok_or(WaveLimit::FileLength(file_len))
        };
        Ok(Self {
            riff_size: size_field(8)?,
            fmt_size: 16,
            audio_format: 1,
            channel_count,
            sample_rate,
            byte_rate: sample_rate
                .checked_mul(block_align.into())
                .ok_or(WaveLimit::SampleRate(sample_rate))?,
            block_align,
            bits_per_sample: Self::BITS_PER_SAMPLE,
            data_size: size_field(Self::BYTE_LEN as u64)?,
        })
    }

    /// Highest sample rate whose byte rate still fits the header.
    pub fn max_sample_rate() -> u32 {
        u32::MAX / u32::from(Self::BITS_PER_SAMPLE / 8)
    }

    pub fn is_mono_pcm16(&self) -> bool {
        self.fmt_size == 16
            && self.audio_format == 1
            && self.channel_count == 1
            && self.bits_per_sample == Self::BITS_PER_SAMPLE
    }
}
