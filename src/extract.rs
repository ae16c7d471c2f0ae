use std::{
    io::{self, Read},
    path::PathBuf,
};

use binrw::Endian;
use log::{debug, info, warn};

use crate::{
    catalog::ExtractionRegistry,
    container::{output_path, WavSink},
    error::{McdError, Result},
    header::RecordingHeader,
    structs::WaveHeader,
};

pub const DEFAULT_BUFFER_SAMPLES: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractOptions {
    /// multiplies every sample, 1.0 copies samples unchanged
    pub amplitude: f32,
    /// multiplies the declared output sample rate, samples are never resampled
    pub speed: f32,
    /// samples buffered per channel between writes
    pub buffer_capacity: usize,
    /// byte order of the samples in the raw recording
    pub input_endian: Endian,
    /// byte order of the wav header fields and payload
    pub output_endian: Endian,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            amplitude: 1.0,
            speed: 1.0,
            buffer_capacity: DEFAULT_BUFFER_SAMPLES,
            input_endian: Endian::Little,
            output_endian: Endian::Little,
        }
    }
}

impl ExtractOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.amplitude.is_finite() && self.amplitude > 0.0) {
            return Err(McdError::InvalidOption(format!(
                "amplitude factor must be positive, got {}",
                self.amplitude
            )));
        }
        if !(self.speed.is_finite() && self.speed > 0.0) {
            return Err(McdError::InvalidOption(format!(
                "speed factor must be positive, got {}",
                self.speed
            )));
        }
        if self.buffer_capacity == 0 {
            return Err(McdError::InvalidOption(
                "buffer capacity must not be zero".into(),
            ));
        }
        Ok(())
    }

    /// The rate written into the output headers. The product is taken in single
    /// precision and truncated to whole Hz, so `1000 * 1.3` stays 1300.
    pub fn output_rate(&self, input_rate: u32) -> u32 {
        if self.speed == 1.0 {
            input_rate
        } else {
            (input_rate as f32 * self.speed) as u32
        }
    }
}

/// A trailing frame that ended before all channels were read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatedFrame {
    pub bytes: usize,
    pub values: usize,
    pub expected: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractSummary {
    pub frames: u64,
    pub input_rate: u32,
    pub output_rate: u32,
    pub amplitude: f32,
    pub truncated: Option<TruncatedFrame>,
    pub outputs: Vec<PathBuf>,
}

impl ExtractSummary {
    pub fn input_duration(&self) -> f64 {
        self.frames as f64 / f64::from(self.input_rate)
    }

    pub fn output_duration(&self) -> f64 {
        self.frames as f64 / f64::from(self.output_rate)
    }
}

/// Scales a sample. The product is truncated towards zero and saturates at the
/// i16 bounds.
pub fn amplify(sample: i16, factor: f32) -> i16 {
    if factor == 1.0 {
        sample
    } else {
        (f32::from(sample) * factor) as i16
    }
}

struct ChannelOutput {
    position: usize,
    samples: Vec<i16>,
    sink: WavSink,
}

struct Demuxer {
    frame_len: usize,
    options: ExtractOptions,
    outputs: Vec<ChannelOutput>,
}

impl Demuxer {
    fn new(
        header: &RecordingHeader,
        registry: &ExtractionRegistry,
        options: ExtractOptions,
        stem: &str,
    ) -> Result<Self> {
        let ids = header.catalog.ids();
        let mut outputs: Vec<ChannelOutput> = Vec::with_capacity(registry.len());
        for &position in registry.positions() {
            let id = *ids.get(position).ok_or_else(|| {
                McdError::InvalidOption(format!(
                    "registered position {position} is outside of the {} channel catalog",
                    ids.len()
                ))
            })?;
            let path = output_path(stem, id, options.speed);
            if outputs.iter().any(|o| o.sink.path() == path.as_path()) {
                warn!("channel {id} appears more than once, only extracting its first stream");
                continue;
            }
            outputs.push(ChannelOutput {
                position,
                samples: Vec::with_capacity(options.buffer_capacity),
                sink: WavSink::new(path, options.output_endian),
            });
        }
        Ok(Self {
            frame_len: ids.len(),
            options,
            outputs,
        })
    }

    fn flush(&mut self) -> Result<()> {
        for output in self.outputs.iter_mut() {
            output.sink.append(&output.samples)?;
            output.samples.clear();
        }
        Ok(())
    }

    fn push_frame(&mut self, raw: &[u8]) {
        let (endian, amplitude) = (self.options.input_endian, self.options.amplitude);
        for output in self.outputs.iter_mut() {
            let bytes = [raw[output.position * 2], raw[output.position * 2 + 1]];
            let sample = match endian {
                Endian::Little => i16::from_le_bytes(bytes),
                Endian::Big => i16::from_be_bytes(bytes),
            };
            output.samples.push(amplify(sample, amplitude));
        }
    }

    /// Reads frames until the input runs out, flushing whenever the buffers fill up
    /// and once more at the end.
    fn stream<R: Read>(&mut self, input: &mut R) -> Result<(u64, Option<TruncatedFrame>)> {
        let mut raw = vec![0u8; self.frame_len * 2];
        let mut frames = 0u64;
        let mut buffered = 0usize;
        loop {
            let filled = read_frame(input, &mut raw)?;
            if filled < raw.len() {
                self.flush()?;
                let truncated = (filled > 0).then_some(TruncatedFrame {
                    bytes: filled,
                    values: filled / 2,
                    expected: self.frame_len,
                });
                return Ok((frames, truncated));
            }
            self.push_frame(&raw);
            frames += 1;
            buffered += 1;
            if buffered >= self.options.buffer_capacity {
                debug!("flushing {buffered} samples per channel");
                self.flush()?;
                buffered = 0;
            }
        }
    }

    fn finalize(&mut self, sample_rate: u32) -> Result<()> {
        for output in self.outputs.iter_mut() {
            output.sink.finalize(sample_rate)?;
        }
        Ok(())
    }

    /// Used after a fatal error, so outputs that already exist end up with a valid header.
    fn finalize_best_effort(&mut self, sample_rate: u32) {
        for output in self.outputs.iter_mut() {
            if let Err(e) = output.sink.finalize(sample_rate) {
                warn!("could not finalize {:?}: {e}", output.sink.path());
            }
        }
    }
}

/// Fills `buf` as far as the input allows, returns the number of bytes read.
fn read_frame<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Demultiplexes the sample frames following a parsed header into one mono wav
/// file per registered channel, named by [`output_path`].
///
/// A trailing partial frame is reported in the summary and doesn't fail the run.
/// Write errors abort the run, after trying to finalize every file created so far.
pub fn extract<R: Read>(
    input: &mut R,
    header: &RecordingHeader,
    registry: &ExtractionRegistry,
    options: &ExtractOptions,
    stem: &str,
) -> Result<ExtractSummary> {
    options.validate()?;
    if header.catalog.is_empty() {
        return Err(McdError::InvalidOption(
            "recording declares no channels".into(),
        ));
    }
    let output_rate = options.output_rate(header.sample_rate);
    if output_rate > WaveHeader::max_sample_rate() {
        return Err(McdError::SampleRateTooHigh { rate: output_rate });
    }
    let mut demuxer = Demuxer::new(header, registry, *options, stem)?;

    let (frames, truncated) = match demuxer.stream(input) {
        Ok(result) => result,
        Err(e) => {
            demuxer.finalize_best_effort(output_rate);
            return Err(e);
        }
    };
    if let Some(t) = truncated {
        warn!(
            "{}",
            McdError::TruncatedStream {
                values: t.values,
                expected: t.expected,
            }
        );
    }
    demuxer.finalize(output_rate)?;

    let outputs: Vec<PathBuf> = demuxer
        .outputs
        .iter()
        .map(|o| o.sink.path().to_path_buf())
        .collect();
    info!("extracted {frames} frames into {} files", outputs.len());
    Ok(ExtractSummary {
        frames,
        input_rate: header.sample_rate,
        output_rate,
        amplitude: options.amplitude,
        truncated,
        outputs,
    })
}

#[cfg(test)]
mod test {
    use std::{
        fs::File,
        io::{BufReader, Cursor},
        path::Path,
    };

    use super::*;
    use crate::{
        container::read_wav,
        header::{parse_header, test::header_text},
    };

    /// A raw recording with `frames[i][c]` as the sample of catalog position `c` in frame `i`.
    fn recording(rate: u32, streams: &str, frames: &[Vec<i16>]) -> Vec<u8> {
        let mut data = header_text(&rate.to_string(), streams).into_bytes();
        for frame in frames {
            for sample in frame {
                data.extend_from_slice(&sample.to_le_bytes());
            }
        }
        data
    }

    fn ramp(frames: usize, channels: usize) -> Vec<Vec<i16>> {
        (0..frames)
            .map(|f| (0..channels).map(|c| (f * 10 + c) as i16 - 500).collect())
            .collect()
    }

    fn run(
        data: &[u8],
        channels: &[u32],
        options: &ExtractOptions,
        stem: &Path,
    ) -> Result<ExtractSummary> {
        let mut cursor = Cursor::new(data);
        let header = parse_header(&mut cursor)?;
        let registry = ExtractionRegistry::for_request(&header.catalog, channels)?;
        extract(
            &mut cursor,
            &header,
            &registry,
            options,
            stem.to_str().unwrap(),
        )
    }

    fn read_output(path: &Path) -> (u32, Vec<i16>) {
        let (header, samples) =
            read_wav(&mut BufReader::new(File::open(path).unwrap()), Endian::Little).unwrap();
        assert_eq!(
            header.riff_size as u64 + 8,
            std::fs::metadata(path).unwrap().len()
        );
        (header.sample_rate, samples)
    }

    fn column(frames: &[Vec<i16>], position: usize) -> Vec<i16> {
        frames.iter().map(|f| f[position]).collect()
    }

    #[test]
    fn extracts_one_channel_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("rec.raw");
        let frames = ramp(10, 3);
        let data = recording(1000, "El_12;El_13;El_21", &frames);

        let summary = run(&data, &[13], &ExtractOptions::default(), &stem).unwrap();
        assert_eq!(summary.frames, 10);
        assert_eq!(summary.input_rate, 1000);
        assert_eq!(summary.output_rate, 1000);
        assert_eq!(summary.truncated, None);
        assert_eq!(summary.outputs, [dir.path().join("rec.raw_13_S1.wav")]);
        assert!((summary.input_duration() - 0.01).abs() < 1e-9);

        let (rate, samples) = read_output(&summary.outputs[0]);
        assert_eq!(rate, 1000);
        assert_eq!(samples, column(&frames, 1));
        assert!(!dir.path().join("rec.raw_12_S1.wav").exists());
    }

    #[test]
    fn extracts_all_channels_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("rec.raw");
        let frames = ramp(7, 4);
        let data = recording(2000, "El_1;El_2;El_3;El_4", &frames);

        let summary = run(&data, &[], &ExtractOptions::default(), &stem).unwrap();
        assert_eq!(summary.outputs.len(), 4);
        for (position, id) in [1, 2, 3, 4].into_iter().enumerate() {
            let path = dir.path().join(format!("rec.raw_{id}_S1.wav"));
            assert_eq!(read_output(&path).1, column(&frames, position));
        }
    }

    #[test]
    fn duplicate_ids_write_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("rec.raw");
        let frames = ramp(3, 3);
        let data = recording(1000, "El_5;El_6;El_5", &frames);

        let summary = run(&data, &[], &ExtractOptions::default(), &stem).unwrap();
        assert_eq!(summary.outputs.len(), 2);
        let (_, samples) = read_output(&dir.path().join("rec.raw_5_S1.wav"));
        assert_eq!(samples, column(&frames, 0));
    }

    #[test]
    fn amplifies_samples() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("rec.raw");
        let frames = vec![vec![100, -3], vec![-1000, 7], vec![16383, 0]];
        let data = recording(1000, "El_1;El_2", &frames);
        let options = ExtractOptions {
            amplitude: 2.0,
            ..Default::default()
        };

        let summary = run(&data, &[1], &options, &stem).unwrap();
        let (_, samples) = read_output(&summary.outputs[0]);
        assert_eq!(samples, [200, -2000, 32766]);
    }

    #[test]
    fn amplification_saturates_and_truncates() {
        assert_eq!(amplify(20000, 2.0), i16::MAX);
        assert_eq!(amplify(-20000, 2.0), i16::MIN);
        assert_eq!(amplify(3, 1.5), 4);
        assert_eq!(amplify(-3, 1.5), -4);
        assert_eq!(amplify(5, 0.5), 2);
        assert_eq!(amplify(-123, 1.0), -123);
    }

    #[test]
    fn speed_only_relabels_rate() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("rec.raw");
        let frames = ramp(20, 2);
        let data = recording(1000, "El_8;El_9", &frames);

        let normal = run(&data, &[9], &ExtractOptions::default(), &stem).unwrap();
        let fast_options = ExtractOptions {
            speed: 5.0,
            ..Default::default()
        };
        let fast = run(&data, &[9], &fast_options, &stem).unwrap();
        assert_eq!(fast.output_rate, 5000);
        assert_eq!(fast.outputs, [dir.path().join("rec.raw_9_S5.wav")]);
        assert!((fast.output_duration() - 0.004).abs() < 1e-9);

        let (rate, _) = read_output(&fast.outputs[0]);
        assert_eq!(rate, 5000);
        let normal_bytes = std::fs::read(&normal.outputs[0]).unwrap();
        let fast_bytes = std::fs::read(&fast.outputs[0]).unwrap();
        assert_eq!(normal_bytes[44..], fast_bytes[44..]);
    }

    #[test]
    fn output_rate_truncates() {
        let options = ExtractOptions {
            speed: 1.5,
            ..Default::default()
        };
        assert_eq!(options.output_rate(25001), 37501);
        assert_eq!(ExtractOptions::default().output_rate(25001), 25001);
        let options = ExtractOptions {
            speed: 0.3,
            ..Default::default()
        };
        assert_eq!(options.output_rate(10), 3);
        for (rate, speed, expected) in [
            (1000, 1.3, 1300),
            (20000, 0.7, 14000),
            (10000, 2.3, 23000),
        ] {
            let options = ExtractOptions {
                speed,
                ..Default::default()
            };
            assert_eq!(options.output_rate(rate), expected, "{rate} * {speed}");
        }
    }

    #[test]
    fn unrepresentable_rate_creates_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("rec.raw");
        let data = recording(1000, "El_1", &ramp(3, 1));
        let options = ExtractOptions {
            speed: 5e6,
            ..Default::default()
        };
        assert!(matches!(
            run(&data, &[], &options, &stem),
            Err(McdError::SampleRateTooHigh { .. })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn truncated_stream_keeps_complete_frames() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("rec.raw");
        let frames = ramp(6, 3);
        let mut data = recording(1000, "El_1;El_2;El_3", &frames);
        // half of a frame: one full value and one dangling byte
        data.extend_from_slice(&[0x11, 0x22, 0x33]);

        let summary = run(&data, &[2, 3], &ExtractOptions::default(), &stem).unwrap();
        assert_eq!(summary.frames, 6);
        assert_eq!(
            summary.truncated,
            Some(TruncatedFrame {
                bytes: 3,
                values: 1,
                expected: 3
            })
        );
        for (path, position) in summary.outputs.iter().zip([1, 2]) {
            assert_eq!(read_output(path).1, column(&frames, position));
        }
    }

    #[test]
    fn empty_stream_gives_empty_containers() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("rec.raw");
        let data = recording(1000, "El_1", &[]);

        let summary = run(&data, &[], &ExtractOptions::default(), &stem).unwrap();
        assert_eq!(summary.frames, 0);
        let (rate, samples) = read_output(&summary.outputs[0]);
        assert_eq!(rate, 1000);
        assert!(samples.is_empty());
    }

    #[test]
    fn flush_boundaries_do_not_change_output() {
        let dir = tempfile::tempdir().unwrap();
        let capacity = 4;
        let frames = ramp(capacity + 1, 2);
        let data = recording(1000, "El_1;El_2", &frames);

        let mut outputs = Vec::new();
        for (name, buffer_capacity) in [("small", capacity), ("exact", 1), ("large", 1000)] {
            let options = ExtractOptions {
                buffer_capacity,
                ..Default::default()
            };
            let summary = run(&data, &[2], &options, &dir.path().join(name)).unwrap();
            outputs.push(std::fs::read(&summary.outputs[0]).unwrap());
        }
        assert_eq!(outputs[0], outputs[2]);
        assert_eq!(outputs[1], outputs[2]);
        let (_, samples) = read_output(&dir.path().join("small_2_S1.wav"));
        assert_eq!(samples, column(&frames, 1));
    }

    #[test]
    fn big_endian_input() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("rec.raw");
        let mut data = header_text("1000", "El_1;El_2").into_bytes();
        for sample in [1i16, 2, -300, 400] {
            data.extend_from_slice(&sample.to_be_bytes());
        }
        let options = ExtractOptions {
            input_endian: Endian::Big,
            ..Default::default()
        };

        let summary = run(&data, &[1], &options, &stem).unwrap();
        assert_eq!(read_output(&summary.outputs[0]).1, [1, -300]);
    }

    #[test]
    fn rejects_bad_options() {
        for options in [
            ExtractOptions {
                amplitude: 0.0,
                ..Default::default()
            },
            ExtractOptions {
                speed: -1.0,
                ..Default::default()
            },
            ExtractOptions {
                speed: f32::NAN,
                ..Default::default()
            },
            ExtractOptions {
                buffer_capacity: 0,
                ..Default::default()
            },
        ] {
            assert!(matches!(
                options.validate(),
                Err(McdError::InvalidOption(_))
            ));
        }
    }

    #[test]
    fn unknown_channel_creates_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("rec.raw");
        let data = recording(1000, "El_1;El_2", &ramp(3, 2));
        assert!(matches!(
            run(&data, &[1, 3], &ExtractOptions::default(), &stem),
            Err(McdError::UnknownChannel { channel: 3, .. })
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn unwritable_output_fails() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("missing").join("rec.raw");
        let data = recording(1000, "El_1", &ramp(3, 1));
        assert!(matches!(
            run(&data, &[], &ExtractOptions::default(), &stem),
            Err(McdError::Open { .. })
        ));
    }

    /// Hands out the wrapped bytes, then fails instead of reporting the end.
    struct FailingReader<R>(R);

    impl<R: Read> Read for FailingReader<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::Other, "device went away")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn read_error_still_finalizes_flushed_files() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("rec.raw");
        let header = parse_header(&mut Cursor::new(header_text("1000", "El_4"))).unwrap();
        let registry = ExtractionRegistry::for_request(&header.catalog, &[]).unwrap();
        let frames = ramp(5, 1);
        let data: Vec<u8> = frames.iter().flat_map(|f| f[0].to_le_bytes()).collect();
        let options = ExtractOptions {
            buffer_capacity: 2,
            ..Default::default()
        };

        let result = extract(
            &mut FailingReader(Cursor::new(data)),
            &header,
            &registry,
            &options,
            stem.to_str().unwrap(),
        );
        assert!(matches!(result, Err(McdError::Io(_))));
        // the fifth frame was still buffered when the read failed
        let (rate, samples) = read_output(&dir.path().join("rec.raw_4_S1.wav"));
        assert_eq!(rate, 1000);
        assert_eq!(samples, column(&frames[..4], 0));
    }

    #[test]
    fn foreign_registry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = recording(1000, "El_1", &ramp(3, 1));
        let mut cursor = Cursor::new(&data[..]);
        let header = parse_header(&mut cursor).unwrap();
        let mut registry = ExtractionRegistry::new();
        registry.register_all(&crate::catalog::ChannelCatalog::new(vec![1, 2]));
        let stem = dir.path().join("rec.raw");
        assert!(matches!(
            extract(
                &mut cursor,
                &header,
                &registry,
                &ExtractOptions::default(),
                stem.to_str().unwrap()
            ),
            Err(McdError::InvalidOption(_))
        ));
    }
}
