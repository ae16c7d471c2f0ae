use std::process::exit;

use anyhow::{bail, Context};
use binrw::Endian;
use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::error;
use mcd_raw::{
    ExtractOptions, ExtractSummary, ExtractionRegistry, McdError, Recording,
    DEFAULT_BUFFER_SAMPLES, MAX_CHANNELS,
};

const EXIT_USAGE: i32 = -1;
const EXIT_OPEN: i32 = -2;
const EXIT_HEADER: i32 = -3;
const EXIT_UNKNOWN_CHANNEL: i32 = -4;
const EXIT_EXTRACT: i32 = -5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ByteOrder {
    Little,
    Big,
}

impl From<ByteOrder> for Endian {
    fn from(order: ByteOrder) -> Self {
        match order {
            ByteOrder::Little => Endian::Little,
            ByteOrder::Big => Endian::Big,
        }
    }
}

fn parse_factor(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|e| format!("{e}"))?;
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("must be greater than 0, got {value}"))
    }
}

#[derive(Parser)]
#[command(
    version,
    after_help = "Example: mcd-extract -a 1.5 -s 5 filename.raw 14 35 28\n         \
                  Extracts channels 14, 35 and 28, amplifies by 1.5X and speeds up by 5X outputting as .wav files"
)]
/// Extracts channels of an MC_DataTool raw recording into wav files
pub struct Args {
    #[arg(short, long, default_value_t = 1.0, value_parser = parse_factor)]
    /// Factor every sample is multiplied with
    amplify: f32,
    #[arg(short, long, default_value_t = 1.0, value_parser = parse_factor)]
    /// Factor for the sample rate declared in the output, samples are not resampled
    speed: f32,
    #[arg(short, long, default_value_t = DEFAULT_BUFFER_SAMPLES)]
    /// Samples buffered per channel before they are written
    buffer_samples: usize,
    #[arg(long, value_enum, default_value_t = ByteOrder::Little)]
    /// Byte order of the samples in the raw file
    input_endian: ByteOrder,
    #[arg(long, value_enum, default_value_t = ByteOrder::Little)]
    /// Byte order of the written wav files
    output_endian: ByteOrder,
    #[arg(short, long)]
    /// Prefix of the output files, default is the raw file path
    output_stem: Option<String>,
    /// Path to the raw file
    raw_path: String,
    #[arg(value_parser = clap::value_parser!(u32).range(..i64::from(MAX_CHANNELS)))]
    /// Channels to extract, all channels if none are given
    channels: Vec<u32>,
}

fn print_summary(summary: &ExtractSummary) {
    if summary.amplitude != 1.0 {
        println!("Signal amplified: {:.2}X", summary.amplitude);
    }
    println!("Total Sample Count: {}", summary.frames);
    println!("Input Sample Rate: {}", summary.input_rate);
    println!("Output Sample Rate: {}", summary.output_rate);
    println!("Input Duration: {:.2} seconds", summary.input_duration());
    println!("Output Duration: {:.2} seconds", summary.output_duration());
}

fn run(args: Args) -> anyhow::Result<()> {
    if args.channels.len() > MAX_CHANNELS as usize {
        bail!(McdError::InvalidOption(format!(
            "at most {MAX_CHANNELS} channels can be requested"
        )));
    }
    let options = ExtractOptions {
        amplitude: args.amplify,
        speed: args.speed,
        buffer_capacity: args.buffer_samples,
        input_endian: args.input_endian.into(),
        output_endian: args.output_endian.into(),
    };
    options.validate()?;

    let recording = Recording::open(&args.raw_path)?;
    let header = recording.header();
    for line in &header.comments {
        println!("{line}");
    }
    println!("# Channels in datafile: {}", header.catalog.len());

    let registry = ExtractionRegistry::for_request(recording.catalog(), &args.channels)
        .map_err(|e| {
            eprintln!("Channel List: {}", recording.catalog().listing());
            e
        })
        .with_context(|| format!("datafile {} is missing a requested channel", args.raw_path))?;

    let stem = args.output_stem.unwrap_or_else(|| args.raw_path.clone());
    let summary = recording
        .extract(&registry, &options, &stem)
        .with_context(|| format!("extracting {} failed", args.raw_path))?;
    print_summary(&summary);
    Ok(())
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<McdError>() {
        Some(McdError::InvalidOption(_)) => EXIT_USAGE,
        Some(McdError::Open { .. }) => EXIT_OPEN,
        Some(
            McdError::HeaderFormat { .. }
            | McdError::ChannelList { .. }
            | McdError::TruncatedHeader { .. },
        ) => EXIT_HEADER,
        Some(McdError::UnknownChannel { .. }) => EXIT_UNKNOWN_CHANNEL,
        _ => EXIT_EXTRACT,
    }
}

fn main() {
    let env = Env::new().default_filter_or("info");
    env_logger::init_from_env(env);
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // --help and --version also end up here
            let code = if e.use_stderr() { EXIT_USAGE } else { 0 };
            let _ = e.print();
            exit(code);
        }
    };
    if let Err(e) = run(args) {
        error!("{e:#}");
        exit(exit_code(&e));
    }
}
