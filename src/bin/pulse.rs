//! Pulse CLI - Command-line interface for Pulseflux
//!
//! Commands:
//! - analyze: HRV analysis of a recorded IBI list
//! - detect: run the peak detector over a raw sample recording
//! - simulate: drive the live pipeline from the synthetic pulse source
//! - history: print stored measurement records

use clap::{Parser, Subcommand};
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use pulseflux::{
    sample_queue, ComputeError, DetectorConfig, HrvResult, MeasurementSession, MeasurementStore,
    MonotonicClock, PeakDetector, Sampler, SessionConfig, StepEvent, SyntheticPulse, TraceSink,
    PULSEFLUX_VERSION,
};

/// Pulseflux - cardiac peak detection and HRV analysis
#[derive(Parser)]
#[command(name = "pulse")]
#[command(version = PULSEFLUX_VERSION)]
#[command(about = "Detect beats and compute HRV from PPG sample streams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute HRV metrics from a recorded IBI list
    Analyze {
        /// Input file with a JSON array or whitespace-separated ms values
        /// (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Pretty-print the result JSON
        #[arg(long)]
        pretty: bool,

        /// Append the result to a measurement store file
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Run the peak detector over a raw sample recording
    Detect {
        /// Input file with whitespace-separated raw samples (use - for stdin)
        #[arg(short, long, default_value = "-")]
        input: PathBuf,

        /// Sampling rate of the recording in Hz
        #[arg(long, default_value = "250")]
        sample_rate: u32,

        /// Print each confirmed beat as it is found
        #[arg(long)]
        verbose: bool,
    },

    /// Run the live pipeline against the synthetic pulse source
    Simulate {
        /// Collection duration in seconds
        #[arg(long, default_value = "10")]
        duration: u64,

        /// Synthetic beat period in milliseconds
        #[arg(long, default_value = "800")]
        period_ms: u32,

        /// Uniform noise amplitude in counts
        #[arg(long, default_value = "0")]
        noise: u16,
    },

    /// Print records from a measurement store file
    History {
        /// Measurement store path
        #[arg(short, long, default_value = "data.json")]
        store: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Analyze {
            input,
            pretty,
            store,
        } => cmd_analyze(&input, pretty, store.as_deref()),
        Commands::Detect {
            input,
            sample_rate,
            verbose,
        } => cmd_detect(&input, sample_rate, verbose),
        Commands::Simulate {
            duration,
            period_ms,
            noise,
        } => cmd_simulate(duration, period_ms, noise),
        Commands::History { store } => cmd_history(&store),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn read_input(path: &std::path::Path) -> Result<String, ComputeError> {
    if path.as_os_str() == "-" {
        if atty::is(atty::Stream::Stdin) {
            eprintln!("reading from stdin (end with EOF)...");
        }
        let mut contents = String::new();
        std::io::stdin().read_to_string(&mut contents)?;
        Ok(contents)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

/// Accept either a JSON array of integers or whitespace-separated values.
fn parse_intervals(contents: &str) -> Result<Vec<u32>, ComputeError> {
    let trimmed = contents.trim();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .split_whitespace()
        .map(|token| {
            token
                .parse::<u32>()
                .map_err(|_| ComputeError::ParseError(format!("not a millisecond value: {token}")))
        })
        .collect()
}

fn parse_samples(contents: &str) -> Result<Vec<u16>, ComputeError> {
    contents
        .split_whitespace()
        .map(|token| {
            token
                .parse::<u16>()
                .map_err(|_| ComputeError::ParseError(format!("not a raw sample: {token}")))
        })
        .collect()
}

fn print_result(result: &HrvResult, pretty: bool) -> Result<(), ComputeError> {
    let json = if pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };
    println!("{json}");
    Ok(())
}

fn cmd_analyze(
    input: &std::path::Path,
    pretty: bool,
    store: Option<&std::path::Path>,
) -> Result<(), ComputeError> {
    let intervals = parse_intervals(&read_input(input)?)?;
    let result = HrvResult::compute(&intervals)?;
    print_result(&result, pretty)?;
    if let Some(path) = store {
        MeasurementStore::open(path)?.append(&result)?;
    }
    Ok(())
}

fn cmd_detect(
    input: &std::path::Path,
    sample_rate: u32,
    verbose: bool,
) -> Result<(), ComputeError> {
    let samples = parse_samples(&read_input(input)?)?;
    let ms_per_sample = 1000.0 / sample_rate as f64;

    let mut detector = PeakDetector::new(DetectorConfig {
        sample_rate_hz: sample_rate,
        ..Default::default()
    });
    for (i, &sample) in samples.iter().enumerate() {
        let now_ms = (i as f64 * ms_per_sample) as u64;
        if let StepEvent::Beat(beat) = detector.step(sample, now_ms) {
            if verbose {
                let marker = if beat.accepted { "" } else { " (rejected)" };
                println!("beat at {now_ms} ms: IBI {} ms, {:.1} BPM{marker}", beat.ibi_ms, beat.bpm);
            }
        }
    }

    let history = detector.ibi_history()?;
    println!("{} intervals from {} samples", history.len(), samples.len());
    let result = HrvResult::compute(history)?;
    print_result(&result, true)
}

/// Prints the countdown once per second during a simulated session.
struct CountdownTrace {
    last_printed: Option<u64>,
}

impl TraceSink for CountdownTrace {
    fn on_countdown(&mut self, seconds_left: u64) {
        if self.last_printed != Some(seconds_left) {
            self.last_printed = Some(seconds_left);
            eprintln!("{seconds_left}s remaining");
        }
    }
    fn on_bpm(&mut self, bpm: f64) {
        eprint!("\rBPM: {bpm:.0}  ");
    }
}

fn cmd_simulate(duration: u64, period_ms: u32, noise: u16) -> Result<(), ComputeError> {
    let config = DetectorConfig::default();
    let (producer, consumer) = sample_queue(config.queue_capacity);
    let source = SyntheticPulse::new(config.sample_rate_hz, period_ms).with_noise(noise, 1);
    let sampler = Sampler::start(source, producer, config.sample_rate_hz);

    let mut session = MeasurementSession::new(
        PeakDetector::new(config),
        consumer,
        SessionConfig {
            collection_duration_ms: duration * 1000,
        },
        MonotonicClock::new(),
    );

    let mut trace = CountdownTrace { last_printed: None };
    while !session.is_complete() {
        session.tick(&mut trace);
        std::thread::sleep(Duration::from_millis(10));
    }
    session.tick(&mut trace);
    sampler.stop();
    eprintln!();

    let result = session.finish()?;
    print_result(&result, true)
}

fn cmd_history(store: &std::path::Path) -> Result<(), ComputeError> {
    let records = MeasurementStore::open(store)?.load()?;
    if records.is_empty() {
        println!("no measurements recorded");
        return Ok(());
    }
    for record in &records {
        println!(
            "{} [{}] HR {:.2} bpm, PPI {:.2} ms, RMSSD {}, SDNN {:.2}",
            record.time, record.id, record.mean_hr, record.mean_ppi, record.rmssd, record.sdnn
        );
    }
    Ok(())
}
