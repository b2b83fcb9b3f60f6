//! `iio-writedev`: write samples from stdin to an IIO device.
//!
//! ```bash
//! # Stream a waveform file into both DDS channels of an AD9361
//! iio-writedev -u ip:192.168.2.1 -b 4096 cf-ad9361-dds-core-lpc voltage0 voltage1 < tone.bin
//!
//! # Load a pattern once and let the device replay it
//! iio-writedev -c -s 1024 cf-ad9361-dds-core-lpc < pattern.bin
//!
//! # Dry run against the built-in mock device
//! head -c 1048576 /dev/urandom | iio-writedev -u mock: -B mock-dac
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use iio_writedev::hardware::mock::{MockContext, MOCK_URI_PREFIX};
use iio_writedev::hardware::DeviceContext;
use iio_writedev::logging::{self, parse_log_format, parse_log_level, LoggingConfig};
use iio_writedev::settings::Settings;
use iio_writedev::signals::spawn_signal_watcher;
use iio_writedev::{RunControl, StreamConfig, WriteSession, EXIT_FAILURE};

#[derive(Parser, Debug)]
#[command(name = "iio-writedev")]
#[command(version, about = "Write samples from standard input to an IIO device", long_about = None)]
struct Cli {
    /// Use the specified trigger
    #[arg(short = 't', long)]
    trigger: Option<String>,

    /// Size of the buffer in samples
    #[arg(short = 'b', long, value_parser = clap::value_parser!(u64).range(1..))]
    buffer_size: Option<u64>,

    /// Number of samples to write, 0 = infinite
    #[arg(short = 's', long, default_value_t = 0)]
    samples: u64,

    /// Use cyclic buffer mode
    #[arg(short = 'c', long)]
    cyclic: bool,

    /// Benchmark throughput; statistics are printed on stderr
    #[arg(short = 'B', long)]
    benchmark: bool,

    /// Context URI (ip:, usb:, serial:, local:, mock:)
    #[arg(short = 'u', long)]
    uri: Option<String>,

    /// Context timeout in milliseconds
    #[arg(short = 'T', long)]
    timeout: Option<u32>,

    /// Rate written to the trigger, in Hz
    #[arg(long)]
    trigger_frequency: Option<i64>,

    /// Settings file (default: ./iio_writedev.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, compact, json)
    #[arg(long)]
    log_format: Option<String>,

    /// Device name or id
    device: String,

    /// Channels to enable, by id or label (default: all output channels)
    channels: Vec<String>,
}

fn main() {
    let cli = Cli::parse();

    let code = match try_main(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_FAILURE
        }
    };

    std::process::exit(code);
}

fn try_main(cli: Cli) -> Result<i32> {
    let settings = Settings::load(cli.config.as_deref());
    let logging_config = logging_config(&cli, settings.as_ref().ok());
    logging::init(logging_config.as_ref().ok().cloned().unwrap_or_default())
        .context("Unable to initialize logging")?;
    let settings = settings.context("Unable to load settings")?;
    logging_config?;

    let buffer_size = match cli.buffer_size {
        Some(size) => usize::try_from(size).context("Buffer size too large")?,
        None => settings.stream.buffer_size,
    };

    let config = StreamConfig::builder()
        .device(cli.device)
        .channels(cli.channels)
        .trigger(cli.trigger)
        .buffer_size(buffer_size)
        .samples(cli.samples)
        .cyclic(cli.cyclic)
        .benchmark(cli.benchmark)
        .idle_tick(settings.stream.idle_tick())
        .trigger_frequency_hz(
            cli.trigger_frequency
                .unwrap_or(settings.stream.trigger_frequency_hz),
        )
        .build()?;

    let control = RunControl::new();
    spawn_signal_watcher(Arc::clone(&control)).context("Unable to watch signals")?;

    let uri = cli.uri.or(settings.context.uri);
    let timeout = cli.timeout.or(settings.context.timeout_ms);

    match uri.as_deref() {
        Some(uri) if uri.starts_with(MOCK_URI_PREFIX) => {
            stream(MockContext::demo(), config, &control)
        }
        uri => stream(open_hardware(uri, timeout)?, config, &control),
    }
}

fn logging_config(cli: &Cli, settings: Option<&Settings>) -> iio_writedev::Result<LoggingConfig> {
    let mut config = match settings {
        Some(settings) => LoggingConfig::from_settings(&settings.logging)?,
        None => LoggingConfig::default(),
    };
    if let Some(level) = cli.log_level.as_deref() {
        config.level = parse_log_level(level)?;
    }
    if let Some(format) = cli.log_format.as_deref() {
        config.format = parse_log_format(format)?;
    }
    Ok(config)
}

fn stream<C: DeviceContext>(
    context: C,
    config: StreamConfig,
    control: &Arc<RunControl>,
) -> Result<i32> {
    let benchmark = config.benchmark;
    let session = WriteSession::open(context, config)?;

    let mut input = io::stdin().lock();
    let mut report = io::stderr();
    let outcome = session.run(&mut input, control, &mut report);

    if benchmark && outcome.summary.pushes > 0 {
        eprintln!();
    }

    info!(
        pushes = outcome.summary.pushes,
        samples = outcome.summary.samples,
        bytes = outcome.summary.bytes,
        exit = %outcome.summary.exit,
        exit_code = outcome.exit_code,
        "Done"
    );
    Ok(outcome.exit_code)
}

#[cfg(feature = "iio_hardware")]
fn open_hardware(
    uri: Option<&str>,
    timeout_ms: Option<u32>,
) -> Result<iio_writedev::hardware::iio::IioContext> {
    Ok(iio_writedev::hardware::iio::IioContext::open(uri, timeout_ms)?)
}

#[cfg(not(feature = "iio_hardware"))]
fn open_hardware(_uri: Option<&str>, _timeout_ms: Option<u32>) -> Result<MockContext> {
    Err(iio_writedev::WriteDevError::FeatureNotEnabled("iio_hardware".to_string()).into())
}
