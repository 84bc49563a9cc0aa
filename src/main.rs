//! Biosensor Aggregator CLI
//!
//! Merges headset band power, motion and metrics streams into rows.

use anyhow::{bail, Context, Result};
use biosensor_aggregator::{
    config::Config,
    core::CANONICAL_BANDS,
    device::{
        cortex, DeviceSession, ReplayConfig, ReplayDevice, SessionStatus, SimulatedConfig,
        SimulatedDevice, StreamKind,
    },
    file_sink, Aggregator, AggregatorConfig, EchoSink, OutputFormat, RowSink, SessionStats,
    TeeSink, ROW_LAYOUT_DESCRIPTION, VERSION,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "biosensor-agg")]
#[command(version = VERSION)]
#[command(about = "Merge EEG headset streams into fixed-layout rows", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Source {
    /// Synthetic headset
    Simulated,
    /// Recorded session file
    Replay,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an aggregation session
    Start {
        /// Where samples come from
        #[arg(long, value_enum, default_value = "simulated")]
        source: Source,

        /// Recorded session to replay (required with --source replay)
        #[arg(long)]
        replay_file: Option<PathBuf>,

        /// Rolling window for motion and band power
        #[arg(long)]
        window: Option<usize>,

        /// Rolling window for performance metrics
        #[arg(long)]
        met_window: Option<usize>,

        /// Output file
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Output format (csv or jsonl)
        #[arg(long)]
        format: Option<String>,

        /// Seconds without a row before pending values are flushed (0 disables)
        #[arg(long)]
        stall_timeout: Option<f64>,

        /// Pace replay by recorded timestamps
        #[arg(long)]
        realtime: bool,

        /// Stop a simulated session after this many seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Also print every row (index, header, values) to stdout
        #[arg(long)]
        echo: bool,
    },

    /// Record a simulated session to a replay file
    Record {
        /// Replay file to write
        #[arg(long, short)]
        output: PathBuf,

        /// Length of the recording in seconds
        #[arg(long, default_value = "10")]
        duration: f64,
    },

    /// Show configuration and cumulative statistics
    Status,

    /// Show configuration
    Config,

    /// List the canonical band channels
    Bands,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Start {
            source,
            replay_file,
            window,
            met_window,
            output,
            format,
            stall_timeout,
            realtime,
            duration,
            echo,
        } => {
            let overrides = Overrides {
                window,
                met_window,
                output,
                format,
                stall_timeout,
            };
            cmd_start(source, replay_file, overrides, realtime, duration, echo)
        }
        Commands::Record { output, duration } => cmd_record(&output, duration),
        Commands::Status => cmd_status(),
        Commands::Config => cmd_config(),
        Commands::Bands => {
            cmd_bands();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

/// Install the log subscriber. `RUST_LOG` wins over `--verbose`.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Command-line values that take precedence over the config file.
struct Overrides {
    window: Option<usize>,
    met_window: Option<usize>,
    output: Option<PathBuf>,
    format: Option<String>,
    stall_timeout: Option<f64>,
}

impl Overrides {
    fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(window) = self.window {
            config.window_size = window;
        }
        if let Some(window) = self.met_window {
            config.met_window_size = window;
        }
        if let Some(output) = self.output {
            config.output_path = output;
        }
        if let Some(name) = self.format {
            config.output_format = OutputFormat::from_name(&name)
                .with_context(|| format!("unknown output format '{name}'"))?;
        }
        if let Some(secs) = self.stall_timeout {
            config.stall_timeout = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid stall timeout {secs}"))?;
        }
        Ok(())
    }
}

fn cmd_start(
    source: Source,
    replay_file: Option<PathBuf>,
    overrides: Overrides,
    realtime: bool,
    duration: Option<f64>,
    echo: bool,
) -> Result<()> {
    println!("Biosensor Aggregator v{VERSION}");
    println!();

    let mut config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("Could not load config, using defaults: {}", e);
        Config::default()
    });
    overrides.apply(&mut config)?;
    config.validate()?;
    if let Err(e) = config.ensure_directories() {
        tracing::warn!("Could not create directories: {}", e);
    }

    println!("Starting session...");
    println!("  Window: {} (metrics: {})", config.window_size, config.met_window_size);
    if config.stall_timeout.is_zero() {
        println!("  Stall flush: disabled");
    } else {
        println!("  Stall flush: {:.1}s", config.stall_timeout.as_secs_f64());
    }
    println!("  Output: {:?} ({:?})", config.output_path, config.output_format);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let mut sink = file_sink(config.output_format, &config.output_path)
        .with_context(|| format!("cannot open output {:?}", config.output_path))?;
    if echo {
        sink = Box::new(TeeSink::new(sink, EchoSink::stdout()));
    }

    match source {
        Source::Simulated => {
            let device = SimulatedDevice::new(SimulatedConfig {
                duration: duration.map(Duration::try_from_secs_f64).transpose()?,
                ..Default::default()
            });
            run_session(device, &config, sink, &running)
        }
        Source::Replay => {
            let Some(path) = replay_file else {
                bail!("--replay-file is required with --source replay");
            };
            let device = ReplayDevice::new(ReplayConfig {
                realtime,
                ..ReplayConfig::new(path)
            });
            run_session(device, &config, sink, &running)
        }
    }
}

/// Drive one session until Ctrl+C or the device runs out of samples.
fn run_session<D: DeviceSession>(
    device: D,
    config: &Config,
    sink: Box<dyn RowSink>,
    running: &AtomicBool,
) -> Result<()> {
    let stats = Arc::new(SessionStats::with_persistence(config.stats_path()));
    let mut aggregator = Aggregator::start_with_stats(
        device,
        &AggregatorConfig::from(config),
        sink,
        Arc::clone(&stats),
    )
    .context("failed to start session")?;

    aggregator.run(running)?;

    println!();
    println!("Stopping session...");
    aggregator.stop()?;

    if let Err(e) = stats.save() {
        tracing::warn!("Could not save session stats: {}", e);
    }

    println!();
    println!("{}", stats.summary());
    println!("Rows written to {:?}", config.output_path);
    Ok(())
}

fn cmd_record(output: &Path, duration: f64) -> Result<()> {
    let duration = Duration::try_from_secs_f64(duration).context("invalid duration")?;
    let mut device = SimulatedDevice::new(SimulatedConfig {
        duration: Some(duration),
        ..Default::default()
    });

    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(
        File::create(output).with_context(|| format!("cannot create {output:?}"))?,
    );

    device.create_session()?;
    let ack = device.subscribe(&StreamKind::ALL)?;
    writeln!(writer, "{}", cortex::encode_subscription(&ack)?)?;

    println!("Recording {:.1}s of simulated data to {:?}...", duration.as_secs_f64(), output);

    let mut events = 0u64;
    for event in device.events().iter() {
        writeln!(writer, "{}", cortex::encode_event(&event))?;
        events += 1;
    }
    writer.flush()?;
    device.update_session(SessionStatus::Close)?;

    println!("Recorded {events} events.");
    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Biosensor Aggregator Status");
    println!("===========================");
    println!();

    println!("Configuration:");
    println!("  Window size: {}", config.window_size);
    println!("  Metrics window size: {}", config.met_window_size);
    println!("  Stall timeout: {:.1}s", config.stall_timeout.as_secs_f64());
    println!("  Bands: {}", config.bands.len());
    println!("  Output: {:?} ({:?})", config.output_path, config.output_format);
    println!();

    let stats_path = config.stats_path();
    if stats_path.exists() {
        let content = std::fs::read_to_string(&stats_path)?;
        let stats: biosensor_aggregator::stats::PersistedStats =
            serde_json::from_str(&content).context("corrupt stats file")?;

        println!("Cumulative Statistics:");
        println!("  Sessions: {}", stats.sessions);
        println!("  Band power events: {}", stats.pow_events);
        println!("  Motion events: {}", stats.mot_events);
        println!("  Metric events: {}", stats.met_events);
        println!("  Rows emitted: {}", stats.rows_emitted);
        println!("  Events dropped: {}", stats.events_dropped);
        if let Some(at) = stats.last_updated {
            println!("  Last session: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
        }
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config() -> Result<()> {
    let config = Config::load()?;

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_bands() {
    println!("{ROW_LAYOUT_DESCRIPTION}");
    for region in CANONICAL_BANDS.chunks(5) {
        println!("  {}", region.join("  "));
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("Error setting Ctrl+C handler")
}
