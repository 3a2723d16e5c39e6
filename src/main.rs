//! partitioned-reverb CLI: inspect a partition schedule, render files offline
//! or run the engine live.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use partitioned_reverb::render::{read_input, render, write_wav};
use partitioned_reverb::{EngineConfig, ImpulseResponse, PartitionPlan};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "partitioned-reverb")]
#[command(about = "Non-uniform partitioned convolution reverb", long_about = None)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: Level,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Minimum block size, overrides the configuration file
    #[arg(short, long, global = true)]
    block_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the partition schedule for an impulse response
    Plan {
        /// Impulse response WAV file
        impulse: PathBuf,
    },

    /// Convolve a WAV file with an impulse response
    Render {
        /// Impulse response WAV file
        impulse: PathBuf,

        /// Input WAV file, mixed down to mono
        input: PathBuf,

        /// Output WAV file (32-bit float)
        output: PathBuf,
    },

    /// Run the default input device through the reverb until 'q' + Enter
    #[cfg(feature = "live")]
    Live {
        /// Impulse response WAV file
        impulse: PathBuf,

        /// Blocks of silence queued ahead of the output device
        #[arg(long, default_value = "2")]
        prefill: usize,
    },
}

fn engine_config(cli: &Cli, impulse: &ImpulseResponse) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(block_size) = cli.block_size {
        config = config.with_block_size(block_size);
    }
    config.sample_rate = impulse.sample_rate();
    config.validate()?;
    Ok(config)
}

fn load_impulse(path: &Path) -> Result<ImpulseResponse> {
    ImpulseResponse::from_wav(path)
        .with_context(|| format!("failed to load impulse {}", path.display()))
}

fn print_plan(impulse: &ImpulseResponse, config: &EngineConfig) -> Result<()> {
    let plan = PartitionPlan::for_frames(impulse.num_frames(), config.min_block_size)?;
    let block_ms = config.block_duration().as_secs_f64() * 1000.0;

    println!(
        "impulse: {} frames, {} channel(s), {} Hz",
        impulse.num_frames(),
        impulse.num_channels(),
        impulse.sample_rate()
    );
    println!(
        "padded to {} frames, {} convolved",
        plan.impulse_len(),
        plan.covered_len()
    );
    println!(
        "block {} frames ({:.2} ms), period {} cycles, latency {} frames",
        plan.min_block(),
        block_ms,
        plan.period(),
        plan.latency_frames()
    );
    println!();
    println!("{:>6} {:>7} {:>9} {:>9} {:>4}", "block", "factor", "length", "offset", "lag");
    for block in plan.blocks() {
        println!(
            "{:>6} {:>7} {:>9} {:>9} {:>4}",
            format!("h{}", block.index),
            block.factor,
            block.len,
            block.offset,
            block.lag
        );
    }
    Ok(())
}

fn run_render(cli: &Cli, impulse: &Path, input: &Path, output: &Path) -> Result<()> {
    let impulse = load_impulse(impulse)?;
    let config = engine_config(cli, &impulse)?;
    let (signal, sample_rate) = read_input(input)
        .with_context(|| format!("failed to read input {}", input.display()))?;
    if sample_rate != impulse.sample_rate() {
        bail!(
            "input is {} Hz but the impulse is {} Hz",
            sample_rate,
            impulse.sample_rate()
        );
    }

    let rendered = render(&impulse, &signal, config)?;
    write_wav(output, &rendered, sample_rate)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("saved {}", output.display());
    Ok(())
}

#[cfg(feature = "live")]
fn run_live(cli: &Cli, impulse: &Path, prefill: usize) -> Result<()> {
    use partitioned_reverb::transport::LiveTransport;
    use partitioned_reverb::ConvolutionEngine;
    use std::io::BufRead;

    let impulse = load_impulse(impulse)?;
    let config = engine_config(cli, &impulse)?;
    let sample_rate = config.sample_rate;
    let engine = ConvolutionEngine::new(&impulse, config)?;
    let transport = LiveTransport::start(engine, sample_rate, prefill)?;

    println!(
        "{} -> {}, press 'q' + Enter to stop",
        transport.input_name(),
        transport.output_name()
    );
    for line in std::io::stdin().lock().lines() {
        if line?.trim() == "q" {
            break;
        }
    }
    transport.pause()?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Plan { impulse } => {
            let impulse = load_impulse(impulse)?;
            let config = engine_config(&cli, &impulse)?;
            print_plan(&impulse, &config)
        }
        Commands::Render {
            impulse,
            input,
            output,
        } => run_render(&cli, impulse, input, output),
        #[cfg(feature = "live")]
        Commands::Live { impulse, prefill } => run_live(&cli, impulse, *prefill),
    }
}
