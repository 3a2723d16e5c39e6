//! Offline rendering: runs a whole input file through the engine block by
//! block, waiting for every worker, and returns the reverberated signal
//! with the engine latency removed.

use crate::config::{DeadlinePolicy, EngineConfig};
use crate::engine::ConvolutionEngine;
use crate::error::{ConvolutionError, Result};
use crate::impulse::{read_samples, ImpulseResponse};
use crate::{Convolution, Sample};
use hound::{SampleFormat, WavSpec, WavWriter};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Mono input signal read from a WAV file. Multichannel files are averaged
/// down to one channel.
pub fn read_input<P: AsRef<Path>>(path: P) -> Result<(Vec<Sample>, u32)> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let num_channels = spec.channels as usize;
    if num_channels == 0 {
        return Err(ConvolutionError::UnsupportedChannelCount(0));
    }
    let interleaved = read_samples(reader)?;
    let scale = 1.0 / num_channels as f32;
    let mono = interleaved
        .chunks_exact(num_channels)
        .map(|frame| frame.iter().sum::<f32>() * scale)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Writes planar channels as interleaved 32-bit float WAV.
pub fn write_wav<P: AsRef<Path>>(path: P, channels: &[Vec<Sample>], sample_rate: u32) -> Result<()> {
    let num_channels = channels.len();
    if num_channels == 0 || num_channels > u16::MAX as usize {
        return Err(ConvolutionError::UnsupportedChannelCount(num_channels));
    }
    let spec = WavSpec {
        channels: num_channels as u16,
        sample_rate,
        bits_per_sample: 32,
        sample_format: SampleFormat::Float,
    };

    let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
    let mut writer = WavWriter::create(path, spec)?;
    for i in 0..frames {
        for channel in channels {
            writer.write_sample(channel.get(i).copied().unwrap_or(0.0))?;
        }
    }
    writer.finalize()?;
    Ok(())
}

/// Convolves `input` with `impulse`. The result has one vector per impulse
/// channel, `input.len() + L - 1` frames long where `L` is the part of the
/// impulse the plan covers.
///
/// The deadline policy is forced to [`DeadlinePolicy::Wait`] so the output
/// does not depend on scheduling.
pub fn render(
    impulse: &ImpulseResponse,
    input: &[Sample],
    config: EngineConfig,
) -> Result<Vec<Vec<Sample>>> {
    if config.deadline != DeadlinePolicy::Wait {
        debug!("offline render switches the deadline policy to wait");
    }
    let mut engine = ConvolutionEngine::new(impulse, config.with_deadline(DeadlinePolicy::Wait))?;
    let tail = impulse.num_frames().min(engine.plan().covered_len());
    render_with(&mut engine, input, tail)
}

/// Drives an existing engine. `tail` frames of reverb are kept after the end
/// of the input.
pub fn render_with<E: Convolution>(
    engine: &mut E,
    input: &[Sample],
    tail: usize,
) -> Result<Vec<Vec<Sample>>> {
    let block_size = engine.block_size();
    let num_channels = engine.num_channels();
    // every partition lands exactly one block late
    let latency = block_size;
    let out_len = (input.len() + tail).saturating_sub(1).max(input.len());
    let num_blocks = (out_len + latency).div_ceil(block_size);

    let started = Instant::now();
    let mut in_block = vec![0.0; block_size];
    let mut out_block = vec![0.0; block_size * num_channels];
    let mut channels = vec![Vec::with_capacity(num_blocks * block_size); num_channels];

    for block in 0..num_blocks {
        let start = block * block_size;
        in_block.fill(0.0);
        if start < input.len() {
            let end = (start + block_size).min(input.len());
            in_block[..end - start].copy_from_slice(&input[start..end]);
        }

        engine.process(&in_block, &mut out_block)?;

        for frame in out_block.chunks_exact(num_channels) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
    }

    for channel in channels.iter_mut() {
        channel.drain(..latency.min(channel.len()));
        channel.truncate(out_len);
    }

    info!(
        "rendered {} blocks ({} frames) in {:.3} s",
        num_blocks,
        out_len,
        started.elapsed().as_secs_f64()
    );
    let peak = channels
        .iter()
        .flatten()
        .fold(0.0f32, |peak, s| peak.max(s.abs()));
    if peak > 1.0 {
        warn!("output peaks at {:.2}, the file will clip in integer formats", peak);
    }
    Ok(channels)
}
