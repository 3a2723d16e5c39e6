//! Impulse loading and the per-block spectra the workers multiply against.

use crate::error::{ConvolutionError, Result};
use crate::fft::{ComplexOps, FftBackend};
use crate::planner::PartitionPlan;
use crate::Sample;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// A recorded impulse response, one sample vector per channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ImpulseResponse {
    channels: Vec<Vec<Sample>>,
    sample_rate: u32,
}

impl ImpulseResponse {
    pub fn from_channels(mut channels: Vec<Vec<Sample>>, sample_rate: u32) -> Result<Self> {
        if channels.is_empty() || channels.len() > 2 {
            return Err(ConvolutionError::UnsupportedChannelCount(channels.len()));
        }
        let frames = channels.iter().map(Vec::len).max().unwrap_or(0);
        if frames == 0 {
            return Err(ConvolutionError::EmptyImpulse);
        }
        for channel in channels.iter_mut() {
            channel.resize(frames, 0.0);
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    pub fn mono(samples: Vec<Sample>, sample_rate: u32) -> Result<Self> {
        Self::from_channels(vec![samples], sample_rate)
    }

    pub fn from_wav<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = hound::WavReader::open(path)?;
        Self::from_wav_reader(reader)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Self::from_wav_reader(hound::WavReader::new(reader)?)
    }

    fn from_wav_reader<R: Read>(reader: hound::WavReader<R>) -> Result<Self> {
        let spec = reader.spec();
        let num_channels = spec.channels as usize;
        if num_channels == 0 || num_channels > 2 {
            return Err(ConvolutionError::UnsupportedChannelCount(num_channels));
        }

        let interleaved = read_samples(reader)?;

        let mut channels = vec![Vec::with_capacity(interleaved.len() / num_channels); num_channels];
        for frame in interleaved.chunks_exact(num_channels) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }

        debug!(
            "loaded impulse: {} channels, {} frames at {} Hz",
            num_channels,
            channels[0].len(),
            spec.sample_rate
        );
        Self::from_channels(channels, spec.sample_rate)
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn num_frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel(&self, index: usize) -> &[Sample] {
        &self.channels[index]
    }

    /// Copy zero-padded (or truncated) to `len` frames.
    pub fn padded(&self, len: usize) -> Self {
        let channels = self
            .channels
            .iter()
            .map(|c| {
                let mut c = c.clone();
                c.resize(len, 0.0);
                c
            })
            .collect();
        Self {
            channels,
            sample_rate: self.sample_rate,
        }
    }
}

/// Reads every sample of a WAV stream as `f32`, interleaved. Integer formats
/// are scaled into `[-1, 1)`.
pub(crate) fn read_samples<R: Read>(reader: hound::WavReader<R>) -> Result<Vec<Sample>> {
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    Ok(samples)
}

/// Frequency-domain impulse blocks, indexed by 1-based block index and channel.
///
/// Each entry is the half spectrum of the block zero-padded to twice its
/// length. Built once before the engine starts and only read afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct ImpulseTransforms<T> {
    num_channels: usize,
    blocks: Vec<Vec<Vec<T>>>,
}

impl<T: Copy + Default> ImpulseTransforms<T> {
    /// `ffts[i]` must be the transform of length `2 * factors[i] * B`.
    pub fn build<F, C>(impulse: &ImpulseResponse, plan: &PartitionPlan, ffts: &[F]) -> Result<Self>
    where
        F: FftBackend<Complex = T>,
        C: ComplexOps<Complex = T>,
    {
        let num_channels = impulse.num_channels();
        let mut blocks = Vec::with_capacity(plan.blocks().len());

        for spec in plan.blocks() {
            let fft = &ffts[spec.factor_index];
            debug_assert_eq!(fft.len(), 2 * spec.len);

            let mut time_buffer = vec![0.0; fft.len()];
            let mut scratch = vec![T::default(); fft.scratch_len()];
            let mut per_channel = Vec::with_capacity(num_channels);

            for channel in 0..num_channels {
                let samples = impulse.channel(channel);
                let available = samples.len().saturating_sub(spec.offset).min(spec.len);
                let start = spec.offset.min(samples.len());
                C::copy_and_pad(&mut time_buffer, &samples[start..], available);

                let mut spectrum = vec![T::default(); fft.complex_len()];
                fft.forward(&mut time_buffer, &mut spectrum, &mut scratch)?;
                per_channel.push(spectrum);
            }
            blocks.push(per_channel);
        }

        Ok(Self {
            num_channels,
            blocks,
        })
    }
}

impl<T> ImpulseTransforms<T> {
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Spectrum of block `index` (1-based) for `channel`.
    pub fn get(&self, index: usize, channel: usize) -> &[T] {
        &self.blocks[index - 1][channel]
    }
}
