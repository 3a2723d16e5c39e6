//! Live audio through the default cpal devices.
//!
//! The input callback downmixes to mono and drives the engine through a
//! [`BlockAdapter`]; finished frames cross to the output callback over a
//! lock-free SPSC ring, which starts prefilled with silence.

use crate::adapter::BlockAdapter;
use crate::{Convolution, Sample};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, Stream, StreamConfig};
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::HeapRb;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no default input device")]
    NoInputDevice,
    #[error("no default output device")]
    NoOutputDevice,
    #[error(transparent)]
    DeviceName(#[from] cpal::DeviceNameError),
    #[error(transparent)]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),
    #[error(transparent)]
    Build(#[from] cpal::BuildStreamError),
    #[error(transparent)]
    Play(#[from] cpal::PlayStreamError),
    #[error(transparent)]
    Pause(#[from] cpal::PauseStreamError),
}

/// Running input and output streams. Dropping it stops both.
pub struct LiveTransport {
    input: Stream,
    output: Stream,
    input_name: String,
    output_name: String,
}

impl LiveTransport {
    /// Opens the default devices at `sample_rate` and starts processing.
    /// `prefill_blocks` blocks of silence absorb jitter between the two
    /// device clocks.
    pub fn start<E>(
        engine: E,
        sample_rate: u32,
        prefill_blocks: usize,
    ) -> Result<Self, TransportError>
    where
        E: Convolution + Send + 'static,
    {
        let host = cpal::default_host();
        let input_device = host
            .default_input_device()
            .ok_or(TransportError::NoInputDevice)?;
        let output_device = host
            .default_output_device()
            .ok_or(TransportError::NoOutputDevice)?;
        let input_name = input_device.name()?;
        let output_name = output_device.name()?;

        let input_channels = input_device.default_input_config()?.channels();
        let output_channels = output_device.default_output_config()?.channels();

        let input_config = StreamConfig {
            channels: input_channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };
        let output_config = StreamConfig {
            channels: output_channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: BufferSize::Default,
        };

        let block_size = engine.block_size();
        let device_channels = output_channels as usize;
        let ring = HeapRb::<Sample>::new(sample_rate as usize * device_channels);
        let (mut producer, mut consumer) = ring.split();
        for _ in 0..prefill_blocks * block_size * device_channels {
            let _ = producer.try_push(0.0);
        }

        let mut adapter = BlockAdapter::new(engine, device_channels);
        let mut mono: Vec<Sample> = Vec::new();
        let mut overflowed = false;
        let in_channels = input_channels.max(1) as usize;

        let input = input_device.build_input_stream(
            &input_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                mono.clear();
                mono.extend(
                    data.chunks_exact(in_channels)
                        .map(|frame| frame.iter().sum::<f32>() / in_channels as f32),
                );
                let result = adapter.push(&mono, |frame| {
                    for &sample in frame {
                        if producer.try_push(sample).is_err() && !overflowed {
                            overflowed = true;
                            warn!("output ring full, dropping frames");
                        }
                    }
                });
                if let Err(err) = result {
                    error!("processing failed: {}", err);
                }
            },
            |err| error!("input stream error: {}", err),
            None,
        )?;

        let mut underrun = false;
        let output = output_device.build_output_stream(
            &output_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    *sample = match consumer.try_pop() {
                        Some(value) => value,
                        None => {
                            if !underrun {
                                underrun = true;
                                warn!("output ring ran dry, playing silence");
                            }
                            0.0
                        }
                    };
                }
            },
            |err| error!("output stream error: {}", err),
            None,
        )?;

        output.play()?;
        input.play()?;
        info!(
            "live: {} ({} ch) -> {} ({} ch) at {} Hz, block {}",
            input_name, input_channels, output_name, output_channels, sample_rate, block_size
        );

        Ok(Self {
            input,
            output,
            input_name,
            output_name,
        })
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    pub fn pause(&self) -> Result<(), TransportError> {
        self.input.pause()?;
        self.output.pause()?;
        Ok(())
    }
}
