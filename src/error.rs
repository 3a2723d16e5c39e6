use realfft::FftError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvolutionError {
    #[error("minimum block size must be a non-zero power of two, got {0}")]
    InvalidBlockSize(usize),
    #[error("impulse length must be a power of two, got {0}")]
    ImpulseNotPowerOfTwo(usize),
    #[error("impulse length {impulse_len} is not a multiple of the block size {block_size}")]
    NotAMultiple {
        impulse_len: usize,
        block_size: usize,
    },
    #[error("impulse length {impulse_len} is too short for block size {block_size}: at least four blocks are needed")]
    NoPartitions {
        impulse_len: usize,
        block_size: usize,
    },
    #[error("impulse must be mono or stereo, got {0} channels")]
    UnsupportedChannelCount(usize),
    #[error("impulse response contains no samples")]
    EmptyImpulse,
    #[error("impulse sample rate {impulse} Hz does not match the engine sample rate {engine} Hz")]
    SampleRateMismatch { impulse: u32, engine: u32 },
    #[error("expected a slice of {expected} samples, got {actual}")]
    BlockLength { expected: usize, actual: usize },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("fft error")]
    Fft(#[from] FftError),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[cfg(feature = "live")]
    #[error("audio transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

pub type Result<T> = std::result::Result<T, ConvolutionError>;
