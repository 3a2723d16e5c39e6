pub mod rust_fft;
pub mod traits;

pub use rust_fft::{Fft, RustComplexOps};
pub use traits::{ComplexOps, FftBackend};
