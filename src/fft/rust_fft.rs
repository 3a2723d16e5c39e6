use crate::error::Result;
use crate::fft::{ComplexOps, FftBackend};
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use std::sync::Arc;

#[derive(Clone)]
pub struct Fft {
    len: usize,
    fft_forward: Arc<dyn RealToComplex<f32>>,
    fft_inverse: Arc<dyn ComplexToReal<f32>>,
}

impl std::fmt::Debug for Fft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fft({})", self.len)
    }
}

impl FftBackend for Fft {
    type Complex = Complex<f32>;

    fn new(len: usize) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        Self {
            len,
            fft_forward: planner.plan_fft_forward(len),
            fft_inverse: planner.plan_fft_inverse(len),
        }
    }

    fn len(&self) -> usize {
        self.len
    }

    fn complex_len(&self) -> usize {
        RustComplexOps::complex_size(self.len)
    }

    fn scratch_len(&self) -> usize {
        self.fft_forward
            .get_scratch_len()
            .max(self.fft_inverse.get_scratch_len())
    }

    fn forward(
        &self,
        input: &mut [f32],
        output: &mut [Self::Complex],
        scratch: &mut [Self::Complex],
    ) -> Result<()> {
        let scratch_len = self.fft_forward.get_scratch_len();
        self.fft_forward
            .process_with_scratch(input, output, &mut scratch[..scratch_len])?;
        Ok(())
    }

    fn inverse(
        &self,
        input: &mut [Self::Complex],
        output: &mut [f32],
        scratch: &mut [Self::Complex],
    ) -> Result<()> {
        // DC and Nyquist bins of a real signal are real
        if let Some(first) = input.first_mut() {
            first.im = 0.0;
        }
        if self.len % 2 == 0 {
            if let Some(last) = input.last_mut() {
                last.im = 0.0;
            }
        }

        let scratch_len = self.fft_inverse.get_scratch_len();
        self.fft_inverse
            .process_with_scratch(input, output, &mut scratch[..scratch_len])?;
        Ok(())
    }
}

#[derive(Clone, Copy, Default, Debug)]
pub struct RustComplexOps;

impl ComplexOps for RustComplexOps {
    type Complex = Complex<f32>;

    fn complex_size(size: usize) -> usize {
        (size / 2) + 1
    }

    fn copy_and_pad(dst: &mut [f32], src: &[f32], src_size: usize) {
        assert!(dst.len() >= src_size);
        dst[0..src_size].copy_from_slice(&src[0..src_size]);
        dst[src_size..].fill(0.);
    }

    fn complex_multiply(result: &mut [Self::Complex], a: &[Self::Complex], b: &[Self::Complex]) {
        assert_eq!(result.len(), a.len());
        assert_eq!(result.len(), b.len());
        let len = result.len();
        let end4 = 4 * (len / 4);
        for i in (0..end4).step_by(4) {
            result[i] = a[i] * b[i];
            result[i + 1] = a[i + 1] * b[i + 1];
            result[i + 2] = a[i + 2] * b[i + 2];
            result[i + 3] = a[i + 3] * b[i + 3];
        }
        for i in end4..len {
            result[i] = a[i] * b[i];
        }
    }

    fn scale_into(dst: &mut [f32], src: &[f32], scale: f32) {
        assert_eq!(dst.len(), src.len());
        for (d, s) in dst.iter_mut().zip(src) {
            *d = s * scale;
        }
    }
}
