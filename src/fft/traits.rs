use crate::error::Result;

/// One planned real-input transform of a fixed power-of-two length.
///
/// Both directions run on caller-provided scratch so a single plan can be
/// shared by every worker thread. The inverse is not normalized:
/// `inverse(forward(x)) == len * x`.
pub trait FftBackend: Send + Sync + Sized + 'static {
    type Complex: Copy + Default + Send + Sync + 'static;

    fn new(len: usize) -> Self;
    fn len(&self) -> usize;
    fn complex_len(&self) -> usize;
    fn scratch_len(&self) -> usize;
    fn forward(
        &self,
        input: &mut [f32],
        output: &mut [Self::Complex],
        scratch: &mut [Self::Complex],
    ) -> Result<()>;
    fn inverse(
        &self,
        input: &mut [Self::Complex],
        output: &mut [f32],
        scratch: &mut [Self::Complex],
    ) -> Result<()>;
}

pub trait ComplexOps: Send + Sync + 'static {
    type Complex: Copy + Default;

    fn complex_size(size: usize) -> usize;
    fn copy_and_pad(dst: &mut [f32], src: &[f32], src_size: usize);
    fn complex_multiply(result: &mut [Self::Complex], a: &[Self::Complex], b: &[Self::Complex]);
    fn scale_into(dst: &mut [f32], src: &[f32], scale: f32);
}
