//! Dense matrix multiply capability
//!
//! The merge engine depends only on the [`Gemm`] trait; the reference
//! implementation is always available and a rayon-parallel implementation is
//! selected by the `parallel` feature. Both compute row-major
//! `out[m x n] = a[m x k] @ b[k x n]`.

/// Dense matrix multiply over row-major f32 slices
pub trait Gemm: Sync {
    /// Compute `out = a @ b` where `a` is `m x k`, `b` is `k x n`, and
    /// `out` has room for `m * n` elements.
    fn gemm(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize, out: &mut [f32]);
}

/// Reference implementation: ikj loop order for sequential access to `b`
#[derive(Debug, Default, Clone, Copy)]
pub struct NaiveGemm;

impl Gemm for NaiveGemm {
    fn gemm(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize, out: &mut [f32]) {
        debug_assert_eq!(a.len(), m * k);
        debug_assert_eq!(b.len(), k * n);
        debug_assert_eq!(out.len(), m * n);

        out.fill(0.0);
        for i in 0..m {
            for l in 0..k {
                let a_il = a[i * k + l];
                if a_il == 0.0 {
                    continue;
                }
                let b_row = &b[l * n..(l + 1) * n];
                let out_row = &mut out[i * n..(i + 1) * n];
                for (o, &b_lj) in out_row.iter_mut().zip(b_row) {
                    *o += a_il * b_lj;
                }
            }
        }
    }
}

/// Row-parallel implementation over rayon
#[cfg(feature = "parallel")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ParallelGemm;

#[cfg(feature = "parallel")]
impl Gemm for ParallelGemm {
    fn gemm(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize, out: &mut [f32]) {
        use rayon::prelude::*;

        debug_assert_eq!(a.len(), m * k);
        debug_assert_eq!(b.len(), k * n);
        debug_assert_eq!(out.len(), m * n);

        out.par_chunks_mut(n)
            .zip(a.par_chunks(k))
            .for_each(|(out_row, a_row)| {
                out_row.fill(0.0);
                for (l, &a_il) in a_row.iter().enumerate() {
                    if a_il == 0.0 {
                        continue;
                    }
                    let b_row = &b[l * n..(l + 1) * n];
                    for (o, &b_lj) in out_row.iter_mut().zip(b_row) {
                        *o += a_il * b_lj;
                    }
                }
            });
    }
}

/// The build-time selected implementation
#[cfg(feature = "parallel")]
pub type DefaultGemm = ParallelGemm;

/// The build-time selected implementation
#[cfg(not(feature = "parallel"))]
pub type DefaultGemm = NaiveGemm;
