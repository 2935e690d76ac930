use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

const BLOCK: usize = 512;

/// Uniformly partitioned overlap-save convolution. Output lags input by one
/// block.
pub struct Convolver {
    partitions: Vec<Vec<Complex<f32>>>,
    fdl: Vec<Vec<Complex<f32>>>,
    fdl_pos: usize,
    window: Vec<f32>,
    fft_in: Vec<f32>,
    fft_out: Vec<f32>,
    acc: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    output: Vec<f32>,
    fill: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
}

impl Convolver {
    pub fn new(impulse: &[f32]) -> Self {
        let fft_len = BLOCK * 2;
        let bins = BLOCK + 1;
        let mut planner = RealFftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(fft_len);
        let inverse = planner.plan_fft_inverse(fft_len);
        let mut scratch = vec![
            Complex::new(0.0, 0.0);
            forward.get_scratch_len().max(inverse.get_scratch_len())
        ];

        let count = impulse.len().div_ceil(BLOCK).max(1);
        let mut partitions = Vec::with_capacity(count);
        let mut padded = vec![0.0f32; fft_len];
        for p in 0..count {
            padded.fill(0.0);
            let segment = impulse.iter().skip(p * BLOCK).take(BLOCK);
            for (dst, src) in padded.iter_mut().zip(segment) {
                *dst = *src;
            }
            let mut spectrum = vec![Complex::new(0.0, 0.0); bins];
            forward
                .process_with_scratch(&mut padded, &mut spectrum, &mut scratch)
                .ok();
            partitions.push(spectrum);
        }

        Self {
            fdl: vec![vec![Complex::new(0.0, 0.0); bins]; count],
            partitions,
            fdl_pos: 0,
            window: vec![0.0; fft_len],
            fft_in: vec![0.0; fft_len],
            fft_out: vec![0.0; fft_len],
            acc: vec![Complex::new(0.0, 0.0); bins],
            scratch,
            output: vec![0.0; BLOCK],
            fill: 0,
            forward,
            inverse,
        }
    }

    /// Latency in samples.
    pub fn latency() -> usize {
        BLOCK
    }

    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        let out = self.output[self.fill];
        self.window[BLOCK + self.fill] = input;
        self.fill += 1;
        if self.fill == BLOCK {
            self.run_block();
            self.fill = 0;
        }
        out
    }

    fn run_block(&mut self) {
        let count = self.partitions.len();
        self.fft_in.copy_from_slice(&self.window);
        self.forward
            .process_with_scratch(&mut self.fft_in, &mut self.fdl[self.fdl_pos], &mut self.scratch)
            .ok();

        self.acc.fill(Complex::new(0.0, 0.0));
        for (p, partition) in self.partitions.iter().enumerate() {
            let input = &self.fdl[(self.fdl_pos + count - p) % count];
            for ((acc, x), h) in self.acc.iter_mut().zip(input).zip(partition) {
                *acc += x * h;
            }
        }
        self.acc[0].im = 0.0;
        self.acc[BLOCK].im = 0.0;

        self.inverse
            .process_with_scratch(&mut self.acc, &mut self.fft_out, &mut self.scratch)
            .ok();
        let scale = 1.0 / (BLOCK * 2) as f32;
        for (dst, src) in self.output.iter_mut().zip(&self.fft_out[BLOCK..]) {
            *dst = src * scale;
        }

        self.window.copy_within(BLOCK.., 0);
        self.fdl_pos = (self.fdl_pos + 1) % count;
    }
}

/// Independent left/right convolution with a two-channel impulse.
pub struct StereoConvolver {
    left: Convolver,
    right: Convolver,
}

impl StereoConvolver {
    pub fn new(left: &[f32], right: &[f32]) -> Self {
        Self {
            left: Convolver::new(left),
            right: Convolver::new(right),
        }
    }

    #[inline]
    pub fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        (self.left.process_sample(l), self.right.process_sample(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_impulse_delays_by_latency() {
        let mut conv = Convolver::new(&[1.0]);
        let input: Vec<f32> = (0..2048).map(|i| ((i * 7) % 13) as f32 / 13.0).collect();
        let output: Vec<f32> = input.iter().map(|x| conv.process_sample(*x)).collect();

        let latency = Convolver::latency();
        for i in 0..latency {
            assert!(output[i].abs() < 1e-6);
        }
        for i in latency..input.len() {
            assert!(
                (output[i] - input[i - latency]).abs() < 1e-4,
                "sample {i}: {} vs {}",
                output[i],
                input[i - latency]
            );
        }
    }

    #[test]
    fn test_long_impulse_spans_partitions() {
        // Echo 1000 samples later at half level, past the first partition.
        let mut ir = vec![0.0; 1200];
        ir[0] = 1.0;
        ir[1000] = 0.5;
        let mut conv = Convolver::new(&ir);

        let mut output = Vec::new();
        for i in 0..4096 {
            output.push(conv.process_sample(if i == 0 { 1.0 } else { 0.0 }));
        }
        let latency = Convolver::latency();
        assert!((output[latency] - 1.0).abs() < 1e-4);
        assert!((output[latency + 1000] - 0.5).abs() < 1e-4);
        assert!(output[latency + 500].abs() < 1e-4);
    }
}
