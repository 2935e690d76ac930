//! Building blocks shared by voices and effect processors.

mod convolver;
mod delay;
mod dynamics;
mod filter;
mod oscillator;

pub use convolver::{Convolver, StereoConvolver};
pub use delay::DelayLine;
pub use dynamics::{Compressor, Gate};
pub use filter::{Filter, FilterMode};
pub use oscillator::{Oscillator, Waveform, white_noise};

/// Decibels to linear amplitude.
#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Linear amplitude to decibels, floored at -120 dB.
#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.abs().max(1.0e-6).log10()
}

/// Equal-power stereo panning of a stereo pair, `pan` in -1.0..=1.0.
/// Centre leaves both channels untouched; panning left folds the right
/// channel into the left and vice versa.
#[inline]
pub fn stereo_pan(l: f32, r: f32, pan: f32) -> (f32, f32) {
    let pan = pan.clamp(-1.0, 1.0);
    let half_pi = std::f32::consts::FRAC_PI_2;
    if pan <= 0.0 {
        let x = (pan + 1.0) * half_pi;
        (l + r * x.cos(), r * x.sin())
    } else {
        let x = pan * half_pi;
        (l * x.cos(), r + l * x.sin())
    }
}

/// One-pole smoothing toward a target, used for gains changed mid-stream.
#[derive(Debug, Clone, Copy)]
pub struct Smoothed {
    current: f32,
    target: f32,
    coeff: f32,
}

impl Smoothed {
    pub fn new(value: f32, sample_rate: f32, time_constant: f32) -> Self {
        Self {
            current: value,
            target: value,
            coeff: (-1.0 / (time_constant * sample_rate).max(1.0)).exp(),
        }
    }

    pub fn set(&mut self, target: f32) {
        self.target = target;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        self.current = self.target + (self.current - self.target) * self.coeff;
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_conversions() {
        assert_relative_eq!(db_to_gain(0.0), 1.0);
        assert_relative_eq!(db_to_gain(-20.0), 0.1, epsilon = 1e-6);
        assert_relative_eq!(gain_to_db(0.5), -6.0206, epsilon = 1e-3);
        assert_eq!(gain_to_db(0.0), -120.0);
    }

    #[test]
    fn test_stereo_pan() {
        let (l, r) = stereo_pan(0.3, -0.2, 0.0);
        assert_relative_eq!(l, 0.3, epsilon = 1e-6);
        assert_relative_eq!(r, -0.2, epsilon = 1e-6);

        let (l, r) = stereo_pan(0.5, 0.5, -1.0);
        assert_relative_eq!(l, 1.0, epsilon = 1e-6);
        assert!(r.abs() < 1e-6);

        let (l, r) = stereo_pan(0.5, 0.5, 1.0);
        assert!(l.abs() < 1e-6);
        assert_relative_eq!(r, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_smoothed_converges() {
        let mut gain = Smoothed::new(0.0, 48000.0, 0.005);
        gain.set(1.0);
        let mut last = 0.0;
        for _ in 0..4800 {
            last = gain.next();
        }
        assert!(last > 0.999);
    }
}
