use biquad::{Biquad, Coefficients, DirectForm2Transposed, ToHertz, Type};

use crate::param::{self, ParamRange};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterMode {
    LowPass,
    HighPass,
    BandPass,
    Notch,
    LowShelf { gain_db: f32 },
    HighShelf { gain_db: f32 },
    Peaking { gain_db: f32 },
}

impl FilterMode {
    /// Selector used by the filter effect: 0 lowpass, 1 highpass, 2 bandpass,
    /// 3 notch.
    pub fn from_index(index: f32) -> Self {
        match index.round() as i32 {
            1 => FilterMode::HighPass,
            2 => FilterMode::BandPass,
            3 => FilterMode::Notch,
            _ => FilterMode::LowPass,
        }
    }

    fn kind(self) -> Type<f32> {
        match self {
            FilterMode::LowPass => Type::LowPass,
            FilterMode::HighPass => Type::HighPass,
            FilterMode::BandPass => Type::BandPass,
            FilterMode::Notch => Type::Notch,
            FilterMode::LowShelf { gain_db } => Type::LowShelf(gain_db),
            FilterMode::HighShelf { gain_db } => Type::HighShelf(gain_db),
            FilterMode::Peaking { gain_db } => Type::PeakingEQ(gain_db),
        }
    }
}

/// Mono biquad with validated settings. Frequencies are kept below Nyquist;
/// when the coefficient calculation still rejects a setting the previous
/// coefficients stay in place.
pub struct Filter {
    inner: DirectForm2Transposed<f32>,
    mode: FilterMode,
    frequency: f32,
    q: f32,
    sample_rate: f32,
}

impl Filter {
    pub fn new(mode: FilterMode, frequency: f32, q: f32, sample_rate: f32) -> Self {
        let frequency = nyquist_range(sample_rate).sanitize(frequency);
        let q = param::Q.sanitize(q);
        let coeffs = Coefficients::<f32>::from_params(
            mode.kind(),
            sample_rate.hz(),
            frequency.hz(),
            q,
        )
        .unwrap_or(PASSTHROUGH);
        Self {
            inner: DirectForm2Transposed::<f32>::new(coeffs),
            mode,
            frequency,
            q,
            sample_rate,
        }
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn set(&mut self, mode: FilterMode, frequency: f32, q: f32) {
        let frequency = nyquist_range(self.sample_rate).sanitize(frequency);
        let q = param::Q.sanitize(q);
        if mode == self.mode && frequency == self.frequency && q == self.q {
            return;
        }
        match Coefficients::<f32>::from_params(
            mode.kind(),
            self.sample_rate.hz(),
            frequency.hz(),
            q,
        ) {
            Ok(coeffs) => {
                self.inner.update_coefficients(coeffs);
                self.mode = mode;
                self.frequency = frequency;
                self.q = q;
            }
            Err(err) => log::debug!("filter update rejected ({err:?}), keeping previous"),
        }
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.set(self.mode, frequency, self.q);
    }

    #[inline]
    pub fn run(&mut self, input: f32) -> f32 {
        self.inner.run(input)
    }

    pub fn reset(&mut self) {
        self.inner.reset_state();
    }
}

const PASSTHROUGH: Coefficients<f32> = Coefficients {
    a1: 0.0,
    a2: 0.0,
    b0: 1.0,
    b1: 0.0,
    b2: 0.0,
};

fn nyquist_range(sample_rate: f32) -> ParamRange {
    param::FREQUENCY.with_max(sample_rate * 0.45)
}
