use super::{db_to_gain, gain_to_db};

fn time_coeff(seconds: f32, sample_rate: f32) -> f32 {
    (-1.0 / (seconds * sample_rate).max(1.0)).exp()
}

/// Stereo-linked feed-forward compressor with a soft knee.
pub struct Compressor {
    threshold: f32,
    ratio: f32,
    knee: f32,
    attack: f32,
    release: f32,
    makeup: f32,
    reduction_db: f32,
    sample_rate: f32,
}

impl Compressor {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            threshold: -24.0,
            ratio: 12.0,
            knee: 30.0,
            attack: time_coeff(0.003, sample_rate),
            release: time_coeff(0.25, sample_rate),
            makeup: 1.0,
            reduction_db: 0.0,
            sample_rate,
        }
    }

    pub fn set_threshold(&mut self, db: f32) {
        self.threshold = db;
    }

    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio.max(1.0);
    }

    pub fn set_knee(&mut self, db: f32) {
        self.knee = db.max(0.0);
    }

    pub fn set_attack(&mut self, seconds: f32) {
        self.attack = time_coeff(seconds, self.sample_rate);
    }

    pub fn set_release(&mut self, seconds: f32) {
        self.release = time_coeff(seconds, self.sample_rate);
    }

    pub fn set_makeup_db(&mut self, db: f32) {
        self.makeup = db_to_gain(db);
    }

    /// Static curve: output level for an input level, both in dB.
    pub fn curve(&self, x: f32) -> f32 {
        let over = x - self.threshold;
        if self.knee > 0.0 && 2.0 * over.abs() <= self.knee {
            let k = over + self.knee / 2.0;
            x + (1.0 / self.ratio - 1.0) * k * k / (2.0 * self.knee)
        } else if over > 0.0 {
            self.threshold + over / self.ratio
        } else {
            x
        }
    }

    #[inline]
    pub fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        let level = gain_to_db(l.abs().max(r.abs()));
        let target = self.curve(level) - level;
        let coeff = if target < self.reduction_db {
            self.attack
        } else {
            self.release
        };
        self.reduction_db = target + (self.reduction_db - target) * coeff;
        let gain = db_to_gain(self.reduction_db) * self.makeup;
        (l * gain, r * gain)
    }
}

/// Downward expander that holds open for a while after the signal drops.
pub struct Gate {
    threshold: f32,
    ratio: f32,
    attack: f32,
    release: f32,
    hold_samples: u32,
    hold_left: u32,
    gain_db: f32,
    sample_rate: f32,
}

const GATE_FLOOR_DB: f32 = -90.0;

impl Gate {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            threshold: -40.0,
            ratio: 10.0,
            attack: time_coeff(0.0001, sample_rate),
            release: time_coeff(0.1, sample_rate),
            hold_samples: (0.01 * sample_rate) as u32,
            hold_left: 0,
            gain_db: GATE_FLOOR_DB,
            sample_rate,
        }
    }

    pub fn set_threshold(&mut self, db: f32) {
        self.threshold = db;
    }

    pub fn set_ratio(&mut self, ratio: f32) {
        self.ratio = ratio.max(1.0);
    }

    pub fn set_attack(&mut self, seconds: f32) {
        self.attack = time_coeff(seconds, self.sample_rate);
    }

    pub fn set_hold(&mut self, seconds: f32) {
        self.hold_samples = (seconds.max(0.0) * self.sample_rate) as u32;
    }

    pub fn set_release(&mut self, seconds: f32) {
        self.release = time_coeff(seconds, self.sample_rate);
    }

    #[inline]
    pub fn process(&mut self, l: f32, r: f32) -> (f32, f32) {
        let level = gain_to_db(l.abs().max(r.abs()));
        let target = if level >= self.threshold {
            self.hold_left = self.hold_samples;
            0.0
        } else if self.hold_left > 0 {
            self.hold_left -= 1;
            0.0
        } else {
            ((level - self.threshold) * (self.ratio - 1.0)).max(GATE_FLOOR_DB)
        };
        let coeff = if target > self.gain_db {
            self.attack
        } else {
            self.release
        };
        self.gain_db = target + (self.gain_db - target) * coeff;
        let gain = db_to_gain(self.gain_db);
        (l * gain, r * gain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_compressor_curve() {
        let mut comp = Compressor::new(48000.0);
        comp.set_threshold(-10.0);
        comp.set_ratio(4.0);
        comp.set_knee(0.0);
        assert_relative_eq!(comp.curve(-20.0), -20.0);
        assert_relative_eq!(comp.curve(-10.0), -10.0);
        assert_relative_eq!(comp.curve(2.0), -7.0);
    }

    #[test]
    fn test_compressor_knee_is_continuous() {
        let mut comp = Compressor::new(48000.0);
        comp.set_threshold(-10.0);
        comp.set_ratio(4.0);
        comp.set_knee(6.0);
        assert_relative_eq!(comp.curve(-13.0), -13.0, epsilon = 1e-4);
        assert_relative_eq!(comp.curve(-7.0), -10.0 + 3.0 / 4.0, epsilon = 1e-4);
    }

    #[test]
    fn test_compressor_reduces_loud_signal() {
        let mut comp = Compressor::new(48000.0);
        comp.set_threshold(-20.0);
        comp.set_ratio(10.0);
        comp.set_knee(0.0);
        comp.set_attack(0.001);
        let mut out = 0.0;
        for _ in 0..4800 {
            out = comp.process(1.0, 1.0).0;
        }
        // 0 dB in -> -18 dB out
        assert!((gain_to_db(out) + 18.0).abs() < 0.5, "{}", gain_to_db(out));
    }

    #[test]
    fn test_gate_closes_on_quiet_input_after_hold() {
        let mut gate = Gate::new(1000.0);
        gate.set_threshold(-40.0);
        gate.set_hold(0.05);
        gate.set_release(0.01);
        for _ in 0..100 {
            gate.process(0.5, 0.5);
        }
        let (open, _) = gate.process(0.001, 0.001);
        assert!(open > 0.0009, "still open during hold");
        for _ in 0..500 {
            gate.process(0.001, 0.001);
        }
        let (closed, _) = gate.process(0.001, 0.001);
        assert!(closed < 1.0e-5, "gate should close: {closed}");
    }
}
