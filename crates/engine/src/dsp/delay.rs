/// Circular delay with fractional, linearly interpolated reads.
pub struct DelayLine {
    buffer: Vec<f32>,
    write: usize,
}

impl DelayLine {
    /// Holds up to `max_delay` samples of history.
    pub fn new(max_delay: usize) -> Self {
        Self {
            buffer: vec![0.0; max_delay.max(1) + 2],
            write: 0,
        }
    }

    pub fn max_delay(&self) -> usize {
        self.buffer.len() - 2
    }

    /// Sample written `delay` samples ago.
    #[inline]
    pub fn read(&self, delay: f32) -> f32 {
        let len = self.buffer.len();
        let delay = delay.clamp(0.0, self.max_delay() as f32);
        let whole = delay.floor();
        let frac = delay - whole;
        let a = (self.write + len - whole as usize) % len;
        let b = (a + len - 1) % len;
        self.buffer[a] * (1.0 - frac) + self.buffer[b] * frac
    }

    /// Write the next sample. Reads at delay 0 return the latest write.
    #[inline]
    pub fn write(&mut self, sample: f32) {
        self.write = (self.write + 1) % self.buffer.len();
        self.buffer[self.write] = sample;
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_delay() {
        let mut line = DelayLine::new(8);
        for i in 1..=5 {
            line.write(i as f32);
        }
        assert_eq!(line.read(0.0), 5.0);
        assert_eq!(line.read(3.0), 2.0);
    }

    #[test]
    fn test_fractional_delay_interpolates() {
        let mut line = DelayLine::new(8);
        line.write(0.0);
        line.write(1.0);
        assert!((line.read(0.5) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_delay_clamped_to_capacity() {
        let mut line = DelayLine::new(4);
        for i in 0..10 {
            line.write(i as f32);
        }
        assert_eq!(line.read(100.0), line.read(4.0));
    }
}
