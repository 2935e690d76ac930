use std::sync::atomic::{AtomicU32, Ordering};

/// Peak amplitude tap written by the render thread and read by the UI.
///
/// The peak is stored as `f32` bits; for non-negative floats the bit pattern
/// orders the same way as the value, so `fetch_max` on the bits keeps the
/// largest peak without a compare-exchange loop.
#[derive(Debug, Default)]
pub struct PeakMeter {
    bits: AtomicU32,
}

impl PeakMeter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn observe(&self, peak: f32) {
        if peak.is_finite() && peak > 0.0 {
            self.bits.fetch_max(peak.to_bits(), Ordering::Relaxed);
        }
    }

    /// Scan an interleaved block and record its peak.
    #[inline]
    pub fn observe_block(&self, block: &[f32]) {
        let peak = block.iter().fold(0.0f32, |p, s| p.max(s.abs()));
        self.observe(peak);
    }

    /// Read the peak since the last call and reset it.
    pub fn take(&self) -> f32 {
        f32::from_bits(self.bits.swap(0, Ordering::Relaxed))
    }

    pub fn peek(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}
