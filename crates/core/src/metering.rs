use std::collections::BTreeMap;

use basedrop::Shared;
use daw_engine::PeakMeter;
use daw_transport::TrackId;

/// Displayed meter levels. The render thread records block peaks into
/// [`PeakMeter`] taps; once per UI frame [`MeteringPipeline::update`] takes
/// those peaks and lets the displayed level fall back by `decay`.
pub struct MeteringPipeline {
    decay: f32,
    master_tap: Option<Shared<PeakMeter>>,
    master: f32,
    tracks: BTreeMap<TrackId, (Shared<PeakMeter>, f32)>,
}

impl MeteringPipeline {
    pub fn new(decay: f32) -> Self {
        Self {
            decay: if decay.is_finite() { decay.clamp(0.0, 1.0) } else { 0.85 },
            master_tap: None,
            master: 0.0,
            tracks: BTreeMap::new(),
        }
    }

    pub fn attach_master(&mut self, tap: Shared<PeakMeter>) {
        self.master_tap = Some(tap);
        self.master = 0.0;
    }

    pub fn attach_track(&mut self, track: TrackId, tap: Shared<PeakMeter>) {
        self.tracks.insert(track, (tap, 0.0));
    }

    pub fn detach_track(&mut self, track: TrackId) {
        self.tracks.remove(&track);
    }

    /// Forget every tap, e.g. after the context was recreated.
    pub fn clear(&mut self) {
        self.master_tap = None;
        self.master = 0.0;
        self.tracks.clear();
    }

    fn smooth(&self, previous: f32, peak: f32) -> f32 {
        peak.max(previous * self.decay).clamp(0.0, 1.0)
    }

    /// Pull the latest peaks. Taps with nothing new simply decay.
    pub fn update(&mut self) {
        if let Some(tap) = &self.master_tap {
            self.master = self.smooth(self.master, tap.take());
        }
        let decay = self.decay;
        for (tap, level) in self.tracks.values_mut() {
            *level = tap.take().max(*level * decay).clamp(0.0, 1.0);
        }
    }

    pub fn master_level(&self) -> f32 {
        self.master
    }

    pub fn track_level(&self, track: TrackId) -> f32 {
        self.tracks.get(&track).map_or(0.0, |(_, level)| *level)
    }

    pub fn track_levels(&self) -> impl Iterator<Item = (TrackId, f32)> + '_ {
        self.tracks.iter().map(|(id, (_, level))| (*id, *level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use basedrop::Collector;

    #[test]
    fn test_level_holds_peak_then_decays() {
        let collector = Collector::new();
        let tap = Shared::new(&collector.handle(), PeakMeter::new());
        let mut meters = MeteringPipeline::new(0.85);
        meters.attach_master(tap.clone());

        tap.observe(0.5);
        meters.update();
        assert_relative_eq!(meters.master_level(), 0.5);

        meters.update();
        assert_relative_eq!(meters.master_level(), 0.425);

        tap.observe(0.1);
        meters.update();
        assert_relative_eq!(meters.master_level(), 0.425 * 0.85);

        tap.observe(3.0);
        meters.update();
        assert_eq!(meters.master_level(), 1.0);
    }

    #[test]
    fn test_track_levels_are_independent() {
        let collector = Collector::new();
        let a = Shared::new(&collector.handle(), PeakMeter::new());
        let b = Shared::new(&collector.handle(), PeakMeter::new());
        let mut meters = MeteringPipeline::new(0.5);
        meters.attach_track(TrackId(1), a.clone());
        meters.attach_track(TrackId(2), b);

        a.observe(0.8);
        meters.update();
        assert_relative_eq!(meters.track_level(TrackId(1)), 0.8);
        assert_eq!(meters.track_level(TrackId(2)), 0.0);
        assert_eq!(meters.track_level(TrackId(9)), 0.0);

        meters.detach_track(TrackId(1));
        assert_eq!(meters.track_levels().count(), 1);
    }
}
