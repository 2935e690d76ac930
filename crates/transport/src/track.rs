use serde::{Deserialize, Serialize};

use crate::EffectInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(pub u64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// The engine's view of a track. Clips live in the clip scheduler; this
/// carries the mix settings and the declared effect list.
#[derive(Debug, Clone)]
pub struct TrackState {
    pub id: TrackId,
    pub name: String,
    /// 0..=100
    pub volume: f32,
    /// -100..=100
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
    pub color: String,
    pub effects: Vec<EffectInstance>,
}

impl TrackState {
    pub fn new(id: TrackId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            volume: 80.0,
            pan: 0.0,
            muted: false,
            solo: false,
            color: "#64748b".to_string(),
            effects: Vec::new(),
        }
    }

    /// Linear gain for the bus, honouring mute and solo.
    pub fn effective_gain(&self, any_solo: bool) -> f32 {
        if is_audible(self.muted, self.solo, any_solo) {
            (self.volume.clamp(0.0, 100.0)) / 100.0
        } else {
            0.0
        }
    }

    /// Pan position mapped to -1.0..=1.0.
    pub fn pan_position(&self) -> f32 {
        if self.pan.is_finite() {
            self.pan.clamp(-100.0, 100.0) / 100.0
        } else {
            0.0
        }
    }
}

/// A track is silent when muted, or when some track is soloed and it is not.
/// `any_solo` covers all tracks; a soloed track counts itself, which does not
/// change the outcome.
pub fn is_audible(muted: bool, solo: bool, any_solo: bool) -> bool {
    !muted && (solo || !any_solo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audibility_table() {
        // (muted, solo, any_solo) -> audible
        let cases = [
            (false, false, false, true),
            (true, false, false, false),
            (false, false, true, false),
            (false, true, true, true),
            (true, true, true, false),
        ];
        for (muted, solo, any_solo, expected) in cases {
            assert_eq!(
                is_audible(muted, solo, any_solo),
                expected,
                "muted={muted} solo={solo} any_solo={any_solo}"
            );
        }
    }

    #[test]
    fn test_effective_gain() {
        let mut track = TrackState::new(TrackId(1), "Vox");
        track.volume = 50.0;
        assert_eq!(track.effective_gain(false), 0.5);
        assert_eq!(track.effective_gain(true), 0.0);

        track.solo = true;
        assert_eq!(track.effective_gain(true), 0.5);

        track.muted = true;
        assert_eq!(track.effective_gain(true), 0.0);
    }

    #[test]
    fn test_pan_position_clamps() {
        let mut track = TrackState::new(TrackId(2), "Bass");
        track.pan = -250.0;
        assert_eq!(track.pan_position(), -1.0);
        track.pan = f32::NAN;
        assert_eq!(track.pan_position(), 0.0);
    }
}
