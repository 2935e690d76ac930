use std::collections::{BTreeMap, HashMap};

use basedrop::{Owned, Shared};
use daw_engine::{AudioContext, Bus, Command, PeakMeter, Route};
use daw_transport::{EffectId, EffectInstance, EffectKind, TrackId, TrackState};

use crate::effects::{EffectChain, EffectChainBuilder};
use crate::metering::MeteringPipeline;
use crate::EngineError;

/// Track mix settings and the per-track buses that realise them. Buses are
/// created the first time something is routed to a track and live as long
/// as the context does.
pub struct Mixer {
    tracks: BTreeMap<TrackId, TrackState>,
    buses: HashMap<TrackId, Shared<PeakMeter>>,
    chains: HashMap<TrackId, EffectChain>,
    builder: EffectChainBuilder,
    next_effect: u64,
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            tracks: BTreeMap::new(),
            buses: HashMap::new(),
            chains: HashMap::new(),
            builder: EffectChainBuilder::new(),
            next_effect: 1,
        }
    }

    pub fn add_track(&mut self, track: TrackState) {
        for effect in &track.effects {
            self.next_effect = self.next_effect.max(effect.id.0 + 1);
        }
        self.tracks.insert(track.id, track);
    }

    pub fn track(&self, id: TrackId) -> Option<&TrackState> {
        self.tracks.get(&id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TrackState> {
        self.tracks.values()
    }

    fn track_mut(&mut self, id: TrackId) -> Result<&mut TrackState, EngineError> {
        self.tracks.get_mut(&id).ok_or(EngineError::UnknownTrack(id))
    }

    fn any_solo(&self) -> bool {
        self.tracks.values().any(|t| t.solo)
    }

    pub fn is_audible(&self, id: TrackId) -> bool {
        self.tracks
            .get(&id)
            .is_some_and(|t| daw_transport::is_audible(t.muted, t.solo, self.any_solo()))
    }

    /// Forget every bus and chain; they belonged to a context that is gone.
    pub fn reset_buses(&mut self) {
        self.buses.clear();
        self.chains.clear();
    }

    pub fn has_bus(&self, id: TrackId) -> bool {
        self.buses.contains_key(&id)
    }

    /// The route for sound on `id`, creating its bus, meter tap and insert
    /// chain on first use.
    pub fn route(
        &mut self,
        ctx: &AudioContext,
        id: TrackId,
        meters: &mut MeteringPipeline,
    ) -> Result<Route, EngineError> {
        if self.buses.contains_key(&id) {
            return Ok(Route::Track(id.0));
        }
        let track = self.tracks.get(&id).ok_or(EngineError::UnknownTrack(id))?;
        let (gain, pan) = (track.effective_gain(self.any_solo()), track.pan_position());
        let effects = track.effects.clone();

        let meter = Shared::new(ctx.handle(), PeakMeter::new());
        let bus = Bus::new(id.0, meter.clone(), ctx.sample_rate());
        ctx.send(Command::AddBus(Owned::new(ctx.handle(), bus)))?;
        ctx.send(Command::SetBusLevel {
            track: id.0,
            gain,
            pan,
        })?;
        meters.attach_track(id, meter.clone());
        self.buses.insert(id, meter);
        log::debug!("created bus for {id}");

        self.install_chain(ctx, id, &effects)?;
        Ok(Route::Track(id.0))
    }

    fn install_chain(
        &mut self,
        ctx: &AudioContext,
        id: TrackId,
        effects: &[EffectInstance],
    ) -> Result<(), EngineError> {
        match self.builder.install(ctx, id, effects)? {
            Some(chain) => {
                self.chains.insert(id, chain);
            }
            None => {
                self.chains.remove(&id);
            }
        }
        Ok(())
    }

    /// Push every bus's gain and pan. Solo changes affect all tracks, so
    /// levels are always sent together.
    pub fn sync_levels(&self, ctx: Option<&AudioContext>) -> Result<(), EngineError> {
        let Some(ctx) = ctx else {
            return Ok(());
        };
        let any_solo = self.any_solo();
        for id in self.buses.keys() {
            if let Some(track) = self.tracks.get(id) {
                ctx.send(Command::SetBusLevel {
                    track: id.0,
                    gain: track.effective_gain(any_solo),
                    pan: track.pan_position(),
                })?;
            }
        }
        Ok(())
    }

    pub fn set_volume(
        &mut self,
        ctx: Option<&AudioContext>,
        id: TrackId,
        volume: f32,
    ) -> Result<(), EngineError> {
        let track = self.track_mut(id)?;
        track.volume = if volume.is_finite() { volume.clamp(0.0, 100.0) } else { track.volume };
        self.sync_levels(ctx)
    }

    pub fn set_pan(
        &mut self,
        ctx: Option<&AudioContext>,
        id: TrackId,
        pan: f32,
    ) -> Result<(), EngineError> {
        let track = self.track_mut(id)?;
        track.pan = if pan.is_finite() { pan.clamp(-100.0, 100.0) } else { 0.0 };
        self.sync_levels(ctx)
    }

    pub fn set_muted(
        &mut self,
        ctx: Option<&AudioContext>,
        id: TrackId,
        muted: bool,
    ) -> Result<(), EngineError> {
        self.track_mut(id)?.muted = muted;
        self.sync_levels(ctx)
    }

    pub fn set_solo(
        &mut self,
        ctx: Option<&AudioContext>,
        id: TrackId,
        solo: bool,
    ) -> Result<(), EngineError> {
        self.track_mut(id)?.solo = solo;
        self.sync_levels(ctx)
    }

    fn rebuild(&mut self, ctx: Option<&AudioContext>, id: TrackId) -> Result<(), EngineError> {
        if let Some(ctx) = ctx
            && self.buses.contains_key(&id)
        {
            let effects = self.track_mut(id)?.effects.clone();
            self.install_chain(ctx, id, &effects)?;
        }
        Ok(())
    }

    /// Append an effect with default parameters to the track's chain.
    pub fn add_effect(
        &mut self,
        ctx: Option<&AudioContext>,
        id: TrackId,
        kind: EffectKind,
    ) -> Result<EffectId, EngineError> {
        let effect = EffectInstance::new(EffectId(self.next_effect), kind);
        self.insert_effect(ctx, id, effect)
    }

    /// Append a prepared effect (e.g. from the catalog); it gets a fresh id.
    pub fn insert_effect(
        &mut self,
        ctx: Option<&AudioContext>,
        id: TrackId,
        mut effect: EffectInstance,
    ) -> Result<EffectId, EngineError> {
        effect.id = EffectId(self.next_effect);
        let effect_id = effect.id;
        self.track_mut(id)?.effects.push(effect);
        self.next_effect += 1;
        self.rebuild(ctx, id)?;
        Ok(effect_id)
    }

    fn effect_index(&self, id: TrackId, effect: EffectId) -> Result<usize, EngineError> {
        self.tracks
            .get(&id)
            .ok_or(EngineError::UnknownTrack(id))?
            .effects
            .iter()
            .position(|e| e.id == effect)
            .ok_or(EngineError::UnknownEffect(effect))
    }

    pub fn remove_effect(
        &mut self,
        ctx: Option<&AudioContext>,
        id: TrackId,
        effect: EffectId,
    ) -> Result<(), EngineError> {
        let index = self.effect_index(id, effect)?;
        self.track_mut(id)?.effects.remove(index);
        self.rebuild(ctx, id)
    }

    pub fn set_effect_enabled(
        &mut self,
        ctx: Option<&AudioContext>,
        id: TrackId,
        effect: EffectId,
        enabled: bool,
    ) -> Result<(), EngineError> {
        let index = self.effect_index(id, effect)?;
        self.track_mut(id)?.effects[index].enabled = enabled;
        self.rebuild(ctx, id)
    }

    /// Move an effect to `to` in the chain order.
    pub fn move_effect(
        &mut self,
        ctx: Option<&AudioContext>,
        id: TrackId,
        effect: EffectId,
        to: usize,
    ) -> Result<(), EngineError> {
        let index = self.effect_index(id, effect)?;
        let effects = &mut self.track_mut(id)?.effects;
        let moved = effects.remove(index);
        let to = to.min(effects.len());
        effects.insert(to, moved);
        self.rebuild(ctx, id)
    }

    /// Change one parameter live. Returns the clamped value that was stored.
    pub fn update_effect_param(
        &mut self,
        ctx: Option<&AudioContext>,
        id: TrackId,
        effect: EffectId,
        name: &str,
        value: f32,
    ) -> Result<f32, EngineError> {
        let index = self.effect_index(id, effect)?;
        let stored = self.track_mut(id)?.effects[index]
            .set(name, value)
            .ok_or_else(|| EngineError::InvalidParameter {
                name: name.to_string(),
                value,
            })?;
        if let Some(ctx) = ctx
            && let Some(chain) = self.chains.get_mut(&id)
        {
            chain.update_parameter(ctx, index, name, stored)?;
        }
        Ok(stored)
    }

    pub fn chain(&self, id: TrackId) -> Option<&EffectChain> {
        self.chains.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_engine::{OfflineDriver, OfflineRenderHandle};

    fn running() -> (AudioContext, OfflineRenderHandle) {
        let (driver, render) = OfflineDriver::new(8000);
        let ctx = AudioContext::open(&driver).unwrap();
        ctx.resume().unwrap();
        (ctx, render)
    }

    fn mixer() -> Mixer {
        let mut mixer = Mixer::new();
        mixer.add_track(TrackState::new(TrackId(1), "Drums"));
        mixer.add_track(TrackState::new(TrackId(2), "Vox"));
        mixer
    }

    #[test]
    fn test_bus_created_once() {
        let (ctx, _render) = running();
        let mut mixer = mixer();
        let mut meters = MeteringPipeline::new(0.85);
        assert!(!mixer.has_bus(TrackId(1)));
        assert_eq!(mixer.route(&ctx, TrackId(1), &mut meters).unwrap(), Route::Track(1));
        assert_eq!(mixer.route(&ctx, TrackId(1), &mut meters).unwrap(), Route::Track(1));
        assert!(mixer.has_bus(TrackId(1)));
        assert_eq!(meters.track_levels().count(), 1);
        assert!(matches!(
            mixer.route(&ctx, TrackId(7), &mut meters),
            Err(EngineError::UnknownTrack(TrackId(7)))
        ));
    }

    #[test]
    fn test_solo_silences_others() {
        let mut mixer = mixer();
        mixer.set_solo(None, TrackId(2), true).unwrap();
        assert!(!mixer.is_audible(TrackId(1)));
        assert!(mixer.is_audible(TrackId(2)));
        mixer.set_muted(None, TrackId(2), true).unwrap();
        assert!(!mixer.is_audible(TrackId(2)));
    }

    #[test]
    fn test_effect_list_editing() {
        let (ctx, _render) = running();
        let mut mixer = mixer();
        let mut meters = MeteringPipeline::new(0.85);
        mixer.route(&ctx, TrackId(1), &mut meters).unwrap();

        let eq = mixer.add_effect(Some(&ctx), TrackId(1), EffectKind::Eq).unwrap();
        let delay = mixer.add_effect(Some(&ctx), TrackId(1), EffectKind::Delay).unwrap();
        assert_ne!(eq, delay);
        assert_eq!(mixer.chain(TrackId(1)).unwrap().effects().len(), 2);

        mixer.move_effect(Some(&ctx), TrackId(1), delay, 0).unwrap();
        let track = mixer.track(TrackId(1)).unwrap();
        let kinds: Vec<_> = track.effects.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EffectKind::Delay, EffectKind::Eq]);

        let stored = mixer
            .update_effect_param(Some(&ctx), TrackId(1), delay, "feedback", 200.0)
            .unwrap();
        assert_eq!(stored, 90.0);
        assert_eq!(mixer.chain(TrackId(1)).unwrap().effects()[0].get("feedback"), Some(90.0));

        mixer.remove_effect(Some(&ctx), TrackId(1), eq).unwrap();
        mixer.remove_effect(Some(&ctx), TrackId(1), delay).unwrap();
        assert!(mixer.chain(TrackId(1)).is_none());
        assert!(matches!(
            mixer.remove_effect(Some(&ctx), TrackId(1), eq),
            Err(EngineError::UnknownEffect(_))
        ));
    }

    #[test]
    fn test_effects_without_bus_are_kept_for_later() {
        let (ctx, _render) = running();
        let mut mixer = mixer();
        let mut meters = MeteringPipeline::new(0.85);
        let id = mixer.add_effect(Some(&ctx), TrackId(2), EffectKind::Chorus).unwrap();
        mixer.update_effect_param(None, TrackId(2), id, "rate", 3.0).unwrap();
        assert!(mixer.chain(TrackId(2)).is_none());

        mixer.route(&ctx, TrackId(2), &mut meters).unwrap();
        let chain = mixer.chain(TrackId(2)).unwrap();
        assert_eq!(chain.effects()[0].get("rate"), Some(3.0));
    }

    #[test]
    fn test_muted_track_bus_is_silent() {
        let (ctx, render) = running();
        let mut mixer = mixer();
        let mut meters = MeteringPipeline::new(0.85);
        mixer.set_muted(Some(&ctx), TrackId(1), true).unwrap();
        let route = mixer.route(&ctx, TrackId(1), &mut meters).unwrap();
        let audio = daw_transport::AudioArc::mono(vec![0.5; 800], 8000);
        ctx.play(route, Box::new(daw_engine::BufferSource::new(audio, 0.0, 0.0, 1.0, 8000)))
            .unwrap();
        // let the level smoothing settle first
        render.render(400);
        let out = render.render(200);
        assert!(out.iter().all(|s| s.abs() < 1e-3));
    }
}
