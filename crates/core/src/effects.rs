//! Per-track insert chains built from a declared effect list.

use basedrop::Owned;
use daw_engine::dsp::StereoConvolver;
use daw_engine::{
    AudioContext, ChainProcessor, Command, EffectUpdate, build_processor, reverb_impulse,
};
use daw_transport::{EffectInstance, EffectKind, TrackId};

use crate::EngineError;

/// The control-thread side of an installed chain: the declared effect list
/// and the id the render thread knows the chain by.
#[derive(Debug, Clone)]
pub struct EffectChain {
    id: u64,
    track: TrackId,
    effects: Vec<EffectInstance>,
}

impl EffectChain {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    pub fn effects(&self) -> &[EffectInstance] {
        &self.effects
    }

    /// Set parameter `name` of the effect at `index` in the declared list.
    /// The value is clamped to the parameter's range and sent to the running
    /// processor without rebuilding anything. Returns the stored value.
    pub fn update_parameter(
        &mut self,
        ctx: &AudioContext,
        index: usize,
        name: &str,
        value: f32,
    ) -> Result<f32, EngineError> {
        let invalid = || EngineError::InvalidParameter {
            name: format!("effect #{index} {name}"),
            value,
        };
        let effect = self.effects.get_mut(index).ok_or_else(invalid)?;
        let param = effect.kind.param_index(name).ok_or_else(invalid)?;
        let stored = effect.set(name, value).ok_or_else(invalid)?;
        if !effect.enabled {
            return Ok(stored);
        }

        let rebuilds_impulse = matches!(name, "room_size" | "dampening");
        let update = if effect.kind == EffectKind::Reverb && rebuilds_impulse {
            let (left, right) = reverb_impulse(
                ctx.sample_rate(),
                effect.get("room_size").unwrap_or(30.0),
                effect.get("dampening").unwrap_or(50.0),
                &mut rand::thread_rng(),
            );
            EffectUpdate::Impulse(Owned::new(ctx.handle(), StereoConvolver::new(&left, &right)))
        } else {
            EffectUpdate::Param {
                index: param,
                value: stored,
            }
        };
        ctx.send(Command::UpdateEffect {
            track: self.track.0,
            chain: self.id,
            slot: index,
            update,
        })?;
        Ok(stored)
    }
}

/// Builds insert chains. Each build gets a fresh chain id so updates meant
/// for a replaced chain are ignored by the render thread.
#[derive(Debug, Default)]
pub struct EffectChainBuilder {
    next_id: u64,
}

impl EffectChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// One processor per enabled effect, in list order. Disabled effects
    /// keep their slot so indices still match the declared list.
    pub fn build(
        &mut self,
        ctx: &AudioContext,
        track: TrackId,
        effects: &[EffectInstance],
    ) -> (EffectChain, ChainProcessor) {
        self.next_id += 1;
        let slots = effects
            .iter()
            .map(|effect| {
                effect.enabled.then(|| {
                    build_processor(
                        effect.kind,
                        &effect.schema_values(),
                        ctx.sample_rate(),
                        ctx.handle(),
                    )
                })
            })
            .collect();
        (
            EffectChain {
                id: self.next_id,
                track,
                effects: effects.to_vec(),
            },
            ChainProcessor::new(self.next_id, slots),
        )
    }

    /// Build and put the chain on the track's bus, replacing whatever was
    /// there. An empty list clears the insert.
    pub fn install(
        &mut self,
        ctx: &AudioContext,
        track: TrackId,
        effects: &[EffectInstance],
    ) -> Result<Option<EffectChain>, EngineError> {
        if effects.is_empty() {
            ctx.send(Command::ClearChain { track: track.0 })?;
            return Ok(None);
        }
        let (chain, processor) = self.build(ctx, track, effects);
        ctx.send(Command::InstallChain {
            track: track.0,
            chain: Owned::new(ctx.handle(), processor),
        })?;
        log::debug!("installed {} effect(s) on {track}", effects.len());
        Ok(Some(chain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_engine::OfflineDriver;
    use daw_transport::EffectId;

    fn context() -> AudioContext {
        let (driver, _render) = OfflineDriver::new(8000);
        AudioContext::open(&driver).unwrap()
    }

    #[test]
    fn test_disabled_effects_keep_their_slot() {
        let ctx = context();
        let mut delay = EffectInstance::new(EffectId(2), EffectKind::Delay);
        delay.enabled = false;
        let effects = [
            EffectInstance::new(EffectId(1), EffectKind::Eq),
            delay,
            EffectInstance::new(EffectId(3), EffectKind::Chorus),
        ];
        let mut builder = EffectChainBuilder::new();
        let (chain, processor) = builder.build(&ctx, TrackId(1), &effects);
        assert_eq!(processor.len(), 3);
        assert_eq!(chain.effects().len(), 3);

        let (second, _) = builder.build(&ctx, TrackId(1), &effects);
        assert_ne!(chain.id(), second.id());
    }

    #[test]
    fn test_update_reads_back_clamped() {
        let ctx = context();
        let mut builder = EffectChainBuilder::new();
        let effects = [
            EffectInstance::new(EffectId(1), EffectKind::Compressor),
            EffectInstance::new(EffectId(2), EffectKind::Reverb),
        ];
        let mut chain = builder.install(&ctx, TrackId(4), &effects).unwrap().unwrap();

        assert_eq!(chain.update_parameter(&ctx, 0, "ratio", 8.0).unwrap(), 8.0);
        assert_eq!(chain.update_parameter(&ctx, 0, "ratio", 80.0).unwrap(), 20.0);
        assert_eq!(chain.update_parameter(&ctx, 0, "threshold", f32::NAN).unwrap(), -40.0);
        assert_eq!(chain.update_parameter(&ctx, 1, "room_size", 70.0).unwrap(), 70.0);
        assert_eq!(chain.effects()[0].get("ratio"), Some(20.0));
        assert_eq!(chain.effects()[1].get("room_size"), Some(70.0));
    }

    #[test]
    fn test_update_unknown_target() {
        let ctx = context();
        let mut builder = EffectChainBuilder::new();
        let effects = [EffectInstance::new(EffectId(1), EffectKind::Gate)];
        let mut chain = builder.install(&ctx, TrackId(1), &effects).unwrap().unwrap();
        assert!(matches!(
            chain.update_parameter(&ctx, 3, "ratio", 1.0),
            Err(EngineError::InvalidParameter { .. })
        ));
        assert!(chain.update_parameter(&ctx, 0, "wobble", 1.0).is_err());
    }

    #[test]
    fn test_empty_list_clears() {
        let ctx = context();
        let mut builder = EffectChainBuilder::new();
        assert!(builder.install(&ctx, TrackId(1), &[]).unwrap().is_none());
    }
}
