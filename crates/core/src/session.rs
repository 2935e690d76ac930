use std::path::Path;
use std::sync::Arc;

use daw_catalog::{Catalog, JsonDirProvider};
use daw_decode::{BufferCache, FileFetcher, SourceFetcher};
use daw_engine::{
    AudioContext, ContextState, CpalDriver, CpalInputDriver, Driver, InputDriver, ManualClock,
};
use daw_render::project_duration;
use daw_transport::{
    Clip, ClipId, EffectId, EffectKind, LoopRegion, TimeSignature, TrackId, TrackState,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::clips::ClipScheduler;
use crate::config::EngineConfig;
use crate::context::ContextManager;
use crate::demo;
use crate::export::{ExportStatus, MixdownExport};
use crate::metering::MeteringPipeline;
use crate::metronome::{CountIn, Metronome};
use crate::mixer::Mixer;
use crate::record::Recorder;
use crate::transport::{RecordingTake, Stage, TransportController, TransportMode};
use crate::voices::{VoiceEngine, VoiceKey};
use crate::EngineError;

/// Rate assumed for decoding when the driver cannot report one yet.
const FALLBACK_SAMPLE_RATE: u32 = 44100;

/// Transport settings set aside while an export plays the project straight
/// through.
#[derive(Debug, Clone, Copy)]
struct ExportHold {
    loop_region: LoopRegion,
    metronome: bool,
}

/// The audio engine: one context and everything scheduled against it.
///
/// All control happens on the thread that owns the session. Call
/// [`Session::tick`] once per UI frame; it drives the transport, meters and
/// memory reclamation.
pub struct Session {
    config: EngineConfig,
    contexts: ContextManager,
    catalog: Arc<Catalog>,
    voices: VoiceEngine,
    clips: ClipScheduler,
    mixer: Mixer,
    meters: MeteringPipeline,
    transport: TransportController,
    recorder: Recorder,
    export: Option<MixdownExport>,
    export_hold: Option<ExportHold>,
    /// The context the buses, meters and metronome belong to.
    bound: Option<Arc<AudioContext>>,
    takes: u32,
}

impl Session {
    pub fn new(
        config: EngineConfig,
        driver: Arc<dyn Driver>,
        input: Arc<dyn InputDriver>,
        fetcher: Arc<dyn SourceFetcher>,
        catalog: Catalog,
    ) -> Self {
        let sample_rate = driver.sample_rate().unwrap_or_else(|err| {
            log::warn!("no output sample rate yet ({err}), assuming {FALLBACK_SAMPLE_RATE} Hz");
            FALLBACK_SAMPLE_RATE
        });
        let catalog = Arc::new(catalog);
        let metronome = Metronome::new(
            Arc::new(ManualClock::new(0.0)),
            config.lookahead_interval(),
            config.lookahead_horizon(),
            config.metronome_volume,
        );

        Self {
            contexts: ContextManager::new(
                driver,
                config.require_user_gesture,
                config.master_volume,
            ),
            voices: VoiceEngine::new(catalog.clone()),
            catalog,
            clips: ClipScheduler::new(BufferCache::new(fetcher, sample_rate)),
            mixer: Mixer::new(),
            meters: MeteringPipeline::new(config.meter_decay),
            transport: TransportController::new(
                metronome,
                config.clip_gain,
                config.lookahead_horizon(),
            ),
            recorder: Recorder::new(input, config.record_sample_rate, config.record_channels),
            export: None,
            export_hold: None,
            bound: None,
            takes: 0,
            config,
        }
    }

    /// A session on the system's default devices, with the catalog from
    /// `config.catalog_dir` when it is set.
    pub fn with_default_devices(config: EngineConfig) -> Self {
        let catalog = match &config.catalog_dir {
            Some(dir) => Catalog::load(&JsonDirProvider::new(dir)),
            None => Catalog::builtin(),
        };
        let fetcher = Arc::new(FileFetcher::new(config.samples_dir.clone()));
        Self::new(config, Arc::new(CpalDriver), Arc::new(CpalInputDriver), fetcher, catalog)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn contexts(&self) -> &ContextManager {
        &self.contexts
    }

    /// A running context, bound to this session's buses and meters.
    pub fn ensure_ready(&mut self) -> Result<Arc<AudioContext>, EngineError> {
        let ctx = self.contexts.ensure_ready()?;
        self.bind(&ctx);
        Ok(ctx)
    }

    fn bind(&mut self, ctx: &Arc<AudioContext>) {
        if self.bound.as_ref().is_some_and(|bound| Arc::ptr_eq(bound, ctx)) {
            return;
        }
        if self.bound.is_some() {
            log::info!("audio context was recreated; rebuilding buses");
            let take = self.transport.stop(ctx);
            if let Err(err) = self.keep_take(take) {
                log::warn!("recording lost with the old context: {err}");
            }
            self.voices = VoiceEngine::new(self.catalog.clone());
        }
        self.mixer.reset_buses();
        self.meters.clear();
        self.meters.attach_master(ctx.master_meter());
        self.transport.metronome_mut().set_clock(Arc::new(ctx.clock()));
        self.bound = Some(ctx.clone());
    }

    /// The bound context if it is still usable.
    fn live(&self) -> Option<Arc<AudioContext>> {
        self.bound
            .as_ref()
            .filter(|ctx| ctx.state() != ContextState::Closed)
            .cloned()
    }

    /// Once per UI frame.
    pub fn tick(&mut self) {
        let Some(ctx) = self.live() else {
            return;
        };
        let finished = ctx.drain_finished();
        self.voices.poll(&finished);
        self.transport.poll(&finished);
        {
            let mut stage = Stage {
                ctx: &ctx,
                clips: &mut self.clips,
                mixer: &mut self.mixer,
                meters: &mut self.meters,
            };
            self.transport.update(&mut stage);
        }
        self.recorder.poll();
        self.meters.update();
        self.pump_export(&ctx);
        ctx.collect();
    }

    // --- instruments -------------------------------------------------------

    /// Start a note. `None` when audio is not available or the note could
    /// not be started; the reason is logged.
    pub fn play_note(
        &mut self,
        instrument_id: &str,
        note: u8,
        velocity: f32,
        preset_id: Option<&str>,
    ) -> Option<VoiceKey> {
        let ctx = match self.ensure_ready() {
            Ok(ctx) => ctx,
            Err(err) => {
                log::debug!("note {note} not played: {err}");
                return None;
            }
        };
        self.voices.play_note(&ctx, instrument_id, note, velocity, preset_id)
    }

    pub fn stop_note(&mut self, key: &VoiceKey) {
        if let Some(ctx) = self.live() {
            self.voices.stop_note(&ctx, key);
        }
    }

    /// Release everything, e.g. when switching instruments.
    pub fn stop_all_notes(&mut self) {
        if let Some(ctx) = self.live() {
            self.voices.stop_all_notes(&ctx);
        }
    }

    pub fn active_voices(&self) -> usize {
        self.voices.active_count()
    }

    // --- tracks and effects --------------------------------------------------

    pub fn add_track(&mut self, track: TrackState) {
        self.mixer.add_track(track);
    }

    pub fn track(&self, id: TrackId) -> Option<&TrackState> {
        self.mixer.track(id)
    }

    pub fn set_track_volume(&mut self, id: TrackId, volume: f32) -> Result<(), EngineError> {
        let ctx = self.live();
        self.mixer.set_volume(ctx.as_deref(), id, volume)
    }

    pub fn set_track_pan(&mut self, id: TrackId, pan: f32) -> Result<(), EngineError> {
        let ctx = self.live();
        self.mixer.set_pan(ctx.as_deref(), id, pan)
    }

    pub fn set_track_muted(&mut self, id: TrackId, muted: bool) -> Result<(), EngineError> {
        let ctx = self.live();
        self.mixer.set_muted(ctx.as_deref(), id, muted)
    }

    pub fn set_track_solo(&mut self, id: TrackId, solo: bool) -> Result<(), EngineError> {
        let ctx = self.live();
        self.mixer.set_solo(ctx.as_deref(), id, solo)
    }

    /// Add an effect using the catalog's parameter values when it lists the
    /// kind, schema defaults otherwise.
    pub fn add_effect(
        &mut self,
        track: TrackId,
        kind: EffectKind,
    ) -> Result<EffectId, EngineError> {
        let ctx = self.live();
        match self.catalog.effect(kind).and_then(|spec| spec.instantiate(EffectId(0))) {
            Some(effect) => self.mixer.insert_effect(ctx.as_deref(), track, effect),
            None => self.mixer.add_effect(ctx.as_deref(), track, kind),
        }
    }

    pub fn remove_effect(&mut self, track: TrackId, effect: EffectId) -> Result<(), EngineError> {
        let ctx = self.live();
        self.mixer.remove_effect(ctx.as_deref(), track, effect)
    }

    pub fn set_effect_enabled(
        &mut self,
        track: TrackId,
        effect: EffectId,
        enabled: bool,
    ) -> Result<(), EngineError> {
        let ctx = self.live();
        self.mixer.set_effect_enabled(ctx.as_deref(), track, effect, enabled)
    }

    pub fn move_effect(
        &mut self,
        track: TrackId,
        effect: EffectId,
        to: usize,
    ) -> Result<(), EngineError> {
        let ctx = self.live();
        self.mixer.move_effect(ctx.as_deref(), track, effect, to)
    }

    pub fn update_effect_param(
        &mut self,
        track: TrackId,
        effect: EffectId,
        name: &str,
        value: f32,
    ) -> Result<f32, EngineError> {
        let ctx = self.live();
        self.mixer.update_effect_param(ctx.as_deref(), track, effect, name, value)
    }

    // --- clips ----------------------------------------------------------------

    pub fn clips(&self) -> &ClipScheduler {
        &self.clips
    }

    pub fn clips_for_track(&self, track: TrackId) -> Vec<&Clip> {
        self.clips.clips_for_track(track)
    }

    pub fn add_uploaded_clip(
        &mut self,
        track: TrackId,
        start: f64,
        url: &str,
        duration: f64,
        name: &str,
    ) -> Result<ClipId, EngineError> {
        self.require_track(track)?;
        self.clips.add_uploaded(track, start, url, duration, name)
    }

    /// Place a catalog sample. Samples with a file are decoded from it; the
    /// rest are synthesised.
    pub fn add_sample_clip(
        &mut self,
        track: TrackId,
        start: f64,
        sample_id: &str,
    ) -> Result<ClipId, EngineError> {
        self.require_track(track)?;
        let (_, sample) = self
            .catalog
            .sample(sample_id)
            .ok_or_else(|| EngineError::InvalidClip(format!("unknown sample '{sample_id}'")))?;
        match &sample.file_path {
            Some(path) => self.clips.add_uploaded(
                track,
                start,
                path.as_str(),
                sample.duration,
                sample.name.as_str(),
            ),
            None => {
                let sample_rate = self.clips.cache().sample_rate();
                let audio =
                    demo::generate_sample(sample, sample_rate, &mut StdRng::from_entropy());
                self.clips.add_generated(track, start, audio, sample.name.as_str())
            }
        }
    }

    /// Place `bars` bars of generated drums.
    pub fn add_drum_pattern(
        &mut self,
        track: TrackId,
        start: f64,
        bars: u32,
    ) -> Result<ClipId, EngineError> {
        self.require_track(track)?;
        let audio = demo::drum_pattern(
            &mut self.voices,
            self.transport.time(),
            bars,
            self.clips.cache().sample_rate(),
        );
        self.clips.add_generated(track, start, audio, "Drum Pattern")
    }

    pub fn move_clip(&mut self, id: ClipId, start: f64) -> Result<(), EngineError> {
        self.clips.move_clip(id, start)
    }

    pub fn delete_clip(&mut self, id: ClipId) -> Result<(), EngineError> {
        self.clips.delete_clip(id).map(|_| ())
    }

    fn require_track(&self, track: TrackId) -> Result<(), EngineError> {
        match self.mixer.track(track) {
            Some(_) => Ok(()),
            None => Err(EngineError::UnknownTrack(track)),
        }
    }

    // --- transport -------------------------------------------------------------

    pub fn transport(&self) -> &TransportController {
        &self.transport
    }

    pub fn current_time(&self) -> f64 {
        self.transport.current_time()
    }

    pub fn mode(&self) -> TransportMode {
        self.transport.mode()
    }

    pub fn play(&mut self, from: f64) -> Result<(), EngineError> {
        let ctx = self.ensure_ready()?;
        let mut stage = Stage {
            ctx: &ctx,
            clips: &mut self.clips,
            mixer: &mut self.mixer,
            meters: &mut self.meters,
        };
        self.transport.play(&mut stage, from)
    }

    /// Record onto `track` from the current playhead. The input is opened
    /// first so a refused microphone leaves the transport untouched.
    pub fn record(&mut self, track: TrackId) -> Result<(), EngineError> {
        self.require_track(track)?;
        let ctx = self.ensure_ready()?;
        self.recorder.start()?;
        let from = self.transport.current_time();
        let mut stage = Stage {
            ctx: &ctx,
            clips: &mut self.clips,
            mixer: &mut self.mixer,
            meters: &mut self.meters,
        };
        let result = self.transport.record(&mut stage, track, from);
        if result.is_err() {
            self.recorder.cancel();
        }
        result
    }

    /// Click `beats` beats (the configured count-in when `None`) before a
    /// recording.
    pub fn count_in(&mut self, beats: Option<u32>) -> Result<CountIn, EngineError> {
        let ctx = self.ensure_ready()?;
        let beats = beats.unwrap_or(self.config.count_in_beats);
        let time = *self.transport.time();
        Ok(self.transport.metronome_mut().count_in(&ctx, &time, beats))
    }

    /// Stop playback and release all notes. When recording, the take becomes
    /// a clip whose id is returned.
    pub fn stop(&mut self) -> Result<Option<ClipId>, EngineError> {
        let Some(ctx) = self.live() else {
            self.recorder.cancel();
            return Ok(None);
        };
        self.voices.stop_all_notes(&ctx);
        let take = self.transport.stop(&ctx);
        self.keep_take(take)
    }

    /// Turn the input captured for `take` into a clip. Without a take the
    /// input is closed and anything captured is dropped.
    fn keep_take(&mut self, take: Option<RecordingTake>) -> Result<Option<ClipId>, EngineError> {
        let Some(take) = take else {
            self.recorder.cancel();
            return Ok(None);
        };
        let Some(audio) = self.recorder.finish() else {
            return Ok(None);
        };
        self.takes += 1;
        let name = format!("Recording {}", self.takes);
        let id = self.clips.add_recorded(take.track, take.start, audio, name)?;
        log::info!("recorded {id} on {}", take.track);
        Ok(Some(id))
    }

    pub fn seek(&mut self, position: f64) -> Result<(), EngineError> {
        let ctx = self.ensure_ready()?;
        let mut stage = Stage {
            ctx: &ctx,
            clips: &mut self.clips,
            mixer: &mut self.mixer,
            meters: &mut self.meters,
        };
        self.transport.seek(&mut stage, position)
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.transport.set_bpm(bpm);
    }

    pub fn set_time_signature(&mut self, signature: TimeSignature) {
        self.transport.set_time_signature(signature);
    }

    pub fn set_loop(&mut self, region: LoopRegion) -> Result<(), EngineError> {
        let ctx = self.ensure_ready()?;
        let mut stage = Stage {
            ctx: &ctx,
            clips: &mut self.clips,
            mixer: &mut self.mixer,
            meters: &mut self.meters,
        };
        self.transport.set_loop(&mut stage, region)
    }

    pub fn set_metronome(&mut self, enabled: bool, volume: Option<f32>) -> Result<(), EngineError> {
        let ctx = self.ensure_ready()?;
        self.transport.set_metronome(&ctx, enabled, volume);
        Ok(())
    }

    // --- levels ----------------------------------------------------------------

    pub fn master_level(&self) -> f32 {
        self.meters.master_level()
    }

    pub fn track_level(&self, track: TrackId) -> f32 {
        self.meters.track_level(track)
    }

    pub fn set_master_volume(&self, volume: f32) -> Result<(), EngineError> {
        self.contexts.set_master_volume(volume)
    }

    // --- export ------------------------------------------------------------------

    /// Play the whole project from the top while capturing the master bus
    /// into `path`. Progress is driven by [`Session::tick`].
    pub fn start_export(&mut self, path: &Path) -> Result<f64, EngineError> {
        if self.export.as_ref().is_some_and(|e| !e.status().is_done()) {
            return Err(EngineError::ExportInProgress);
        }
        let ctx = self.ensure_ready()?;
        self.stop()?;

        let duration = project_duration(self.clips.clips()) + self.config.export_tail_secs;
        self.export = Some(MixdownExport::start(&ctx, path, duration)?);

        // the mixdown runs the timeline once, without clicks
        let hold = ExportHold {
            loop_region: self.transport.loop_region(),
            metronome: self.transport.metronome().enabled(),
        };
        self.export_hold = Some(hold);
        self.transport.set_metronome(&ctx, false, None);
        let unlooped = LoopRegion {
            enabled: false,
            ..hold.loop_region
        };
        let mut stage = Stage {
            ctx: &ctx,
            clips: &mut self.clips,
            mixer: &mut self.mixer,
            meters: &mut self.meters,
        };
        let started = self
            .transport
            .set_loop(&mut stage, unlooped)
            .and_then(|()| self.transport.play(&mut stage, 0.0));
        if let Err(err) = started {
            if let Some(export) = self.export.as_mut() {
                export.cancel(&ctx);
            }
            self.release_export_hold(&ctx);
            return Err(err);
        }
        Ok(duration)
    }

    /// Put back the loop and metronome settings an export set aside.
    fn release_export_hold(&mut self, ctx: &AudioContext) {
        let Some(hold) = self.export_hold.take() else {
            return;
        };
        self.transport.set_metronome(ctx, hold.metronome, None);
        let mut stage = Stage {
            ctx,
            clips: &mut self.clips,
            mixer: &mut self.mixer,
            meters: &mut self.meters,
        };
        if let Err(err) = self.transport.set_loop(&mut stage, hold.loop_region) {
            log::warn!("loop not restored after export: {err}");
        }
    }

    fn pump_export(&mut self, ctx: &AudioContext) {
        let Some(export) = self.export.as_mut() else {
            return;
        };
        if export.status().is_done() {
            return;
        }
        if export.pump(ctx).is_done() {
            self.transport.stop(ctx);
            self.release_export_hold(ctx);
        }
    }

    pub fn export_status(&self) -> Option<&ExportStatus> {
        self.export.as_ref().map(MixdownExport::status)
    }

    pub fn cancel_export(&mut self) {
        let Some(ctx) = self.live() else {
            return;
        };
        if let Some(export) = self.export.as_mut()
            && !export.status().is_done()
        {
            export.cancel(&ctx);
            self.transport.stop(&ctx);
            self.release_export_hold(&ctx);
        }
    }

    /// Stop everything and close the context.
    pub fn shutdown(&mut self) {
        self.cancel_export();
        if let Some(ctx) = self.live() {
            self.voices.stop_all_notes(&ctx);
            self.transport.stop(&ctx);
        }
        self.recorder.cancel();
        self.contexts.destroy();
        self.bound = None;
        log::info!("session shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daw_decode::DecodeError;
    use daw_engine::{OfflineDriver, OfflineRenderHandle, SyntheticInputDriver};

    const SR: u32 = 8000;

    struct NoFiles;

    impl SourceFetcher for NoFiles {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, DecodeError> {
            Err(DecodeError::NotFound(url.to_string()))
        }
    }

    fn session_with(input: SyntheticInputDriver) -> (Session, OfflineRenderHandle) {
        let (driver, render) = OfflineDriver::new(SR);
        let mut session = Session::new(
            EngineConfig::default(),
            Arc::new(driver),
            Arc::new(input),
            Arc::new(NoFiles),
            Catalog::builtin(),
        );
        session.add_track(TrackState::new(TrackId(1), "Drums"));
        session.add_track(TrackState::new(TrackId(2), "Vocals"));
        (session, render)
    }

    fn session() -> (Session, OfflineRenderHandle) {
        session_with(SyntheticInputDriver::denied())
    }

    #[test]
    fn test_play_note_creates_context() {
        let (mut session, _render) = session();
        assert!(session.contexts().context().is_none());
        let key = session.play_note("grand_piano", 60, 100.0, None).unwrap();
        assert_eq!(session.active_voices(), 1);
        session.stop_note(&key);
        session.stop_note(&key);
        assert_eq!(session.active_voices(), 0);
    }

    #[test]
    fn test_note_refused_without_activation() {
        let (driver, _render) = OfflineDriver::new(SR);
        let config = EngineConfig {
            require_user_gesture: true,
            ..EngineConfig::default()
        };
        let mut session = Session::new(
            config,
            Arc::new(driver),
            Arc::new(SyntheticInputDriver::denied()),
            Arc::new(NoFiles),
            Catalog::builtin(),
        );
        assert!(session.play_note("grand_piano", 60, 100.0, None).is_none());
        assert_eq!(session.active_voices(), 0);
        assert!(matches!(session.play(0.0), Err(EngineError::ActivationRequired)));

        session.contexts().request_activation().unwrap();
        assert!(session.play_note("grand_piano", 60, 100.0, None).is_some());
    }

    #[test]
    fn test_recording_becomes_a_clip() {
        let (mut session, render) = session_with(SyntheticInputDriver::new(vec![0.2; 8000], SR));
        session.seek(2.0).unwrap();
        session.record(TrackId(2)).unwrap();
        assert_eq!(session.mode(), TransportMode::Recording);
        render.render_seconds(0.5);
        session.tick();

        let id = session.stop().unwrap().unwrap();
        let clip = session.clips().clip(id).unwrap();
        assert_eq!(clip.track, TrackId(2));
        assert_eq!(clip.start, 2.0);
        assert!((clip.duration - 1.0).abs() < 1e-9);
        assert_eq!(session.mode(), TransportMode::Idle);
        assert_eq!(session.current_time(), 0.0);
    }

    #[test]
    fn test_record_without_microphone() {
        let (mut session, _render) = session();
        assert!(matches!(session.record(TrackId(1)), Err(EngineError::PermissionDenied)));
        assert_eq!(session.mode(), TransportMode::Idle);
        assert!(matches!(session.record(TrackId(9)), Err(EngineError::UnknownTrack(_))));
    }

    #[test]
    fn test_playback_reaches_track_meter() {
        let (mut session, render) = session();
        session.add_drum_pattern(TrackId(1), 0.0, 1).unwrap();
        session.play(0.0).unwrap();
        render.render_seconds(0.1);
        session.tick();
        assert!(session.track_level(TrackId(1)) > 0.0);
        assert!(session.master_level() > 0.0);
        assert_eq!(session.track_level(TrackId(2)), 0.0);
    }

    #[test]
    fn test_sample_clip_is_generated() {
        let (mut session, _render) = session();
        let pack = session.catalog().sample_packs[0].clone();
        let sample = &pack.samples[0];
        let id = session.add_sample_clip(TrackId(1), 1.0, &sample.id).unwrap();
        let clip = session.clips().clip(id).unwrap();
        assert!(clip.source.buffer().is_some());
        assert!(session.add_sample_clip(TrackId(1), 0.0, "no_such_sample").is_err());
    }

    #[test]
    fn test_export_runs_to_completion() {
        let (mut session, render) = session();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.wav");
        session.add_drum_pattern(TrackId(1), 0.0, 1).unwrap();

        let duration = session.start_export(&path).unwrap();
        // the drum clip is shorter than the minimum export length
        assert!((duration - 5.3).abs() < 1e-9);
        assert!(matches!(session.start_export(&path), Err(EngineError::ExportInProgress)));

        for _ in 0..60 {
            render.render_seconds(0.1);
            session.tick();
        }
        assert_eq!(session.export_status(), Some(&ExportStatus::Finished(path.clone())));
        assert_eq!(session.mode(), TransportMode::Idle);
        let frames = (duration * SR as f64).ceil() as u32;
        assert_eq!(hound::WavReader::open(&path).unwrap().duration(), frames);
    }

    #[test]
    fn test_take_survives_context_recreation() {
        let (mut session, render) = session_with(SyntheticInputDriver::new(vec![0.2; 8000], SR));
        session.seek(2.0).unwrap();
        session.record(TrackId(2)).unwrap();
        render.render_seconds(0.5);
        session.tick();

        session.contexts().destroy();
        session.seek(0.0).unwrap();
        assert_eq!(session.mode(), TransportMode::Idle);
        let kept = session.clips_for_track(TrackId(2));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].start, 2.0);
        assert!(session.stop().unwrap().is_none());

        session.record(TrackId(2)).unwrap();
        render.render_seconds(0.5);
        session.tick();
        let id = session.stop().unwrap().unwrap();
        let clip = session.clips().clip(id).unwrap();
        assert_eq!(clip.start, 0.0);
        assert!((clip.duration - 1.0).abs() < 1e-9);
        assert_eq!(session.clips_for_track(TrackId(2)).len(), 2);
    }

    #[test]
    fn test_export_plays_past_the_loop_without_clicks() {
        let (mut session, render) = session();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mix.wav");
        let audio = daw_transport::AudioArc::mono(vec![0.5; SR as usize], SR);
        session.clips.add_generated(TrackId(1), 3.0, audio, "late").unwrap();
        session.set_metronome(true, None).unwrap();
        let region = LoopRegion::new(0.0, 2.0);
        session.set_loop(region).unwrap();

        session.start_export(&path).unwrap();
        assert!(!session.transport().loop_region().enabled);
        assert!(!session.transport().metronome().enabled());
        for _ in 0..60 {
            render.render_seconds(0.1);
            session.tick();
        }
        assert_eq!(session.export_status(), Some(&ExportStatus::Finished(path.clone())));
        assert_eq!(session.transport().loop_region(), region);
        assert!(session.transport().metronome().enabled());

        let samples: Vec<f32> = hound::WavReader::open(&path)
            .unwrap()
            .into_samples::<f32>()
            .map(Result::unwrap)
            .collect();
        let at = |secs: f64| (secs * SR as f64) as usize * 2;
        assert!(samples[..at(2.9)].iter().all(|s| *s == 0.0));
        assert!(samples[at(3.2)..at(3.8)].iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn test_cancelled_export_restores_loop() {
        let (mut session, render) = session();
        let dir = tempfile::tempdir().unwrap();
        let region = LoopRegion::new(0.0, 2.0);
        session.set_loop(region).unwrap();
        session.start_export(&dir.path().join("mix.wav")).unwrap();
        render.render_seconds(0.1);
        session.tick();

        session.cancel_export();
        assert_eq!(session.export_status(), Some(&ExportStatus::Cancelled));
        assert_eq!(session.transport().loop_region(), region);
    }

    #[test]
    fn test_shutdown_then_reopen() {
        let (mut session, _render) = session();
        session.play(0.0).unwrap();
        session.shutdown();
        assert!(session.contexts().context().is_none());
        assert!(session.stop().unwrap().is_none());
        session.play(0.0).unwrap();
        assert_eq!(session.mode(), TransportMode::Playing);
    }
}
