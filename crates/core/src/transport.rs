//! Play/record/stop, the mapping from audio clock to timeline, and loop
//! wraparound.

use daw_engine::{AudioContext, BufferSource, SourceId};
use daw_transport::{ClipId, LoopRegion, TimeContext, TimeSignature, TrackId};

use crate::clips::{BufferState, ClipScheduler, DueClip};
use crate::metering::MeteringPipeline;
use crate::metronome::Metronome;
use crate::mixer::Mixer;
use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Idle,
    Playing,
    Recording,
}

impl TransportMode {
    pub fn is_running(self) -> bool {
        !matches!(self, TransportMode::Idle)
    }
}

/// The parts of a session a scheduling pass touches, borrowed together.
pub struct Stage<'a> {
    pub ctx: &'a AudioContext,
    pub clips: &'a mut ClipScheduler,
    pub mixer: &'a mut Mixer,
    pub meters: &'a mut MeteringPipeline,
}

/// Where a recording goes once the transport stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecordingTake {
    pub track: TrackId,
    /// Timeline position recording began at.
    pub start: f64,
}

#[derive(Debug, Clone, Copy)]
struct Sounding {
    source: SourceId,
    clip: ClipId,
}

/// A clip whose audio was still decoding when it should have started.
#[derive(Debug, Clone, Copy)]
struct Deferred {
    clip: ClipId,
    origin: f64,
    stop_at: Option<f64>,
}

pub struct TransportController {
    mode: TransportMode,
    time: TimeContext,
    loop_region: LoopRegion,
    /// Audio-clock time of timeline zero for the running pass.
    origin: f64,
    current_time: f64,
    clip_gain: f32,
    horizon: f64,
    sounding: Vec<Sounding>,
    deferred: Vec<Deferred>,
    /// The next loop iteration's sources are already queued.
    prescheduled: bool,
    take: Option<RecordingTake>,
    metronome: Metronome,
}

impl TransportController {
    pub fn new(metronome: Metronome, clip_gain: f32, horizon: f64) -> Self {
        Self {
            mode: TransportMode::Idle,
            time: TimeContext::default(),
            loop_region: LoopRegion {
                enabled: false,
                start: 0.0,
                end: 0.0,
            },
            origin: 0.0,
            current_time: 0.0,
            clip_gain,
            horizon: horizon.max(0.0),
            sounding: Vec::new(),
            deferred: Vec::new(),
            prescheduled: false,
            take: None,
            metronome,
        }
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn is_playing(&self) -> bool {
        self.mode.is_running()
    }

    /// Timeline position, recomputed from the audio clock on every update.
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn time(&self) -> &TimeContext {
        &self.time
    }

    pub fn bpm(&self) -> f64 {
        self.time.bpm
    }

    pub fn loop_region(&self) -> LoopRegion {
        self.loop_region
    }

    pub fn metronome(&self) -> &Metronome {
        &self.metronome
    }

    pub fn metronome_mut(&mut self) -> &mut Metronome {
        &mut self.metronome
    }

    /// Clips with a source queued or playing right now.
    pub fn sounding_clips(&self) -> Vec<ClipId> {
        self.sounding.iter().map(|s| s.clip).collect()
    }

    pub fn deferred_clips(&self) -> Vec<ClipId> {
        self.deferred.iter().map(|d| d.clip).collect()
    }

    fn loop_active(&self) -> bool {
        self.loop_region.enabled && self.loop_region.is_valid(&self.time)
    }

    /// Start playback at timeline position `from`.
    pub fn play(&mut self, stage: &mut Stage<'_>, from: f64) -> Result<(), EngineError> {
        self.begin(stage, from, TransportMode::Playing)
    }

    /// Start playback and mark it as recording onto `track`. The caller
    /// owns the capture stream; the take is handed back by [`stop`].
    ///
    /// [`stop`]: TransportController::stop
    pub fn record(
        &mut self,
        stage: &mut Stage<'_>,
        track: TrackId,
        from: f64,
    ) -> Result<(), EngineError> {
        self.begin(stage, from, TransportMode::Recording)?;
        self.take = Some(RecordingTake {
            track,
            start: self.current_time,
        });
        Ok(())
    }

    fn begin(
        &mut self,
        stage: &mut Stage<'_>,
        from: f64,
        mode: TransportMode,
    ) -> Result<(), EngineError> {
        if self.mode.is_running() {
            self.halt(stage.ctx);
        }
        let mut from = if from.is_finite() { from.max(0.0) } else { 0.0 };
        if self.loop_active() && from >= self.loop_region.end {
            from = self.loop_region.start;
        }

        let now = stage.ctx.now();
        self.origin = now - from;
        self.current_time = from;
        self.mode = mode;
        self.prescheduled = false;
        self.schedule_from(stage, from);
        self.metronome.start(now, &self.time);
        log::info!("transport {mode:?} from {from:.3}s");
        Ok(())
    }

    /// Queue everything sounding from `from` to the end of the project, or
    /// to the loop end when looping.
    fn schedule_from(&mut self, stage: &mut Stage<'_>, from: f64) {
        let (lookahead, stop_at) = if self.loop_active() {
            (self.loop_region.end - from, Some(self.origin + self.loop_region.end))
        } else {
            (f64::INFINITY, None)
        };
        let due = stage.clips.schedule_due(from, lookahead, self.origin);
        self.start_all(stage, &due, self.origin, stop_at);
    }

    fn start_all(
        &mut self,
        stage: &mut Stage<'_>,
        due: &[DueClip],
        origin: f64,
        stop_at: Option<f64>,
    ) {
        for entry in due {
            if let Err(err) = self.start_clip(stage, entry, origin, stop_at) {
                log::warn!("clip {} skipped: {err}", entry.clip);
            }
        }
    }

    fn start_clip(
        &mut self,
        stage: &mut Stage<'_>,
        due: &DueClip,
        origin: f64,
        stop_at: Option<f64>,
    ) -> Result<(), EngineError> {
        let audio = match stage.clips.resolve(due.clip)? {
            BufferState::Ready(audio) => audio,
            BufferState::Pending => {
                log::debug!("clip {} waiting for its audio", due.clip);
                self.deferred.push(Deferred {
                    clip: due.clip,
                    origin,
                    stop_at,
                });
                return Ok(());
            }
            // already logged by the scheduler
            BufferState::Failed(_) => return Ok(()),
        };

        let route = stage.mixer.route(stage.ctx, due.track, stage.meters)?;
        let sample_rate = stage.ctx.sample_rate();
        let source = BufferSource::new(audio, due.when, due.offset, self.clip_gain, sample_rate);
        let id = stage.ctx.play(route, Box::new(source))?;
        if let Some(at) = stop_at {
            stage.ctx.stop(id, at)?;
        }
        self.sounding.push(Sounding {
            source: id,
            clip: due.clip,
        });
        Ok(())
    }

    /// Once per frame: wrap the loop, queue the next iteration, start clips
    /// whose audio arrived, feed the metronome, and refresh `current_time`.
    pub fn update(&mut self, stage: &mut Stage<'_>) {
        if !self.mode.is_running() {
            return;
        }
        let now = stage.ctx.now();

        if self.loop_active() {
            let LoopRegion { start, end, .. } = self.loop_region;
            let len = end - start;

            if !self.prescheduled && self.origin + end - now <= self.horizon {
                let next_origin = self.origin + len;
                let due = stage.clips.schedule_due(start, len, next_origin);
                self.start_all(stage, &due, next_origin, Some(next_origin + end));
                self.prescheduled = true;
            }

            let mut wraps = 0;
            while now >= self.origin + end {
                self.origin += len;
                wraps += 1;
            }
            if wraps > 0 {
                if !self.prescheduled || wraps > 1 {
                    // the clock jumped past a whole iteration
                    let from = now - self.origin;
                    self.schedule_from(stage, from);
                }
                self.prescheduled = false;
                log::debug!("loop wrapped to {:.3}s", now - self.origin);
            }
        }

        self.current_time = now - self.origin;
        self.start_deferred(stage, now);
        self.metronome.pump(stage.ctx);
    }

    fn start_deferred(&mut self, stage: &mut Stage<'_>, now: f64) {
        if self.deferred.is_empty() {
            return;
        }
        for deferred in std::mem::take(&mut self.deferred) {
            if deferred.stop_at.is_some_and(|at| now >= at) {
                continue;
            }
            let position = now - deferred.origin;
            let Some(clip) = stage.clips.clip(deferred.clip) else {
                continue;
            };
            if clip.end() <= position {
                continue;
            }
            let due = DueClip {
                clip: clip.id,
                track: clip.track,
                when: deferred.origin + clip.start.max(position),
                offset: (position - clip.start).max(0.0),
                end: clip.end(),
            };
            if let Err(err) = self.start_clip(stage, &due, deferred.origin, deferred.stop_at) {
                log::warn!("clip {} skipped: {err}", due.clip);
            }
        }
    }

    /// Stop every source and return to idle at time zero. Stopping twice is
    /// harmless. Hands back the recording take, if recording.
    pub fn stop(&mut self, ctx: &AudioContext) -> Option<RecordingTake> {
        if self.mode.is_running() {
            self.halt(ctx);
            log::info!("transport stopped");
        }
        self.mode = TransportMode::Idle;
        self.current_time = 0.0;
        self.origin = 0.0;
        self.take.take()
    }

    fn halt(&mut self, ctx: &AudioContext) {
        let now = ctx.now();
        for sounding in self.sounding.drain(..) {
            if let Err(err) = ctx.stop(sounding.source, now) {
                log::debug!("{}: {err}", EngineError::SchedulingRace);
            }
        }
        self.deferred.clear();
        self.prescheduled = false;
        self.metronome.stop(ctx);
    }

    /// Forget sources the render thread has finished with.
    pub fn poll(&mut self, finished: &[SourceId]) {
        if finished.is_empty() {
            return;
        }
        self.sounding.retain(|s| !finished.contains(&s.source));
        self.metronome.poll(finished);
    }

    /// Jump to `position`. While running this restarts playback there in the
    /// same mode; while idle it only moves the playhead.
    pub fn seek(&mut self, stage: &mut Stage<'_>, position: f64) -> Result<(), EngineError> {
        let position = if position.is_finite() { position.max(0.0) } else { 0.0 };
        match self.mode {
            TransportMode::Idle => {
                self.current_time = position;
                Ok(())
            }
            mode => {
                let take = self.take;
                self.begin(stage, position, mode)?;
                self.take = take;
                Ok(())
            }
        }
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.time = TimeContext::new(bpm, self.time.time_signature);
        self.metronome.set_tempo(&self.time);
    }

    pub fn set_time_signature(&mut self, signature: TimeSignature) {
        self.time = TimeContext::new(self.time.bpm, signature);
        self.metronome.set_tempo(&self.time);
    }

    /// Replace the loop region. An enabled region must be valid at the
    /// current tempo; a running transport re-plans from where it is.
    pub fn set_loop(
        &mut self,
        stage: &mut Stage<'_>,
        region: LoopRegion,
    ) -> Result<(), EngineError> {
        if region.enabled && !region.is_valid(&self.time) {
            return Err(EngineError::InvalidParameter {
                name: format!("loop {:.3}..{:.3}", region.start, region.end),
                value: region.end as f32,
            });
        }
        self.loop_region = region;
        if self.mode.is_running() {
            let position = self.current_time;
            self.seek(stage, position)?;
        }
        Ok(())
    }

    pub fn set_metronome(&mut self, ctx: &AudioContext, enabled: bool, volume: Option<f32>) {
        if let Some(volume) = volume {
            self.metronome.set_volume(volume);
        }
        let was = self.metronome.enabled();
        self.metronome.set_enabled(enabled);
        if self.mode.is_running() && enabled && !was {
            self.metronome.start(ctx.now(), &self.time);
        } else if !enabled && was {
            self.metronome.stop(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use daw_decode::{BufferCache, DecodeError, SourceFetcher};
    use daw_engine::{OfflineDriver, OfflineRenderHandle};
    use daw_transport::{AudioArc, TrackState};

    const SR: u32 = 8000;

    struct SlowFetcher;

    impl SourceFetcher for SlowFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, DecodeError> {
            std::thread::sleep(std::time::Duration::from_millis(50));
            Err(DecodeError::NotFound(url.to_string()))
        }
    }

    struct Rig {
        ctx: AudioContext,
        render: OfflineRenderHandle,
        clips: ClipScheduler,
        mixer: Mixer,
        meters: MeteringPipeline,
    }

    impl Rig {
        fn new() -> Self {
            let (driver, render) = OfflineDriver::new(SR);
            let ctx = AudioContext::open(&driver).unwrap();
            ctx.resume().unwrap();
            let mut mixer = Mixer::new();
            mixer.add_track(TrackState::new(TrackId(1), "Drums"));
            Self {
                ctx,
                render,
                clips: ClipScheduler::new(BufferCache::new(Arc::new(SlowFetcher), SR)),
                mixer,
                meters: MeteringPipeline::new(0.85),
            }
        }

        fn stage(&mut self) -> Stage<'_> {
            Stage {
                ctx: &self.ctx,
                clips: &mut self.clips,
                mixer: &mut self.mixer,
                meters: &mut self.meters,
            }
        }

        fn transport(&self) -> TransportController {
            let metronome = Metronome::new(Arc::new(self.ctx.clock()), 0.025, 0.15, 100.0);
            TransportController::new(metronome, 0.7, 0.15)
        }

        fn clip(&mut self, start: f64, secs: f64) -> ClipId {
            let audio = AudioArc::mono(vec![0.2; (secs * SR as f64) as usize], SR);
            self.clips.add_generated(TrackId(1), start, audio, "clip").unwrap()
        }
    }

    #[test]
    fn test_current_time_follows_clock() {
        let mut rig = Rig::new();
        let mut transport = rig.transport();
        rig.render.render_seconds(1.0);

        transport.play(&mut rig.stage(), 3.0).unwrap();
        assert_eq!(transport.mode(), TransportMode::Playing);
        rig.render.render_seconds(0.5);
        transport.update(&mut rig.stage());
        assert!((transport.current_time() - 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_play_schedules_only_clips_still_sounding() {
        let mut rig = Rig::new();
        let mut transport = rig.transport();
        let ended = rig.clip(0.0, 3.0);
        let partial = rig.clip(4.0, 3.0);
        let later = rig.clip(10.0, 3.0);

        transport.play(&mut rig.stage(), 5.0).unwrap();
        let sounding = transport.sounding_clips();
        assert_eq!(sounding, vec![partial, later]);
        assert!(!sounding.contains(&ended));
        assert!(rig.mixer.has_bus(TrackId(1)));
    }

    #[test]
    fn test_stop_is_idempotent_and_resets() {
        let mut rig = Rig::new();
        let mut transport = rig.transport();
        rig.clip(0.0, 1.0);
        transport.play(&mut rig.stage(), 0.5).unwrap();
        assert_eq!(transport.stop(&rig.ctx), None);
        assert_eq!(transport.stop(&rig.ctx), None);
        assert_eq!(transport.mode(), TransportMode::Idle);
        assert_eq!(transport.current_time(), 0.0);
        assert!(transport.sounding_clips().is_empty());
    }

    #[test]
    fn test_loop_wraps_to_start() {
        let mut rig = Rig::new();
        let mut transport = rig.transport();
        rig.clip(0.0, 8.0);
        transport
            .set_loop(&mut rig.stage(), LoopRegion::new(2.0, 6.0))
            .unwrap();
        transport.play(&mut rig.stage(), 0.0).unwrap();

        let mut previous = 0.0;
        let mut wrapped = false;
        for _ in 0..400 {
            rig.render.render(128);
            transport.update(&mut rig.stage());
            let t = transport.current_time();
            assert!(t < 6.0, "current_time {t} escaped the loop");
            if t < previous {
                assert!((2.0..2.0 + 0.02).contains(&t), "wrapped to {t}");
                wrapped = true;
                break;
            }
            previous = t;
        }
        assert!(wrapped);
    }

    #[test]
    fn test_next_iteration_is_queued_before_the_wrap() {
        let mut rig = Rig::new();
        let mut transport = rig.transport();
        let clip = rig.clip(2.0, 4.0);
        transport
            .set_loop(&mut rig.stage(), LoopRegion::new(2.0, 6.0))
            .unwrap();
        transport.play(&mut rig.stage(), 2.0).unwrap();
        assert_eq!(transport.sounding_clips(), vec![clip]);

        // 3.9 s in: the loop end is inside the horizon
        rig.render.render_seconds(3.9);
        transport.update(&mut rig.stage());
        assert_eq!(transport.sounding_clips(), vec![clip, clip]);
    }

    #[test]
    fn test_invalid_loop_is_rejected() {
        let mut rig = Rig::new();
        let mut transport = rig.transport();
        // one sixteenth at 120 bpm is 0.125 s
        let result = transport.set_loop(&mut rig.stage(), LoopRegion::new(1.0, 1.1));
        assert!(matches!(result, Err(EngineError::InvalidParameter { .. })));
        assert!(!transport.loop_region().enabled);
    }

    #[test]
    fn test_pending_clip_is_deferred_then_dropped_on_failure() {
        let mut rig = Rig::new();
        let mut transport = rig.transport();
        let id = rig
            .clips
            .add_uploaded(TrackId(1), 0.0, "slow.wav", 2.0, "slow")
            .unwrap();
        transport.play(&mut rig.stage(), 0.0).unwrap();
        assert_eq!(transport.deferred_clips(), vec![id]);

        rig.clips.cache().wait("slow.wav", std::time::Duration::from_secs(5));
        transport.update(&mut rig.stage());
        assert!(transport.deferred_clips().is_empty());
        assert!(transport.sounding_clips().is_empty());
    }

    #[test]
    fn test_deferred_clip_starts_when_audio_lands() {
        let mut rig = Rig::new();
        let mut transport = rig.transport();
        // the fetch itself fails; the buffer is supplied by hand instead
        let id = rig
            .clips
            .add_uploaded(TrackId(1), 0.0, "late.wav", 2.0, "late")
            .unwrap();
        transport.play(&mut rig.stage(), 0.0).unwrap();
        assert_eq!(transport.deferred_clips(), vec![id]);

        rig.clips
            .cache()
            .insert("late.wav", AudioArc::mono(vec![0.3; SR as usize * 2], SR));
        rig.render.render_seconds(0.5);
        transport.update(&mut rig.stage());
        assert_eq!(transport.sounding_clips(), vec![id]);
    }

    #[test]
    fn test_record_hands_back_take() {
        let mut rig = Rig::new();
        let mut transport = rig.transport();
        transport.record(&mut rig.stage(), TrackId(1), 1.5).unwrap();
        assert_eq!(transport.mode(), TransportMode::Recording);
        let take = transport.stop(&rig.ctx).unwrap();
        assert_eq!(take.track, TrackId(1));
        assert_eq!(take.start, 1.5);
    }

    #[test]
    fn test_metronome_clicks_while_playing() {
        let mut rig = Rig::new();
        let mut transport = rig.transport();
        transport.set_metronome(&rig.ctx, true, Some(50.0));
        transport.play(&mut rig.stage(), 0.0).unwrap();
        transport.update(&mut rig.stage());
        assert_eq!(rig.render.render(64).len(), 128);
        transport.stop(&rig.ctx);
        assert!(!transport.is_playing());
    }
}
