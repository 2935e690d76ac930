//! Metronome clicks on a lookahead scheduler.
//!
//! The scheduler wakes every `interval` seconds of audio-clock time and
//! queues every click falling inside the next `horizon` seconds, so clicks
//! land sample-accurately even though the control thread is coarse.

use std::sync::Arc;
use std::time::{Duration, Instant};

use daw_engine::dsp::Waveform;
use daw_engine::param::{Automation, PERCENT};
use daw_engine::{AudioClock, AudioContext, Route, SourceId, Voice};
use daw_transport::TimeContext;

const CLICK_HZ: f32 = 800.0;
const ACCENT_HZ: f32 = 1200.0;
const CLICK_GAIN: f32 = 0.1;
const ACCENT_GAIN: f32 = 0.15;
const CLICK_SECS: f64 = 0.1;

/// One click to be sounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Click {
    /// Position in the click sequence, from 0.
    pub index: u64,
    pub when: f64,
    pub accent: bool,
}

/// Short sine burst decaying exponentially to 0.01 over 0.1 s. The first
/// beat of a bar is higher and louder.
pub fn click_voice(click: &Click, volume: f32) -> Voice {
    let volume = PERCENT.sanitize(volume) / 100.0;
    let (hz, gain) = if click.accent {
        (ACCENT_HZ, ACCENT_GAIN)
    } else {
        (CLICK_HZ, CLICK_GAIN)
    };
    let mut envelope = Automation::constant(0.0);
    envelope
        .set_value_at(click.when, gain * volume)
        .exponential_ramp_to(click.when + CLICK_SECS, 0.01 * volume);
    Voice::builder(click.when)
        .oscillator(Waveform::Sine, Automation::constant(hz), 1.0)
        .envelope(envelope)
        .one_shot(CLICK_SECS)
        .build()
}

/// Produces clicks at a fixed beat spacing, a horizon ahead of the clock.
pub struct LookaheadScheduler {
    clock: Arc<dyn AudioClock>,
    interval: f64,
    horizon: f64,
    beat: f64,
    beats_per_bar: u64,
    next_index: u64,
    next_time: f64,
    /// Clicks at or after this time are not produced.
    until: f64,
    last_wake: Option<f64>,
}

impl LookaheadScheduler {
    pub fn new(clock: Arc<dyn AudioClock>, interval: f64, horizon: f64) -> Self {
        Self {
            clock,
            interval: interval.max(0.001),
            horizon: horizon.max(0.0),
            beat: 0.5,
            beats_per_bar: 4,
            next_index: 0,
            next_time: f64::INFINITY,
            until: f64::INFINITY,
            last_wake: None,
        }
    }

    /// Begin clicking at `first`, one click per beat of `time`.
    pub fn start(&mut self, first: f64, time: &TimeContext) {
        self.start_bounded(first, time, f64::INFINITY);
    }

    fn start_bounded(&mut self, first: f64, time: &TimeContext, until: f64) {
        self.beat = time.seconds_per_beat();
        self.beats_per_bar = time.time_signature.beats_per_bar().max(1) as u64;
        self.next_index = 0;
        self.next_time = first;
        self.until = until;
        self.last_wake = None;
    }

    /// Follow a tempo change from the next unscheduled click on.
    pub fn set_tempo(&mut self, time: &TimeContext) {
        self.beat = time.seconds_per_beat();
        self.beats_per_bar = time.time_signature.beats_per_bar().max(1) as u64;
    }

    pub fn stop(&mut self) {
        self.next_time = f64::INFINITY;
        self.last_wake = None;
    }

    pub fn is_running(&self) -> bool {
        self.next_time.is_finite() && self.next_time < self.until
    }

    pub fn clock(&self) -> &Arc<dyn AudioClock> {
        &self.clock
    }

    /// Clicks due within the horizon, if a wake interval has passed since
    /// the last pump. Calling more often than the interval is harmless.
    pub fn pump(&mut self) -> Vec<Click> {
        let now = self.clock.now();
        if let Some(last) = self.last_wake
            && now - last < self.interval
        {
            return Vec::new();
        }
        self.last_wake = Some(now);
        self.due(now)
    }

    fn due(&mut self, now: f64) -> Vec<Click> {
        let mut clicks = Vec::new();
        let edge = (now + self.horizon).min(self.until);
        while self.next_time < edge {
            clicks.push(Click {
                index: self.next_index,
                when: self.next_time,
                accent: self.next_index % self.beats_per_bar == 0,
            });
            self.next_index += 1;
            self.next_time += self.beat;
        }
        clicks
    }
}

/// The metronome as the transport drives it: a scheduler plus the sources it
/// has queued, so stopping can cancel clicks that have not sounded yet.
pub struct Metronome {
    scheduler: LookaheadScheduler,
    enabled: bool,
    volume: f32,
    queued: Vec<(SourceId, f64)>,
}

impl Metronome {
    pub fn new(clock: Arc<dyn AudioClock>, interval: f64, horizon: f64, volume: f32) -> Self {
        Self {
            scheduler: LookaheadScheduler::new(clock, interval, horizon),
            enabled: false,
            volume: PERCENT.sanitize(volume),
            queued: Vec::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = PERCENT.sanitize(volume);
    }

    pub fn start(&mut self, first: f64, time: &TimeContext) {
        self.scheduler.start(first, time);
    }

    pub fn set_tempo(&mut self, time: &TimeContext) {
        self.scheduler.set_tempo(time);
    }

    /// Follow a different audio clock, e.g. after the context was recreated.
    /// Anything queued on the old clock is forgotten.
    pub fn set_clock(&mut self, clock: Arc<dyn AudioClock>) {
        self.scheduler.clock = clock;
        self.scheduler.stop();
        self.queued.clear();
    }

    /// Schedule whatever is due. Does nothing while disabled.
    pub fn pump(&mut self, ctx: &AudioContext) {
        if !self.enabled || !self.scheduler.is_running() {
            return;
        }
        let clicks = self.scheduler.pump();
        self.sound(ctx, &clicks);
    }

    fn sound(&mut self, ctx: &AudioContext, clicks: &[Click]) {
        for click in clicks {
            match ctx.play(Route::Master, Box::new(click_voice(click, self.volume))) {
                Ok(id) => self.queued.push((id, click.when + CLICK_SECS)),
                Err(err) => log::warn!("click {} dropped: {err}", click.index),
            }
        }
    }

    /// Stop the scheduler and silence every queued click.
    pub fn stop(&mut self, ctx: &AudioContext) {
        self.scheduler.stop();
        let now = ctx.now();
        for (id, _) in self.queued.drain(..) {
            if let Err(err) = ctx.stop(id, now) {
                log::debug!("click {}: {err}", crate::EngineError::SchedulingRace);
            }
        }
    }

    /// Forget clicks that have finished sounding.
    pub fn poll(&mut self, finished: &[SourceId]) {
        self.queued.retain(|(id, _)| !finished.contains(id));
    }

    /// `beats` clicks starting now, bar-accented. The returned handle
    /// resolves once the last one has had its beat.
    pub fn count_in(&mut self, ctx: &AudioContext, time: &TimeContext, beats: u32) -> CountIn {
        let mut scheduler =
            LookaheadScheduler::new(self.scheduler.clock.clone(), 0.0, f64::INFINITY);
        let first = ctx.now() + COUNT_IN_LEAD;
        let ends_at = first + time.seconds_per_beat() * beats as f64;
        scheduler.start_bounded(first, time, ends_at);
        let clicks = scheduler.due(ctx.now());
        self.sound(ctx, &clicks);
        log::debug!("count-in of {beats} beats ends at {ends_at:.3}");
        CountIn {
            clock: self.scheduler.clock.clone(),
            ends_at,
        }
    }
}

/// Slack before the first count-in click so it is not scheduled in the past.
const COUNT_IN_LEAD: f64 = 0.05;

/// Resolves when a count-in has finished.
pub struct CountIn {
    clock: Arc<dyn AudioClock>,
    ends_at: f64,
}

impl CountIn {
    /// Audio-clock time at which recording should begin.
    pub fn ends_at(&self) -> f64 {
        self.ends_at
    }

    pub fn poll(&self) -> bool {
        self.clock.now() >= self.ends_at
    }

    /// Block until the count-in is over or `timeout` of wall time passes.
    /// Returns whether it finished.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.poll() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }
}
