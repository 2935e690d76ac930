//! Ownership of the one audio context and its suspend/resume lifecycle.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use daw_engine::{AudioContext, ContextState, DeviceError, Driver};

use crate::EngineError;

/// What kind of input produced a user gesture. Any of them counts as
/// activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    Click,
    KeyDown,
    Touch,
}

struct Lifecycle {
    context: Option<Arc<AudioContext>>,
    activated: bool,
    listeners_armed: bool,
    autoplay_blocked: bool,
    master_volume: f32,
    resuming: bool,
    /// Bumped each time a resume finishes; waiters use it to spot their
    /// flight landing.
    flights: u64,
    last_resume: Result<(), DeviceError>,
}

/// Lazily creates the audio context, keeps exactly one alive, and collapses
/// concurrent resume requests into one platform resume.
pub struct ContextManager {
    driver: Arc<dyn Driver>,
    require_gesture: bool,
    lifecycle: Mutex<Lifecycle>,
    landed: Condvar,
}

impl ContextManager {
    pub fn new(driver: Arc<dyn Driver>, require_gesture: bool, master_volume: f32) -> Self {
        Self {
            driver,
            require_gesture,
            lifecycle: Mutex::new(Lifecycle {
                context: None,
                activated: false,
                listeners_armed: false,
                autoplay_blocked: false,
                master_volume: clamp_volume(master_volume),
                resuming: false,
                flights: 0,
                last_resume: Ok(()),
            }),
            landed: Condvar::new(),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, Lifecycle>) -> MutexGuard<'a, Lifecycle> {
        match self.landed.wait(guard) {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The current context, creating it (again, if the last one was closed).
    fn context_locked(&self, lifecycle: &mut Lifecycle) -> Result<Arc<AudioContext>, EngineError> {
        if let Some(ctx) = &lifecycle.context
            && ctx.state() != ContextState::Closed
        {
            return Ok(ctx.clone());
        }
        let ctx = Arc::new(AudioContext::open(self.driver.as_ref()).map_err(|err| {
            log::warn!("cannot open audio context: {err}");
            EngineError::ContextUnavailable(err.to_string())
        })?);
        ctx.set_master_gain(lifecycle.master_volume / 100.0)?;
        lifecycle.context = Some(ctx.clone());
        Ok(ctx)
    }

    /// The context if one exists, without creating or resuming it.
    pub fn context(&self) -> Option<Arc<AudioContext>> {
        self.lifecycle()
            .context
            .as_ref()
            .filter(|ctx| ctx.state() != ContextState::Closed)
            .cloned()
    }

    pub fn state(&self) -> Option<ContextState> {
        self.lifecycle().context.as_ref().map(|ctx| ctx.state())
    }

    /// A running context, resuming it first if needed. Every scheduling
    /// entry point goes through here.
    pub fn ensure_ready(&self) -> Result<Arc<AudioContext>, EngineError> {
        self.resume()
    }

    /// Resume the context. Concurrent callers share one in-flight resume
    /// and all see its outcome.
    pub fn resume(&self) -> Result<Arc<AudioContext>, EngineError> {
        let mut lifecycle = self.lifecycle();
        let ctx = self.context_locked(&mut lifecycle)?;
        if ctx.state() == ContextState::Running {
            return Ok(ctx);
        }
        if self.require_gesture && !lifecycle.activated {
            lifecycle.autoplay_blocked = true;
            return Err(EngineError::ActivationRequired);
        }

        if lifecycle.resuming {
            let flight = lifecycle.flights;
            while lifecycle.resuming && lifecycle.flights == flight {
                lifecycle = self.wait(lifecycle);
            }
            return lifecycle.last_resume.clone().map(|()| ctx).map_err(Into::into);
        }

        lifecycle.resuming = true;
        drop(lifecycle);

        let result = ctx.resume();

        let mut lifecycle = self.lifecycle();
        lifecycle.resuming = false;
        lifecycle.flights += 1;
        lifecycle.last_resume = result.clone();
        match &result {
            Ok(()) => {
                lifecycle.autoplay_blocked = false;
                log::info!("audio context running");
            }
            Err(err) => log::warn!("resume failed: {err}"),
        }
        drop(lifecycle);
        self.landed.notify_all();

        result.map(|()| ctx).map_err(Into::into)
    }

    /// The page went to the background: suspend. This is not an autoplay
    /// block.
    pub fn on_visibility_hidden(&self) {
        let lifecycle = self.lifecycle();
        if let Some(ctx) = &lifecycle.context
            && ctx.state() == ContextState::Running
        {
            match ctx.suspend() {
                Ok(()) => log::info!("audio context suspended while hidden"),
                Err(err) => log::warn!("suspend failed: {err}"),
            }
        }
    }

    /// The page is visible again. Audio stays suspended until the next
    /// gesture; this only arms the one-shot gesture listeners.
    pub fn on_visibility_visible(&self) {
        let mut lifecycle = self.lifecycle();
        let suspended = lifecycle
            .context
            .as_ref()
            .is_some_and(|ctx| ctx.state() == ContextState::Suspended);
        if suspended {
            lifecycle.listeners_armed = true;
            lifecycle.autoplay_blocked = true;
        }
    }

    /// A click, key press or touch. Grants activation; when the gesture
    /// listeners are armed they are consumed and the context resumes.
    pub fn on_user_gesture(
        &self,
        gesture: Gesture,
    ) -> Option<Result<Arc<AudioContext>, EngineError>> {
        let armed = {
            let mut lifecycle = self.lifecycle();
            lifecycle.activated = true;
            std::mem::take(&mut lifecycle.listeners_armed)
        };
        if armed {
            log::debug!("{gesture:?} resumes audio");
            Some(self.resume())
        } else {
            None
        }
    }

    /// Explicit activation from an "enable audio" prompt.
    pub fn request_activation(&self) -> Result<Arc<AudioContext>, EngineError> {
        {
            let mut lifecycle = self.lifecycle();
            lifecycle.activated = true;
            lifecycle.listeners_armed = false;
        }
        self.resume()
    }

    pub fn autoplay_blocked(&self) -> bool {
        self.lifecycle().autoplay_blocked
    }

    pub fn listeners_armed(&self) -> bool {
        self.lifecycle().listeners_armed
    }

    pub fn master_volume(&self) -> f32 {
        self.lifecycle().master_volume
    }

    /// Scale the whole mix; `volume` is 0..=100.
    pub fn set_master_volume(&self, volume: f32) -> Result<(), EngineError> {
        let mut lifecycle = self.lifecycle();
        lifecycle.master_volume = clamp_volume(volume);
        if let Some(ctx) = &lifecycle.context
            && ctx.state() != ContextState::Closed
        {
            ctx.set_master_gain(lifecycle.master_volume / 100.0)?;
        }
        Ok(())
    }

    /// Close the context. The next `ensure_ready` opens a fresh one.
    pub fn destroy(&self) {
        let mut lifecycle = self.lifecycle();
        if let Some(ctx) = lifecycle.context.take() {
            ctx.close();
        }
        lifecycle.listeners_armed = false;
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_finite() {
        volume.clamp(0.0, 100.0)
    } else {
        80.0
    }
}
