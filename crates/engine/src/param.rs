//! Parameter validation and scheduled parameter curves.
//!
//! Every numeric value headed for a node goes through [`ParamRange::sanitize`]
//! first. Invalid values are never fatal: they are clamped (or replaced by the
//! range default when not finite) and the correction is logged at debug level.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("invalid value {value} for {name} (expected {min}..={max})")]
pub struct InvalidParameter {
    pub name: &'static str,
    pub value: f32,
    pub min: f32,
    pub max: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamRange {
    pub name: &'static str,
    pub min: f32,
    pub max: f32,
    pub default: f32,
}

impl ParamRange {
    pub const fn new(name: &'static str, min: f32, max: f32, default: f32) -> Self {
        Self {
            name,
            min,
            max,
            default,
        }
    }

    pub fn validate(&self, value: f32) -> Result<f32, InvalidParameter> {
        if value.is_finite() && value >= self.min && value <= self.max {
            Ok(value)
        } else {
            Err(InvalidParameter {
                name: self.name,
                value,
                min: self.min,
                max: self.max,
            })
        }
    }

    pub fn sanitize(&self, value: f32) -> f32 {
        match self.validate(value) {
            Ok(value) => value,
            Err(err) => {
                let fixed = if value.is_finite() {
                    value.clamp(self.min, self.max)
                } else {
                    self.default
                };
                log::debug!("{err}; using {fixed}");
                fixed
            }
        }
    }

    /// Same range with a tighter upper bound, e.g. Nyquist for frequencies.
    pub fn with_max(self, max: f32) -> Self {
        let max = max.max(self.min);
        Self {
            max,
            default: self.default.min(max),
            ..self
        }
    }
}

pub const GAIN: ParamRange = ParamRange::new("gain", 0.0, 4.0, 1.0);
pub const FREQUENCY: ParamRange = ParamRange::new("frequency", 1.0, 24000.0, 440.0);
pub const Q: ParamRange = ParamRange::new("q", 0.0001, 1000.0, 1.0);
pub const SECONDS: ParamRange = ParamRange::new("time", 0.0, 60.0, 0.0);
pub const VELOCITY: ParamRange = ParamRange::new("velocity", 0.0, 127.0, 100.0);
pub const PERCENT: ParamRange = ParamRange::new("percent", 0.0, 100.0, 50.0);

/// Lowest value an exponential curve may start or end on.
pub const EXP_FLOOR: f32 = 1.0e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Shape {
    Set,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Event {
    time: f64,
    value: f32,
    shape: Shape,
}

/// A value over time built from set/ramp events, in the manner of a
/// scheduled audio parameter. Ramps run from the previous event to their own
/// time; before the first event the initial value holds.
#[derive(Debug, Clone)]
pub struct Automation {
    initial: f32,
    events: Vec<Event>,
}

impl Automation {
    pub fn constant(value: f32) -> Self {
        Self {
            initial: value,
            events: Vec::new(),
        }
    }

    pub fn set_value_at(&mut self, time: f64, value: f32) -> &mut Self {
        self.insert(Event {
            time,
            value,
            shape: Shape::Set,
        })
    }

    pub fn linear_ramp_to(&mut self, time: f64, value: f32) -> &mut Self {
        self.insert(Event {
            time,
            value,
            shape: Shape::Linear,
        })
    }

    pub fn exponential_ramp_to(&mut self, time: f64, value: f32) -> &mut Self {
        self.insert(Event {
            time,
            value,
            shape: Shape::Exponential,
        })
    }

    /// Drop every event at or after `time`.
    pub fn cancel_after(&mut self, time: f64) -> &mut Self {
        self.events.retain(|e| e.time < time);
        self
    }

    fn insert(&mut self, event: Event) -> &mut Self {
        if !event.time.is_finite() || !event.value.is_finite() {
            log::debug!("ignoring non-finite automation event {event:?}");
            return self;
        }
        let at = self.events.partition_point(|e| e.time <= event.time);
        self.events.insert(at, event);
        self
    }

    /// Time of the last scheduled event, if any.
    pub fn end_time(&self) -> Option<f64> {
        self.events.last().map(|e| e.time)
    }

    pub fn value_at(&self, time: f64) -> f32 {
        let mut prev_time = f64::NEG_INFINITY;
        let mut prev_value = self.initial;

        for event in &self.events {
            if event.time <= time {
                prev_time = event.time;
                prev_value = event.value;
                continue;
            }
            if prev_time == f64::NEG_INFINITY {
                // A ramp with nothing before it starts where it is scheduled.
                return if event.shape == Shape::Set {
                    prev_value
                } else {
                    self.initial
                };
            }
            let span = event.time - prev_time;
            let t = ((time - prev_time) / span) as f32;
            return match event.shape {
                Shape::Set => prev_value,
                Shape::Linear => prev_value + (event.value - prev_value) * t,
                Shape::Exponential => {
                    let from = prev_value.abs().max(EXP_FLOOR).copysign(prev_value);
                    let to = event.value.abs().max(EXP_FLOOR).copysign(event.value);
                    if from.signum() != to.signum() {
                        prev_value
                    } else {
                        from * (to / from).powf(t)
                    }
                }
            };
        }
        prev_value
    }
}
