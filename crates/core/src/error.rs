use daw_decode::DecodeError;
use daw_engine::DeviceError;
use daw_transport::{ClipId, EffectId, TrackId};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no audio output is available: {0}")]
    ContextUnavailable(String),

    #[error("audio is suspended until the user interacts with the page")]
    ActivationRequired,

    #[error("microphone access was denied")]
    PermissionDenied,

    #[error("invalid value {value} for {name}")]
    InvalidParameter { name: String, value: f32 },

    #[error("could not decode {url}: {source}")]
    DecodeFailure { url: String, source: DecodeError },

    #[error("source already stopped")]
    SchedulingRace,

    #[error("unknown instrument '{0}'")]
    UnknownInstrument(String),

    #[error("unknown track {0}")]
    UnknownTrack(TrackId),

    #[error("unknown clip {0}")]
    UnknownClip(ClipId),

    #[error("unknown effect {0:?}")]
    UnknownEffect(EffectId),

    #[error("invalid clip: {0}")]
    InvalidClip(String),

    #[error("an export is already running")]
    ExportInProgress,

    #[error("export failed: {0}")]
    Export(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("audio device error: {0}")]
    Device(DeviceError),
}

impl From<DeviceError> for EngineError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::NoDevice | DeviceError::UnsupportedFormat(_) => {
                EngineError::ContextUnavailable(err.to_string())
            }
            DeviceError::PermissionDenied => EngineError::PermissionDenied,
            other => EngineError::Device(other),
        }
    }
}

impl From<daw_engine::param::InvalidParameter> for EngineError {
    fn from(err: daw_engine::param::InvalidParameter) -> Self {
        EngineError::InvalidParameter {
            name: err.name.to_string(),
            value: err.value,
        }
    }
}

impl EngineError {
    /// The message to show when a context or transport action fails and the
    /// user can do something about it. Errors that are only ever logged
    /// return `None`.
    pub fn user_prompt(&self) -> Option<&'static str> {
        match self {
            EngineError::ContextUnavailable(_) | EngineError::Device(_) => {
                Some("Audio is unavailable. Check your output device and try again.")
            }
            EngineError::ActivationRequired => Some("Click anywhere to enable audio."),
            EngineError::PermissionDenied => {
                Some("Microphone access is needed to record. Allow it and try again.")
            }
            EngineError::ExportInProgress => Some("An export is already running."),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_errors_map_to_engine_errors() {
        assert!(matches!(
            EngineError::from(DeviceError::NoDevice),
            EngineError::ContextUnavailable(_)
        ));
        assert!(matches!(
            EngineError::from(DeviceError::PermissionDenied),
            EngineError::PermissionDenied
        ));
        assert!(matches!(
            EngineError::from(DeviceError::QueueFull),
            EngineError::Device(DeviceError::QueueFull)
        ));
    }

    #[test]
    fn test_only_actionable_errors_prompt() {
        assert!(EngineError::ActivationRequired.user_prompt().is_some());
        assert!(EngineError::ContextUnavailable("x".into()).user_prompt().is_some());
        assert!(EngineError::SchedulingRace.user_prompt().is_none());
        assert!(EngineError::UnknownClip(ClipId(3)).user_prompt().is_none());
    }
}
