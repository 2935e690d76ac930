//! Engine core: the audio context lifecycle, instrument voices, clip and
//! metronome scheduling, the transport, mixing and metering, all owned by a
//! [`Session`].

pub mod clips;
pub mod config;
pub mod context;
pub mod demo;
pub mod effects;
mod error;
pub mod export;
pub mod keyboard;
pub mod metering;
pub mod metronome;
pub mod mixer;
pub mod record;
pub mod session;
pub mod transport;
pub mod voices;

pub use clips::{BufferState, ClipScheduler, DueClip};
pub use config::EngineConfig;
pub use context::{ContextManager, Gesture};
pub use effects::{EffectChain, EffectChainBuilder};
pub use error::EngineError;
pub use export::{ExportStatus, MixdownExport};
pub use keyboard::note_for_key;
pub use metering::MeteringPipeline;
pub use metronome::{Click, CountIn, LookaheadScheduler, Metronome};
pub use mixer::Mixer;
pub use record::Recorder;
pub use session::Session;
pub use transport::{RecordingTake, Stage, TransportController, TransportMode};
pub use voices::{DrumKind, VoiceEngine, VoiceKey, VoiceKind};

pub use daw_catalog::{
    Catalog, Instrument, InstrumentKind, JsonDirProvider, Preset, Sample, SamplePack,
};
pub use daw_decode::{FileFetcher, SourceFetcher};
pub use daw_engine::{
    ContextState, CpalInputDriver, Driver, InputDriver, OfflineDriver, OfflineRenderHandle,
    SyntheticInputDriver,
};
pub use daw_transport::{
    AudioArc, Clip, ClipId, ClipSource, EffectId, EffectInstance, EffectKind, LoopRegion,
    MusicalPosition, TimeContext, TimeSignature, TrackId, TrackState,
};
