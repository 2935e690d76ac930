use crate::{AudioArc, TrackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipId(pub u64);

impl std::fmt::Display for ClipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "clip-{}", self.0)
    }
}

/// Where a clip's audio comes from.
#[derive(Debug, Clone)]
pub enum ClipSource {
    /// Captured from the input device; always decoded.
    Recorded(AudioArc),
    /// Uploaded file. The buffer is filled in lazily once the decode for
    /// `url` completes.
    Uploaded { url: String, buffer: Option<AudioArc> },
    /// Procedurally generated (demo patterns, built-in samples).
    Generated(AudioArc),
}

impl ClipSource {
    /// The decoded audio, if it is available yet.
    pub fn buffer(&self) -> Option<&AudioArc> {
        match self {
            ClipSource::Recorded(audio) | ClipSource::Generated(audio) => Some(audio),
            ClipSource::Uploaded { buffer, .. } => buffer.as_ref(),
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ClipSource::Uploaded { url, .. } => Some(url),
            _ => None,
        }
    }
}

/// A placed, time-bounded sound on one track's timeline. Times are seconds
/// relative to the transport origin.
#[derive(Debug, Clone)]
pub struct Clip {
    pub id: ClipId,
    pub track: TrackId,
    pub start: f64,
    pub duration: f64,
    pub source: ClipSource,
    pub name: String,
}

impl Clip {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    /// Whether `[start, end)` intersects `[from, to)`.
    pub fn overlaps(&self, from: f64, to: f64) -> bool {
        self.start < to && self.end() > from
    }
}
