//! Clips placed on track timelines and what has to sound when.

use std::collections::BTreeMap;

use daw_decode::{BufferCache, DecodeError, Lookup};
use daw_transport::{AudioArc, Clip, ClipId, ClipSource, TrackId};

use crate::EngineError;

/// Whether a clip's audio can be played right now.
#[derive(Debug, Clone)]
pub enum BufferState {
    Ready(AudioArc),
    /// Decode still running; try again later.
    Pending,
    Failed(DecodeError),
}

/// One clip due in a scheduling window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DueClip {
    pub clip: ClipId,
    pub track: TrackId,
    /// Absolute audio-clock time to start at.
    pub when: f64,
    /// Seconds into the clip's audio to start from.
    pub offset: f64,
    /// Timeline position the clip ends at.
    pub end: f64,
}

fn sanitize_start(start: f64) -> f64 {
    if start.is_finite() { start.max(0.0) } else { 0.0 }
}

/// Owns every placed clip, keyed by id, and resolves their audio through the
/// shared [`BufferCache`].
pub struct ClipScheduler {
    clips: BTreeMap<ClipId, Clip>,
    next_id: u64,
    cache: BufferCache,
}

impl ClipScheduler {
    pub fn new(cache: BufferCache) -> Self {
        Self {
            clips: BTreeMap::new(),
            next_id: 1,
            cache,
        }
    }

    pub fn cache(&self) -> &BufferCache {
        &self.cache
    }

    fn insert(
        &mut self,
        track: TrackId,
        start: f64,
        duration: f64,
        source: ClipSource,
        name: String,
    ) -> Result<ClipId, EngineError> {
        if !duration.is_finite() || duration <= 0.0 {
            return Err(EngineError::InvalidClip(format!("{name} has no duration")));
        }
        let id = ClipId(self.next_id);
        self.next_id += 1;
        self.clips.insert(
            id,
            Clip {
                id,
                track,
                start: sanitize_start(start),
                duration,
                source,
                name,
            },
        );
        Ok(id)
    }

    pub fn add_recorded(
        &mut self,
        track: TrackId,
        start: f64,
        audio: AudioArc,
        name: impl Into<String>,
    ) -> Result<ClipId, EngineError> {
        let duration = audio.duration_secs();
        self.insert(track, start, duration, ClipSource::Recorded(audio), name.into())
    }

    pub fn add_generated(
        &mut self,
        track: TrackId,
        start: f64,
        audio: AudioArc,
        name: impl Into<String>,
    ) -> Result<ClipId, EngineError> {
        let duration = audio.duration_secs();
        self.insert(track, start, duration, ClipSource::Generated(audio), name.into())
    }

    /// Place an uploaded file. Decoding starts in the background right away;
    /// `duration` is what the upload reported and is replaced by the decoded
    /// length once the buffer lands.
    pub fn add_uploaded(
        &mut self,
        track: TrackId,
        start: f64,
        url: impl Into<String>,
        duration: f64,
        name: impl Into<String>,
    ) -> Result<ClipId, EngineError> {
        let url = url.into();
        let id = self.insert(
            track,
            start,
            duration,
            ClipSource::Uploaded {
                url: url.clone(),
                buffer: None,
            },
            name.into(),
        )?;
        self.cache.request(&url);
        Ok(id)
    }

    pub fn clip(&self, id: ClipId) -> Option<&Clip> {
        self.clips.get(&id)
    }

    pub fn clips(&self) -> impl Iterator<Item = &Clip> {
        self.clips.values()
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    /// The track's clips ordered by start time.
    pub fn clips_for_track(&self, track: TrackId) -> Vec<&Clip> {
        let mut clips: Vec<&Clip> = self.clips.values().filter(|c| c.track == track).collect();
        clips.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.id.cmp(&b.id)));
        clips
    }

    /// Only the start changes; sounding sources keep playing until the next
    /// scheduling pass.
    pub fn move_clip(&mut self, id: ClipId, start: f64) -> Result<(), EngineError> {
        let clip = self.clips.get_mut(&id).ok_or(EngineError::UnknownClip(id))?;
        clip.start = sanitize_start(start);
        Ok(())
    }

    /// Remove the clip, evicting its decoded audio when no other clip uses
    /// the same URL.
    pub fn delete_clip(&mut self, id: ClipId) -> Result<Clip, EngineError> {
        let clip = self.clips.remove(&id).ok_or(EngineError::UnknownClip(id))?;
        if let Some(url) = clip.source.url()
            && !self.clips.values().any(|c| c.source.url() == Some(url))
        {
            self.cache.evict(url);
            log::debug!("evicted {url}");
        }
        Ok(clip)
    }

    /// Drop every clip on `track`.
    pub fn delete_track(&mut self, track: TrackId) -> usize {
        let ids: Vec<ClipId> = self
            .clips
            .values()
            .filter(|c| c.track == track)
            .map(|c| c.id)
            .collect();
        for id in &ids {
            if let Err(err) = self.delete_clip(*id) {
                log::debug!("deleting clips of {track}: {err}");
            }
        }
        ids.len()
    }

    /// Clips sounding anywhere in `[from, from + lookahead)`, in start order.
    /// `clock_origin` is the audio-clock time of timeline zero.
    pub fn schedule_due(&self, from: f64, lookahead: f64, clock_origin: f64) -> Vec<DueClip> {
        let to = from + lookahead.max(0.0);
        let mut due: Vec<(f64, DueClip)> = self
            .clips
            .values()
            .filter(|clip| clip.overlaps(from, to))
            .map(|clip| {
                (
                    clip.start,
                    DueClip {
                        clip: clip.id,
                        track: clip.track,
                        when: clock_origin + clip.start.max(from),
                        offset: (from - clip.start).max(0.0),
                        end: clip.end(),
                    },
                )
            })
            .collect();
        due.sort_by(|(a, x), (b, y)| a.total_cmp(b).then(x.clip.cmp(&y.clip)));
        due.into_iter().map(|(_, clip)| clip).collect()
    }

    /// The clip's audio, kicking off a decode if it has not been requested.
    /// A landed decode is stored on the clip.
    pub fn resolve(&mut self, id: ClipId) -> Result<BufferState, EngineError> {
        let clip = self.clips.get_mut(&id).ok_or(EngineError::UnknownClip(id))?;
        let (url, slot) = match &mut clip.source {
            ClipSource::Recorded(audio) | ClipSource::Generated(audio) => {
                return Ok(BufferState::Ready(audio.clone()));
            }
            ClipSource::Uploaded {
                buffer: Some(audio), ..
            } => return Ok(BufferState::Ready(audio.clone())),
            ClipSource::Uploaded { url, buffer } => (url.clone(), buffer),
        };
        Ok(match self.cache.request(&url) {
            Lookup::Ready(audio) => {
                *slot = Some(audio.clone());
                if audio.duration_secs() > 0.0 {
                    clip.duration = audio.duration_secs();
                }
                BufferState::Ready(audio)
            }
            Lookup::Pending => BufferState::Pending,
            Lookup::Failed(err) => {
                log::warn!(
                    "{}",
                    EngineError::DecodeFailure {
                        url: url.clone(),
                        source: err.clone(),
                    }
                );
                BufferState::Failed(err)
            }
        })
    }

    /// Latest timeline position any clip sounds at.
    pub fn project_end(&self) -> f64 {
        self.clips.values().map(Clip::end).fold(0.0, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use daw_decode::SourceFetcher;

    struct NothingFetcher;

    impl SourceFetcher for NothingFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, DecodeError> {
            Err(DecodeError::NotFound(url.to_string()))
        }
    }

    fn scheduler() -> ClipScheduler {
        ClipScheduler::new(BufferCache::new(Arc::new(NothingFetcher), 1000))
    }

    fn seconds(secs: f64) -> AudioArc {
        AudioArc::mono(vec![0.1; (secs * 1000.0) as usize], 1000)
    }

    #[test]
    fn test_schedule_due_offsets() {
        let mut clips = scheduler();
        let a = clips.add_generated(TrackId(1), 0.0, seconds(3.0), "a").unwrap();
        let b = clips.add_generated(TrackId(1), 4.0, seconds(3.0), "b").unwrap();
        let c = clips.add_generated(TrackId(2), 10.0, seconds(3.0), "c").unwrap();

        let due = clips.schedule_due(5.0, f64::INFINITY, 100.0);
        assert_eq!(due.len(), 2);
        assert!(due.iter().all(|d| d.clip != a));
        assert_eq!((due[0].clip, due[0].offset, due[0].when), (b, 1.0, 105.0));
        assert_eq!((due[1].clip, due[1].offset, due[1].when), (c, 0.0, 110.0));
    }

    #[test]
    fn test_schedule_due_window() {
        let mut clips = scheduler();
        clips.add_generated(TrackId(1), 0.0, seconds(2.0), "ends at 2").unwrap();
        let late = clips.add_generated(TrackId(1), 2.5, seconds(1.0), "late").unwrap();

        assert!(clips.schedule_due(2.0, 0.5, 0.0).is_empty());
        let due = clips.schedule_due(2.0, 0.6, 0.0);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].clip, late);
    }

    #[test]
    fn test_move_clip_only_changes_start() {
        let mut clips = scheduler();
        let id = clips.add_recorded(TrackId(3), 1.0, seconds(2.0), "take 1").unwrap();
        clips.move_clip(id, 7.5).unwrap();

        let listed = clips.clips_for_track(TrackId(3));
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].start, 7.5);
        assert_eq!(listed[0].duration, 2.0);
        assert_eq!(listed[0].name, "take 1");

        clips.move_clip(id, -3.0).unwrap();
        assert_eq!(clips.clip(id).unwrap().start, 0.0);
        clips.move_clip(id, f64::NAN).unwrap();
        assert_eq!(clips.clip(id).unwrap().start, 0.0);
        assert!(matches!(clips.move_clip(ClipId(99), 1.0), Err(EngineError::UnknownClip(_))));
    }

    #[test]
    fn test_clips_for_track_sorted() {
        let mut clips = scheduler();
        clips.add_generated(TrackId(1), 8.0, seconds(1.0), "c").unwrap();
        clips.add_generated(TrackId(1), 2.0, seconds(1.0), "a").unwrap();
        clips.add_generated(TrackId(2), 0.0, seconds(1.0), "other").unwrap();
        clips.add_generated(TrackId(1), 4.0, seconds(1.0), "b").unwrap();

        let names: Vec<_> = clips
            .clips_for_track(TrackId(1))
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_audio_is_rejected() {
        let mut clips = scheduler();
        let empty = AudioArc::mono(Vec::new(), 1000);
        assert!(matches!(
            clips.add_recorded(TrackId(1), 0.0, empty, "silence"),
            Err(EngineError::InvalidClip(_))
        ));
        assert!(clips.is_empty());
    }

    #[test]
    fn test_delete_evicts_last_referrer_only() {
        let mut clips = scheduler();
        clips.cache().insert("kick.wav", seconds(0.5));
        let first = clips.add_uploaded(TrackId(1), 0.0, "kick.wav", 0.5, "kick").unwrap();
        let second = clips.add_uploaded(TrackId(1), 1.0, "kick.wav", 0.5, "kick").unwrap();

        clips.delete_clip(first).unwrap();
        assert!(clips.cache().get("kick.wav").is_some());
        clips.delete_clip(second).unwrap();
        assert!(clips.cache().get("kick.wav").is_none());
        assert!(clips.delete_clip(second).is_err());
    }

    #[test]
    fn test_resolve_fills_uploaded_buffer() {
        let mut clips = scheduler();
        clips.cache().insert("loop.wav", seconds(1.5));
        let id = clips.add_uploaded(TrackId(1), 0.0, "loop.wav", 1.0, "loop").unwrap();

        assert!(matches!(clips.resolve(id).unwrap(), BufferState::Ready(_)));
        let clip = clips.clip(id).unwrap();
        assert!(clip.source.buffer().is_some());
        assert_eq!(clip.duration, 1.5);
    }

    #[test]
    fn test_resolve_missing_file_fails() {
        let mut clips = scheduler();
        let id = clips.add_uploaded(TrackId(1), 0.0, "gone.wav", 1.0, "gone").unwrap();
        clips.cache().wait("gone.wav", Duration::from_secs(5));
        assert!(matches!(
            clips.resolve(id).unwrap(),
            BufferState::Failed(DecodeError::NotFound(_))
        ));
        assert!(clips.clip(id).unwrap().source.buffer().is_none());
    }

    #[test]
    fn test_project_end() {
        let mut clips = scheduler();
        assert_eq!(clips.project_end(), 0.0);
        clips.add_generated(TrackId(1), 3.0, seconds(2.0), "a").unwrap();
        clips.add_generated(TrackId(2), 1.0, seconds(1.0), "b").unwrap();
        assert_eq!(clips.project_end(), 5.0);
    }
}
