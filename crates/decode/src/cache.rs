use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use daw_transport::AudioArc;

use crate::{DecodeError, SourceFetcher, decode_at_rate, extension_of};

#[derive(Debug, Clone)]
pub enum Lookup {
    Ready(AudioArc),
    Pending,
    Failed(DecodeError),
}

enum Slot {
    /// Decode in flight; the generation guards against a stale decode
    /// landing after an evict and re-request.
    Pending(u64),
    Ready(AudioArc),
    Failed(DecodeError),
}

impl Slot {
    fn lookup(&self) -> Lookup {
        match self {
            Slot::Pending(_) => Lookup::Pending,
            Slot::Ready(audio) => Lookup::Ready(audio.clone()),
            Slot::Failed(err) => Lookup::Failed(err.clone()),
        }
    }
}

struct Inner {
    slots: Mutex<HashMap<String, Slot>>,
    settled: Condvar,
    fetcher: Arc<dyn SourceFetcher>,
    sample_rate: u32,
    generation: AtomicUsize,
    decodes: AtomicUsize,
}

/// Decoded audio keyed by source URL, shared by every clip that uses it.
///
/// Requests are single-flight: the first request for a URL starts one
/// background decode on the rayon pool and every later request sees it as
/// pending until it lands. Nothing here blocks unless [`BufferCache::wait`]
/// is called.
#[derive(Clone)]
pub struct BufferCache {
    inner: Arc<Inner>,
}

impl BufferCache {
    pub fn new(fetcher: Arc<dyn SourceFetcher>, sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(HashMap::new()),
                settled: Condvar::new(),
                fetcher,
                sample_rate,
                generation: AtomicUsize::new(0),
                decodes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        match self.inner.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current state for `url`, starting a decode if there is none.
    pub fn request(&self, url: &str) -> Lookup {
        let mut slots = self.slots();
        if let Some(slot) = slots.get(url) {
            return slot.lookup();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) as u64;
        slots.insert(url.to_string(), Slot::Pending(generation));
        drop(slots);

        self.inner.decodes.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let url = url.to_string();
        rayon::spawn(move || {
            let result = inner
                .fetcher
                .fetch(&url)
                .and_then(|bytes| decode_at_rate(bytes, extension_of(&url), inner.sample_rate));

            let mut slots = match inner.slots.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            match slots.get(&url) {
                Some(Slot::Pending(current)) if *current == generation => {
                    let slot = match result {
                        Ok(audio) => {
                            log::debug!("decoded {url}: {audio:?}");
                            Slot::Ready(audio)
                        }
                        Err(err) => {
                            log::warn!("decode of {url} failed: {err}");
                            Slot::Failed(err)
                        }
                    };
                    slots.insert(url, slot);
                }
                _ => log::debug!("discarding decode of evicted {url}"),
            }
            drop(slots);
            inner.settled.notify_all();
        });

        Lookup::Pending
    }

    /// Current state for `url` without starting anything.
    pub fn get(&self, url: &str) -> Option<Lookup> {
        self.slots().get(url).map(Slot::lookup)
    }

    /// Store audio that is already decoded.
    pub fn insert(&self, url: &str, audio: AudioArc) {
        self.slots().insert(url.to_string(), Slot::Ready(audio));
        self.inner.settled.notify_all();
    }

    /// Request `url` and block until it settles or `timeout` passes.
    pub fn wait(&self, url: &str, timeout: Duration) -> Lookup {
        let deadline = Instant::now() + timeout;
        let mut lookup = self.request(url);
        let mut slots = self.slots();
        while matches!(lookup, Lookup::Pending) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            slots = match self.inner.settled.wait_timeout(slots, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
            lookup = match slots.get(url) {
                Some(slot) => slot.lookup(),
                None => break,
            };
        }
        lookup
    }

    /// Forget `url`. Returns whether anything was cached.
    pub fn evict(&self, url: &str) -> bool {
        self.slots().remove(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of decodes started so far.
    pub fn decodes_started(&self) -> usize {
        self.inner.decodes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FileFetcher;
    use crate::test_support::write_wav;

    const WAIT: Duration = Duration::from_secs(10);

    fn cache_with_file(frames: usize) -> (tempfile::TempDir, BufferCache, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        write_wav(&path, frames, 1, 48000);
        let cache = BufferCache::new(Arc::new(FileFetcher::new(dir.path())), 48000);
        (dir, cache, "take.wav".to_string())
    }

    #[test]
    fn test_concurrent_requests_decode_once() {
        let (_dir, cache, url) = cache_with_file(4800);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let url = url.clone();
                std::thread::spawn(move || cache.wait(&url, WAIT))
            })
            .collect();
        for handle in handles {
            match handle.join().unwrap() {
                Lookup::Ready(audio) => assert_eq!(audio.frames(), 4800),
                other => panic!("expected ready, got {other:?}"),
            }
        }
        assert_eq!(cache.decodes_started(), 1);

        assert!(matches!(cache.request(&url), Lookup::Ready(_)));
        assert_eq!(cache.decodes_started(), 1);
    }

    #[test]
    fn test_missing_source_fails_without_retry() {
        let (_dir, cache, _) = cache_with_file(10);
        let lookup = cache.wait("nope.wav", WAIT);
        assert!(matches!(lookup, Lookup::Failed(DecodeError::NotFound(_))));
        assert!(matches!(cache.request("nope.wav"), Lookup::Failed(_)));
        assert_eq!(cache.decodes_started(), 1);
    }

    #[test]
    fn test_evict_then_request_decodes_again() {
        let (_dir, cache, url) = cache_with_file(100);
        assert!(matches!(cache.wait(&url, WAIT), Lookup::Ready(_)));
        assert!(cache.evict(&url));
        assert!(!cache.evict(&url));
        assert!(cache.get(&url).is_none());

        assert!(matches!(cache.wait(&url, WAIT), Lookup::Ready(_)));
        assert_eq!(cache.decodes_started(), 2);
    }

    #[test]
    fn test_insert_is_ready_immediately() {
        let cache = BufferCache::new(Arc::new(FileFetcher::default()), 44100);
        cache.insert("generated://kick", AudioArc::mono(vec![0.0; 10], 44100));
        assert!(matches!(cache.request("generated://kick"), Lookup::Ready(_)));
        assert_eq!(cache.decodes_started(), 0);
        assert_eq!(cache.len(), 1);
    }
}
