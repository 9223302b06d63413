use parking_lot::RwLock;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info, warn};

use crate::{
    error::{BotError, Result},
    sources::Song,
};

static SHUFFLE_CALLS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Default)]
struct QueueState {
    current: Option<Song>,
    pending: VecDeque<Song>,
}

/// Per-guild song queue.
///
/// The guild's play loop is the only caller of [`MusicQueue::advance`] and
/// [`MusicQueue::finish_current`]; command handlers append, clear and
/// shuffle concurrently. The lock is never held across an await point.
#[derive(Debug)]
pub struct MusicQueue {
    inner: RwLock<QueueState>,
    max_size: usize,
}

impl MusicQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: RwLock::new(QueueState::default()),
            max_size,
        }
    }

    /// Appends songs in the order received. Returns how many were accepted.
    pub fn add(&self, songs: Vec<Song>) -> usize {
        if songs.is_empty() {
            return 0;
        }

        let mut q = self.inner.write();
        let available = self.max_size.saturating_sub(q.pending.len());
        let offered = songs.len();
        let accepted = offered.min(available);

        q.pending.extend(songs.into_iter().take(accepted));

        if accepted < offered {
            warn!(
                "⚠️ Queue full (max {} songs), dropped {} of {} songs",
                self.max_size,
                offered - accepted,
                offered
            );
        }
        info!("➕ Added {} songs to the queue", accepted);
        accepted
    }

    /// Removes and returns the first pending song.
    pub fn pop_front(&self) -> Result<Song> {
        self.inner.write().pending.pop_front().ok_or(BotError::EmptyQueue)
    }

    /// Pops the next song and marks it as current in one step.
    pub(crate) fn advance(&self) -> Result<Song> {
        let mut q = self.inner.write();
        let song = q.pending.pop_front().ok_or(BotError::EmptyQueue)?;
        debug!("➡️ Next in queue: {}", song.title());
        q.current = Some(song.clone());
        Ok(song)
    }

    pub(crate) fn finish_current(&self) -> Option<Song> {
        self.inner.write().current.take()
    }

    /// Drops every pending song. The current song is untouched.
    pub fn clear(&self) -> usize {
        let mut q = self.inner.write();
        let cleared = q.pending.len();
        q.pending.clear();
        info!("🗑️ Queue cleared: {} songs removed", cleared);
        cleared
    }

    /// Uniformly permutes the pending songs (Fisher-Yates).
    ///
    /// The generator is reseeded from the clock on every call.
    pub fn shuffle(&self) {
        let mut q = self.inner.write();
        if q.pending.len() < 2 {
            return;
        }

        let mut rng = StdRng::seed_from_u64(time_seed());
        q.pending.make_contiguous().shuffle(&mut rng);
        info!("🔀 Queue shuffled ({} songs)", q.pending.len());
    }

    pub fn current(&self) -> Option<Song> {
        self.inner.read().current.clone()
    }

    pub fn pending(&self) -> Vec<Song> {
        self.inner.read().pending.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().pending.is_empty()
    }

    /// Snapshot of the current song and the first `limit` pending songs.
    pub fn listing(&self, limit: usize) -> QueueListing {
        let q = self.inner.read();
        let total_duration = q.current.iter().chain(q.pending.iter()).map(Song::duration).sum::<f64>();

        QueueListing {
            current: q.current.clone(),
            upcoming: q.pending.iter().take(limit).cloned().collect(),
            total_pending: q.pending.len(),
            total_duration,
        }
    }
}

fn time_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    // Distinct seeds for calls landing on the same clock tick.
    let call = SHUFFLE_CALLS.fetch_add(1, Ordering::Relaxed);
    nanos ^ call.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueListing {
    pub current: Option<Song>,
    pub upcoming: Vec<Song>,
    pub total_pending: usize,
    /// Seconds, current song included.
    pub total_duration: f64,
}

impl QueueListing {
    /// Pending songs not included in `upcoming`.
    pub fn hidden(&self) -> usize {
        self.total_pending.saturating_sub(self.upcoming.len())
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.total_pending == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn song(id: &str) -> Song {
        Song::new(id, format!("Song {}", id), format!("https://cdn.example/{}", id)).with_duration(60.0)
    }

    fn ids(songs: &[Song]) -> Vec<String> {
        songs.iter().map(|s| s.id().to_string()).collect()
    }

    #[test]
    fn pops_in_append_order() {
        let queue = MusicQueue::new(100);
        queue.add(vec![song("a"), song("b")]);
        queue.add(vec![song("c")]);

        let popped: Vec<String> = std::iter::from_fn(|| queue.pop_front().ok())
            .map(|s| s.id().to_string())
            .collect();

        assert_eq!(popped, vec!["a", "b", "c"]);
        assert!(matches!(queue.pop_front(), Err(BotError::EmptyQueue)));
    }

    #[test]
    fn add_empty_is_noop() {
        let queue = MusicQueue::new(100);
        assert_eq!(queue.add(Vec::new()), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn add_respects_capacity() {
        let queue = MusicQueue::new(2);
        assert_eq!(queue.add(vec![song("a"), song("b"), song("c")]), 2);
        assert_eq!(ids(&queue.pending()), vec!["a", "b"]);
    }

    #[test]
    fn advance_moves_song_out_of_pending() {
        let queue = MusicQueue::new(100);
        queue.add(vec![song("a"), song("b")]);

        let current = queue.advance().unwrap();
        assert_eq!(current.id(), "a");
        assert_eq!(queue.current().map(|s| s.id().to_string()), Some("a".to_string()));
        assert_eq!(ids(&queue.pending()), vec!["b"]);

        assert_eq!(queue.finish_current().map(|s| s.id().to_string()), Some("a".to_string()));
        assert!(queue.current().is_none());
    }

    #[test]
    fn clear_keeps_current_and_allows_add() {
        let queue = MusicQueue::new(100);
        queue.add(vec![song("a"), song("b"), song("c")]);
        queue.advance().unwrap();

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.current().map(|s| s.id().to_string()), Some("a".to_string()));

        queue.add(vec![song("d")]);
        assert_eq!(ids(&queue.pending()), vec!["d"]);
    }

    #[test]
    fn shuffle_small_queues_is_noop() {
        let queue = MusicQueue::new(100);
        queue.shuffle();
        assert!(queue.is_empty());

        queue.add(vec![song("a")]);
        queue.shuffle();
        assert_eq!(ids(&queue.pending()), vec!["a"]);
    }

    #[test]
    fn shuffle_never_touches_current() {
        let queue = MusicQueue::new(100);
        queue.add((0..10).map(|i| song(&i.to_string())).collect());
        queue.advance().unwrap();

        for _ in 0..20 {
            queue.shuffle();
            assert_eq!(queue.current().map(|s| s.id().to_string()), Some("0".to_string()));
            assert_eq!(queue.len(), 9);
            assert!(!ids(&queue.pending()).contains(&"0".to_string()));
        }
    }

    #[test]
    fn shuffle_reaches_every_permutation_uniformly() {
        const RUNS: usize = 6000;
        let mut seen: HashMap<Vec<String>, usize> = HashMap::new();

        for _ in 0..RUNS {
            let queue = MusicQueue::new(100);
            queue.add(vec![song("a"), song("b"), song("c")]);
            queue.shuffle();
            *seen.entry(ids(&queue.pending())).or_default() += 1;
        }

        assert_eq!(seen.len(), 6, "all 3! orders should appear: {:?}", seen);
        let expected = RUNS / 6;
        for (order, count) in &seen {
            assert!(
                count.abs_diff(expected) < 200,
                "order {:?} seen {} times, expected about {}",
                order,
                count,
                expected
            );
        }
    }

    #[test]
    fn listing_limits_upcoming() {
        let queue = MusicQueue::new(100);
        queue.add((0..25).map(|i| song(&i.to_string())).collect());
        queue.advance().unwrap();

        let listing = queue.listing(20);
        assert_eq!(listing.current.as_ref().map(Song::id), Some("0"));
        assert_eq!(listing.upcoming.len(), 20);
        assert_eq!(listing.total_pending, 24);
        assert_eq!(listing.hidden(), 4);
        assert_eq!(listing.total_duration, 25.0 * 60.0);
    }
}
