//! # Track Queue
//!
//! Bounded FIFO of pending tracks. Positions exposed to callers are 1-based.

use std::collections::VecDeque;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PlaybackError, Result};
use crate::track::Track;

/// Result of [`TrackQueue::shuffle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShuffleOutcome {
    Shuffled,
    /// Fewer than two tracks; the queue is unchanged.
    NothingToShuffle,
}

/// Per-batch insertion report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub inserted: usize,
    pub skipped_too_long: usize,
    pub skipped_for_capacity: usize,
}

#[derive(Debug, Clone)]
pub struct TrackQueue {
    tracks: VecDeque<Track>,
    capacity: usize,
}

impl TrackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            tracks: VecDeque::new(),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tracks.len() >= self.capacity
    }

    /// Append a track. Returns its 1-based position.
    pub fn push(&mut self, track: Track) -> Result<usize> {
        if self.is_full() {
            return Err(PlaybackError::QueueFull {
                capacity: self.capacity,
            });
        }
        self.tracks.push_back(track);
        Ok(self.tracks.len())
    }

    pub fn pop_front(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    /// Remove the track at 1-based `position`.
    pub fn remove_at(&mut self, position: usize) -> Result<Track> {
        let index = self.index_of(position)?;
        self.tracks
            .remove(index)
            .ok_or(PlaybackError::InvalidIndex {
                index: position,
                len: self.tracks.len(),
            })
    }

    /// Move the track at `from` so that it ends up at `to` (both 1-based).
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<()> {
        let from_index = self.index_of(from)?;
        let to_index = self.index_of(to)?;
        if from_index == to_index {
            return Ok(());
        }

        if let Some(track) = self.tracks.remove(from_index) {
            self.tracks.insert(to_index, track);
        }
        Ok(())
    }

    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) -> ShuffleOutcome {
        if self.tracks.len() < 2 {
            return ShuffleOutcome::NothingToShuffle;
        }
        self.tracks.make_contiguous().shuffle(rng);
        ShuffleOutcome::Shuffled
    }

    /// Drop every pending track. Returns how many were removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.tracks.len();
        self.tracks.clear();
        removed
    }

    /// Append tracks in order, skipping any longer than `max_duration_secs`
    /// and stopping insertion once the queue is full.
    ///
    /// Zero-duration tracks are never skipped for length.
    pub fn extend_bounded<I>(&mut self, tracks: I, max_duration_secs: u64) -> BatchReport
    where
        I: IntoIterator<Item = Track>,
    {
        let mut report = BatchReport::default();
        for track in tracks {
            if track.duration_secs > max_duration_secs {
                report.skipped_too_long += 1;
            } else if self.is_full() {
                report.skipped_for_capacity += 1;
            } else {
                self.tracks.push_back(track);
                report.inserted += 1;
            }
        }
        report
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn snapshot(&self) -> Vec<Track> {
        self.tracks.iter().cloned().collect()
    }

    fn index_of(&self, position: usize) -> Result<usize> {
        if position == 0 || position > self.tracks.len() {
            return Err(PlaybackError::InvalidIndex {
                index: position,
                len: self.tracks.len(),
            });
        }
        Ok(position - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{Requester, TrackId};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn track(title: &str, duration_secs: u64) -> Track {
        Track {
            id: TrackId::new(),
            source_id: title.to_lowercase(),
            title: title.to_string(),
            duration_secs,
            uploader: "Uploader".to_string(),
            thumbnail_url: None,
            requester: Requester::new(1, "alice"),
            canonical_url: format!("https://www.youtube.com/watch?v={}", title),
            locator: None,
            origin_channel: None,
        }
    }

    fn titles(queue: &TrackQueue) -> Vec<String> {
        queue.iter().map(|t| t.title.clone()).collect()
    }

    #[test]
    fn test_push_reports_position() {
        let mut queue = TrackQueue::new(3);
        assert_eq!(queue.push(track("A", 10)).unwrap(), 1);
        assert_eq!(queue.push(track("B", 10)).unwrap(), 2);
    }

    #[test]
    fn test_push_rejects_when_full() {
        let mut queue = TrackQueue::new(1);
        queue.push(track("A", 10)).unwrap();
        let err = queue.push(track("B", 10)).unwrap_err();
        assert_eq!(err, PlaybackError::QueueFull { capacity: 1 });
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_remove_at_bounds() {
        let mut queue = TrackQueue::new(5);
        queue.push(track("A", 10)).unwrap();
        queue.push(track("B", 10)).unwrap();

        assert!(matches!(
            queue.remove_at(0),
            Err(PlaybackError::InvalidIndex { index: 0, len: 2 })
        ));
        assert!(matches!(
            queue.remove_at(3),
            Err(PlaybackError::InvalidIndex { index: 3, len: 2 })
        ));

        let removed = queue.remove_at(2).unwrap();
        assert_eq!(removed.title, "B");
        assert_eq!(titles(&queue), vec!["A"]);
    }

    #[test]
    fn test_move_track() {
        let mut queue = TrackQueue::new(5);
        for title in ["A", "B", "C", "D"] {
            queue.push(track(title, 10)).unwrap();
        }

        queue.move_track(1, 3).unwrap();
        assert_eq!(titles(&queue), vec!["B", "C", "A", "D"]);

        queue.move_track(4, 1).unwrap();
        assert_eq!(titles(&queue), vec!["D", "B", "C", "A"]);

        assert!(queue.move_track(1, 5).is_err());
        assert_eq!(titles(&queue), vec!["D", "B", "C", "A"]);
    }

    #[test]
    fn test_shuffle_small_queue_is_noop() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut queue = TrackQueue::new(5);
        assert_eq!(queue.shuffle(&mut rng), ShuffleOutcome::NothingToShuffle);
        queue.push(track("A", 10)).unwrap();
        assert_eq!(queue.shuffle(&mut rng), ShuffleOutcome::NothingToShuffle);
    }

    #[test]
    fn test_extend_bounded_counts() {
        let mut queue = TrackQueue::new(2);
        let report = queue.extend_bounded(
            vec![
                track("Short", 100),
                track("Long", 5000),
                track("Live", 0),
                track("Overflow", 100),
            ],
            3600,
        );

        assert_eq!(
            report,
            BatchReport {
                inserted: 2,
                skipped_too_long: 1,
                skipped_for_capacity: 1,
            }
        );
        assert_eq!(titles(&queue), vec!["Short", "Live"]);
    }

    #[test]
    fn test_clear_returns_count() {
        let mut queue = TrackQueue::new(5);
        queue.push(track("A", 10)).unwrap();
        queue.push(track("B", 10)).unwrap();
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }
}
