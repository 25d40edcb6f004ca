//! Property-based tests for queue operations and session advancing.

use core_playback::{
    PlaybackError, Requester, Session, SessionId, ShuffleOutcome, Track, TrackId, TrackQueue,
};
use core_runtime::config::PlaybackPolicy;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;

// ===== Helpers =====

fn arbitrary_track() -> impl Strategy<Value = Track> {
    ("[A-Za-z ]{1,30}", 0u64..10_000).prop_map(|(title, duration_secs)| Track {
        id: TrackId::new(),
        source_id: title.to_lowercase(),
        title: title.clone(),
        duration_secs,
        uploader: "Uploader".to_string(),
        thumbnail_url: None,
        requester: Requester::new(1, "alice"),
        canonical_url: format!("https://www.youtube.com/watch?v={}", title),
        locator: None,
        origin_channel: None,
    })
}

fn arbitrary_tracks(max: usize) -> impl Strategy<Value = Vec<Track>> {
    prop::collection::vec(arbitrary_track(), 0..max)
}

fn ids<'a>(tracks: impl Iterator<Item = &'a Track>) -> Vec<TrackId> {
    tracks.map(|t| t.id).collect()
}

fn id_set<'a>(tracks: impl Iterator<Item = &'a Track>) -> HashSet<TrackId> {
    tracks.map(|t| t.id).collect()
}

// ===== Property Tests =====

proptest! {
    /// Successful pushes are counted exactly; the first push past capacity
    /// fails and leaves the queue unchanged.
    #[test]
    fn push_respects_capacity(capacity in 1usize..30, tracks in arbitrary_tracks(40)) {
        let mut queue = TrackQueue::new(capacity);
        let mut accepted = 0;

        for track in tracks {
            let before = ids(queue.iter());
            match queue.push(track) {
                Ok(position) => {
                    accepted += 1;
                    prop_assert_eq!(position, accepted);
                }
                Err(PlaybackError::QueueFull { capacity: reported }) => {
                    prop_assert_eq!(reported, capacity);
                    prop_assert_eq!(ids(queue.iter()), before);
                }
                Err(other) => prop_assert!(false, "unexpected error: {other}"),
            }
        }

        prop_assert_eq!(queue.len(), accepted);
        prop_assert!(queue.len() <= capacity);
    }

    /// An out-of-range removal never mutates the queue.
    #[test]
    fn remove_out_of_range_is_atomic(tracks in arbitrary_tracks(20), extra in 1usize..5) {
        let mut queue = TrackQueue::new(100);
        for track in tracks {
            queue.push(track).unwrap();
        }
        let before = ids(queue.iter());
        let len = queue.len();

        let result = queue.remove_at(len + extra);
        prop_assert!(
            matches!(result, Err(PlaybackError::InvalidIndex { .. })),
            "out-of-range removal must fail"
        );
        prop_assert!(queue.remove_at(0).is_err());
        prop_assert_eq!(ids(queue.iter()), before);
    }

    /// Moves preserve length and membership.
    #[test]
    fn move_preserves_multiset(
        tracks in arbitrary_tracks(20),
        moves in prop::collection::vec((0usize..25, 0usize..25), 1..20)
    ) {
        let mut queue = TrackQueue::new(100);
        for track in tracks {
            queue.push(track).unwrap();
        }
        let members = id_set(queue.iter());
        let len = queue.len();

        for (from, to) in moves {
            let before = ids(queue.iter());
            if queue.move_track(from, to).is_err() {
                prop_assert_eq!(ids(queue.iter()), before);
            }
            prop_assert_eq!(queue.len(), len);
            prop_assert_eq!(id_set(queue.iter()), members.clone());
        }
    }

    /// Shuffling permutes; it never drops or duplicates.
    #[test]
    fn shuffle_is_a_permutation(tracks in arbitrary_tracks(30), seed in any::<u64>()) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut queue = TrackQueue::new(100);
        for track in tracks {
            queue.push(track).unwrap();
        }
        let members = id_set(queue.iter());
        let len = queue.len();

        let outcome = queue.shuffle(&mut rng);
        if len < 2 {
            prop_assert_eq!(outcome, ShuffleOutcome::NothingToShuffle);
        } else {
            prop_assert_eq!(outcome, ShuffleOutcome::Shuffled);
        }
        prop_assert_eq!(queue.len(), len);
        prop_assert_eq!(id_set(queue.iter()), members);
    }

    /// Batch insertion accounts for every candidate exactly once.
    #[test]
    fn batch_report_accounts_for_every_track(
        capacity in 1usize..30,
        preloaded in arbitrary_tracks(10),
        batch in arbitrary_tracks(60),
        max_secs in 1u64..10_000
    ) {
        let mut queue = TrackQueue::new(capacity);
        for track in preloaded {
            let _ = queue.push(track);
        }
        let before = queue.len();
        let candidates = batch.len();
        let too_long = batch.iter().filter(|t| t.duration_secs > max_secs).count();

        let report = queue.extend_bounded(batch, max_secs);

        prop_assert_eq!(
            report.inserted + report.skipped_too_long + report.skipped_for_capacity,
            candidates
        );
        prop_assert_eq!(report.skipped_too_long, too_long);
        prop_assert_eq!(queue.len(), before + report.inserted);
        prop_assert!(queue.len() <= capacity);
        prop_assert!(queue.iter().skip(before).all(|t| t.duration_secs <= max_secs));
    }

    /// With shuffle on, advancing only ever removes the selected head.
    #[test]
    fn shuffle_mode_advance_keeps_remaining_tracks(
        tracks in arbitrary_tracks(20),
        advances in 1usize..25,
        seed in any::<u64>()
    ) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut session = Session::new(SessionId(1), &PlaybackPolicy::default());
        for track in tracks {
            session.queue_mut().push(track).unwrap();
        }
        session.set_shuffle(true);
        let mut remaining = id_set(session.queue().iter());

        for _ in 0..advances {
            match session.select_next(&mut rng) {
                Some(selected) => {
                    prop_assert!(remaining.remove(&selected.id));
                }
                None => prop_assert!(remaining.is_empty()),
            }
            prop_assert_eq!(id_set(session.queue().iter()), remaining.clone());
        }
    }

    /// With repeat on and a current track, advancing never consumes the queue.
    #[test]
    fn repeat_mode_never_consumes_queue(
        first in arbitrary_track(),
        tracks in arbitrary_tracks(20),
        advances in 1usize..25
    ) {
        let mut rng = StdRng::seed_from_u64(0);
        let mut session = Session::new(SessionId(1), &PlaybackPolicy::default());
        session.start_playing(first.clone());
        for track in tracks {
            session.queue_mut().push(track).unwrap();
        }
        session.set_repeat(true);
        let queued = ids(session.queue().iter());

        for _ in 0..advances {
            let selected = session.select_next(&mut rng);
            prop_assert_eq!(selected.map(|t| t.id), Some(first.id));
            prop_assert_eq!(ids(session.queue().iter()), queued.clone());
        }
    }
}
