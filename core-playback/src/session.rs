//! # Session State
//!
//! The queue, now-playing slot and modes of one session, with the state
//! transitions that do not need I/O. [`SessionPlayer`](crate::player::SessionPlayer)
//! owns a `Session` and performs the transcoder calls around it.

use std::fmt;

use core_runtime::config::PlaybackPolicy;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PlaybackError, Result};
use crate::queue::TrackQueue;
use crate::track::{SessionId, Track};

/// Playback status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// What to do after a failed acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back off and advance again. `attempt` is the failure count so far.
    Retry { attempt: u32 },
    /// The retry budget is spent; the session is now idle.
    GiveUp { attempt: u32 },
}

/// Point-in-time copy of a session, for presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: PlaybackState,
    pub current: Option<Track>,
    pub queue: Vec<Track>,
    pub repeat: bool,
    pub shuffle: bool,
    pub volume: f32,
    pub retry_counter: u32,
    /// A track is being acquired or a retry backoff is pending
    pub advancing: bool,
}

#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    queue: TrackQueue,
    current: Option<Track>,
    state: PlaybackState,
    repeat: bool,
    shuffle: bool,
    volume: f32,
    retry_counter: u32,
    max_retries: u32,
    max_volume_percent: u32,
}

impl Session {
    pub fn new(id: SessionId, policy: &PlaybackPolicy) -> Self {
        Self {
            id,
            queue: TrackQueue::new(policy.max_queue_size),
            current: None,
            state: PlaybackState::Idle,
            repeat: false,
            shuffle: false,
            volume: policy.default_volume,
            retry_counter: 0,
            max_retries: policy.max_retries,
            max_volume_percent: policy.max_volume_percent,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut TrackQueue {
        &mut self.queue
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn set_repeat(&mut self, enabled: bool) {
        self.repeat = enabled;
    }

    pub fn shuffle(&self) -> bool {
        self.shuffle
    }

    pub fn set_shuffle(&mut self, enabled: bool) {
        self.shuffle = enabled;
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn retry_counter(&self) -> u32 {
        self.retry_counter
    }

    /// Nothing is playing or about to play.
    pub fn is_vacant(&self) -> bool {
        self.state == PlaybackState::Idle && self.current.is_none()
    }

    /// Pick the track the next advance should acquire.
    ///
    /// With repeat on, the current track is re-selected and the queue is not
    /// touched. Otherwise the head is popped, after shuffling the queue when
    /// shuffle mode is on. An empty queue leaves the session idle and returns
    /// `None`.
    pub fn select_next<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Track> {
        if self.repeat {
            if let Some(current) = &self.current {
                return Some(current.clone());
            }
        }

        if self.shuffle {
            self.queue.shuffle(rng);
        }

        match self.queue.pop_front() {
            Some(track) => {
                self.current = Some(track.clone());
                Some(track)
            }
            None => {
                self.go_idle();
                None
            }
        }
    }

    /// A track started producing audio.
    ///
    /// `track` replaces the current slot since acquisition may have
    /// refreshed its locator.
    pub fn start_playing(&mut self, track: Track) {
        self.current = Some(track);
        self.state = PlaybackState::Playing;
        self.retry_counter = 0;
    }

    pub fn record_failure(&mut self) -> RetryDecision {
        self.retry_counter += 1;
        let attempt = self.retry_counter;
        if attempt < self.max_retries {
            RetryDecision::Retry { attempt }
        } else {
            self.go_idle();
            RetryDecision::GiveUp { attempt }
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require(PlaybackState::Playing, "pause")?;
        self.state = PlaybackState::Paused;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.require(PlaybackState::Paused, "resume")?;
        self.state = PlaybackState::Playing;
        Ok(())
    }

    /// Fails with `InvalidState` unless the session is in `expected`.
    pub fn require(&self, expected: PlaybackState, operation: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PlaybackError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    /// Set the volume from a user-facing percentage. Returns the linear gain.
    pub fn set_volume_percent(&mut self, percent: u32) -> Result<f32> {
        if percent > self.max_volume_percent {
            return Err(PlaybackError::InvalidVolume {
                percent,
                max: self.max_volume_percent,
            });
        }
        self.volume = percent as f32 / 100.0;
        Ok(self.volume)
    }

    /// Clear the queue and the current track and go idle.
    ///
    /// Returns how many queued tracks were dropped.
    pub fn reset(&mut self) -> usize {
        let removed = self.queue.clear();
        self.go_idle();
        removed
    }

    pub fn snapshot(&self, advancing: bool) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            state: self.state,
            current: self.current.clone(),
            queue: self.queue.snapshot(),
            repeat: self.repeat,
            shuffle: self.shuffle,
            volume: self.volume,
            retry_counter: self.retry_counter,
            advancing,
        }
    }

    fn go_idle(&mut self) {
        self.current = None;
        self.state = PlaybackState::Idle;
        self.retry_counter = 0;
    }
}
