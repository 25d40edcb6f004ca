//! # Session Player
//!
//! One actor task per session. Every command, transcoder completion and
//! acquisition result arrives as a [`SessionCommand`] on the session's
//! channel and is handled to completion before the next one, so session
//! state is never touched from two places at once.
//!
//! ## Advancing
//!
//! An advance selects the next track and spawns its acquisition. While that
//! is in flight (or while a retry backoff is pending) the actor keeps
//! serving queue edits and `stop`, but defers `skip`, `pause`, `resume` and
//! `set_volume` until the advance settles. Each advance carries a
//! generation number; `stop` bumps it, so results of cancelled work are
//! recognised as stale and discarded.
//!
//! ## Request tickets
//!
//! Callers that resolve a query before enqueueing take a [`RequestTicket`]
//! first. Every `stop` starts a new epoch; an enqueue carrying a ticket from
//! an earlier epoch is rejected with [`PlaybackError::Cancelled`], so a
//! resolution that outlives a `stop` never repopulates the session. Commands
//! still deferred when a `stop` lands get the same error.

use std::collections::VecDeque;
use std::sync::Arc;

use bridge_traits::{BridgeError, CompletionCallback, OutputCompletion, OutputHandle, Transcoder};
use core_runtime::config::PlaybackPolicy;
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent, QueueEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::acquirer::StreamAcquirer;
use crate::error::{AcquisitionError, PlaybackError, Result};
use crate::queue::{BatchReport, ShuffleOutcome};
use crate::session::{PlaybackState, RetryDecision, Session, SessionSnapshot};
use crate::track::{SessionId, Track};

type Reply<T> = oneshot::Sender<T>;

/// Result of a single enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueOutcome {
    /// 1-based queue position
    pub position: usize,
    /// The session was idle and this enqueue started an advance
    pub started: bool,
}

/// Result of a batch enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub report: BatchReport,
    pub started: bool,
}

/// Epoch marker taken before slow work whose result will be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestTicket {
    epoch: u64,
}

/// Shared collaborators of every session actor.
#[derive(Clone)]
pub struct SessionContext {
    pub acquirer: Arc<StreamAcquirer>,
    pub transcoder: Arc<dyn Transcoder>,
    pub events: EventBus,
    pub policy: PlaybackPolicy,
}

pub(crate) enum SessionCommand {
    BeginRequest {
        reply: Reply<RequestTicket>,
    },
    Enqueue {
        track: Track,
        ticket: Option<RequestTicket>,
        reply: Reply<Result<EnqueueOutcome>>,
    },
    EnqueueBatch {
        tracks: Vec<Track>,
        ticket: Option<RequestTicket>,
        reply: Reply<Result<BatchOutcome>>,
    },
    Pause {
        reply: Reply<Result<()>>,
    },
    Resume {
        reply: Reply<Result<()>>,
    },
    Skip {
        reply: Reply<Result<()>>,
    },
    Stop {
        reply: Reply<()>,
    },
    SetVolume {
        percent: u32,
        reply: Reply<Result<f32>>,
    },
    /// `None` toggles
    SetRepeat {
        enabled: Option<bool>,
        reply: Reply<bool>,
    },
    /// `None` toggles
    SetShuffle {
        enabled: Option<bool>,
        reply: Reply<bool>,
    },
    RemoveAt {
        position: usize,
        reply: Reply<Result<Track>>,
    },
    Move {
        from: usize,
        to: usize,
        reply: Reply<Result<()>>,
    },
    Shuffle {
        reply: Reply<ShuffleOutcome>,
    },
    Clear {
        reply: Reply<usize>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
    Shutdown {
        reply: Reply<()>,
    },

    // Internal
    OutputEnded(OutputCompletion),
    AcquisitionSettled {
        generation: u64,
        track: Track,
        result: std::result::Result<OutputHandle, AcquisitionError>,
    },
    RetryAdvance {
        generation: u64,
    },
}

impl SessionCommand {
    /// Commands that must wait for an in-flight advance to settle.
    fn is_deferrable(&self) -> bool {
        matches!(
            self,
            SessionCommand::Pause { .. }
                | SessionCommand::Resume { .. }
                | SessionCommand::Skip { .. }
                | SessionCommand::SetVolume { .. }
        )
    }

    /// Answer a deferred command that a `stop` overtook.
    fn cancel(self) {
        match self {
            SessionCommand::Pause { reply }
            | SessionCommand::Resume { reply }
            | SessionCommand::Skip { reply } => {
                let _ = reply.send(Err(PlaybackError::Cancelled));
            }
            SessionCommand::SetVolume { reply, .. } => {
                let _ = reply.send(Err(PlaybackError::Cancelled));
            }
            _ => {}
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Cloneable address of a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Mark the start of a request whose result will be enqueued later.
    pub async fn begin_request(&self) -> Result<RequestTicket> {
        self.request(|reply| SessionCommand::BeginRequest { reply })
            .await
    }

    pub async fn enqueue(&self, track: Track) -> Result<EnqueueOutcome> {
        self.request(|reply| SessionCommand::Enqueue {
            track,
            ticket: None,
            reply,
        })
        .await?
    }

    /// Enqueue unless the session was stopped since `ticket` was taken.
    pub async fn enqueue_with_ticket(
        &self,
        ticket: RequestTicket,
        track: Track,
    ) -> Result<EnqueueOutcome> {
        self.request(|reply| SessionCommand::Enqueue {
            track,
            ticket: Some(ticket),
            reply,
        })
        .await?
    }

    pub async fn enqueue_batch(&self, tracks: Vec<Track>) -> Result<BatchOutcome> {
        self.request(|reply| SessionCommand::EnqueueBatch {
            tracks,
            ticket: None,
            reply,
        })
        .await?
    }

    pub async fn enqueue_batch_with_ticket(
        &self,
        ticket: RequestTicket,
        tracks: Vec<Track>,
    ) -> Result<BatchOutcome> {
        self.request(|reply| SessionCommand::EnqueueBatch {
            tracks,
            ticket: Some(ticket),
            reply,
        })
        .await?
    }

    pub async fn pause(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Resume { reply }).await?
    }

    pub async fn skip(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Skip { reply }).await?
    }

    pub async fn stop(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    /// Returns the applied linear volume.
    pub async fn set_volume(&self, percent: u32) -> Result<f32> {
        self.request(|reply| SessionCommand::SetVolume { percent, reply })
            .await?
    }

    /// `None` toggles. Returns the new mode.
    pub async fn set_repeat(&self, enabled: Option<bool>) -> Result<bool> {
        self.request(|reply| SessionCommand::SetRepeat { enabled, reply })
            .await
    }

    /// `None` toggles. Returns the new mode.
    pub async fn set_shuffle(&self, enabled: Option<bool>) -> Result<bool> {
        self.request(|reply| SessionCommand::SetShuffle { enabled, reply })
            .await
    }

    pub async fn remove_at(&self, position: usize) -> Result<Track> {
        self.request(|reply| SessionCommand::RemoveAt { position, reply })
            .await?
    }

    pub async fn move_track(&self, from: usize, to: usize) -> Result<()> {
        self.request(|reply| SessionCommand::Move { from, to, reply })
            .await?
    }

    pub async fn shuffle(&self) -> Result<ShuffleOutcome> {
        self.request(|reply| SessionCommand::Shuffle { reply }).await
    }

    pub async fn clear(&self) -> Result<usize> {
        self.request(|reply| SessionCommand::Clear { reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Stop playback and end the actor.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| SessionCommand::Shutdown { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> SessionCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| PlaybackError::SessionClosed(self.id))?;
        response
            .await
            .map_err(|_| PlaybackError::SessionClosed(self.id))
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Actor
// ============================================================================

struct InFlight {
    generation: u64,
    cancel: CancellationToken,
}

pub struct SessionPlayer {
    session: Session,
    context: SessionContext,
    weak_tx: mpsc::WeakUnboundedSender<SessionCommand>,
    output: Option<OutputHandle>,
    in_flight: Option<InFlight>,
    generation: u64,
    /// Bumped by every `stop`; tickets from older epochs are stale
    epoch: u64,
    deferred: VecDeque<SessionCommand>,
    /// Completions that arrived before their acquisition settled
    early_ends: Vec<OutputHandle>,
}

impl SessionPlayer {
    /// Spawn the actor for `id` on the current runtime.
    pub fn spawn(id: SessionId, context: SessionContext) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let player = SessionPlayer {
            session: Session::new(id, &context.policy),
            context,
            weak_tx: tx.downgrade(),
            output: None,
            in_flight: None,
            generation: 0,
            epoch: 0,
            deferred: VecDeque::new(),
            early_ends: Vec::new(),
        };

        let span = info_span!("session", session_id = id.0);
        tokio::spawn(player.run(rx).instrument(span));

        SessionHandle { id, tx }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>) {
        debug!("Session started");
        loop {
            let command = match self.next_deferred() {
                Some(command) => command,
                None => match rx.recv().await {
                    Some(command) => command,
                    None => break,
                },
            };

            if self.in_flight.is_some() && command.is_deferrable() {
                self.deferred.push_back(command);
                continue;
            }

            if !self.handle(command).await {
                break;
            }
        }

        self.halt().await;
        debug!("Session ended");
    }

    fn next_deferred(&mut self) -> Option<SessionCommand> {
        if self.in_flight.is_none() {
            self.deferred.pop_front()
        } else {
            None
        }
    }

    /// Returns `false` when the actor should exit.
    async fn handle(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::BeginRequest { reply } => {
                let _ = reply.send(RequestTicket { epoch: self.epoch });
            }
            SessionCommand::Enqueue {
                track,
                ticket,
                reply,
            } => {
                let result = self
                    .check_ticket(ticket)
                    .and_then(|()| self.enqueue(track));
                let _ = reply.send(result);
            }
            SessionCommand::EnqueueBatch {
                tracks,
                ticket,
                reply,
            } => {
                let result = self
                    .check_ticket(ticket)
                    .map(|()| self.enqueue_batch(tracks));
                let _ = reply.send(result);
            }
            SessionCommand::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            SessionCommand::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            SessionCommand::Skip { reply } => {
                let _ = reply.send(self.skip().await);
            }
            SessionCommand::Stop { reply } => {
                self.halt().await;
                self.emit(PlaybackEvent::Stopped {
                    session_id: self.id(),
                });
                let _ = reply.send(());
            }
            SessionCommand::SetVolume { percent, reply } => {
                let _ = reply.send(self.set_volume(percent).await);
            }
            SessionCommand::SetRepeat { enabled, reply } => {
                let enabled = enabled.unwrap_or(!self.session.repeat());
                self.session.set_repeat(enabled);
                let _ = reply.send(enabled);
            }
            SessionCommand::SetShuffle { enabled, reply } => {
                let enabled = enabled.unwrap_or(!self.session.shuffle());
                self.session.set_shuffle(enabled);
                let _ = reply.send(enabled);
            }
            SessionCommand::RemoveAt { position, reply } => {
                let result = self.session.queue_mut().remove_at(position);
                if let Ok(track) = &result {
                    self.emit_queue(QueueEvent::Removed {
                        session_id: self.id(),
                        title: track.title.clone(),
                        position,
                    });
                }
                let _ = reply.send(result);
            }
            SessionCommand::Move { from, to, reply } => {
                let result = self.session.queue_mut().move_track(from, to);
                if result.is_ok() {
                    self.emit_queue(QueueEvent::Moved {
                        session_id: self.id(),
                        from,
                        to,
                    });
                }
                let _ = reply.send(result);
            }
            SessionCommand::Shuffle { reply } => {
                let outcome = self.session.queue_mut().shuffle(&mut rand::thread_rng());
                if outcome == ShuffleOutcome::Shuffled {
                    self.emit_queue(QueueEvent::Shuffled {
                        session_id: self.id(),
                    });
                }
                let _ = reply.send(outcome);
            }
            SessionCommand::Clear { reply } => {
                let removed = self.session.queue_mut().clear();
                self.emit_queue(QueueEvent::Cleared {
                    session_id: self.id(),
                    removed,
                });
                let _ = reply.send(removed);
            }
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(self.session.snapshot(self.in_flight.is_some()));
            }
            SessionCommand::Shutdown { reply } => {
                self.halt().await;
                let _ = reply.send(());
                return false;
            }
            SessionCommand::OutputEnded(completion) => self.on_output_ended(completion),
            SessionCommand::AcquisitionSettled {
                generation,
                track,
                result,
            } => self.on_settled(generation, track, result).await,
            SessionCommand::RetryAdvance { generation } => {
                if self.is_current(generation) {
                    self.in_flight = None;
                    self.advance();
                }
            }
        }
        true
    }

    fn id(&self) -> u64 {
        self.session.id().0
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    fn check_ticket(&self, ticket: Option<RequestTicket>) -> Result<()> {
        match ticket {
            Some(ticket) if ticket.epoch != self.epoch => {
                debug!(
                    ticket = ticket.epoch,
                    epoch = self.epoch,
                    "Dropping enqueue from before stop"
                );
                Err(PlaybackError::Cancelled)
            }
            _ => Ok(()),
        }
    }

    fn enqueue(&mut self, track: Track) -> Result<EnqueueOutcome> {
        let title = track.title.clone();
        let position = self.session.queue_mut().push(track)?;
        self.emit_queue(QueueEvent::Enqueued {
            session_id: self.id(),
            title,
            position,
        });

        let started = self.start_if_vacant();
        Ok(EnqueueOutcome { position, started })
    }

    fn enqueue_batch(&mut self, tracks: Vec<Track>) -> BatchOutcome {
        let max_duration = self.context.policy.max_song_length_secs;
        let report = self.session.queue_mut().extend_bounded(tracks, max_duration);
        info!(
            inserted = report.inserted,
            skipped_too_long = report.skipped_too_long,
            skipped_for_capacity = report.skipped_for_capacity,
            "Batch enqueued"
        );
        self.emit_queue(QueueEvent::PlaylistEnqueued {
            session_id: self.id(),
            inserted: report.inserted,
            skipped_too_long: report.skipped_too_long,
            skipped_for_capacity: report.skipped_for_capacity,
        });

        let started = report.inserted > 0 && self.start_if_vacant();
        BatchOutcome { report, started }
    }

    fn start_if_vacant(&mut self) -> bool {
        if self.session.is_vacant() && self.in_flight.is_none() && self.output.is_none() {
            self.advance();
            true
        } else {
            false
        }
    }

    async fn pause(&mut self) -> Result<()> {
        self.session.require(PlaybackState::Playing, "pause")?;
        if let Some(handle) = self.output {
            self.context
                .transcoder
                .pause(handle)
                .await
                .map_err(output_error)?;
        }
        self.session.pause()?;
        self.emit(PlaybackEvent::Paused {
            session_id: self.id(),
        });
        Ok(())
    }

    async fn resume(&mut self) -> Result<()> {
        self.session.require(PlaybackState::Paused, "resume")?;
        if let Some(handle) = self.output {
            self.context
                .transcoder
                .resume(handle)
                .await
                .map_err(output_error)?;
        }
        self.session.resume()?;
        self.emit(PlaybackEvent::Resumed {
            session_id: self.id(),
        });
        Ok(())
    }

    /// Stop the current output; its completion drives the advance.
    async fn skip(&mut self) -> Result<()> {
        self.session.require(PlaybackState::Playing, "skip")?;
        match self.output {
            Some(handle) => {
                if let Err(error) = self.context.transcoder.stop(handle).await {
                    warn!(%handle, error = %error, "Stop failed during skip, advancing directly");
                    self.output = None;
                    self.advance();
                }
            }
            None => self.advance(),
        }
        Ok(())
    }

    async fn set_volume(&mut self, percent: u32) -> Result<f32> {
        let volume = self.session.set_volume_percent(percent)?;
        if let Some(handle) = self.output {
            match self.context.transcoder.set_volume(handle, volume).await {
                Ok(()) => {}
                Err(BridgeError::NotAvailable(_)) => {
                    debug!(volume, "Live volume unsupported, applies from next track");
                }
                Err(error) => warn!(error = %error, "Failed to apply live volume"),
            }
        }
        Ok(volume)
    }

    /// Cancel in-flight work, stop output and clear the session.
    async fn halt(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.cancel.cancel();
        }
        self.generation += 1;
        self.epoch += 1;
        self.early_ends.clear();
        for command in self.deferred.drain(..) {
            command.cancel();
        }

        if let Some(handle) = self.output.take() {
            if let Err(error) = self.context.transcoder.stop(handle).await {
                warn!(%handle, error = %error, "Failed to stop output");
            }
        }

        let removed = self.session.reset();
        debug!(removed, "Session halted");
    }

    // ------------------------------------------------------------------------
    // Advancing
    // ------------------------------------------------------------------------

    fn advance(&mut self) {
        let Some(track) = self.session.select_next(&mut rand::thread_rng()) else {
            debug!("Queue exhausted");
            self.emit(PlaybackEvent::QueueFinished {
                session_id: self.id(),
            });
            return;
        };

        let (generation, cancel) = self.begin_in_flight();
        let acquirer = Arc::clone(&self.context.acquirer);
        let volume = self.session.volume();
        let on_complete = self.completion_callback();
        let weak_tx = self.weak_tx.clone();

        debug!(generation, title = %track.title, "Acquiring track");
        tokio::spawn(
            async move {
                let mut track = track;
                let result = tokio::select! {
                    _ = cancel.cancelled() => Err(AcquisitionError::Cancelled),
                    result = acquirer.acquire(&mut track, volume, on_complete) => result,
                };
                if let Some(tx) = weak_tx.upgrade() {
                    let _ = tx.send(SessionCommand::AcquisitionSettled {
                        generation,
                        track,
                        result,
                    });
                }
            }
            .in_current_span(),
        );
    }

    async fn on_settled(
        &mut self,
        generation: u64,
        track: Track,
        result: std::result::Result<OutputHandle, AcquisitionError>,
    ) {
        if !self.is_current(generation) {
            debug!(generation, "Discarding stale acquisition result");
            if let Ok(handle) = result {
                if let Err(error) = self.context.transcoder.stop(handle).await {
                    warn!(%handle, error = %error, "Failed to stop stale output");
                }
            }
            return;
        }
        self.in_flight = None;

        match result {
            Ok(handle) => {
                info!(title = %track.title, "Now playing");
                self.emit(PlaybackEvent::Started {
                    session_id: self.id(),
                    title: track.title.clone(),
                    source_url: track.canonical_url.clone(),
                    duration_secs: track.duration_secs,
                    channel_id: track.origin_channel,
                });
                self.session.start_playing(track);
                self.output = Some(handle);

                let ended_early = self.early_ends.contains(&handle);
                self.early_ends.clear();
                if ended_early {
                    debug!(%handle, "Output ended before start settled");
                    self.output = None;
                    self.advance();
                }
            }
            Err(error) => self.on_failure(track, error),
        }
    }

    fn on_failure(&mut self, track: Track, error: AcquisitionError) {
        let message = error.to_string();
        match self.session.record_failure() {
            RetryDecision::Retry { attempt } => {
                warn!(title = %track.title, attempt, error = %message, "Acquisition failed, retrying");
                self.emit(PlaybackEvent::TrackFailed {
                    session_id: self.id(),
                    title: track.title,
                    message,
                    attempt,
                });
                self.schedule_retry();
            }
            RetryDecision::GiveUp { attempt } => {
                warn!(title = %track.title, attempt, error = %message, "Retries exhausted, going idle");
                self.emit(PlaybackEvent::Error {
                    session_id: self.id(),
                    title: Some(track.title),
                    message,
                    channel_id: track.origin_channel,
                });
            }
        }
    }

    fn schedule_retry(&mut self) {
        let (generation, cancel) = self.begin_in_flight();
        let backoff = self.context.policy.retry_backoff;
        let weak_tx = self.weak_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(backoff) => {
                    if let Some(tx) = weak_tx.upgrade() {
                        let _ = tx.send(SessionCommand::RetryAdvance { generation });
                    }
                }
            }
        });
    }

    fn on_output_ended(&mut self, completion: OutputCompletion) {
        if self.output == Some(completion.handle) {
            debug!(handle = %completion.handle, end = ?completion.end, "Output ended");
            self.output = None;
            self.advance();
        } else if self.in_flight.is_some() {
            self.early_ends.push(completion.handle);
        }
    }

    fn begin_in_flight(&mut self) -> (u64, CancellationToken) {
        self.generation += 1;
        let cancel = CancellationToken::new();
        self.in_flight = Some(InFlight {
            generation: self.generation,
            cancel: cancel.clone(),
        });
        (self.generation, cancel)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.generation == generation)
    }

    fn completion_callback(&self) -> CompletionCallback {
        let weak_tx = self.weak_tx.clone();
        Arc::new(move |completion| {
            if let Some(tx) = weak_tx.upgrade() {
                let _ = tx.send(SessionCommand::OutputEnded(completion));
            }
        })
    }

    fn emit(&self, event: PlaybackEvent) {
        self.context.events.emit(CoreEvent::Playback(event));
    }

    fn emit_queue(&self, event: QueueEvent) {
        self.context.events.emit(CoreEvent::Queue(event));
    }
}

fn output_error(error: BridgeError) -> PlaybackError {
    PlaybackError::Output(error.to_string())
}
