//! # Core Playback
//!
//! Per-session queue engine: queue operations, stream acquisition and the
//! session state machine.
//!
//! ## Overview
//!
//! - [`TrackQueue`] - bounded FIFO with 1-based positional edits
//! - [`StreamAcquirer`] - refreshes expired locators and starts transcoder
//!   outputs
//! - [`SessionPlayer`] - one actor task per session, serializing commands,
//!   transcoder completions and acquisition results
//! - [`SessionRegistry`] - lazily creates sessions by id
//!
//! ## Usage
//!
//! ```ignore
//! let registry = SessionRegistry::new(context);
//! let session = registry.get_or_create(SessionId(guild_id));
//! let outcome = session.enqueue(track).await?;
//! if outcome.started {
//!     // first track; playback is being acquired
//! }
//! ```

pub mod acquirer;
pub mod error;
pub mod player;
pub mod queue;
pub mod registry;
pub mod session;
pub mod track;

pub use acquirer::StreamAcquirer;
pub use error::{AcquisitionError, PlaybackError, Result};
pub use player::{
    BatchOutcome, EnqueueOutcome, RequestTicket, SessionContext, SessionHandle, SessionPlayer,
};
pub use queue::{BatchReport, ShuffleOutcome, TrackQueue};
pub use registry::SessionRegistry;
pub use session::{PlaybackState, RetryDecision, Session, SessionSnapshot};
pub use track::{Requester, SessionId, Track, TrackId};
