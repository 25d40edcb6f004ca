//! # Core Runtime Module
//!
//! Foundational infrastructure shared by every engine crate:
//! - Logging and tracing bootstrap
//! - Engine configuration and policies
//! - Event bus
//!
//! ## Overview
//!
//! Nothing here knows about queues or strategies. The resolver and the
//! playback crates take their policies from [`config`] and publish through
//! [`events`].

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{EngineConfig, EngineConfigBuilder, PlaybackPolicy, ResolverPolicy};
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, EventStream, PlaybackEvent, QueueEvent};
