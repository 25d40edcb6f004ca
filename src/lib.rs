//! Workspace umbrella crate.
//!
//! Host applications can depend on `jukebox-workspace` and get the service
//! façade with the desktop adapters wired in, without depending on each
//! workspace crate individually.
//!
//! ```ignore
//! use jukebox_workspace::{bootstrap_desktop, RequestContext};
//!
//! core_runtime::logging::init_logging(LoggingConfig::default())?;
//! let core = bootstrap_desktop(voice_sink)?;
//! ```

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
