//! # Stream Acquirer
//!
//! Turns a queued [`Track`] into a running transcoder output.
//!
//! Locators are signed and expire. A locator that is known to be expired (or
//! was never fetched) is refreshed through the resolver before the
//! transcoder sees it. A locator with unknown expiry is tried as is, and
//! refreshed once if the transcoder reports access denied.

use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{
    Clock, CompletionCallback, OutputHandle, OutputRequest, ReconnectPolicy, Transcoder,
    TranscoderError,
};
use core_resolver::{ResolutionError, StreamLocator, TrackResolver};
use core_runtime::logging::redact_locator;
use tracing::{debug, info, instrument, warn};

use crate::error::AcquisitionError;
use crate::track::Track;

pub struct StreamAcquirer {
    resolver: Arc<dyn TrackResolver>,
    transcoder: Arc<dyn Transcoder>,
    clock: Arc<dyn Clock>,
    reconnect: ReconnectPolicy,
    start_timeout: Duration,
}

impl StreamAcquirer {
    pub fn new(
        resolver: Arc<dyn TrackResolver>,
        transcoder: Arc<dyn Transcoder>,
        clock: Arc<dyn Clock>,
        start_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            transcoder,
            clock,
            reconnect: ReconnectPolicy::default(),
            start_timeout,
        }
    }

    pub fn with_reconnect_policy(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Start an output for `track` at `volume`.
    ///
    /// The locator on `track` is replaced in place when it is refreshed.
    /// `on_complete` is handed to the transcoder and fires when the output
    /// ends.
    #[instrument(skip(self, track, on_complete), fields(title = %track.title))]
    pub async fn acquire(
        &self,
        track: &mut Track,
        volume: f32,
        on_complete: CompletionCallback,
    ) -> Result<OutputHandle, AcquisitionError> {
        let mut refreshed = false;
        if track.needs_refresh(self.clock.as_ref()) {
            debug!("Locator missing or expired, refreshing before start");
            self.refresh(track).await?;
            refreshed = true;
        }

        loop {
            let locator = track.locator.clone().ok_or_else(|| {
                ResolutionError::NotFound("track has no stream locator".to_string())
            })?;

            match self.start(&locator, volume, on_complete.clone()).await {
                Ok(handle) => {
                    info!(%handle, "Output started");
                    return Ok(handle);
                }
                Err(error) if error.is_access_denied() && !refreshed => {
                    warn!(error = %error, "Locator refused, refreshing once");
                    self.refresh(track).await?;
                    refreshed = true;
                }
                Err(error) => return Err(error.into()),
            }
        }
    }

    async fn refresh(&self, track: &mut Track) -> Result<(), AcquisitionError> {
        let metadata = self.resolver.refresh(&track.canonical_url).await?;
        let locator = metadata.locator.ok_or_else(|| {
            ResolutionError::NotFound("re-resolution returned no stream locator".to_string())
        })?;
        debug!(locator = %redact_locator(&locator.url), "Locator refreshed");
        track.refresh_locator(locator);
        Ok(())
    }

    async fn start(
        &self,
        locator: &StreamLocator,
        volume: f32,
        on_complete: CompletionCallback,
    ) -> Result<OutputHandle, TranscoderError> {
        let request = OutputRequest {
            locator: locator.url.clone(),
            reconnect: self.reconnect,
            volume,
            opus_passthrough: locator.is_opus_passthrough(),
        };

        tokio::time::timeout(
            self.start_timeout,
            self.transcoder.start_output(request, on_complete),
        )
        .await
        .unwrap_or(Err(TranscoderError::StartTimeout(self.start_timeout)))
    }
}

impl std::fmt::Debug for StreamAcquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAcquirer")
            .field("reconnect", &self.reconnect)
            .field("start_timeout", &self.start_timeout)
            .finish()
    }
}
