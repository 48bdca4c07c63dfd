use std::sync::{Arc, MutexGuard};

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::config::WebSrcConfig;
use crate::error::WebSrcError;
use crate::events::{EventBus, SourceEvent};
use crate::loader::LoaderContext;
use crate::stream::coordinator::RequestCoordinator;
use crate::stream::state::{ResetType, SharedState, StreamState};
use crate::stream::Core;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFormat {
    Bytes,
    Time,
}

/// Segment the consumer wants to play next.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekSegment {
    pub start: u64,
    /// Exclusive end, `None` for "until the end".
    pub stop: Option<u64>,
    pub rate: f64,
    pub format: SeekFormat,
}

impl SeekSegment {
    pub fn bytes(start: u64, stop: Option<u64>) -> Self {
        Self { start, stop, rate: 1.0, format: SeekFormat::Bytes }
    }

    pub fn validate(&self) -> Result<(), WebSrcError> {
        let malformed = |reason: &str| Err(WebSrcError::MalformedSeek { reason: reason.to_string() });

        if self.format != SeekFormat::Bytes {
            return malformed("only byte segments are supported");
        }
        if !(self.rate > 0.0) {
            return malformed("reverse or zero playback rate");
        }
        if self.stop.is_some_and(|stop| stop <= self.start) {
            return malformed("empty range");
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of the first byte of `data` in the resource.
    pub offset: u64,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    Chunk(Chunk),
    EndOfStream,
    /// The source was unlocked; the consumer should stop pulling until it is unlocked again.
    Flushing,
}

/// A byte source a consumer pulls from at positions it controls.
pub trait PullSource {
    fn size(&self) -> Option<u64>;

    fn is_seekable(&self) -> bool;

    /// Ok(false) when the resource is known not to be seekable.
    fn seek(&self, segment: SeekSegment) -> Result<bool, WebSrcError>;

    /// Block until data, end of stream or a flush. Errors are terminal for the current request.
    fn pull(&self) -> Result<PullOutcome, WebSrcError>;
}

impl<T: PullSource + ?Sized> PullSource for Arc<T> {
    fn size(&self) -> Option<u64> {
        (**self).size()
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }

    fn seek(&self, segment: SeekSegment) -> Result<bool, WebSrcError> {
        (**self).seek(segment)
    }

    fn pull(&self) -> Result<PullOutcome, WebSrcError> {
        (**self).pull()
    }
}

/// Pull source over a resource fetched through a [`Loader`](crate::loader::Loader).
pub struct WebSource {
    core: Arc<Core>,
    config: WebSrcConfig,
}

impl WebSource {
    pub fn new(config: WebSrcConfig, context: LoaderContext) -> Result<Self, WebSrcError> {
        config.validate()?;

        let core = Core {
            state: SharedState::new(StreamState::new(&config, context)),
            events: EventBus::default(),
            coordinator: RequestCoordinator::new(&config)?,
        };

        Ok(Self { core: Arc::new(core), config })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.core.events.subscribe()
    }

    pub fn config(&self) -> &WebSrcConfig {
        &self.config
    }

    pub fn start(&self) -> Result<(), WebSrcError> {
        self.config.parsed_location()?;

        let mut state = self.core.state.lock();
        tracing::debug!("R{}: Starting {}", state.ledger.generation, self.config.location);
        state.is_started = true;
        Ok(())
    }

    pub fn stop(&self) {
        let mut state = self.core.state.lock();
        tracing::debug!("R{}: Stopping", state.ledger.generation);

        let detached = self.core.coordinator.cancel(&mut state);
        state.reset(ResetType::Hard);
        state.is_started = false;
        state.is_flushing = false;
        self.core.state.notify();
        drop(state);

        if let Some(handle) = detached {
            handle.shutdown();
        }
    }

    /// Wake up a blocked `pull()` and make it, and every later one, return `Flushing` until
    /// `unlock_stop()`.
    pub fn unlock(&self) {
        let mut state = self.core.state.lock();
        tracing::debug!("R{}: Unlock", state.ledger.generation);

        state.is_flushing = true;
        let detached = self.core.coordinator.cancel(&mut state);
        self.core.state.notify();
        drop(state);

        if let Some(handle) = detached {
            handle.shutdown();
        }
    }

    pub fn unlock_stop(&self) {
        let mut state = self.core.state.lock();
        tracing::debug!("R{}: Unlock stop", state.ledger.generation);

        state.is_flushing = false;
        state.reset(ResetType::Soft);
    }

    pub fn uri(&self) -> &str {
        &self.config.location
    }

    /// Where the resource was eventually found, after redirects.
    pub fn resolved_location(&self) -> String {
        self.core
            .state
            .with(|state| state.response.redirected_uri.clone())
            .unwrap_or_else(|| self.config.location.clone())
    }

    pub fn passed_access_control_check(&self) -> bool {
        self.core.state.with(|state| state.response.did_pass_access_control_check)
    }

    /// Whether any origin seen while loading, redirects included, differs from `origin`.
    pub fn is_cross_origin(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.core.state.with(|state| state.response.origins.iter().any(|seen| seen != origin))
    }

    pub fn generation(&self) -> u64 {
        self.core.state.with(|state| state.ledger.generation)
    }

    /// Preferred size of the chunks `pull()` hands out.
    pub fn blocksize(&self) -> u32 {
        self.core.state.with(|state| state.advisor.current())
    }

    pub fn is_download_suspended(&self) -> bool {
        self.core.state.with(|state| state.governor.is_suspended())
    }

    /// Resume a suspended download once the queue has drained enough.
    fn restart_if_needed<'a>(&'a self, mut state: MutexGuard<'a, StreamState>) -> MutexGuard<'a, StreamState> {
        let snapshot = state.snapshot();
        if !state.governor.should_resume(&snapshot) {
            return state;
        }

        tracing::debug!(
            "R{}: Queue holds {} bytes, restarting download at {}",
            state.ledger.generation,
            snapshot.queued,
            snapshot.read_position
        );
        state.governor.set_suspended(false);
        let stop_position = state.ledger.stop_position;
        self.core.coordinator.issue(&self.core, state, snapshot.read_position, stop_position)
    }

    /// Hand the pending one-shot signals to subscribers outside the lock.
    fn announce<'a>(&'a self, mut state: MutexGuard<'a, StreamState>) -> MutexGuard<'a, StreamState> {
        let size = state.properties.size;
        let events = state.signals.take(size);
        if events.is_empty() {
            return state;
        }

        drop(state);
        for event in events {
            self.core.events.emit(event);
        }
        self.core.state.lock()
    }
}

impl PullSource for WebSource {
    fn size(&self) -> Option<u64> {
        self.core.state.with(|state| state.properties.size)
    }

    fn is_seekable(&self) -> bool {
        self.core.state.with(|state| state.properties.is_seekable)
    }

    fn seek(&self, segment: SeekSegment) -> Result<bool, WebSrcError> {
        segment.validate()?;

        let mut state = self.core.state.lock();
        tracing::debug!("R{}: Seek to {}..{:?}", state.ledger.generation, segment.start, segment.stop);

        if !state.properties.is_seekable && !state.awaiting_first_request {
            tracing::warn!("R{}: Resource is not seekable, ignoring seek", state.ledger.generation);
            return Ok(false);
        }
        if state.properties.size.is_some_and(|size| segment.start >= size) {
            tracing::warn!("R{}: Seeking past the end of the resource, expect EOS", state.ledger.generation);
        }

        let detached = self.core.coordinator.cancel(&mut state);
        state.reset(ResetType::Soft);
        state.ledger.retarget(segment.start, segment.stop);
        self.core.state.notify();
        drop(state);

        if let Some(handle) = detached {
            handle.shutdown();
        }
        Ok(true)
    }

    fn pull(&self) -> Result<PullOutcome, WebSrcError> {
        let core = &self.core;
        let mut state = core.state.lock();

        if !state.is_started {
            return Err(WebSrcError::NotStarted);
        }
        if state.is_flushing {
            return Ok(PullOutcome::Flushing);
        }
        if state.loader.is_none() {
            tracing::error!("R{}: No resource loader", state.ledger.generation);
            return Err(WebSrcError::NoLoader);
        }

        if state.ledger.pending {
            let position = state.ledger.requested_position;
            let stop_position = state.ledger.stop_position;
            state = core.coordinator.issue(core, state, position, stop_position);
        }

        state = core.state.wait_until(state, |state| {
            state.response.received || state.properties.is_eos || state.is_flushing
        });
        if state.is_flushing {
            return Ok(PullOutcome::Flushing);
        }

        state = self.announce(state);
        state = self.restart_if_needed(state);

        state = core.state.wait_until(state, |state| {
            !state.queue.is_empty() || state.properties.is_eos || state.is_flushing
        });
        if state.is_flushing {
            return Ok(PullOutcome::Flushing);
        }

        if !state.queue.is_empty() {
            let blocksize = state.advisor.current() as usize;
            let data = state.queue.take(blocksize);
            let offset = state.ledger.delivered_position;
            state.ledger.delivered_position += data.len() as u64;
            tracing::trace!("R{}: Pulled {} bytes at {}", state.ledger.generation, data.len(), offset);

            drop(self.restart_if_needed(state));
            return Ok(PullOutcome::Chunk(Chunk { offset, data }));
        }

        let failure = state.failure.clone();
        let cancelled = state.cancelled;
        tracing::debug!(
            "R{}: Reached end of stream at {} ({:?})",
            state.ledger.generation,
            state.ledger.read_position,
            state.ledger.phase
        );
        drop(state);

        if cancelled {
            return Ok(PullOutcome::Flushing);
        }
        core.events.emit(SourceEvent::HasEos);
        match failure {
            Some(error) => Err(error),
            None => Ok(PullOutcome::EndOfStream),
        }
    }
}

impl Drop for WebSource {
    fn drop(&mut self) {
        let detached = {
            let mut state = self.core.state.lock();
            self.core.coordinator.cancel(&mut state)
        };
        if let Some(handle) = detached {
            handle.shutdown();
        }
    }
}
