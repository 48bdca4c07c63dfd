use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::config::WebSrcConfig;
use crate::error::WebSrcError;
use crate::loader::{Loader, LoaderContext, ResourceHandle};

use super::backpressure::{BackpressureGovernor, QueueSnapshot};
use super::blocksize::BlockSizeAdvisor;
use super::byte_queue::ByteQueue;
use super::ledger::{RequestLedger, RequestPhase};
use super::properties::StreamProperties;
use super::signals::PendingSignals;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    /// Flush: forget the current request and its data, keep what is known about the resource.
    Soft,
    /// Stop: forget everything.
    Hard,
}

/// What the last response told us about where the resource lives.
#[derive(Debug, Default)]
pub struct ResponseState {
    pub received: bool,
    pub redirected_uri: Option<String>,
    pub did_pass_access_control_check: bool,
    /// Every origin seen while loading, redirects included.
    pub origins: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct DownloadStats {
    pub start: Option<Instant>,
    pub total_bytes: u64,
}

impl DownloadStats {
    /// Account for a chunk, returning the approximate bytes/second since the first one.
    pub fn record(&mut self, bytes: usize) -> Option<f64> {
        let Some(start) = self.start else {
            self.start = Some(Instant::now());
            return None;
        };

        self.total_bytes += bytes as u64;
        let elapsed = start.elapsed().as_secs_f64();
        (elapsed > 0.0).then(|| self.total_bytes as f64 / elapsed)
    }
}

pub struct StreamState {
    pub ledger: RequestLedger,
    pub properties: StreamProperties,
    pub queue: ByteQueue,
    pub advisor: BlockSizeAdvisor,
    pub governor: BackpressureGovernor,
    pub signals: PendingSignals,
    pub response: ResponseState,
    pub download: DownloadStats,
    /// Headers of the request that was issued last, for the http-headers signal.
    pub request_headers: Vec<(String, String)>,
    /// Terminal failure of the current request.
    pub failure: Option<WebSrcError>,
    /// The current request ended because it was cancelled.
    pub cancelled: bool,
    pub is_started: bool,
    pub is_flushing: bool,
    /// Until the first request of a session is issued, seeks are accepted blindly.
    pub awaiting_first_request: bool,
    pub loader: Option<Arc<dyn Loader>>,
    pub resource: Option<Box<dyn ResourceHandle>>,
    pub referrer: Option<String>,
}

impl StreamState {
    pub fn new(config: &WebSrcConfig, context: LoaderContext) -> Self {
        Self {
            ledger: RequestLedger::default(),
            properties: StreamProperties::default(),
            queue: ByteQueue::new(),
            advisor: BlockSizeAdvisor::new(config.blocksize),
            governor: BackpressureGovernor::new(config),
            signals: PendingSignals::default(),
            response: ResponseState::default(),
            download: DownloadStats::default(),
            request_headers: Vec::new(),
            failure: None,
            cancelled: false,
            is_started: false,
            is_flushing: false,
            awaiting_first_request: true,
            loader: context.loader,
            resource: None,
            referrer: context.referrer,
        }
    }

    pub fn reset(&mut self, reset_type: ResetType) {
        tracing::debug!("R{}: {:?} reset", self.ledger.generation, reset_type);

        self.queue.clear();
        self.response.received = false;
        self.properties.is_eos = false;
        self.signals.reset();
        self.download = DownloadStats::default();
        self.failure = None;
        self.cancelled = false;
        self.governor.set_suspended(false);
        self.ledger.pending = true;
        self.ledger.phase = RequestPhase::Idle;
        // The next request restarts at the seek target, so offsets handed out restart there too.
        self.ledger.read_position = self.ledger.requested_position;
        self.ledger.delivered_position = self.ledger.requested_position;

        if reset_type == ResetType::Hard {
            self.response.did_pass_access_control_check = false;
            self.response.redirected_uri = None;
            self.properties.reset();
            self.ledger.requested_position = 0;
            self.ledger.read_position = 0;
            self.ledger.delivered_position = 0;
            self.ledger.stop_position = None;
            self.awaiting_first_request = true;
        }
    }

    /// End the current request with an error the consumer will see once the queue is drained.
    pub fn fail(&mut self, error: WebSrcError) {
        self.failure = Some(error);
        self.ledger.phase = RequestPhase::Error;
        self.properties.is_eos = true;
    }

    pub fn finish(&mut self) {
        self.ledger.phase = RequestPhase::Eos;
        self.properties.is_eos = true;
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            size: self.properties.size,
            is_seekable: self.properties.is_seekable,
            is_eos: self.properties.is_eos,
            queued: self.queue.len() as u64,
            read_position: self.ledger.read_position,
            is_ready: self.is_started,
        }
    }
}

/// The one mutex and condition variable shared by the consumer and the network side.
pub struct SharedState {
    state: Mutex<StreamState>,
    condition: Condvar,
}

impl SharedState {
    pub fn new(state: StreamState) -> Self {
        Self { state: Mutex::new(state), condition: Condvar::new() }
    }

    pub fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut StreamState) -> R) -> R {
        f(&mut self.lock())
    }

    /// Block until `ready` holds, releasing the lock while waiting.
    pub fn wait_until<'a>(
        &self,
        guard: MutexGuard<'a, StreamState>,
        mut ready: impl FnMut(&StreamState) -> bool,
    ) -> MutexGuard<'a, StreamState> {
        self.condition
            .wait_while(guard, |state| !ready(state))
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn notify(&self) {
        self.condition.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;

    fn state() -> StreamState {
        StreamState::new(&WebSrcConfig::new("http://localhost/a"), LoaderContext::default())
    }

    #[test]
    fn test_soft_reset_keeps_seek_target_and_size() {
        let mut state = state();
        state.ledger.retarget(500, Some(900));
        state.properties.apply_response(Some(1000), true, false);
        state.queue.push(Bytes::from_static(b"abc"));
        state.response.received = true;
        state.ledger.read_position = 700;
        state.ledger.delivered_position = 650;
        state.fail(WebSrcError::HttpStatus { status: 500 });

        state.reset(ResetType::Soft);
        assert!(state.queue.is_empty());
        assert!(!state.response.received);
        assert!(!state.properties.is_eos);
        assert!(state.failure.is_none());
        assert_eq!(state.properties.size, Some(1000));
        assert_eq!(state.ledger.requested_position, 500);
        assert_eq!(state.ledger.stop_position, Some(900));
        assert_eq!(state.ledger.read_position, 500);
        assert_eq!(state.ledger.delivered_position, 500);
        assert!(state.ledger.pending);
    }

    #[test]
    fn test_hard_reset_forgets_resource() {
        let mut state = state();
        state.ledger.retarget(500, None);
        state.properties.apply_response(Some(1000), true, false);
        state.response.redirected_uri = Some("http://localhost/b".to_string());
        state.awaiting_first_request = false;

        state.reset(ResetType::Hard);
        assert_eq!(state.properties, StreamProperties::default());
        assert_eq!(state.ledger.requested_position, 0);
        assert_eq!(state.ledger.read_position, 0);
        assert_eq!(state.ledger.stop_position, None);
        assert!(state.response.redirected_uri.is_none());
        assert!(state.awaiting_first_request);
    }

    #[test]
    fn test_waiter_wakes_on_notify() {
        let shared = Arc::new(SharedState::new(state()));

        let producer = {
            let shared = shared.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                shared.with(|state| state.queue.push(Bytes::from_static(b"data")));
                shared.notify();
            })
        };

        let guard = shared.lock();
        let guard = shared.wait_until(guard, |state| !state.queue.is_empty());
        assert_eq!(guard.queue.len(), 4);
        drop(guard);
        producer.join().unwrap();
    }
}
