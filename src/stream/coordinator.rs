use std::sync::{Arc, MutexGuard, Weak};

use url::Url;

use crate::config::WebSrcConfig;
use crate::error::WebSrcError;
use crate::loader::{EventSender, EventTarget, ResourceHandle, ResourceRequest};

use super::state::StreamState;
use super::Core;

/// Builds, numbers and cancels the requests made on behalf of one source.
#[derive(Debug, Clone)]
pub struct RequestCoordinator {
    location: Url,
    method: String,
    keep_alive: bool,
    compress: bool,
    request_icy_metadata: bool,
    extra_headers: Vec<(String, String)>,
}

impl RequestCoordinator {
    pub fn new(config: &WebSrcConfig) -> Result<Self, WebSrcError> {
        let mut names: Vec<&String> = config.extra_headers.keys().collect();
        names.sort();
        let extra_headers = names
            .into_iter()
            .flat_map(|name| config.extra_headers[name].iter().map(move |value| (name.clone(), value.clone())))
            .collect();

        Ok(Self {
            location: config.parsed_location()?,
            method: config.method.clone().unwrap_or_else(|| "GET".to_string()),
            keep_alive: config.keep_alive,
            compress: config.compress,
            request_icy_metadata: config.request_icy_metadata,
            extra_headers,
        })
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn build_request(&self, state: &StreamState) -> ResourceRequest {
        let mut headers = Vec::new();

        if let Some(range) = state.ledger.range_header() {
            tracing::debug!("R{}: Range request: {}", state.ledger.generation, range);
            headers.push(("Range".to_string(), range));
        }
        if !self.keep_alive {
            headers.push(("Connection".to_string(), "close".to_string()));
        }
        headers.extend(self.extra_headers.iter().cloned());
        if self.request_icy_metadata {
            headers.push(("Icy-MetaData".to_string(), "1".to_string()));
        }

        ResourceRequest {
            url: self.location.clone(),
            method: self.method.clone(),
            headers,
            referrer: state.referrer.clone(),
            allow_cookies: true,
            accept_encoding: self.compress,
        }
    }

    /// Start a new generation at `position` and hand it to the loader. The lock is released
    /// while the loader is called and held again when this returns.
    pub fn issue<'a>(
        &self,
        core: &'a Arc<Core>,
        mut guard: MutexGuard<'a, StreamState>,
        position: u64,
        stop_position: Option<u64>,
    ) -> MutexGuard<'a, StreamState> {
        let Some(loader) = guard.loader.clone() else {
            tracing::error!("R{}: No resource loader, cannot make network requests", guard.ledger.generation);
            guard.ledger.pending = false;
            guard.fail(WebSrcError::NoLoader);
            core.state.notify();
            return guard;
        };

        let generation = guard.ledger.begin(position, stop_position);
        guard.awaiting_first_request = false;
        guard.cancelled = false;
        let request = self.build_request(&guard);
        guard.request_headers = request.headers.clone();
        tracing::debug!(
            "R{}: Starting {} request for {} at {}",
            generation,
            request.method,
            request.url,
            position
        );

        let target: Weak<dyn EventTarget> = Arc::downgrade(core) as Weak<dyn EventTarget>;
        drop(guard);
        let handle = loader.request_resource(request, EventSender::new(generation, target));
        let mut guard = core.state.lock();

        match handle {
            Some(handle) if guard.ledger.is_current(generation) => {
                tracing::debug!("R{}: Started request", generation);
                guard.resource = Some(handle);
            }
            Some(handle) => {
                tracing::debug!(
                    "R{}: Request superseded by R{} while it was being set up",
                    generation,
                    guard.ledger.generation
                );
                drop(guard);
                handle.shutdown();
                guard = core.state.lock();
            }
            None if guard.ledger.is_current(generation) => {
                tracing::error!("R{}: Failed to setup streaming client", generation);
                guard.loader = None;
                guard.ledger.outstanding = false;
                guard.fail(WebSrcError::RequestSetupFailed);
                core.state.notify();
            }
            None => tracing::debug!("R{}: Superseded request could not be set up", generation),
        }

        guard
    }

    /// Supersede the outstanding request, returning its handle so the caller can shut it down
    /// once the lock is released. Without an outstanding request this changes nothing.
    pub fn cancel(&self, state: &mut StreamState) -> Option<Box<dyn ResourceHandle>> {
        let superseded = state.ledger.generation;
        if !state.ledger.supersede() {
            return None;
        }

        tracing::debug!("R{}: Cancelling request, now at R{}", superseded, state.ledger.generation);
        state.resource.take()
    }
}
