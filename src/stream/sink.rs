use std::sync::MutexGuard;

use bytes::Bytes;
use url::Url;

use crate::error::{LoadError, WebSrcError};
use crate::events::{HttpHeaders, SourceEvent, StreamCaps};
use crate::loader::{EventTarget, Flow, NetworkEvent, ResourceResponse};

use super::ledger::RequestPhase;
use super::state::StreamState;
use super::Core;

const PARTIAL_CONTENT: u16 = 206;

impl EventTarget for Core {
    fn dispatch(&self, generation: u64, event: NetworkEvent) -> Flow {
        let guard = self.state.lock();
        if !guard.ledger.is_current(generation) {
            tracing::trace!(
                "R{}: Ignoring {} callback of superseded request, current is R{}",
                generation,
                event.name(),
                guard.ledger.generation
            );
            return Flow::Stop;
        }

        match event {
            NetworkEvent::RedirectReceived { from, to } => self.redirect_received(guard, generation, &from, &to),
            NetworkEvent::ResponseReceived(response) => self.response_received(guard, generation, &response),
            NetworkEvent::DataReceived(data) => self.data_received(guard, generation, data),
            NetworkEvent::AccessControlCheckFailed(error) => {
                tracing::error!("R{}: Access control check failed: {}", generation, error);
                self.fail(guard, WebSrcError::AccessControl { message: error.message })
            }
            NetworkEvent::LoadFailed(error) => self.load_failed(guard, generation, error),
            NetworkEvent::LoadFinished => self.load_finished(guard, generation),
        }
    }
}

impl Core {
    fn redirect_received(
        &self,
        mut guard: MutexGuard<'_, StreamState>,
        generation: u64,
        from: &Url,
        to: &Url,
    ) -> Flow {
        tracing::debug!("R{}: Redirected from {} to {}", generation, from, to);
        guard.response.origins.insert(from.origin().ascii_serialization());
        guard.response.origins.insert(to.origin().ascii_serialization());
        Flow::Continue
    }

    fn response_received(
        &self,
        mut guard: MutexGuard<'_, StreamState>,
        generation: u64,
        response: &ResourceResponse,
    ) -> Flow {
        tracing::debug!("R{}: Received response: {}", generation, response.status);

        guard.response.did_pass_access_control_check = response.did_pass_access_control_check;
        guard.response.origins.insert(response.url.origin().ascii_serialization());
        if response.url != *self.coordinator.location() {
            guard.response.redirected_uri = Some(response.url.to_string());
        }

        let headers = HttpHeaders {
            uri: self.coordinator.location().to_string(),
            status_code: response.status,
            redirection_uri: guard.response.redirected_uri.clone(),
            request_headers: guard.request_headers.clone(),
            response_headers: response.headers.clone(),
        };
        guard.signals.http_headers = Some(headers);

        if response.status >= 400 {
            tracing::error!("R{}: Received {} HTTP error code", generation, response.status);
            return self.fail(guard, WebSrcError::HttpStatus { status: response.status });
        }

        if guard.ledger.has_range() && response.status != PARTIAL_CONTENT {
            let range = guard.ledger.range_header().unwrap_or_default();
            tracing::error!(
                "R{}: Received unexpected {} HTTP status code for range request {}",
                generation,
                response.status,
                range
            );
            return self.fail(guard, WebSrcError::RangeMismatch { status: response.status, range });
        }

        let accept_ranges = response.header("accept-ranges").map(str::trim);
        let ranges_refused = accept_ranges.is_some_and(|value| value.eq_ignore_ascii_case("none"));
        let accepts_ranges = response.status == PARTIAL_CONTENT || (accept_ranges.is_some() && !ranges_refused);
        let length = response_length(response, guard.ledger.requested_position);
        guard.properties.apply_response(length, accepts_ranges, ranges_refused);
        tracing::debug!(
            "R{}: Size: {:?}, isSeekable: {}",
            generation,
            guard.properties.size,
            guard.properties.is_seekable
        );

        if let Some(metadata_interval) = icy_metadata_interval(response) {
            tracing::debug!("R{}: Icecast metadata every {} bytes", generation, metadata_interval);
            guard.signals.caps = Some(StreamCaps {
                metadata_interval,
                content_type: response.header("content-type").map(str::to_string),
            });
        }

        guard.response.received = true;
        guard.ledger.phase = RequestPhase::HeadersReceived;
        self.state.notify();
        Flow::Continue
    }

    fn data_received(&self, mut guard: MutexGuard<'_, StreamState>, generation: u64, mut data: Bytes) -> Flow {
        if let Some(size) = guard.properties.size {
            let remaining = size.saturating_sub(guard.ledger.read_position);
            if data.len() as u64 > remaining {
                tracing::warn!(
                    "R{}: Response overruns its length of {} bytes, dropping {} bytes",
                    generation,
                    size,
                    data.len() as u64 - remaining
                );
                data.truncate(remaining as usize);
            }
        }
        if data.is_empty() {
            return Flow::Continue;
        }

        let length = data.len();
        tracing::trace!("R{}: Have {} bytes of data", generation, length);

        if let Some(rate) = guard.download.record(length) {
            tracing::trace!("R{}: Downloading at approximately {:.0} bytes/s", generation, rate);
        }

        guard.ledger.read_position += length as u64;
        guard.ledger.phase = RequestPhase::Streaming;
        guard.advisor.observe(length);
        guard.queue.push(data);

        let statistics = SourceEvent::Statistics {
            read_position: guard.ledger.read_position,
            size: guard.properties.size,
        };

        let snapshot = guard.snapshot();
        let mut flow = Flow::Continue;
        let mut detached = None;
        if guard.governor.should_suspend(&snapshot) {
            tracing::debug!(
                "R{}: Queue holds {} bytes, stopping download at {}",
                generation,
                snapshot.queued,
                snapshot.read_position
            );
            guard.governor.set_suspended(true);
            detached = self.coordinator.cancel(&mut guard);
            flow = Flow::Stop;
        }

        self.state.notify();
        drop(guard);

        self.events.emit(statistics);
        if let Some(handle) = detached {
            handle.shutdown();
        }
        flow
    }

    fn load_failed(&self, mut guard: MutexGuard<'_, StreamState>, generation: u64, error: LoadError) -> Flow {
        if error.is_cancellation {
            tracing::debug!("R{}: Request cancelled", generation);
            guard.cancelled = true;
            guard.finish();
            self.state.notify();
            return Flow::Stop;
        }

        tracing::error!("R{}: Load failed: {}", generation, error);
        let failure = WebSrcError::Transport { message: error.message };
        if !guard.response.received {
            return self.fail(guard, failure);
        }

        // The data already delivered is still good, end the stream there.
        guard.finish();
        self.events.emit(SourceEvent::Error(failure));
        self.state.notify();
        Flow::Stop
    }

    fn load_finished(&self, mut guard: MutexGuard<'_, StreamState>, generation: u64) -> Flow {
        tracing::debug!("R{}: Load finished at {}", generation, guard.ledger.read_position);

        guard.finish();
        let read_position = guard.ledger.read_position;
        if guard.properties.infer_at_eos(read_position) {
            tracing::debug!(
                "R{}: Inferred size {} at EOS, isSeekable: {}",
                generation,
                read_position,
                guard.properties.is_seekable
            );
            // Announced before the consumer can observe EOS.
            guard.signals.mark_duration_announced();
            self.events.emit(SourceEvent::DurationChanged { size: read_position });
            self.events.emit(SourceEvent::LiveStreamChanged { is_live: !guard.properties.is_seekable });
        }

        self.state.notify();
        Flow::Stop
    }

    /// Terminate the current request with `error`.
    fn fail(&self, mut guard: MutexGuard<'_, StreamState>, error: WebSrcError) -> Flow {
        guard.fail(error.clone());
        self.events.emit(SourceEvent::Error(error));
        self.state.notify();
        Flow::Stop
    }
}

/// Total length of the resource as far as the response headers tell.
fn response_length(response: &ResourceResponse, requested_position: u64) -> Option<u64> {
    let mut length = match response.header("content-encoding") {
        Some(_) => None,
        None => response.content_length(),
    };

    let chunked = response
        .header("transfer-encoding")
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("chunked"));
    if length.unwrap_or(0) == 0 && chunked {
        length = response.content_length();
    }

    if response.status == PARTIAL_CONTENT {
        if let Some(total) = response.content_range_total() {
            return Some(total);
        }
        if requested_position > 0 {
            return length.map(|length| length + requested_position);
        }
    }

    length
}

fn icy_metadata_interval(response: &ResourceResponse) -> Option<u32> {
    let value = response.header("icy-metaint")?.trim();
    let digits = value.find(|c: char| !c.is_ascii_digit()).map_or(value, |end| &value[..end]);
    digits.parse().ok().filter(|interval| *interval > 0)
}
