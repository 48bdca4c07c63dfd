use crate::events::{HttpHeaders, SourceEvent, StreamCaps};

/// One-shot facts set by the network side that must reach the consumer before, or together
/// with, the next chunk it pulls.
#[derive(Debug, Default)]
pub struct PendingSignals {
    pub caps: Option<StreamCaps>,
    pub http_headers: Option<HttpHeaders>,
    duration_announced: bool,
}

impl PendingSignals {
    /// Drain everything that is ready to be announced.
    pub fn take(&mut self, size: Option<u64>) -> Vec<SourceEvent> {
        let mut events = Vec::new();

        if let Some(caps) = self.caps.take() {
            events.push(SourceEvent::Caps(caps));
        }
        if let Some(size) = size.filter(|_| !self.duration_announced) {
            self.duration_announced = true;
            events.push(SourceEvent::DurationChanged { size });
        }
        if let Some(headers) = self.http_headers.take() {
            events.push(SourceEvent::HttpHeaders(headers));
        }

        events
    }

    /// The duration went out by another path, `take` must not repeat it.
    pub fn mark_duration_announced(&mut self) {
        self.duration_announced = true;
    }

    /// After a flush the duration has to be announced again.
    pub fn reset(&mut self) {
        self.http_headers = None;
        self.duration_announced = false;
    }
}
