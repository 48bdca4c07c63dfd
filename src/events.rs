use tokio::sync::broadcast;

use crate::error::WebSrcError;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Request and response headers of the response that started the current stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpHeaders {
    pub uri: String,
    pub status_code: u16,
    pub redirection_uri: Option<String>,
    pub request_headers: Vec<(String, String)>,
    pub response_headers: Vec<(String, String)>,
}

impl HttpHeaders {
    /// Response header value as an integer, when it parses as one (ignoring trailing junk).
    pub fn response_header_u64(&self, name: &str) -> Option<u64> {
        let value = self
            .response_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())?;
        let digits = value.find(|c: char| !c.is_ascii_digit()).map_or(value, |end| &value[..end]);
        digits.parse().ok()
    }
}

/// Stream format announced by the server, currently only Icecast/Shoutcast metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCaps {
    pub metadata_interval: u32,
    pub content_type: Option<String>,
}

/// Notifications for the surrounding pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    HttpHeaders(HttpHeaders),
    Caps(StreamCaps),
    DurationChanged { size: u64 },
    Statistics { read_position: u64, size: Option<u64> },
    LiveStreamChanged { is_live: bool },
    HasEos,
    Error(WebSrcError),
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SourceEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    pub fn subscribe(&self) -> broadcast::Receiver<SourceEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: SourceEvent) {
        // Nobody listening is fine.
        let _ = self.sender.send(event);
    }
}
