use std::sync::{Arc, Weak};

use bytes::Bytes;
use url::Url;

use crate::error::LoadError;

pub mod http;
pub mod memory;

pub use http::HttpLoader;
pub use memory::{MemoryLoader, MemoryResource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub url: Url,
    pub method: String,
    /// In order; a name may repeat.
    pub headers: Vec<(String, String)>,
    pub referrer: Option<String>,
    pub allow_cookies: bool,
    /// When false the loader must ask for an unencoded response.
    pub accept_encoding: bool,
}

impl ResourceRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn byte_range(&self) -> Option<(u64, Option<u64>)> {
        self.header("range").and_then(parse_byte_range)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse {
    pub status: u16,
    /// Final URL, after redirects.
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub did_pass_access_control_check: bool,
}

impl ResourceResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length").and_then(|value| value.trim().parse().ok())
    }

    /// Complete length from `Content-Range: bytes a-b/total`.
    pub fn content_range_total(&self) -> Option<u64> {
        let value = self.header("content-range")?;
        let (_, total) = value.trim().rsplit_once('/')?;
        total.trim().parse().ok()
    }
}

/// Everything a loader reports about one request, in the order it happens. The response always
/// comes before any data or completion of the same request.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkEvent {
    RedirectReceived { from: Url, to: Url },
    ResponseReceived(ResourceResponse),
    DataReceived(Bytes),
    AccessControlCheckFailed(LoadError),
    LoadFailed(LoadError),
    LoadFinished,
}

impl NetworkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            NetworkEvent::RedirectReceived { .. } => "redirect",
            NetworkEvent::ResponseReceived(_) => "response",
            NetworkEvent::DataReceived(_) => "data",
            NetworkEvent::AccessControlCheckFailed(_) => "access-control",
            NetworkEvent::LoadFailed(_) => "load-failed",
            NetworkEvent::LoadFinished => "load-finished",
        }
    }
}

/// What the loader should do after handing over an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The request was superseded or failed; stop delivering.
    Stop,
}

pub trait EventTarget: Send + Sync {
    fn dispatch(&self, generation: u64, event: NetworkEvent) -> Flow;
}

/// Tags every event of one request with its generation. Holds no strong reference to the
/// source, so a loader outliving it only ever gets `Flow::Stop` back.
#[derive(Clone)]
pub struct EventSender {
    generation: u64,
    target: Weak<dyn EventTarget>,
}

impl EventSender {
    pub fn new(generation: u64, target: Weak<dyn EventTarget>) -> Self {
        Self { generation, target }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn send(&self, event: NetworkEvent) -> Flow {
        match self.target.upgrade() {
            Some(target) => target.dispatch(self.generation, event),
            None => Flow::Stop,
        }
    }
}

impl std::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSender").field("generation", &self.generation).finish()
    }
}

/// An in-flight request.
pub trait ResourceHandle: Send {
    /// Stop the request. Must return without waiting and without delivering events from within
    /// the call; calling it more than once is harmless.
    fn shutdown(&self);
}

pub trait Loader: Send + Sync {
    /// Start `request`, reporting through `events`. `None` means the request could not be set up.
    fn request_resource(&self, request: ResourceRequest, events: EventSender) -> Option<Box<dyn ResourceHandle>>;
}

/// What the source needs from its embedder to make requests.
#[derive(Clone, Default)]
pub struct LoaderContext {
    pub loader: Option<Arc<dyn Loader>>,
    pub referrer: Option<String>,
}

impl LoaderContext {
    pub fn new(loader: Arc<dyn Loader>) -> Self {
        Self { loader: Some(loader), referrer: None }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Parse `bytes=<start>-[<end>]`, returning the start and the inclusive end.
pub fn parse_byte_range(value: &str) -> Option<(u64, Option<u64>)> {
    let range = value.trim().strip_prefix("bytes=")?;
    let (start, end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        end => Some(end.parse().ok()?),
    };
    Some((start, end))
}
