use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use url::Url;

use crate::error::LoadError;

use super::{EventSender, Flow, Loader, NetworkEvent, ResourceHandle, ResourceRequest, ResourceResponse};

/// How a [`MemoryLoader`] answers requests for one URL.
#[derive(Debug, Clone)]
pub struct MemoryResource {
    pub body: Bytes,
    /// Size of the data chunks delivered.
    pub chunk_size: usize,
    /// `Accept-Ranges` value, if any.
    pub accept_ranges: Option<String>,
    /// Answer range requests with 206, otherwise send the whole body with 200.
    pub honor_ranges: bool,
    /// Omit `Content-Length` and announce a chunked transfer.
    pub chunked: bool,
    /// Answer with this status and no body.
    pub status: Option<u16>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub icy_metaint: Option<u32>,
    /// Fail the transfer once this many body bytes have been delivered.
    pub fail_after: Option<usize>,
    /// Fail before any response arrives, like a refused connection.
    pub fail_to_connect: bool,
    pub passes_access_control: bool,
    pub redirect_to: Option<Url>,
    pub chunk_delay: Option<Duration>,
}

impl MemoryResource {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            chunk_size: 4096,
            accept_ranges: Some("bytes".to_string()),
            honor_ranges: true,
            chunked: false,
            status: None,
            content_type: None,
            content_encoding: None,
            icy_metaint: None,
            fail_after: None,
            fail_to_connect: false,
            passes_access_control: true,
            redirect_to: None,
            chunk_delay: None,
        }
    }
}

/// Loader serving in-memory resources, one producer thread per request.
#[derive(Default)]
pub struct MemoryLoader {
    resources: Mutex<HashMap<String, MemoryResource>>,
    requests: Mutex<Vec<ResourceRequest>>,
    refuse_requests: AtomicBool,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, url: &str, resource: MemoryResource) {
        self.resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), resource);
    }

    /// Every request made so far, oldest first.
    pub fn requests(&self) -> Vec<ResourceRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Make every following request fail to be set up.
    pub fn refuse_requests(&self, refuse: bool) {
        self.refuse_requests.store(refuse, Ordering::SeqCst);
    }
}

impl Loader for MemoryLoader {
    fn request_resource(&self, request: ResourceRequest, events: EventSender) -> Option<Box<dyn ResourceHandle>> {
        if self.refuse_requests.load(Ordering::SeqCst) {
            return None;
        }

        self.requests.lock().unwrap_or_else(PoisonError::into_inner).push(request.clone());
        let resource = self
            .resources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(request.url.as_str())
            .cloned()
            .unwrap_or_else(|| MemoryResource { status: Some(404), ..MemoryResource::new(Bytes::new()) });

        let cancelled = Arc::new(AtomicBool::new(false));
        let producer_cancelled = cancelled.clone();
        thread::Builder::new()
            .name(format!("memory-loader-{}", events.generation()))
            .spawn(move || serve(resource, request, events, producer_cancelled))
            .ok()?;

        Some(Box::new(MemoryHandle { cancelled }))
    }
}

struct MemoryHandle {
    cancelled: Arc<AtomicBool>,
}

impl ResourceHandle for MemoryHandle {
    fn shutdown(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

fn serve(resource: MemoryResource, request: ResourceRequest, events: EventSender, cancelled: Arc<AtomicBool>) {
    let mut url = request.url.clone();
    if let Some(redirect) = resource.redirect_to.clone() {
        let event = NetworkEvent::RedirectReceived { from: url, to: redirect.clone() };
        if events.send(event) == Flow::Stop {
            return;
        }
        url = redirect;
    }

    if resource.fail_to_connect {
        events.send(NetworkEvent::LoadFailed(LoadError::failed("connection refused")));
        return;
    }

    if !resource.passes_access_control {
        events.send(NetworkEvent::AccessControlCheckFailed(LoadError::failed("origin not allowed")));
        return;
    }

    let total = resource.body.len() as u64;
    let range = request.byte_range().filter(|_| resource.honor_ranges);
    let (status, body, mut headers) = match (resource.status, range) {
        (Some(status), _) => (status, Bytes::new(), Vec::new()),
        (None, Some((start, end))) if start >= total || end.is_some_and(|end| end < start) => {
            (416, Bytes::new(), vec![("Content-Range".to_string(), format!("bytes */{}", total))])
        }
        (None, Some((start, end))) => {
            let end = end.map_or(total - 1, |end| end.min(total - 1));
            let body = resource.body.slice(start as usize..=end as usize);
            (206, body, vec![("Content-Range".to_string(), format!("bytes {}-{}/{}", start, end, total))])
        }
        (None, None) => (200, resource.body.clone(), Vec::new()),
    };

    if resource.chunked {
        headers.push(("Transfer-Encoding".to_string(), "chunked".to_string()));
    } else {
        headers.push(("Content-Length".to_string(), body.len().to_string()));
    }
    let optional = [
        ("Accept-Ranges", resource.accept_ranges.clone()),
        ("Content-Type", resource.content_type.clone()),
        ("Content-Encoding", resource.content_encoding.clone()),
        ("icy-metaint", resource.icy_metaint.map(|interval| interval.to_string())),
    ];
    for (name, value) in optional {
        if let Some(value) = value {
            headers.push((name.to_string(), value));
        }
    }

    let response = ResourceResponse { status, url, headers, did_pass_access_control_check: true };
    if events.send(NetworkEvent::ResponseReceived(response)) == Flow::Stop {
        return;
    }

    let mut delivered = 0;
    for chunk in body.chunks(resource.chunk_size.max(1)) {
        if let Some(delay) = resource.chunk_delay {
            thread::sleep(delay);
        }
        if cancelled.load(Ordering::SeqCst) {
            events.send(NetworkEvent::LoadFailed(LoadError::cancelled()));
            return;
        }
        if resource.fail_after.is_some_and(|limit| delivered >= limit) {
            events.send(NetworkEvent::LoadFailed(LoadError::failed("connection reset")));
            return;
        }

        delivered += chunk.len();
        if events.send(NetworkEvent::DataReceived(body.slice_ref(chunk))) == Flow::Stop {
            return;
        }
    }

    events.send(NetworkEvent::LoadFinished);
}

#[cfg(test)]
mod tests {
    use super::super::EventTarget;
    use super::*;

    #[derive(Default)]
    struct Statuses(Mutex<Vec<u16>>);

    impl EventTarget for Statuses {
        fn dispatch(&self, _generation: u64, event: NetworkEvent) -> Flow {
            if let NetworkEvent::ResponseReceived(response) = event {
                self.0.lock().unwrap().push(response.status);
            }
            Flow::Continue
        }
    }

    fn range_request(range: &str) -> ResourceRequest {
        ResourceRequest {
            url: Url::parse("http://localhost/a").unwrap(),
            method: "GET".to_string(),
            headers: vec![("Range".to_string(), range.to_string())],
            referrer: None,
            allow_cookies: true,
            accept_encoding: false,
        }
    }

    fn status_for(range: &str) -> Vec<u16> {
        let statuses = Arc::new(Statuses::default());
        let target: Arc<dyn EventTarget> = statuses.clone();
        let events = EventSender::new(1, Arc::downgrade(&target));

        let resource = MemoryResource::new(vec![0u8; 100]);
        serve(resource, range_request(range), events, Arc::new(AtomicBool::new(false)));

        let statuses = statuses.0.lock().unwrap().clone();
        statuses
    }

    #[test]
    fn test_unsatisfiable_ranges() {
        assert_eq!(status_for("bytes=10-19"), vec![206]);
        assert_eq!(status_for("bytes=10-5"), vec![416]);
        assert_eq!(status_for("bytes=100-"), vec![416]);
    }
}
