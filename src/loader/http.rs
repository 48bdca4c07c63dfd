use std::sync::Mutex;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::runtime::{Handle, Runtime};
use tokio_util::sync::CancellationToken;
use url::{Origin, Url};

use crate::error::{LoadError, WebSrcError};

use super::{EventSender, Flow, Loader, NetworkEvent, ResourceHandle, ResourceRequest, ResourceResponse};

const MAX_REDIRECTS: usize = 10;

/// Loader making real HTTP requests with reqwest, each one a task on a runtime the loader owns.
pub struct HttpLoader {
    client: reqwest::Client,
    tokio_runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    document_origin: Option<Origin>,
}

impl HttpLoader {
    pub fn new() -> Result<Self, WebSrcError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("websrc-loader")
            .enable_all()
            .build()?;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self {
            client,
            handle: runtime.handle().clone(),
            tokio_runtime: Mutex::new(Some(runtime)),
            document_origin: None,
        })
    }

    /// Responses from any other origin fail the access control check.
    pub fn with_document_origin(mut self, document: &Url) -> Self {
        self.document_origin = Some(document.origin());
        self
    }

    fn prepare(&self, request: &ResourceRequest) -> Option<reqwest::RequestBuilder> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes()).ok()?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
            let value = HeaderValue::from_str(value).ok()?;
            headers.append(name, value);
        }
        if !request.accept_encoding {
            headers.insert(reqwest::header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        }
        if let Some(referrer) = &request.referrer {
            headers.insert(reqwest::header::REFERER, HeaderValue::from_str(referrer).ok()?);
        }

        Some(self.client.request(method, request.url.clone()).headers(headers))
    }
}

impl Loader for HttpLoader {
    fn request_resource(&self, request: ResourceRequest, events: EventSender) -> Option<Box<dyn ResourceHandle>> {
        let Some(builder) = self.prepare(&request) else {
            tracing::error!("R{}: Invalid request for {}", events.generation(), request.url);
            return None;
        };

        let token = CancellationToken::new();
        self.handle.spawn(drive_request(
            builder,
            request.url,
            events,
            token.clone(),
            self.document_origin.clone(),
        ));

        Some(Box::new(HttpResource { token }))
    }
}

impl Drop for HttpLoader {
    fn drop(&mut self) {
        let runtime = self.tokio_runtime.lock().map(|mut runtime| runtime.take()).ok().flatten();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
    }
}

struct HttpResource {
    token: CancellationToken,
}

impl ResourceHandle for HttpResource {
    fn shutdown(&self) {
        self.token.cancel();
    }
}

async fn drive_request(
    builder: reqwest::RequestBuilder,
    requested_url: Url,
    events: EventSender,
    token: CancellationToken,
    document_origin: Option<Origin>,
) {
    let response = tokio::select! {
        _ = token.cancelled() => {
            events.send(NetworkEvent::LoadFailed(LoadError::cancelled()));
            return;
        }
        response = builder.send() => response,
    };

    let mut response = match response {
        Ok(response) => response,
        Err(err) => {
            events.send(NetworkEvent::LoadFailed(err.into()));
            return;
        }
    };

    let final_url = response.url().clone();
    if final_url != requested_url {
        let redirect = NetworkEvent::RedirectReceived { from: requested_url, to: final_url.clone() };
        if events.send(redirect) == Flow::Stop {
            return;
        }
    }

    let passed = document_origin.as_ref().map_or(true, |origin| final_url.origin() == *origin);
    if !passed {
        let error = LoadError::failed(format!("{} is not allowed from this document", final_url.origin().ascii_serialization()));
        events.send(NetworkEvent::AccessControlCheckFailed(error));
        return;
    }

    let headers = response
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str().to_string(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
        .collect();
    let resource_response = ResourceResponse {
        status: response.status().as_u16(),
        url: final_url,
        headers,
        did_pass_access_control_check: passed,
    };
    if events.send(NetworkEvent::ResponseReceived(resource_response)) == Flow::Stop {
        return;
    }

    loop {
        let chunk = tokio::select! {
            _ = token.cancelled() => {
                events.send(NetworkEvent::LoadFailed(LoadError::cancelled()));
                return;
            }
            chunk = response.chunk() => chunk,
        };

        let event = match chunk {
            Ok(Some(data)) => NetworkEvent::DataReceived(data),
            Ok(None) => NetworkEvent::LoadFinished,
            Err(err) => NetworkEvent::LoadFailed(err.into()),
        };
        let last = !matches!(event, NetworkEvent::DataReceived(_));
        if events.send(event) == Flow::Stop || last {
            return;
        }
    }
}
