use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use async_stream::stream;
use bytes::Bytes;
use futures_core::Stream;
use http_body_util::combinators::BoxBody;
use http_body_util::{Empty, Full, StreamBody};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio_util::sync::CancellationToken;

use crate::error::WebSrcError;
use crate::loader::parse_byte_range;

use super::config::RangeServerConfig;

type ServerBody = BoxBody<Bytes, Infallible>;

/// Local HTTP server handing out one in-memory body, with byte range support.
///
/// `/missing` answers 404 and `/redirect/<path>` redirects to `/<path>`; every other path serves
/// the body.
pub struct RangeServer {
    body: Bytes,
    configuration: RangeServerConfig,
}

impl RangeServer {
    pub fn new(body: impl Into<Bytes>, configuration: RangeServerConfig) -> Self {
        Self { body: body.into(), configuration }
    }

    /// Bind on localhost and serve on the current runtime until the handle is dropped.
    pub async fn bind(self) -> Result<RangeServerHandle, WebSrcError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.configuration.port));
        let tcp_listener = tokio::net::TcpListener::bind(&addr).await?;
        let addr = tcp_listener.local_addr()?;
        let token = CancellationToken::new();

        let shared = Arc::new(self);
        let accept_token = token.clone();
        tokio::spawn(async move {
            loop {
                let (socket, _) = tokio::select! {
                    _ = accept_token.cancelled() => break,
                    accepted = tcp_listener.accept() => match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!("Error accepting connection: {}", err);
                            continue;
                        }
                    },
                };

                let io = TokioIo::new(socket);
                let server = shared.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let server = server.clone();
                        async move { server.respond(req) }
                    });
                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        tracing::debug!("Error serving connection: {}", err);
                    }
                });
            }
        });

        tracing::debug!("Range server listening on {}", addr);
        Ok(RangeServerHandle { addr, token })
    }

    fn respond(&self, req: Request<hyper::body::Incoming>) -> Result<Response<ServerBody>, Infallible> {
        let path = req.uri().path();
        tracing::debug!("{} {}", req.method(), path);

        if path == "/missing" {
            return Ok(empty_response(StatusCode::NOT_FOUND, Vec::new()));
        }
        if let Some(target) = path.strip_prefix("/redirect") {
            let location = if target.is_empty() { "/".to_string() } else { target.to_string() };
            return Ok(empty_response(StatusCode::FOUND, vec![("Location", location)]));
        }

        let size = self.body.len() as u64;
        let range = req
            .headers()
            .get("Range")
            .and_then(|range| range.to_str().ok())
            .and_then(parse_byte_range);

        let mut headers = vec![("Content-Type", "application/octet-stream".to_string())];
        if self.configuration.accept_ranges {
            headers.push(("Accept-Ranges", "bytes".to_string()));
        }

        let (status, body) = match range {
            Some((start, _)) if start >= size => {
                headers.push(("Content-Range", format!("bytes */{}", size)));
                return Ok(empty_response(StatusCode::RANGE_NOT_SATISFIABLE, headers));
            }
            Some((start, end)) => {
                let end = end.map_or(size - 1, |end| end.min(size - 1));
                headers.push(("Content-Range", format!("bytes {}-{}/{}", start, end, size)));
                (StatusCode::PARTIAL_CONTENT, self.body.slice(start as usize..=end as usize))
            }
            None => (StatusCode::OK, self.body.clone()),
        };

        let body = if self.configuration.chunked {
            BoxBody::new(StreamBody::new(frames(body, self.configuration.chunk_size)))
        } else {
            headers.push(("Content-Length", body.len().to_string()));
            BoxBody::new(Full::new(body))
        };

        Ok(build_response(status, headers, body))
    }
}

/// Keeps a [`RangeServer`] running.
pub struct RangeServerHandle {
    addr: SocketAddr,
    token: CancellationToken,
}

impl RangeServerHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

impl Drop for RangeServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn frames(body: Bytes, chunk_size: usize) -> impl Stream<Item = Result<hyper::body::Frame<Bytes>, Infallible>> {
    let chunk_size = chunk_size.max(1);
    stream! {
        let mut offset = 0;
        while offset < body.len() {
            let end = (offset + chunk_size).min(body.len());
            yield Ok(hyper::body::Frame::data(body.slice(offset..end)));
            offset = end;
        }
    }
}

fn empty_response(status: StatusCode, headers: Vec<(&'static str, String)>) -> Response<ServerBody> {
    build_response(status, headers, BoxBody::new(Empty::new()))
}

fn build_response(status: StatusCode, headers: Vec<(&'static str, String)>, body: ServerBody) -> Response<ServerBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    for (name, value) in headers {
        if let Ok(value) = value.parse::<hyper::header::HeaderValue>() {
            response.headers_mut().append(name, value);
        }
    }
    response
}
