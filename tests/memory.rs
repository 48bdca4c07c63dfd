#[cfg(test)]
mod tests {
    use std::io::{Read, Seek, SeekFrom};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use bytes::Bytes;
    use rand::Rng;
    use test_context::{test_context, TestContext};
    use url::Url;
    use websrc::events::StreamCaps;
    use websrc::loader::{MemoryLoader, MemoryResource};
    use websrc::{
        LoaderContext, PullOutcome, PullSource, SeekSegment, SourceEvent, SourceReader, WebSource, WebSrcConfig,
        WebSrcError,
    };

    const URL: &str = "http://localhost/video.mp4";

    struct MemoryTestContext {
        loader: Arc<MemoryLoader>,
        body: Bytes,
    }

    impl TestContext for MemoryTestContext {
        fn setup() -> Self {
            let mut body = vec![0u8; 200_000];
            rand::rng().fill(&mut body[..]);

            MemoryTestContext { loader: Arc::new(MemoryLoader::new()), body: Bytes::from(body) }
        }
    }

    impl MemoryTestContext {
        fn serve(&self, resource: MemoryResource) -> WebSource {
            self.loader.insert(URL, resource);
            let source = WebSource::new(WebSrcConfig::new(URL), LoaderContext::new(self.loader.clone())).unwrap();
            source.start().unwrap();
            source
        }
    }

    /// Pull until the end of the stream, checking that chunks are contiguous.
    fn pull_to_end(source: &WebSource, mut position: u64) -> Result<Vec<u8>, WebSrcError> {
        let mut out = Vec::new();
        loop {
            match source.pull()? {
                PullOutcome::Chunk(chunk) => {
                    assert_eq!(chunk.offset, position);
                    position += chunk.data.len() as u64;
                    out.extend_from_slice(&chunk.data);
                }
                PullOutcome::EndOfStream => return Ok(out),
                PullOutcome::Flushing => panic!("unexpected flush"),
            }
        }
    }

    fn drain(events: &mut tokio::sync::broadcast::Receiver<SourceEvent>) -> Vec<SourceEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_reads_whole_resource(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource::new(ctx.body.clone()));
        let mut events = source.subscribe();

        assert_eq!(pull_to_end(&source, 0).unwrap(), ctx.body);
        assert_eq!(source.size(), Some(ctx.body.len() as u64));
        assert!(source.is_seekable());
        assert!(source.blocksize() >= 4096);

        let received = drain(&mut events);
        assert!(received.contains(&SourceEvent::DurationChanged { size: ctx.body.len() as u64 }));
        assert!(received.contains(&SourceEvent::HasEos));
        assert!(received.iter().any(|event| matches!(
            event,
            SourceEvent::HttpHeaders(headers) if headers.status_code == 200 && headers.uri == URL
        )));
        assert!(received.iter().any(|event| matches!(event, SourceEvent::Statistics { .. })));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_request_headers(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource::new(ctx.body.clone()));
        pull_to_end(&source, 0).unwrap();
        source.seek(SeekSegment::bytes(1000, Some(2000))).unwrap();
        pull_to_end(&source, 1000).unwrap();

        let requests = ctx.loader.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].header("range"), None);
        assert_eq!(requests[0].header("icy-metadata"), Some("1"));
        assert_eq!(requests[0].header("connection"), Some("close"));
        assert_eq!(requests[1].header("range"), Some("bytes=1000-1999"));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_random_seeks_return_requested_bytes(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource::new(ctx.body.clone()));
        let length = ctx.body.len() as u64;
        let mut rng = rand::rng();

        pull_to_end(&source, 0).unwrap();
        let mut generation = source.generation();

        for _ in 0..20 {
            let start = rng.random_range(0..length);
            let stop = rng.random_bool(0.5).then(|| rng.random_range(start + 1..=length));
            assert_eq!(source.seek(SeekSegment::bytes(start, stop)), Ok(true));

            let Ok(PullOutcome::Chunk(chunk)) = source.pull() else {
                panic!("expected data after seeking to {}", start);
            };
            assert_eq!(chunk.offset, start);
            let end = start as usize + chunk.data.len();
            assert_eq!(chunk.data, ctx.body.slice(start as usize..end));
            assert!(end as u64 <= stop.unwrap_or(length));

            assert!(source.generation() > generation);
            generation = source.generation();
        }
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_bounded_range_ends_at_stop(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource::new(ctx.body.clone()));
        source.seek(SeekSegment::bytes(5000, Some(15000))).unwrap();

        assert_eq!(pull_to_end(&source, 5000).unwrap(), ctx.body.slice(5000..15000));
        assert_eq!(source.size(), Some(ctx.body.len() as u64));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_http_error(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource { status: Some(403), ..MemoryResource::new(Bytes::new()) });
        assert_eq!(source.pull(), Err(WebSrcError::HttpStatus { status: 403 }));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_connection_failure(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource { fail_to_connect: true, ..MemoryResource::new(ctx.body.clone()) });
        assert!(matches!(source.pull(), Err(WebSrcError::Transport { .. })));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_failure_midway_ends_stream(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource {
            chunk_size: 4096,
            fail_after: Some(8192),
            ..MemoryResource::new(ctx.body.clone())
        });
        let mut events = source.subscribe();

        assert_eq!(pull_to_end(&source, 0).unwrap(), ctx.body.slice(..8192));
        assert!(drain(&mut events).iter().any(|event| matches!(event, SourceEvent::Error(WebSrcError::Transport { .. }))));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_request_setup_failure_drops_loader(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource::new(ctx.body.clone()));
        ctx.loader.refuse_requests(true);

        assert_eq!(source.pull(), Err(WebSrcError::RequestSetupFailed));
        assert_eq!(source.pull(), Err(WebSrcError::NoLoader));

        ctx.loader.refuse_requests(false);
        assert_eq!(source.pull(), Err(WebSrcError::NoLoader));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_unknown_length_is_learned_at_eos(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource {
            chunked: true,
            accept_ranges: None,
            chunk_delay: Some(Duration::from_millis(2)),
            ..MemoryResource::new(ctx.body.clone())
        });
        let mut events = source.subscribe();

        let Ok(PullOutcome::Chunk(_)) = source.pull() else {
            panic!("expected data");
        };
        assert_eq!(source.size(), None);
        assert!(!source.is_seekable());

        pull_to_end(&source, 4096).unwrap();
        assert_eq!(source.size(), Some(ctx.body.len() as u64));
        assert!(source.is_seekable());

        let received = drain(&mut events);
        assert!(received.contains(&SourceEvent::DurationChanged { size: ctx.body.len() as u64 }));
        assert!(received.contains(&SourceEvent::LiveStreamChanged { is_live: false }));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_encoded_length_is_unknown(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource {
            content_encoding: Some("gzip".to_string()),
            chunk_delay: Some(Duration::from_millis(2)),
            ..MemoryResource::new(ctx.body.clone())
        });

        let Ok(PullOutcome::Chunk(_)) = source.pull() else {
            panic!("expected data");
        };
        assert_eq!(source.size(), None);
        assert!(!source.is_seekable());
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_unseekable_resource_ignores_later_seeks(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource {
            accept_ranges: Some("none".to_string()),
            ..MemoryResource::new(ctx.body.clone())
        });

        let Ok(PullOutcome::Chunk(chunk)) = source.pull() else {
            panic!("expected data");
        };
        assert_eq!(source.size(), Some(ctx.body.len() as u64));
        assert!(!source.is_seekable());

        let generation = source.generation();
        assert_eq!(source.seek(SeekSegment::bytes(100, None)), Ok(false));
        assert_eq!(source.generation(), generation);

        let rest = pull_to_end(&source, chunk.data.len() as u64).unwrap();
        assert_eq!(chunk.data.len() + rest.len(), ctx.body.len());
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_malformed_seek_is_rejected(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource::new(ctx.body.clone()));
        let reversed = SeekSegment { rate: -1.0, ..SeekSegment::bytes(10, None) };

        assert!(matches!(source.seek(reversed), Err(WebSrcError::MalformedSeek { .. })));
        assert_eq!(source.generation(), 0);
        assert_eq!(pull_to_end(&source, 0).unwrap(), ctx.body);
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_redirect_is_tracked(ctx: &mut MemoryTestContext) {
        let cdn = Url::parse("http://cdn.example.com/video.mp4").unwrap();
        let source = ctx.serve(MemoryResource { redirect_to: Some(cdn.clone()), ..MemoryResource::new(ctx.body.clone()) });

        assert_eq!(pull_to_end(&source, 0).unwrap(), ctx.body);
        assert_eq!(source.uri(), URL);
        assert_eq!(source.resolved_location(), cdn.as_str());
        assert!(source.passed_access_control_check());
        assert!(source.is_cross_origin("http://localhost"));
        assert!(source.is_cross_origin("http://cdn.example.com"));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_same_origin(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource::new(ctx.body.clone()));
        pull_to_end(&source, 0).unwrap();

        assert_eq!(source.resolved_location(), URL);
        assert!(!source.is_cross_origin("http://localhost"));
        assert!(source.is_cross_origin("https://localhost"));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_access_control_failure(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource { passes_access_control: false, ..MemoryResource::new(ctx.body.clone()) });
        assert!(matches!(source.pull(), Err(WebSrcError::AccessControl { .. })));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_icecast_caps_come_before_data(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource {
            icy_metaint: Some(16000),
            content_type: Some("audio/mpeg".to_string()),
            ..MemoryResource::new(ctx.body.clone())
        });
        let mut events = source.subscribe();

        let Ok(PullOutcome::Chunk(_)) = source.pull() else {
            panic!("expected data");
        };
        let caps = StreamCaps { metadata_interval: 16000, content_type: Some("audio/mpeg".to_string()) };
        let announced = drain(&mut events)
            .into_iter()
            .find(|event| !matches!(event, SourceEvent::Statistics { .. }));
        assert_eq!(announced, Some(SourceEvent::Caps(caps)));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_stop_forgets_resource(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource::new(ctx.body.clone()));
        source.seek(SeekSegment::bytes(1000, None)).unwrap();
        let Ok(PullOutcome::Chunk(_)) = source.pull() else {
            panic!("expected data");
        };
        assert!(source.is_seekable());

        source.stop();
        assert_eq!(source.size(), None);
        assert!(!source.is_seekable());
        assert_eq!(source.pull(), Err(WebSrcError::NotStarted));

        source.start().unwrap();
        assert_eq!(pull_to_end(&source, 0).unwrap(), ctx.body);
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_large_resource_is_throttled(ctx: &mut MemoryTestContext) {
        let mut body = vec![0u8; 3 * 1024 * 1024];
        rand::rng().fill(&mut body[..]);
        let body = Bytes::from(body);
        let source = ctx.serve(MemoryResource { chunk_size: 16 * 1024, ..MemoryResource::new(body.clone()) });

        let Ok(PullOutcome::Chunk(first)) = source.pull() else {
            panic!("expected data");
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while !source.is_download_suspended() {
            assert!(Instant::now() < deadline, "download was never suspended");
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ctx.loader.requests().len(), 1);

        let mut out = first.data.to_vec();
        out.extend(pull_to_end(&source, first.data.len() as u64).unwrap());
        assert!(out == body);

        let requests = ctx.loader.requests();
        assert!(requests.len() > 1);
        assert!(requests[1..].iter().all(|request| request.header("range").is_some()));
    }

    #[test_context(MemoryTestContext)]
    #[test]
    fn test_reader_view(ctx: &mut MemoryTestContext) {
        let source = ctx.serve(MemoryResource { chunk_size: 1000, ..MemoryResource::new(ctx.body.clone()) });
        let mut reader = SourceReader::new(source);

        let mut head = vec![0; 2500];
        reader.read_exact(&mut head).unwrap();
        assert_eq!(head, ctx.body.slice(..2500));
        assert_eq!(reader.position(), 2500);

        assert_eq!(reader.seek(SeekFrom::Start(150_000)).unwrap(), 150_000);
        let mut middle = vec![0; 4000];
        reader.read_exact(&mut middle).unwrap();
        assert_eq!(middle, ctx.body.slice(150_000..154_000));

        assert_eq!(reader.seek(SeekFrom::End(-100)).unwrap(), ctx.body.len() as u64 - 100);
        let mut tail = Vec::new();
        reader.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, ctx.body.slice(ctx.body.len() - 100..));
    }
}
