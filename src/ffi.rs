use std::sync::Arc;

use crate::config::WebSrcConfig;
use crate::error::WebSrcError;
use crate::loader::{HttpLoader, LoaderContext};
use crate::source::{PullOutcome, PullSource, SeekSegment, WebSource};

#[derive(uniffi::Enum, Debug, Clone, PartialEq, Eq)]
pub enum PulledChunk {
    Data { offset: u64, bytes: Vec<u8> },
    EndOfStream,
    Flushing,
}

impl From<PullOutcome> for PulledChunk {
    fn from(outcome: PullOutcome) -> Self {
        match outcome {
            PullOutcome::Chunk(chunk) => PulledChunk::Data { offset: chunk.offset, bytes: chunk.data.to_vec() },
            PullOutcome::EndOfStream => PulledChunk::EndOfStream,
            PullOutcome::Flushing => PulledChunk::Flushing,
        }
    }
}

/// Media source over HTTP for foreign players.
#[derive(uniffi::Object)]
pub struct HttpMediaSource {
    source: WebSource,
}

#[uniffi::export]
impl HttpMediaSource {
    #[uniffi::constructor]
    pub fn new(config: WebSrcConfig, referrer: Option<String>) -> Result<Self, WebSrcError> {
        let loader = Arc::new(HttpLoader::new()?);
        let context = LoaderContext { loader: Some(loader), referrer };
        Ok(Self { source: WebSource::new(config, context)? })
    }

    #[uniffi::constructor]
    pub fn from_ron(config: String, referrer: Option<String>) -> Result<Self, WebSrcError> {
        Self::new(WebSrcConfig::from_ron(&config)?, referrer)
    }

    pub fn start(&self) -> Result<(), WebSrcError> {
        self.source.start()
    }

    pub fn stop(&self) {
        self.source.stop()
    }

    pub fn unlock(&self) {
        self.source.unlock()
    }

    pub fn unlock_stop(&self) {
        self.source.unlock_stop()
    }

    pub fn size(&self) -> Option<u64> {
        self.source.size()
    }

    pub fn is_seekable(&self) -> bool {
        self.source.is_seekable()
    }

    pub fn seek(&self, start: u64, stop: Option<u64>) -> Result<bool, WebSrcError> {
        self.source.seek(SeekSegment::bytes(start, stop))
    }

    /// Blocks until data is available.
    pub fn pull(&self) -> Result<PulledChunk, WebSrcError> {
        self.source.pull().map(PulledChunk::from)
    }

    pub fn resolved_location(&self) -> String {
        self.source.resolved_location()
    }
}
