uniffi::setup_scaffolding!();

pub mod config;
pub mod error;
pub mod events;
pub mod ffi;
pub mod httpserver;
pub mod loader;
pub mod reader;
pub mod source;

mod stream;

pub use config::WebSrcConfig;
pub use error::{LoadError, WebSrcError};
pub use events::SourceEvent;
pub use loader::LoaderContext;
pub use reader::SourceReader;
pub use source::{Chunk, PullOutcome, PullSource, SeekSegment, WebSource};
