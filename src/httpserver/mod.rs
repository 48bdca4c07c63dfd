pub mod config;
pub mod httpserver;

pub use config::RangeServerConfig;
pub use httpserver::{RangeServer, RangeServerHandle};
