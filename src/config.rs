use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::WebSrcError;

/// Never pause download of media resources smaller than 2MiB.
pub const SMALL_MEDIA_RESOURCE_MAX_SIZE: u64 = 2 * 1024 * 1024;

/// Keep at most 2% of a non-small resource buffered before pausing the download.
pub const HIGH_WATER_BASIS_POINTS: u32 = 200;

/// Resume once the queue drops under 20% of the high watermark.
pub const LOW_WATER_PERCENT: u32 = 20;

pub const DEFAULT_BLOCKSIZE: u32 = 4096;

const SUPPORTED_SCHEMES: [&str; 3] = ["http", "https", "blob"];

#[derive(uniffi::Record, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct WebSrcConfig {
    pub location: String,
    /// HTTP method, GET when unset.
    pub method: Option<String>,
    pub keep_alive: bool,
    /// Allow the server to encode the response. Off by default so that Content-Length matches
    /// the bytes we are handed.
    pub compress: bool,
    pub extra_headers: HashMap<String, Vec<String>>,
    pub request_icy_metadata: bool,
    /// Initial preferred read size, also the floor the block size never shrinks under.
    pub blocksize: u32,
    pub small_resource_max_size: u64,
    pub high_water_basis_points: u32,
    pub low_water_percent: u32,
}

impl Default for WebSrcConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            method: None,
            keep_alive: false,
            compress: false,
            extra_headers: HashMap::new(),
            request_icy_metadata: true,
            blocksize: DEFAULT_BLOCKSIZE,
            small_resource_max_size: SMALL_MEDIA_RESOURCE_MAX_SIZE,
            high_water_basis_points: HIGH_WATER_BASIS_POINTS,
            low_water_percent: LOW_WATER_PERCENT,
        }
    }
}

impl WebSrcConfig {
    pub fn new(location: impl Into<String>) -> Self {
        Self { location: location.into(), ..Default::default() }
    }

    pub fn from_ron(config: &str) -> Result<Self, WebSrcError> {
        let config: WebSrcConfig = ron::de::from_str(config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_ron(&self) -> Result<String, WebSrcError> {
        Ok(ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?)
    }

    pub fn validate(&self) -> Result<(), WebSrcError> {
        self.parsed_location()?;

        if self.blocksize == 0 {
            return Err(WebSrcError::Config { message: "blocksize must be positive".to_string() });
        }
        if !(1..=10_000).contains(&self.high_water_basis_points) {
            return Err(WebSrcError::Config {
                message: format!("high water mark of {} basis points is out of range", self.high_water_basis_points),
            });
        }
        if !(1..=100).contains(&self.low_water_percent) {
            return Err(WebSrcError::Config {
                message: format!("low water mark of {}% is out of range", self.low_water_percent),
            });
        }

        Ok(())
    }

    pub fn parsed_location(&self) -> Result<Url, WebSrcError> {
        let invalid = || WebSrcError::InvalidLocation { location: self.location.clone() };

        let url = Url::parse(&self.location).map_err(|_| invalid())?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(invalid());
        }

        Ok(url)
    }
}
