#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RangeServerConfig {
    /// 0 picks a free port.
    pub port: u16,
    pub chunk_size: usize,
    pub accept_ranges: bool,
    /// Stream without `Content-Length`.
    pub chunked: bool,
}

impl Default for RangeServerConfig {
    fn default() -> Self {
        Self { port: 0, chunk_size: 16 * 1024, accept_ranges: true, chunked: false }
    }
}
