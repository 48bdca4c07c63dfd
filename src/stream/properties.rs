/// Resource-wide facts learned from the first response and, for unknown lengths, at EOS.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamProperties {
    pub size: Option<u64>,
    pub is_seekable: bool,
    pub is_eos: bool,
    /// The server explicitly answered `Accept-Ranges: none`.
    pub ranges_refused: bool,
}

impl StreamProperties {
    /// Record what the response headers told us. A resource is only seekable when its length is
    /// known.
    pub fn apply_response(&mut self, size: Option<u64>, accepts_ranges: bool, ranges_refused: bool) {
        self.size = size.filter(|size| *size > 0);
        self.is_seekable = self.size.is_some() && accepts_ranges;
        self.ranges_refused = ranges_refused;
    }

    /// Once a resource of unknown length ends cleanly, the final read position is its length.
    /// Returns true when the size was inferred.
    ///
    /// An explicit `Accept-Ranges: none` keeps the resource non-seekable even then.
    pub fn infer_at_eos(&mut self, read_position: u64) -> bool {
        if self.is_seekable || self.size.is_some_and(|size| size > 0) || !self.is_eos {
            return false;
        }

        self.size = Some(read_position);
        self.is_seekable = !self.ranges_refused;
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
