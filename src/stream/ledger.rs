/// Where the current request is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Idle,
    Pending,
    HeadersReceived,
    Streaming,
    Eos,
    Error,
}

/// Bookkeeping of the current request. A new generation is started on every issue and on every
/// cancellation, so callbacks carrying an older generation can be told apart and dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLedger {
    pub generation: u64,
    pub requested_position: u64,
    /// Exclusive end of the requested range, `None` for "until the end".
    pub stop_position: Option<u64>,
    /// Position of the next byte the network will hand us.
    pub read_position: u64,
    /// Position of the next byte the consumer will be handed.
    pub delivered_position: u64,
    /// A request must be issued on the next pull.
    pub pending: bool,
    /// A request has been handed out and not cancelled since.
    pub outstanding: bool,
    pub phase: RequestPhase,
}

impl Default for RequestLedger {
    fn default() -> Self {
        Self {
            generation: 0,
            requested_position: 0,
            stop_position: None,
            read_position: 0,
            delivered_position: 0,
            pending: true,
            outstanding: false,
            phase: RequestPhase::Idle,
        }
    }
}

impl RequestLedger {
    /// Start a new generation reading from `position`.
    pub fn begin(&mut self, position: u64, stop_position: Option<u64>) -> u64 {
        self.generation += 1;
        self.requested_position = position;
        self.read_position = position;
        self.stop_position = stop_position;
        self.pending = false;
        self.outstanding = true;
        self.phase = RequestPhase::Pending;
        self.generation
    }

    /// Supersede the outstanding request. Returns false, leaving the ledger untouched, when there
    /// is nothing to supersede.
    pub fn supersede(&mut self) -> bool {
        if !self.outstanding {
            return false;
        }
        self.generation += 1;
        self.outstanding = false;
        true
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Seek target recorded for the next issue.
    pub fn retarget(&mut self, start: u64, stop_position: Option<u64>) {
        self.requested_position = start;
        self.read_position = start;
        self.delivered_position = start;
        self.stop_position = stop_position;
        self.pending = true;
        self.phase = RequestPhase::Pending;
    }

    pub fn has_range(&self) -> bool {
        self.requested_position > 0 || self.stop_position.is_some()
    }

    /// `Range` header value for the current request, if it needs one.
    pub fn range_header(&self) -> Option<String> {
        if !self.has_range() {
            return None;
        }

        Some(match self.stop_position {
            Some(stop) => format!("bytes={}-{}", self.requested_position, stop.saturating_sub(1)),
            None => format!("bytes={}-", self.requested_position),
        })
    }
}
