use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

/// FIFO of received chunks. The producer appends whole chunks, the consumer takes up to N bytes
/// at a time, splitting the front chunk when needed.
#[derive(Debug, Default)]
pub struct ByteQueue {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ByteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.len += data.len();
        self.chunks.push_back(data);
    }

    /// Take up to `max` bytes from the front. Avoids copying when the front chunk alone can
    /// satisfy the request.
    pub fn take(&mut self, max: usize) -> Bytes {
        let wanted = max.min(self.len);
        if wanted == 0 {
            return Bytes::new();
        }

        if let Some(front) = self.chunks.front_mut() {
            if front.len() >= wanted {
                let out = front.split_to(wanted);
                if front.is_empty() {
                    self.chunks.pop_front();
                }
                self.len -= wanted;
                return out;
            }
        }

        let mut out = BytesMut::with_capacity(wanted);
        while out.len() < wanted {
            let Some(mut front) = self.chunks.pop_front() else {
                break;
            };
            let missing = wanted - out.len();
            if front.len() > missing {
                out.extend_from_slice(&front.split_to(missing));
                self.chunks.push_front(front);
            } else {
                out.extend_from_slice(&front);
            }
        }

        self.len -= out.len();
        out.freeze()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }
}
