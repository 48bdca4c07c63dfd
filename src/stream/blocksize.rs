const GROW_LIMIT: u64 = 1;
const GROW_COUNT: u8 = 2;
const GROW_FACTOR: u32 = 2;
const REDUCE_COUNT: u8 = 2;

/// Grows or shrinks the preferred read size from the sizes of the chunks the network delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSizeAdvisor {
    current: u32,
    minimum: u32,
    grow_streak: u8,
    shrink_streak: u8,
}

impl BlockSizeAdvisor {
    pub fn new(initial: u32) -> Self {
        let initial = initial.max(1);
        Self { current: initial, minimum: initial, grow_streak: 0, shrink_streak: 0 }
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    pub fn observe(&mut self, bytes_read: usize) {
        let bytes_read = bytes_read as u64;
        let blocksize = self.current as u64;

        if bytes_read > blocksize * GROW_LIMIT {
            self.shrink_streak = 0;
            self.grow_streak += 1;

            if self.grow_streak >= GROW_COUNT {
                self.current = self.current.saturating_mul(GROW_FACTOR);
                tracing::debug!("Increased blocksize to {}", self.current);
                self.grow_streak = 0;
            }
        } else if bytes_read * 2 < blocksize {
            self.grow_streak = 0;
            self.shrink_streak += 1;

            if self.shrink_streak >= REDUCE_COUNT {
                self.current = (self.current / 2).max(self.minimum);
                tracing::debug!("Decreased blocksize to {}", self.current);
                self.shrink_streak = 0;
            }
        } else {
            self.grow_streak = 0;
            self.shrink_streak = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_large_reads_double() {
        let mut advisor = BlockSizeAdvisor::new(4096);
        advisor.observe(5000);
        assert_eq!(advisor.current(), 4096);
        advisor.observe(5000);
        assert_eq!(advisor.current(), 8192);
    }

    #[test]
    fn test_two_small_reads_halve_down_to_floor() {
        let mut advisor = BlockSizeAdvisor::new(4096);
        for _ in 0..4 {
            advisor.observe(100_000);
        }
        assert_eq!(advisor.current(), 16384);

        advisor.observe(10);
        advisor.observe(10);
        assert_eq!(advisor.current(), 8192);

        for _ in 0..10 {
            advisor.observe(10);
        }
        assert_eq!(advisor.current(), 4096);
    }

    #[test]
    fn test_single_outlier_does_not_change() {
        let mut advisor = BlockSizeAdvisor::new(4096);
        advisor.observe(9000);
        advisor.observe(100);
        advisor.observe(9000);
        advisor.observe(3000);
        advisor.observe(9000);
        assert_eq!(advisor.current(), 4096);
    }
}
