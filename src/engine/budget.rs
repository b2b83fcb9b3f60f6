//! Sample budget accounting.

/// Remaining number of samples to write before a graceful stop.
///
/// A budget created from zero is unbounded. A limited budget counts down to
/// zero and never wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleBudget {
    remaining: Option<u64>,
}

impl SampleBudget {
    /// Budget from the user-facing sample count (0 = unbounded).
    pub fn from_count(count: u64) -> Self {
        Self {
            remaining: (count != 0).then_some(count),
        }
    }

    /// Unbounded budget.
    pub fn unbounded() -> Self {
        Self { remaining: None }
    }

    /// Whether the budget has no limit.
    pub fn is_unbounded(&self) -> bool {
        self.remaining.is_none()
    }

    /// Remaining samples, `None` when unbounded.
    pub fn remaining(&self) -> Option<u64> {
        self.remaining
    }

    /// Whether a limited budget has reached zero.
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Clamp a window of `len` bytes to the bytes still allowed.
    pub fn clamp_bytes(&self, len: usize, sample_size: usize) -> usize {
        match self.remaining {
            Some(remaining) => {
                let allowed = remaining.saturating_mul(sample_size as u64);
                len.min(usize::try_from(allowed).unwrap_or(usize::MAX))
            }
            None => len,
        }
    }

    /// Account for `samples` written. Returns whether the budget just ran out.
    pub fn consume(&mut self, samples: u64) -> bool {
        match self.remaining.as_mut() {
            Some(remaining) if *remaining > 0 => {
                *remaining = remaining.saturating_sub(samples);
                *remaining == 0
            }
            _ => false,
        }
    }
}

impl Default for SampleBudget {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_unbounded() {
        let mut budget = SampleBudget::from_count(0);
        assert!(budget.is_unbounded());
        assert_eq!(budget.clamp_bytes(4096, 4), 4096);
        assert!(!budget.consume(1_000_000));
        assert!(!budget.is_exhausted());
    }

    #[test]
    fn test_clamp_to_remaining_samples() {
        let budget = SampleBudget::from_count(10);
        assert_eq!(budget.clamp_bytes(1024, 4), 40);
        assert_eq!(budget.clamp_bytes(16, 4), 16);
    }

    #[test]
    fn test_consume_reports_exhaustion_once() {
        let mut budget = SampleBudget::from_count(5);
        assert!(!budget.consume(3));
        assert_eq!(budget.remaining(), Some(2));
        assert!(budget.consume(2));
        assert!(budget.is_exhausted());
        assert!(!budget.consume(1));
        assert_eq!(budget.remaining(), Some(0));
    }
}
