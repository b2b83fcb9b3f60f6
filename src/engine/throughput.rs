//! Benchmark throughput measurement.
//!
//! Each push is timed; its instantaneous rate is
//! `capacity * sample_size * 1_000_000 / elapsed_us` bytes per second. Rates
//! are summed over a window of [`PUSHES_PER_REPORT`] pushes, then averaged,
//! reported and reset. The unit of a report follows the rate of the push that
//! closed the window.

use std::fmt;
use std::time::Duration;

/// Number of pushes in one benchmark window.
pub const PUSHES_PER_REPORT: u32 = 10;

/// Rate above which reports switch from KiB/s to MiB/s, in bytes per second.
pub const MIB_THRESHOLD: u64 = 1_000_000;

/// Average rate over one benchmark window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throughput {
    /// Bytes per second
    pub bytes_per_sec: u64,
    /// Report in MiB/s rather than KiB/s
    pub mib: bool,
}

impl Throughput {
    /// Window average `bytes_per_sec`, with the unit picked from `last_rate`.
    pub fn new(bytes_per_sec: u64, last_rate: u64) -> Self {
        Self {
            bytes_per_sec,
            mib: last_rate > MIB_THRESHOLD,
        }
    }

    /// Whether this rate is reported in MiB/s.
    pub fn is_mib(&self) -> bool {
        self.mib
    }

    /// Rate in the reported unit.
    pub fn value(&self) -> u64 {
        if self.is_mib() {
            self.bytes_per_sec / 1_000_000
        } else {
            self.bytes_per_sec / 1_000
        }
    }

    /// Reported unit.
    pub fn unit(&self) -> &'static str {
        if self.is_mib() {
            "MiB/s"
        } else {
            "KiB/s"
        }
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value(), self.unit())
    }
}

/// Throughput accumulator owned by the streaming engine.
#[derive(Debug, Clone)]
pub struct ThroughputMeter {
    bytes_per_push: u64,
    total: u64,
    pushes: u32,
}

impl ThroughputMeter {
    /// Meter for pushes of `capacity` samples of `sample_size` bytes.
    pub fn new(capacity: usize, sample_size: usize) -> Self {
        Self {
            bytes_per_push: (capacity as u64).saturating_mul(sample_size as u64),
            total: 0,
            pushes: 0,
        }
    }

    /// Instantaneous rate of one push lasting `elapsed`.
    pub fn rate(&self, elapsed: Duration) -> u64 {
        let micros = elapsed.as_micros().max(1);
        let rate = u128::from(self.bytes_per_push) * 1_000_000 / micros;
        u64::try_from(rate).unwrap_or(u64::MAX)
    }

    /// Record one push. Returns the window average when the window is full.
    pub fn record(&mut self, elapsed: Duration) -> Option<Throughput> {
        let rate = self.rate(elapsed);
        self.total = self.total.saturating_add(rate);
        self.pushes += 1;

        if self.pushes < PUSHES_PER_REPORT {
            return None;
        }

        let average = self.total / u64::from(PUSHES_PER_REPORT);
        self.total = 0;
        self.pushes = 0;
        Some(Throughput::new(average, rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_after_exactly_ten_pushes() {
        let mut meter = ThroughputMeter::new(256, 4);
        for _ in 0..PUSHES_PER_REPORT - 1 {
            assert!(meter.record(Duration::from_micros(1000)).is_none());
        }
        let report = meter.record(Duration::from_micros(1000)).unwrap();
        // 1024 bytes per ms
        assert_eq!(report.bytes_per_sec, 1_024_000);
        assert!(report.is_mib());
        assert_eq!(report.to_string(), "1 MiB/s");

        // Accumulator was reset
        for _ in 0..PUSHES_PER_REPORT - 1 {
            assert!(meter.record(Duration::from_micros(2000)).is_none());
        }
        let report = meter.record(Duration::from_micros(2000)).unwrap();
        assert_eq!(report.bytes_per_sec, 512_000);
        assert_eq!(report.to_string(), "512 KiB/s");
    }

    #[test]
    fn test_average_over_uneven_pushes() {
        let mut meter = ThroughputMeter::new(100, 10);
        let mut last = None;
        for i in 0..PUSHES_PER_REPORT {
            let elapsed = if i % 2 == 0 { 1000 } else { 500 };
            last = meter.record(Duration::from_micros(elapsed));
        }
        // (1_000_000 + 2_000_000) / 2
        assert_eq!(last.unwrap().bytes_per_sec, 1_500_000);
    }

    #[test]
    fn test_unit_threshold() {
        let at = Throughput::new(MIB_THRESHOLD, MIB_THRESHOLD);
        assert!(!at.is_mib());
        assert_eq!(at.to_string(), "1000 KiB/s");

        let above = Throughput::new(MIB_THRESHOLD + 1, MIB_THRESHOLD + 1);
        assert!(above.is_mib());
        assert_eq!(above.to_string(), "1 MiB/s");
    }

    #[test]
    fn test_unit_follows_last_push() {
        // Nine fast pushes then a slow one: the average is above the
        // threshold but the closing push is not.
        let mut meter = ThroughputMeter::new(1000, 1);
        for _ in 0..PUSHES_PER_REPORT - 1 {
            assert!(meter.record(Duration::from_micros(100)).is_none());
        }
        let report = meter.record(Duration::from_micros(10_000)).unwrap();
        assert_eq!(report.bytes_per_sec, 9_010_000);
        assert!(!report.is_mib());
        assert_eq!(report.to_string(), "9010 KiB/s");

        // And the other way round
        for _ in 0..PUSHES_PER_REPORT - 1 {
            assert!(meter.record(Duration::from_micros(10_000)).is_none());
        }
        let report = meter.record(Duration::from_micros(100)).unwrap();
        assert_eq!(report.bytes_per_sec, 1_090_000);
        assert!(report.is_mib());
        assert_eq!(report.to_string(), "1 MiB/s");
    }

    #[test]
    fn test_zero_elapsed_does_not_divide_by_zero() {
        let meter = ThroughputMeter::new(1, 1);
        assert_eq!(meter.rate(Duration::ZERO), 1_000_000);
    }
}
