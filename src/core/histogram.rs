//! Bucketed duration histograms used for invoker unit profiling.

use std::fmt;
use std::time::Duration;

/// Tracks how many values fell into each of a fixed number of equal-width buckets.
///
/// Values below the minimum land in the first bucket and values at or beyond
/// `min + width * count` land in the last one, so the histogram never grows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Histogram {
    min_value: u64,
    max_value: u64,
    bucket_width: u64,
    buckets: Vec<u32>,
    count: u64,
}

impl Histogram {
    /// Creates a histogram covering `min_value .. min_value + bucket_width * bucket_count`.
    ///
    /// Zero widths and counts are bumped to one. A range reaching past `u64::MAX`
    /// is capped there.
    #[must_use]
    pub fn new(min_value: u64, bucket_width: u64, bucket_count: usize) -> Self {
        let bucket_width = bucket_width.max(1);
        let bucket_count = bucket_count.max(1);
        Self {
            min_value,
            max_value: min_value.saturating_add(bucket_width.saturating_mul(bucket_count as u64)),
            bucket_width,
            buckets: vec![0; bucket_count],
            count: 0,
        }
    }

    /// Registers a value.
    pub fn add_value(&mut self, value: u64) {
        let last = self.buckets.len() - 1;
        let index = if value < self.min_value {
            0
        } else if value >= self.max_value {
            last
        } else {
            let index = (value - self.min_value) / self.bucket_width;
            usize::try_from(index).map_or(last, |i| i.min(last))
        };
        self.buckets[index] = self.buckets[index].saturating_add(1);
        self.count += 1;
    }

    /// Total number of values registered.
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.count
    }

    /// Per-bucket counts.
    #[must_use]
    pub fn buckets(&self) -> &[u32] {
        &self.buckets
    }

    /// Forgets all registered values.
    pub fn clear(&mut self) {
        self.buckets.fill(0);
        self.count = 0;
    }

    /// Terse `count:b0,b1,...` rendering.
    #[must_use]
    pub fn summarize(&self) -> String {
        let buckets: Vec<String> = self.buckets.iter().map(ToString::to_string).collect();
        format!("{}:{}", self.count, buckets.join(","))
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[min={}, max={}, bwidth={}, buckets={:?}]",
            self.min_value, self.max_value, self.bucket_width, self.buckets
        )
    }
}

/// Cumulative timing for one kind of invoker unit.
#[derive(Debug, Clone)]
pub struct UnitProfile {
    histogram: Histogram,
    total_elapsed: Duration,
}

impl UnitProfile {
    /// Creates an empty profile whose histogram buckets are `bucket_width` wide.
    #[must_use]
    pub fn new(bucket_width: Duration, bucket_count: usize) -> Self {
        let width_ms = u64::try_from(bucket_width.as_millis()).unwrap_or(u64::MAX);
        Self {
            histogram: Histogram::new(0, width_ms, bucket_count),
            total_elapsed: Duration::ZERO,
        }
    }

    /// Records one execution.
    pub fn record(&mut self, elapsed: Duration) {
        self.total_elapsed += elapsed;
        self.histogram
            .add_value(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
    }

    /// Number of executions recorded.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.histogram.size()
    }

    /// Sum of all recorded durations.
    #[must_use]
    pub const fn total_elapsed(&self) -> Duration {
        self.total_elapsed
    }

    /// Mean recorded duration, zero when nothing was recorded.
    #[must_use]
    pub fn average(&self) -> Duration {
        u32::try_from(self.count())
            .ok()
            .filter(|count| *count > 0)
            .map_or(Duration::ZERO, |count| self.total_elapsed / count)
    }

    /// The underlying millisecond histogram.
    #[must_use]
    pub const fn histogram(&self) -> &Histogram {
        &self.histogram
    }

    /// Resets the profile.
    pub fn clear(&mut self) {
        self.total_elapsed = Duration::ZERO;
        self.histogram.clear();
    }
}

impl fmt::Display for UnitProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}ms/{} = {}ms avg {:?}",
            self.total_elapsed.as_millis(),
            self.count(),
            self.average().as_millis(),
            self.histogram.buckets()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_fall_into_buckets() {
        let mut histo = Histogram::new(0, 10, 5);
        histo.add_value(0);
        histo.add_value(9);
        histo.add_value(10);
        histo.add_value(49);
        assert_eq!(histo.buckets(), &[2, 1, 0, 0, 1]);
        assert_eq!(histo.size(), 4);
    }

    #[test]
    fn test_out_of_range_values_clamp() {
        let mut histo = Histogram::new(100, 10, 3);
        histo.add_value(5);
        histo.add_value(130);
        histo.add_value(10_000);
        assert_eq!(histo.buckets(), &[1, 0, 2]);
    }

    #[test]
    fn test_huge_bucket_width_saturates() {
        let mut histo = Histogram::new(0, u64::MAX / 4, 10);
        histo.add_value(0);
        histo.add_value(u64::MAX);
        assert_eq!(histo.buckets()[0], 1);
        assert_eq!(histo.buckets()[9], 1);

        let mut profile = UnitProfile::new(Duration::from_millis(u64::MAX / 4), 10);
        profile.record(Duration::from_millis(3));
        assert_eq!(profile.count(), 1);
    }

    #[test]
    fn test_summarize_and_clear() {
        let mut histo = Histogram::new(0, 50, 3);
        histo.add_value(20);
        histo.add_value(70);
        assert_eq!(histo.summarize(), "2:1,1,0");
        histo.clear();
        assert_eq!(histo.summarize(), "0:0,0,0");
    }

    #[test]
    fn test_unit_profile_average() {
        let mut profile = UnitProfile::new(Duration::from_millis(50), 10);
        assert_eq!(profile.average(), Duration::ZERO);
        profile.record(Duration::from_millis(20));
        profile.record(Duration::from_millis(120));
        assert_eq!(profile.count(), 2);
        assert_eq!(profile.total_elapsed(), Duration::from_millis(140));
        assert_eq!(profile.average(), Duration::from_millis(70));
        assert_eq!(profile.histogram().buckets()[0], 1);
        assert_eq!(profile.histogram().buckets()[2], 1);
        assert_eq!(profile.to_string(), "140ms/2 = 70ms avg [1, 0, 1, 0, 0, 0, 0, 0, 0, 0]");
    }
}
