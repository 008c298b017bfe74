use std::collections::VecDeque;

/// Number of samples kept for the rate chart.
pub const DEFAULT_CAPACITY: usize = 20;

/// Multiplier applied to the highest observed rate to get the chart's Y bound.
pub const DEFAULT_HEADROOM: f64 = 1.2;

/// One chart point: when it was taken and the rate the worker reported.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySample {
    /// Local wall-clock time, `HH:MM:SS`.
    pub timestamp: String,
    pub rate: f64,
}

impl HistorySample {
    pub fn new(timestamp: impl Into<String>, rate: f64) -> Self {
        Self {
            timestamp: timestamp.into(),
            rate,
        }
    }

    /// Sample stamped with the current local time.
    pub fn now(rate: f64) -> Self {
        Self::new(chrono::Local::now().format("%H:%M:%S").to_string(), rate)
    }
}

/// Fixed-capacity, append-only window of recent samples.
///
/// Oldest samples are evicted first once the capacity is reached, so
/// iteration order is always chronological.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer {
    samples: VecDeque<HistorySample>,
    capacity: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl HistoryBuffer {
    /// A zero capacity is bumped to one so the latest sample is always kept.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn append(&mut self, sample: HistorySample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Read-only view in chronological order.
    pub fn snapshot(&self) -> impl ExactSizeIterator<Item = &HistorySample> + '_ {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&HistorySample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_rate(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.rate).reduce(f64::max)
    }

    /// Upper bound for the chart's Y axis: `max_rate * headroom`, or `1.0`
    /// when there is nothing above zero to scale from.
    pub fn y_axis_upper_bound(&self, headroom: f64) -> f64 {
        match self.max_rate() {
            Some(max) if max > 0.0 => max * headroom,
            _ => 1.0,
        }
    }
}
