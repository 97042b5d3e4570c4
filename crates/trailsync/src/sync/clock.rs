use std::collections::VecDeque;

use crate::Frame;

/// Frame offset between server and client derived from one `Synchronize` round trip.
///
/// `latency` is half the round trip in frames; the extra `latency / 2` term is part of the
/// protocol's definition and both ends rely on it.
pub fn frame_delta(client_frame: Frame, sent_frame: Frame, server_frame: Frame) -> i64 {
    let latency = client_frame.saturating_sub(sent_frame) as i64 / 2;
    (server_frame as i64 - client_frame as i64) + latency / 2
}

/// Sliding window of clock samples producing median-based corrections.
#[derive(Debug, Clone)]
pub struct ClockSync {
    samples: VecDeque<i64>,
    window: usize,
    threshold: i64,
}

impl ClockSync {
    pub fn new(window: usize, threshold: i64) -> Self {
        Self {
            samples: VecDeque::with_capacity(window.max(1)),
            window: window.max(1),
            threshold,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Records a sample and returns the correction to apply, if any.
    ///
    /// Once a correction is returned the caller is expected to apply it; the stored samples are
    /// shifted by the same amount so they describe the corrected clock.
    pub fn push(&mut self, delta: i64) -> Option<i64> {
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(delta);

        let correction = self.correction()?;
        for sample in self.samples.iter_mut() {
            *sample -= correction;
        }
        Some(correction)
    }

    /// Median of the window if it exceeds both the threshold and the standard deviation.
    pub fn correction(&self) -> Option<i64> {
        let median = self.median()?;
        let magnitude = median.unsigned_abs();

        if magnitude <= self.threshold.unsigned_abs() {
            return None;
        }
        if (magnitude as f64) <= self.std_dev() {
            return None;
        }
        Some(median)
    }

    pub fn median(&self) -> Option<i64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<i64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2)
        } else {
            Some(sorted[mid])
        }
    }

    pub fn std_dev(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let count = self.samples.len() as f64;
        let mean = self.samples.iter().sum::<i64>() as f64 / count;
        let variance = self
            .samples
            .iter()
            .map(|s| {
                let diff = *s as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / count;
        variance.sqrt()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
