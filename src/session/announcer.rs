use std::time::{Duration, Instant};

/// Rate-limited notice of a newly recognized gesture.
#[derive(Debug)]
pub struct PredictionAnnouncer {
    threshold: f32,
    interval: Duration,
    last_label: Option<String>,
    last_announced: Option<Instant>,
}

impl PredictionAnnouncer {
    pub fn new(threshold: f32, interval: Duration) -> Self {
        Self {
            threshold,
            interval,
            last_label: None,
            last_announced: None,
        }
    }

    /// Returns `true` when `label` should be announced at `now`.
    ///
    /// A label is announced when it differs from the last announced one, its
    /// probability exceeds the threshold and the interval has elapsed.
    pub fn observe(&mut self, label: &str, probability: f32, now: Instant) -> bool {
        if self.last_label.as_deref() == Some(label) || probability <= self.threshold {
            return false;
        }
        if let Some(last) = self.last_announced
            && now.saturating_duration_since(last) < self.interval
        {
            return false;
        }
        self.last_label = Some(label.to_string());
        self.last_announced = Some(now);
        true
    }

    pub fn reset(&mut self) {
        self.last_label = None;
        self.last_announced = None;
    }
}
