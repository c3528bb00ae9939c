//! Bounded time-series buckets keyed by `(metric, id)`, with avg/max/min and
//! threshold classification. Two container variants share one contract: a
//! capped list for short monitor windows, a ring for long-running host-level
//! metrics.

use serde::{Deserialize, Serialize};

/// Resource metrics sampled by the observers. Higher is worse for all of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricProperty {
    TotalCpuTime,
    TotalMemoryConsumptionMb,
    TotalMemoryConsumptionPct,
    TotalActivePorts,
    TotalEphemeralPorts,
    DiskSpaceUsagePercentage,
    DiskSpaceUsageMb,
    DiskSpaceAvailableMb,
    DiskSpaceTotalMb,
    DiskAverageQueueLength,
    TotalActiveFirewallRules,
}

impl MetricProperty {
    /// Display name used in health report messages, e.g. "TotalCpuTime".
    pub fn label(&self) -> &'static str {
        match self {
            MetricProperty::TotalCpuTime => "TotalCpuTime",
            MetricProperty::TotalMemoryConsumptionMb => "TotalMemoryConsumptionMb",
            MetricProperty::TotalMemoryConsumptionPct => "TotalMemoryConsumptionPct",
            MetricProperty::TotalActivePorts => "TotalActivePorts",
            MetricProperty::TotalEphemeralPorts => "TotalEphemeralPorts",
            MetricProperty::DiskSpaceUsagePercentage => "DiskSpaceUsagePercentage",
            MetricProperty::DiskSpaceUsageMb => "DiskSpaceUsageMb",
            MetricProperty::DiskSpaceAvailableMb => "DiskSpaceAvailableMb",
            MetricProperty::DiskSpaceTotalMb => "DiskSpaceTotalMb",
            MetricProperty::DiskAverageQueueLength => "DiskAverageQueueLength",
            MetricProperty::TotalActiveFirewallRules => "TotalActiveFirewallRules",
        }
    }

    /// Units appended to values in report messages.
    pub fn units(&self) -> &'static str {
        match self {
            MetricProperty::TotalCpuTime | MetricProperty::TotalMemoryConsumptionPct => "%",
            MetricProperty::TotalMemoryConsumptionMb
            | MetricProperty::DiskSpaceUsageMb
            | MetricProperty::DiskSpaceAvailableMb
            | MetricProperty::DiskSpaceTotalMb => "MB",
            MetricProperty::DiskSpaceUsagePercentage => "%",
            MetricProperty::TotalActivePorts
            | MetricProperty::TotalEphemeralPorts
            | MetricProperty::TotalActiveFirewallRules => "",
            MetricProperty::DiskAverageQueueLength => " queue",
        }
    }
}

/// How a series bounds its sample buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesMode {
    /// Samples accumulate for the current monitor window, never evicted mid-window.
    List,
    /// Oldest samples are evicted once `capacity` is reached.
    Ring,
}

/// A bounded, time-ordered sequence of numeric samples for one `(metric, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingSeries {
    pub metric_property: MetricProperty,
    pub id: String,
    pub capacity: usize,
    pub mode: SeriesMode,
    samples: Vec<f64>,
    pub active_error_or_warning: bool,
    pub active_code: Option<String>,
}

impl SamplingSeries {
    pub fn new(metric_property: MetricProperty, id: impl Into<String>, capacity: usize, mode: SeriesMode) -> Self {
        assert!(capacity > 0, "series capacity must be positive");
        Self {
            metric_property,
            id: id.into(),
            capacity,
            mode,
            samples: Vec::with_capacity(capacity),
            active_error_or_warning: false,
            active_code: None,
        }
    }

    /// Appends a sample. In ring mode, the oldest sample is dropped once at capacity.
    pub fn append(&mut self, value: f64) {
        if self.mode == SeriesMode::Ring && self.samples.len() >= self.capacity {
            self.samples.remove(0);
        }
        self.samples.push(value);
        if self.mode == SeriesMode::List {
            debug_assert!(self.samples.len() <= self.capacity || self.capacity == usize::MAX);
        }
    }

    /// Additively merges another series' samples in, index by index, padding the
    /// shorter with zero. Used for child-process CPU/memory aggregation.
    pub fn merge_additive(&mut self, other: &[f64]) {
        for (i, v) in other.iter().enumerate() {
            match self.samples.get_mut(i) {
                Some(existing) => *existing += v,
                None => self.samples.push(*v),
            }
        }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Arithmetic mean rounded to one decimal place; `None` if no samples.
    pub fn avg(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().sum();
        Some((sum / self.samples.len() as f64 * 10.0).round() / 10.0)
    }

    pub fn max(&self) -> Option<f64> {
        self.samples.iter().cloned().fold(None, |acc, v| {
            Some(acc.map_or(v, |m: f64| m.max(v)))
        })
    }

    pub fn min(&self) -> Option<f64> {
        self.samples.iter().cloned().fold(None, |acc, v| {
            Some(acc.map_or(v, |m: f64| m.min(v)))
        })
    }

    /// Clears samples after evaluation; `active_error_or_warning` and `active_code`
    /// persist across iterations so Ok-clears can be detected.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
