use log::warn;

use crate::{
    config::{AggregationPolicy, ChannelGroupConfig},
    types::{ModelId, Reading},
};

/// Running state for one channel since the last flush.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accumulator {
    sum: f64,
    count: u32,
    attempts: u32,
    ema: Option<f32>,
}

impl Accumulator {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_empty(&self) -> bool {
        self.attempts == 0
    }

    fn add(&mut self, reading: &Reading, policy: AggregationPolicy) {
        self.attempts = self.attempts.saturating_add(1);

        match policy {
            AggregationPolicy::WindowMean { include_fallbacks } => {
                if include_fallbacks || !reading.is_fallback() {
                    self.sum += f64::from(reading.value);
                    self.count = self.count.saturating_add(1);
                }
            }
            AggregationPolicy::Ema { weight } => {
                if reading.is_fallback() {
                    return;
                }
                self.ema = Some(match self.ema {
                    None => reading.value,
                    Some(prev) => weight * reading.value + (1.0 - weight) * prev,
                });
                self.count = self.count.saturating_add(1);
            }
        }
    }

    fn value_or(&self, default: f32) -> f32 {
        if let Some(ema) = self.ema {
            return ema;
        }
        if self.count == 0 {
            return default;
        }
        (self.sum / f64::from(self.count)) as f32
    }
}

#[derive(Debug, Clone)]
struct GroupAccumulators {
    model: ModelId,
    defaults: Vec<f32>,
    channels: Vec<Accumulator>,
}

/// Per-channel sums for every configured group. Flushing a group hands back
/// its means in channel order and zeroes its accumulators; the window's data
/// is gone afterwards whether or not the upload that follows succeeds.
#[derive(Debug, Clone)]
pub struct Aggregator {
    policy: AggregationPolicy,
    groups: Vec<GroupAccumulators>,
}

impl Aggregator {
    pub fn new(groups: &[ChannelGroupConfig], policy: AggregationPolicy) -> Self {
        Self {
            policy,
            groups: groups
                .iter()
                .map(|group| GroupAccumulators {
                    model: group.model,
                    defaults: group.channels.iter().map(|c| c.fallback).collect(),
                    channels: vec![Accumulator::default(); group.channels.len()],
                })
                .collect(),
        }
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    pub fn accumulate(&mut self, model: ModelId, readings: &[Reading]) {
        let policy = self.policy;
        let Some(group) = self.group_mut(model) else {
            warn!("ignoring readings for unconfigured group {}", model.as_str());
            return;
        };

        for reading in readings {
            match group.channels.get_mut(reading.channel) {
                Some(acc) => acc.add(reading, policy),
                None => warn!(
                    "group {} has no channel {}",
                    model.as_str(),
                    reading.channel
                ),
            }
        }
    }

    /// Means for `model` in channel order, then reset. Channels with nothing
    /// accumulated report their configured default.
    pub fn flush_means(&mut self, model: ModelId) -> Vec<f32> {
        let Some(group) = self.group_mut(model) else {
            return Vec::new();
        };

        let means = group
            .channels
            .iter()
            .zip(&group.defaults)
            .map(|(acc, default)| acc.value_or(*default))
            .collect();

        group.channels.fill(Accumulator::default());
        means
    }

    pub fn has_samples(&self, model: ModelId) -> bool {
        self.pending(model)
            .is_some_and(|channels| channels.iter().any(|acc| !acc.is_empty()))
    }

    pub fn pending(&self, model: ModelId) -> Option<&[Accumulator]> {
        self.groups
            .iter()
            .find(|group| group.model == model)
            .map(|group| group.channels.as_slice())
    }

    pub fn reset_all(&mut self) {
        for group in &mut self.groups {
            group.channels.fill(Accumulator::default());
        }
    }

    fn group_mut(&mut self, model: ModelId) -> Option<&mut GroupAccumulators> {
        self.groups.iter_mut().find(|group| group.model == model)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::{ChannelConfig, SensorSource},
        types::{ChannelKind, ReadOutcome},
    };

    fn group(defaults: &[f32]) -> ChannelGroupConfig {
        ChannelGroupConfig {
            model: ModelId::A,
            api_key: "KEY".to_string(),
            upload_interval_ms: 20_000,
            channels: defaults
                .iter()
                .enumerate()
                .map(|(i, fallback)| {
                    let mut channel = ChannelConfig::new(
                        &format!("c{}", i + 1),
                        ChannelKind::AirTemperature,
                        SensorSource::WindPulses,
                    );
                    channel.fallback = *fallback;
                    channel
                })
                .collect(),
        }
    }

    fn measured(channel: usize, value: f32) -> Reading {
        Reading {
            channel,
            value,
            outcome: ReadOutcome::Measured,
            timestamp_ms: 0,
        }
    }

    fn fallback(channel: usize, value: f32) -> Reading {
        Reading {
            outcome: ReadOutcome::Fallback,
            ..measured(channel, value)
        }
    }

    fn window(include_fallbacks: bool) -> AggregationPolicy {
        AggregationPolicy::WindowMean { include_fallbacks }
    }

    #[test]
    fn mean_of_successful_samples() {
        let mut agg = Aggregator::new(&[group(&[0.0, 0.0, 0.0])], window(false));
        for value in [20.0, 21.0, 22.0] {
            agg.accumulate(
                ModelId::A,
                &[measured(0, value), measured(1, 1.0), measured(2, 2.0)],
            );
        }

        assert_eq!(agg.flush_means(ModelId::A), vec![21.0, 1.0, 2.0]);
    }

    #[test]
    fn empty_window_reports_defaults_twice() {
        let mut agg = Aggregator::new(&[group(&[-1.0, 5.0])], window(true));
        agg.accumulate(ModelId::A, &[measured(0, 10.0), measured(1, 20.0)]);
        assert_eq!(agg.flush_means(ModelId::A), vec![10.0, 20.0]);

        assert_eq!(agg.flush_means(ModelId::A), vec![-1.0, 5.0]);
        assert_eq!(agg.flush_means(ModelId::A), vec![-1.0, 5.0]);
        assert!(!agg.has_samples(ModelId::A));
    }

    #[test]
    fn fallbacks_bias_mean_only_when_included() {
        let readings = [measured(0, 30.0), fallback(0, 0.0)];

        let mut including = Aggregator::new(&[group(&[0.0])], window(true));
        including.accumulate(ModelId::A, &readings[..1]);
        including.accumulate(ModelId::A, &readings[1..]);
        assert_eq!(including.flush_means(ModelId::A), vec![15.0]);

        let mut success_only = Aggregator::new(&[group(&[0.0])], window(false));
        success_only.accumulate(ModelId::A, &readings[..1]);
        success_only.accumulate(ModelId::A, &readings[1..]);
        assert_eq!(success_only.flush_means(ModelId::A), vec![30.0]);
    }

    #[test]
    fn permanently_failing_channel_reports_default() {
        let mut agg = Aggregator::new(&[group(&[0.0, 0.0, 0.0])], window(false));
        for _ in 0..5 {
            agg.accumulate(
                ModelId::A,
                &[measured(0, 1.0), fallback(1, 0.0), measured(2, 3.0)],
            );
        }

        let pending = agg.pending(ModelId::A).unwrap();
        assert_eq!(pending[1].count(), 0);
        assert_eq!(pending[1].attempts(), 5);
        assert_eq!(agg.flush_means(ModelId::A), vec![1.0, 0.0, 3.0]);
    }

    #[test]
    fn ema_weights_recent_samples() {
        let mut agg = Aggregator::new(&[group(&[0.0])], AggregationPolicy::Ema { weight: 0.2 });
        agg.accumulate(ModelId::A, &[measured(0, 10.0)]);
        agg.accumulate(ModelId::A, &[measured(0, 20.0)]);
        agg.accumulate(ModelId::A, &[fallback(0, 0.0)]);

        let means = agg.flush_means(ModelId::A);
        assert!((means[0] - 12.0).abs() < 1e-4);
        assert_eq!(agg.flush_means(ModelId::A), vec![0.0]);
    }

    #[test]
    fn unknown_group_is_ignored() {
        let mut agg = Aggregator::new(&[group(&[0.0])], window(false));
        agg.accumulate(ModelId::C, &[measured(0, 1.0)]);

        assert!(agg.flush_means(ModelId::C).is_empty());
        assert!(!agg.has_samples(ModelId::A));
    }

    #[test]
    fn reset_all_clears_every_group() {
        let mut agg = Aggregator::new(&[group(&[0.0, 0.0])], window(true));
        agg.accumulate(ModelId::A, &[measured(0, 4.0), measured(1, 8.0)]);
        agg.reset_all();

        assert!(agg
            .pending(ModelId::A)
            .unwrap()
            .iter()
            .all(|acc| acc.count() == 0 && acc.is_empty()));
    }
}
