use std::time::Duration;

use log::{info, warn};

use crate::{
    aggregator::Aggregator,
    config::{ChannelGroupConfig, DriverConfig},
    error::{ConfigError, SensorError, UploadError},
    safe_read::safe_read,
    types::{ModelId, Reading, UploadRecord},
    upload::{format_request, UploadGate, UploadSink},
};

/// Anything that can produce one value for one channel.
pub trait Probe {
    fn read(&mut self) -> Result<f32, SensorError>;
}

impl<F> Probe for F
where
    F: FnMut() -> Result<f32, SensorError>,
{
    fn read(&mut self) -> Result<f32, SensorError> {
        self()
    }
}

pub struct GroupRuntime {
    config: ChannelGroupConfig,
    probes: Vec<Box<dyn Probe>>,
    gate: UploadGate,
}

impl GroupRuntime {
    /// `probes` must line up one-to-one with `config.channels`.
    pub fn new(config: ChannelGroupConfig, probes: Vec<Box<dyn Probe>>) -> Result<Self, ConfigError> {
        if probes.len() != config.channels.len() {
            return Err(ConfigError::ProbeMismatch {
                model: config.model.as_str(),
                channels: config.channels.len(),
                probes: probes.len(),
            });
        }

        let gate = UploadGate::new(config.upload_interval_ms);
        Ok(Self {
            config,
            probes,
            gate,
        })
    }

    pub fn model(&self) -> ModelId {
        self.config.model
    }

    pub fn gate(&self) -> &UploadGate {
        &self.gate
    }

    fn read_all(&mut self, now_ms: u64) -> Vec<Reading> {
        self.probes
            .iter_mut()
            .zip(&self.config.channels)
            .enumerate()
            .map(|(index, (probe, channel))| safe_read(index, channel, now_ms, || probe.read()))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    Restarting,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub state: DriverState,
    pub uploads: Vec<UploadRecord>,
    pub fallbacks: usize,
    pub upload_failures: usize,
    pub failed_groups: Vec<ModelId>,
}

impl CycleReport {
    fn new(state: DriverState) -> Self {
        Self {
            state,
            uploads: Vec::new(),
            fallbacks: 0,
            upload_failures: 0,
            failed_groups: Vec::new(),
        }
    }
}

struct GroupPass {
    fallbacks: usize,
    upload: Option<(UploadRecord, bool)>,
}

/// Single-owner polling loop body: every call to [`Driver::tick`] reads each
/// group once in configuration order, folds the readings into the
/// aggregator and uploads whichever groups are due.
pub struct Driver {
    config: DriverConfig,
    base_url: String,
    groups: Vec<GroupRuntime>,
    aggregator: Aggregator,
    state: DriverState,
    started_ms: u64,
}

impl Driver {
    pub fn new(
        config: DriverConfig,
        base_url: impl Into<String>,
        groups: Vec<GroupRuntime>,
        now_ms: u64,
    ) -> Self {
        let configs: Vec<_> = groups.iter().map(|g| g.config.clone()).collect();
        let aggregator = Aggregator::new(&configs, config.aggregation);
        let mut driver = Self {
            config,
            base_url: base_url.into(),
            groups,
            aggregator,
            state: DriverState::Running,
            started_ms: now_ms,
        };
        driver.arm(now_ms);
        driver
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn groups(&self) -> &[GroupRuntime] {
        &self.groups
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.config.cycle_delay_ms)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.config.restart_grace_ms)
    }

    pub fn uptime_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.started_ms)
    }

    pub fn tick<S>(&mut self, now_ms: u64, sink: &mut S) -> CycleReport
    where
        S: UploadSink + ?Sized,
    {
        if self.state == DriverState::Restarting {
            return CycleReport::new(self.state);
        }

        let mut report = CycleReport::new(self.state);
        for index in 0..self.groups.len() {
            let model = self.groups[index].model();
            match self.poll_group(index, now_ms, sink) {
                Ok(pass) => {
                    report.fallbacks += pass.fallbacks;
                    if let Some((record, delivered)) = pass.upload {
                        if !delivered {
                            report.upload_failures += 1;
                        }
                        report.uploads.push(record);
                    }
                }
                Err(err) => {
                    warn!("group {} pass failed: {err}", model.as_str());
                    report.failed_groups.push(model);
                }
            }
        }

        if self.uptime_ms(now_ms) >= self.config.max_uptime_ms {
            info!(
                "uptime {}s reached limit; restarting to pick up firmware updates",
                self.uptime_ms(now_ms) / 1000
            );
            self.state = DriverState::Restarting;
        }

        report.state = self.state;
        report
    }

    /// Fresh start as after a process restart: accumulators zeroed, gates
    /// re-armed, uptime counted from `now_ms`.
    pub fn reenter(&mut self, now_ms: u64) {
        self.aggregator.reset_all();
        self.state = DriverState::Running;
        self.started_ms = now_ms;
        self.arm(now_ms);
    }

    // The first upload of each group waits one full interval so it carries
    // a complete averaging window.
    fn arm(&mut self, now_ms: u64) {
        for group in &mut self.groups {
            group.gate.reset();
            group.gate.record(now_ms);
        }
    }

    fn poll_group<S>(&mut self, index: usize, now_ms: u64, sink: &mut S) -> Result<GroupPass, UploadError>
    where
        S: UploadSink + ?Sized,
    {
        let group = &mut self.groups[index];
        let model = group.model();
        let readings = group.read_all(now_ms);
        let fallbacks = readings.iter().filter(|r| r.is_fallback()).count();
        self.aggregator.accumulate(model, &readings);

        let upload = self.maybe_upload(index, now_ms, sink)?;
        Ok(GroupPass { fallbacks, upload })
    }

    /// Flushes and sends the group if its gate is open. The gate is closed
    /// again whatever the network outcome; a failed send loses that window.
    fn maybe_upload<S>(
        &mut self,
        index: usize,
        now_ms: u64,
        sink: &mut S,
    ) -> Result<Option<(UploadRecord, bool)>, UploadError>
    where
        S: UploadSink + ?Sized,
    {
        let group = &mut self.groups[index];
        let model = group.model();
        if !group.gate.due(now_ms) || !self.aggregator.has_samples(model) {
            return Ok(None);
        }

        let values = self.aggregator.flush_means(model);
        group.gate.record(now_ms);
        let url = format_request(&self.base_url, &group.config.api_key, &values)?;

        info!("group {} uploading {} field(s)", model.as_str(), values.len());
        let delivered = match sink.send(&url) {
            Ok(body) => {
                info!("group {} upload response: {}", model.as_str(), body.trim());
                true
            }
            Err(err) => {
                warn!("group {} upload failed: {err}", model.as_str());
                false
            }
        };

        let record = UploadRecord {
            group: model,
            created_ms: now_ms,
            values,
        };
        Ok(Some((record, delivered)))
    }
}
