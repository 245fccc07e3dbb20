use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::Context;
use tracing::{debug, info, warn};

use solarstill_common::{
    check_for_update, ChannelConfig, ChannelKind, Driver, DriverState, FirmwareError,
    FirmwareStore, GroupRuntime, ModelId, Probe, SensorError, StationConfig, UploadError,
};

const MAX_FIRMWARE_BYTES: u64 = 4 * 1024 * 1024;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = match std::env::var("SOLARSTILL_CONFIG") {
        Ok(path) => {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read station config `{path}`"))?;
            StationConfig::from_json(&raw).context("invalid station config")?
        }
        Err(_) => StationConfig::default(),
    };
    if let Ok(url) = std::env::var("SOLARSTILL_UPLOAD_URL") {
        config.network.upload_base_url = url;
    }

    let detected = std::env::var("SOLARSTILL_MODEL")
        .ok()
        .and_then(|value| parse_model(&value))
        .unwrap_or(ModelId::A);
    let failing = std::env::var("SOLARSTILL_FAIL_CHANNEL").ok();

    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_millis(config.network.http_timeout_ms))
        .user_agent("solarstill-sensor")
        .build();

    let mut firmware = FileFirmwareStore {
        path: std::env::var("SOLARSTILL_FIRMWARE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("solarstill-firmware.bin")),
    };
    bootstrap_firmware(&agent, &config.network.firmware_url, &mut firmware);

    let started = Instant::now();
    let now_ms = || u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut groups = Vec::new();
    for group in config.active_groups(detected) {
        let probes = group
            .channels
            .iter()
            .enumerate()
            .map(|(index, channel)| {
                let fails = failing
                    .as_deref()
                    .is_some_and(|target| channel_matches(target, group.model, channel));
                simulated_probe(channel, index, fails)
            })
            .collect();
        groups.push(GroupRuntime::new(group, probes)?);
    }

    let mut driver = Driver::new(
        config.driver.clone(),
        config.network.upload_base_url.clone(),
        groups,
        now_ms(),
    );
    let mut sink = |url: &str| http_get_text(&agent, url);

    info!(
        "simulated station started as model {} with {} group(s)",
        detected.as_str(),
        driver.groups().len()
    );

    let mut interval = tokio::time::interval(driver.cycle_delay());
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        }

        let report = tokio::task::block_in_place(|| driver.tick(now_ms(), &mut sink));
        debug!(
            "cycle done: {} upload(s), {} fallback(s), {} failed upload(s)",
            report.uploads.len(),
            report.fallbacks,
            report.upload_failures
        );
        for record in &report.uploads {
            match serde_json::to_string(record) {
                Ok(json) => debug!("upload record {json}"),
                Err(err) => warn!("upload record not serializable: {err}"),
            }
        }

        if report.state == DriverState::Restarting {
            tokio::time::sleep(driver.restart_grace()).await;
            tokio::task::block_in_place(|| {
                bootstrap_firmware(&agent, &config.network.firmware_url, &mut firmware)
            });
            driver.reenter(now_ms());
            interval.reset();
            info!("station re-entered after scheduled restart");
        }
    }
}

fn parse_model(value: &str) -> Option<ModelId> {
    match value.trim().to_ascii_uppercase().as_str() {
        "A" => Some(ModelId::A),
        "B" => Some(ModelId::B),
        "C" => Some(ModelId::C),
        "D" => Some(ModelId::D),
        _ => None,
    }
}

/// `target` is either a channel name or `MODEL:name`.
fn channel_matches(target: &str, model: ModelId, channel: &ChannelConfig) -> bool {
    match target.split_once(':') {
        Some((group, name)) => parse_model(group) == Some(model) && name == channel.name,
        None => target == channel.name,
    }
}

fn baseline(kind: ChannelKind) -> (f32, f32) {
    match kind {
        ChannelKind::AmbientTemperature => (31.0, 4.0),
        ChannelKind::AirTemperature => (45.0, 6.0),
        ChannelKind::WaterTemperature => (38.0, 3.0),
        ChannelKind::AirHumidity => (55.0, 10.0),
        ChannelKind::UvIndex => (6.0, 3.0),
        ChannelKind::Lux => (40_000.0, 15_000.0),
        ChannelKind::Infrared => (9_000.0, 3_000.0),
        ChannelKind::Distance => (120.0, 10.0),
        ChannelKind::Weight => (850.0, 50.0),
        ChannelKind::WindSpeed => (3.5, 2.0),
    }
}

/// Slow sine around a plausible value for the channel's kind.
fn simulated_probe(channel: &ChannelConfig, seed: usize, failing: bool) -> Box<dyn Probe> {
    if failing {
        warn!("channel `{}` forced to fail", channel.name);
        return Box::new(|| -> Result<f32, SensorError> {
            Err(SensorError::Timeout {
                what: "simulated sensor",
            })
        });
    }

    let (base, swing) = baseline(channel.kind);
    let mut step = u32::try_from(seed).unwrap_or(0).wrapping_mul(3);
    Box::new(move || -> Result<f32, SensorError> {
        step = step.wrapping_add(1);
        let phase = (step % 48) as f32 / 48.0 * std::f32::consts::TAU;
        Ok(base + swing * phase.sin())
    })
}

fn http_get_text(agent: &ureq::Agent, url: &str) -> Result<String, UploadError> {
    match agent.get(url).call() {
        Ok(response) => response
            .into_string()
            .map(|body| body.trim().to_string())
            .map_err(|err| UploadError::Transport(err.to_string())),
        Err(ureq::Error::Status(code, _)) => Err(UploadError::Status(code)),
        Err(ureq::Error::Transport(err)) => Err(UploadError::Transport(err.to_string())),
    }
}

fn fetch_firmware(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>, FirmwareError> {
    let response = agent.get(url).call().map_err(|err| FirmwareError::Fetch(err.to_string()))?;
    let mut image = Vec::new();
    response
        .into_reader()
        .take(MAX_FIRMWARE_BYTES)
        .read_to_end(&mut image)
        .map_err(|err| FirmwareError::Fetch(err.to_string()))?;
    Ok(image)
}

fn bootstrap_firmware(agent: &ureq::Agent, url: &str, store: &mut FileFirmwareStore) {
    info!("checking {url} for firmware updates");
    match check_for_update(|| fetch_firmware(agent, url), store) {
        Ok(decision) if decision.requires_restart() => {
            info!("firmware image at {} replaced", store.path.display());
        }
        Ok(_) => {}
        Err(err) => warn!("firmware check failed: {err}"),
    }
}

/// Stored image on the local filesystem, standing in for the flash copy.
struct FileFirmwareStore {
    path: PathBuf,
}

impl FirmwareStore for FileFirmwareStore {
    fn load(&mut self) -> Result<Option<Vec<u8>>, FirmwareError> {
        match fs::read(&self.path) {
            Ok(image) => Ok(Some(image)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(FirmwareError::Store(err.to_string())),
        }
    }

    fn store(&mut self, image: &[u8]) -> Result<(), FirmwareError> {
        fs::write(&self.path, image).map_err(|err| FirmwareError::Store(err.to_string()))
    }
}
