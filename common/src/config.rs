use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{
    endpoints::{FIRMWARE_SOURCE_URL, MIN_UPLOAD_SPACING_MS, THINGSPEAK_UPDATE_URL},
    error::ConfigError,
    sensors::{ltr390, tsl2591, vl53l0x},
    types::{ChannelKind, ModelId},
    MAX_UPLOAD_FIELDS,
};

/// Which of a model's two I2C buses a sensor hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusSlot {
    Primary,
    Secondary,
}

/// Physical source of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "sensor", rename_all = "snake_case")]
pub enum SensorSource {
    Sht30Temperature { bus: BusSlot, address: u8 },
    Sht30Humidity { bus: BusSlot, address: u8 },
    Ltr390Uv { bus: BusSlot },
    Tsl2591Lux { bus: BusSlot },
    Tsl2591Infrared { bus: BusSlot },
    Vl53l0xDistance { bus: BusSlot },
    Hx711Weight,
    WindPulses,
}

impl SensorSource {
    /// Bus slot and 7-bit address for I2C sources.
    pub fn i2c_target(&self) -> Option<(BusSlot, u8)> {
        match *self {
            Self::Sht30Temperature { bus, address } | Self::Sht30Humidity { bus, address } => {
                Some((bus, address))
            }
            Self::Ltr390Uv { bus } => Some((bus, ltr390::ADDRESS)),
            Self::Tsl2591Lux { bus } | Self::Tsl2591Infrared { bus } => {
                Some((bus, tsl2591::ADDRESS))
            }
            Self::Vl53l0xDistance { bus } => Some((bus, vl53l0x::ADDRESS)),
            Self::Hx711Weight | Self::WindPulses => None,
        }
    }

    fn part(&self) -> &'static str {
        match self {
            Self::Sht30Temperature { .. } | Self::Sht30Humidity { .. } => "SHT30",
            Self::Ltr390Uv { .. } => "LTR390",
            Self::Tsl2591Lux { .. } | Self::Tsl2591Infrared { .. } => "TSL2591",
            Self::Vl53l0xDistance { .. } => "VL53L0X",
            Self::Hx711Weight => "HX711",
            Self::WindPulses => "anemometer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    pub kind: ChannelKind,
    pub source: SensorSource,
    pub min: f32,
    pub max: f32,
    pub fallback: f32,
}

impl ChannelConfig {
    pub fn new(name: &str, kind: ChannelKind, source: SensorSource) -> Self {
        let (min, max) = default_range(kind);
        Self {
            name: name.to_string(),
            kind,
            source,
            min,
            max,
            fallback: 0.0,
        }
    }

    pub fn in_range(&self, value: f32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

fn default_range(kind: ChannelKind) -> (f32, f32) {
    match kind {
        ChannelKind::AmbientTemperature
        | ChannelKind::AirTemperature
        | ChannelKind::WaterTemperature => (-40.0, 125.0),
        ChannelKind::AirHumidity => (0.0, 100.0),
        ChannelKind::UvIndex => (0.0, 30.0),
        ChannelKind::Lux => (0.0, 88_000.0),
        ChannelKind::Infrared => (0.0, 65_535.0),
        // 8190/8191 are the VL53L0X "no target" codes.
        ChannelKind::Distance => (0.0, 2_000.0),
        ChannelKind::Weight => (-10_000_000.0, 10_000_000.0),
        ChannelKind::WindSpeed => (0.0, 70.0),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelGroupConfig {
    pub model: ModelId,
    pub api_key: String,
    pub upload_interval_ms: u64,
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Arithmetic mean over the window. With `include_fallbacks` the
    /// substituted defaults of failed reads take part in the mean.
    WindowMean { include_fallbacks: bool },
    /// Exponential moving average, `ema = weight * v + (1 - weight) * ema`.
    Ema { weight: f32 },
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self::WindowMean {
            include_fallbacks: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub cycle_delay_ms: u64,
    pub max_uptime_ms: u64,
    pub restart_grace_ms: u64,
    #[serde(default)]
    pub aggregation: AggregationPolicy,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cycle_delay_ms: 5_000,
            max_uptime_ms: 21_600_000,
            restart_grace_ms: 1_000,
            aggregation: AggregationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub upload_base_url: String,
    pub firmware_url: String,
    pub http_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            upload_base_url: THINGSPEAK_UPDATE_URL.to_string(),
            firmware_url: FIRMWARE_SOURCE_URL.to_string(),
            http_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusPins {
    pub sda: i32,
    pub scl: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hx711Config {
    pub dout: i32,
    pub sck: i32,
    pub offset: f32,
    pub scale: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPins {
    pub model: ModelId,
    pub primary: BusPins,
    pub secondary: BusPins,
    pub hx711: Hx711Config,
}

impl ModelPins {
    pub fn bus(&self, slot: BusSlot) -> BusPins {
        match slot {
            BusSlot::Primary => self.primary,
            BusSlot::Secondary => self.secondary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindConfig {
    pub pin: i32,
    /// m/s per pulse per second.
    pub factor: f32,
    pub window_ms: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    pub i2c_baudrate_hz: u32,
    pub models: Vec<ModelPins>,
    pub wind: WindConfig,
}

impl HardwareConfig {
    pub fn pins_for(&self, model: ModelId) -> Option<&ModelPins> {
        self.models.iter().find(|pins| pins.model == model)
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        let hx711 = |dout, sck| Hx711Config {
            dout,
            sck,
            offset: 0.0,
            scale: 1.0,
        };
        Self {
            i2c_baudrate_hz: 100_000,
            models: vec![
                ModelPins {
                    model: ModelId::A,
                    primary: BusPins { sda: 19, scl: 18 },
                    secondary: BusPins { sda: 23, scl: 5 },
                    hx711: hx711(21, 22),
                },
                ModelPins {
                    model: ModelId::B,
                    primary: BusPins { sda: 25, scl: 26 },
                    secondary: BusPins { sda: 33, scl: 32 },
                    hx711: hx711(17, 16),
                },
                ModelPins {
                    model: ModelId::C,
                    primary: BusPins { sda: 27, scl: 14 },
                    secondary: BusPins { sda: 15, scl: 4 },
                    hx711: hx711(2, 0),
                },
            ],
            wind: WindConfig {
                pin: 13,
                factor: 0.6,
                window_ms: 3_000,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    pub driver: DriverConfig,
    pub network: NetworkConfig,
    pub hardware: HardwareConfig,
    /// Only poll the model found by bus scan (plus the wind node).
    #[serde(default = "default_auto_detect")]
    pub auto_detect: bool,
    pub groups: Vec<ChannelGroupConfig>,
}

fn default_auto_detect() -> bool {
    true
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            driver: DriverConfig::default(),
            network: NetworkConfig::default(),
            hardware: HardwareConfig::default(),
            auto_detect: true,
            groups: default_groups(),
        }
    }
}

const SHT30_PRIMARY: u8 = 0x45;
const SHT30_SECONDARY: u8 = 0x44;

fn default_groups() -> Vec<ChannelGroupConfig> {
    use BusSlot::{Primary, Secondary};
    use ChannelKind as K;
    use SensorSource as S;

    let uv = || ChannelConfig::new("uv", K::UvIndex, S::Ltr390Uv { bus: Primary });
    let distance = || ChannelConfig::new("distance", K::Distance, S::Vl53l0xDistance { bus: Primary });
    let air = || {
        ChannelConfig::new(
            "air_temp",
            K::AirTemperature,
            S::Sht30Temperature {
                bus: Secondary,
                address: SHT30_PRIMARY,
            },
        )
    };
    let water = || {
        ChannelConfig::new(
            "water_temp",
            K::WaterTemperature,
            S::Sht30Temperature {
                bus: Secondary,
                address: SHT30_SECONDARY,
            },
        )
    };
    let lux = || ChannelConfig::new("lux", K::Lux, S::Tsl2591Lux { bus: Secondary });
    let ir = || ChannelConfig::new("ir", K::Infrared, S::Tsl2591Infrared { bus: Secondary });
    let weight = || ChannelConfig::new("weight", K::Weight, S::Hx711Weight);

    let group = |model: ModelId, api_key: &str, channels| ChannelGroupConfig {
        model,
        api_key: api_key.to_string(),
        upload_interval_ms: 20_000,
        channels,
    };

    vec![
        group(
            ModelId::A,
            "EU6EE36IJ7WSVYP3",
            vec![
                ChannelConfig::new(
                    "ambient_temp",
                    K::AmbientTemperature,
                    S::Sht30Temperature {
                        bus: Primary,
                        address: SHT30_PRIMARY,
                    },
                ),
                uv(),
                distance(),
                air(),
                water(),
                lux(),
                ir(),
                weight(),
            ],
        ),
        group(
            ModelId::B,
            "E8CTAK8MCUWLVQJ2",
            vec![uv(), distance(), air(), water(), weight(), lux(), ir()],
        ),
        group(
            ModelId::C,
            "Y1FWSOX7Z6YZ8QMU",
            vec![uv(), distance(), air(), water(), lux(), ir(), weight()],
        ),
        group(
            ModelId::D,
            "HG8G8BDF40LCGV99",
            vec![ChannelConfig::new("wind", K::WindSpeed, S::WindPulses)],
        ),
    ]
}

impl StationConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(raw)?;
        config.sanitize();
        config.validate()?;
        Ok(config)
    }

    pub fn group(&self, model: ModelId) -> Option<&ChannelGroupConfig> {
        self.groups.iter().find(|group| group.model == model)
    }

    pub fn sanitize(&mut self) {
        for group in &mut self.groups {
            if group.upload_interval_ms > 0 {
                group.upload_interval_ms = group.upload_interval_ms.max(MIN_UPLOAD_SPACING_MS);
            }
        }

        if let AggregationPolicy::Ema { weight } = &mut self.driver.aggregation {
            if !weight.is_finite() || *weight <= 0.0 {
                *weight = 0.2;
            }
            *weight = weight.min(1.0);
        }

        self.driver.cycle_delay_ms = self.driver.cycle_delay_ms.max(100);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for group in &self.groups {
            let name = group.model.as_str();
            if group.channels.is_empty() {
                return Err(ConfigError::EmptyGroup(name));
            }
            if group.channels.len() > MAX_UPLOAD_FIELDS {
                return Err(ConfigError::TooManyChannels {
                    model: name,
                    count: group.channels.len(),
                });
            }
            if group.upload_interval_ms == 0 {
                return Err(ConfigError::InvalidInterval(name));
            }
            if !seen.insert(group.model) {
                return Err(ConfigError::DuplicateGroup(name));
            }

            let mut targets: HashMap<(BusSlot, u8), &'static str> = HashMap::new();
            for channel in &group.channels {
                let Some(target) = channel.source.i2c_target() else {
                    continue;
                };
                let part = channel.source.part();
                if let Some(existing) = targets.insert(target, part) {
                    if existing != part {
                        return Err(ConfigError::AddressConflict {
                            model: name,
                            address: target.1,
                            first: existing,
                            second: part,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Groups polled on this board: the detected model and the wind node,
    /// or every configured group when detection is disabled.
    pub fn active_groups(&self, detected: ModelId) -> Vec<ChannelGroupConfig> {
        self.groups
            .iter()
            .filter(|group| !self.auto_detect || group.model == detected || group.model == ModelId::D)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = StationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.groups.len(), 4);
        assert_eq!(config.group(ModelId::A).map(|g| g.channels.len()), Some(8));
        assert_eq!(config.group(ModelId::D).map(|g| g.channels.len()), Some(1));
    }

    #[test]
    fn model_b_field_order_matches_dashboard() {
        let config = StationConfig::default();
        let names: Vec<_> = config
            .group(ModelId::B)
            .unwrap()
            .channels
            .iter()
            .map(|c| c.name.as_str())
            .collect();

        assert_eq!(
            names,
            vec!["uv", "distance", "air_temp", "water_temp", "weight", "lux", "ir"]
        );
    }

    #[test]
    fn rejects_oversized_group() {
        let mut config = StationConfig::default();
        let extra = config.groups[0].channels[0].clone();
        config.groups[0].channels.push(extra);

        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooManyChannels { model: "A", count: 9 })
        ));
    }

    #[test]
    fn rejects_duplicate_models() {
        let mut config = StationConfig::default();
        let dup = config.groups[3].clone();
        config.groups.push(dup);

        assert!(matches!(config.validate(), Err(ConfigError::DuplicateGroup("D"))));
    }

    #[test]
    fn rejects_two_parts_on_one_address() {
        let mut config = StationConfig::default();
        for channel in &mut config.groups[1].channels {
            if channel.name == "lux" {
                channel.source = SensorSource::Tsl2591Lux {
                    bus: BusSlot::Primary,
                };
            }
        }

        assert!(matches!(
            config.validate(),
            Err(ConfigError::AddressConflict {
                model: "B",
                address: 0x29,
                first: "VL53L0X",
                second: "TSL2591",
            })
        ));
    }

    #[test]
    fn sanitize_enforces_dashboard_spacing_and_ema_weight() {
        let mut config = StationConfig::default();
        config.groups[0].upload_interval_ms = 1_000;
        config.driver.aggregation = AggregationPolicy::Ema { weight: 3.0 };
        config.sanitize();

        assert_eq!(config.groups[0].upload_interval_ms, MIN_UPLOAD_SPACING_MS);
        assert_eq!(config.driver.aggregation, AggregationPolicy::Ema { weight: 1.0 });
    }

    #[test]
    fn active_groups_follow_detection() {
        let config = StationConfig::default();
        let models: Vec<_> = config
            .active_groups(ModelId::B)
            .iter()
            .map(|g| g.model)
            .collect();
        assert_eq!(models, vec![ModelId::B, ModelId::D]);

        let mut all = config.clone();
        all.auto_detect = false;
        assert_eq!(all.active_groups(ModelId::B).len(), 4);
    }

    #[test]
    fn json_round_trip_preserves_groups() {
        let raw = serde_json::to_string(&StationConfig::default()).unwrap();
        let parsed = StationConfig::from_json(&raw).unwrap();

        assert_eq!(parsed.groups.len(), 4);
        assert_eq!(parsed.group(ModelId::C).unwrap().api_key, "Y1FWSOX7Z6YZ8QMU");
    }
}
