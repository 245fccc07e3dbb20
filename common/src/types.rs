use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModelId {
    A,
    B,
    C,
    D,
}

impl ModelId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    AmbientTemperature,
    AirTemperature,
    AirHumidity,
    WaterTemperature,
    UvIndex,
    Lux,
    Infrared,
    Distance,
    Weight,
    WindSpeed,
}

impl ChannelKind {
    pub fn unit(self) -> &'static str {
        match self {
            Self::AmbientTemperature | Self::AirTemperature | Self::WaterTemperature => "°C",
            Self::AirHumidity => "%RH",
            Self::UvIndex => "UVI",
            Self::Lux => "lx",
            Self::Infrared => "counts",
            Self::Distance => "mm",
            Self::Weight => "g",
            Self::WindSpeed => "m/s",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Measured,
    Fallback,
}

/// One safe-read result. Consumed by the aggregator immediately.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub channel: usize,
    pub value: f32,
    pub outcome: ReadOutcome,
    pub timestamp_ms: u64,
}

impl Reading {
    pub fn is_fallback(&self) -> bool {
        self.outcome == ReadOutcome::Fallback
    }
}

/// Flushed means for one channel group, in channel order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadRecord {
    pub group: ModelId,
    #[serde(rename = "createdMs")]
    pub created_ms: u64,
    pub values: Vec<f32>,
}
