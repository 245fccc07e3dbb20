pub mod aggregator;
pub mod config;
pub mod detect;
pub mod driver;
pub mod endpoints;
pub mod error;
pub mod firmware;
pub mod safe_read;
pub mod sensors;
pub mod types;
pub mod upload;

/// ThingSpeak channels accept `field1` through `field8`.
pub const MAX_UPLOAD_FIELDS: usize = 8;

pub use aggregator::{Accumulator, Aggregator};
pub use config::{
    AggregationPolicy, BusPins, BusSlot, ChannelConfig, ChannelGroupConfig, DriverConfig,
    HardwareConfig, Hx711Config, ModelPins, NetworkConfig, SensorSource, StationConfig,
    WindConfig,
};
pub use detect::detect_model;
pub use driver::{CycleReport, Driver, DriverState, GroupRuntime, Probe};
pub use endpoints::*;
pub use error::{ConfigError, FirmwareError, SensorError, UploadError};
pub use firmware::{
    check_for_update, decide_streamed, decide_update, FirmwareDigest, FirmwareStore, UpdateDecision,
};
pub use safe_read::safe_read;
pub use types::{ChannelKind, ModelId, ReadOutcome, Reading, UploadRecord};
pub use upload::{format_request, UploadGate, UploadSink};
