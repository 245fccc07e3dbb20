use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("bus transaction failed: {0}")]
    Bus(String),
    #[error("crc mismatch (expected {expected:#04x}, got {actual:#04x})")]
    Crc { expected: u8, actual: u8 },
    #[error("timed out waiting for {what}")]
    Timeout { what: &'static str },
    #[error("no valid samples")]
    NoSamples,
    #[error("reading {value} outside valid range [{min}, {max}]")]
    OutOfRange { value: f32, min: f32, max: f32 },
    #[error("decoder produced a non-finite value")]
    NotFinite,
}

impl SensorError {
    /// Wraps any `embedded-hal` bus error.
    pub fn bus<E: core::fmt::Debug>(err: E) -> Self {
        Self::Bus(format!("{err:?}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("upload carries {count} fields, at most 8 are allowed")]
    TooManyFields { count: usize },
    #[error("upload transport failed: {0}")]
    Transport(String),
    #[error("upload rejected with HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("channel group {0} has no channels")]
    EmptyGroup(&'static str),
    #[error("channel group {model} has {count} channels, at most 8 are allowed")]
    TooManyChannels { model: &'static str, count: usize },
    #[error("channel group {0} is configured more than once")]
    DuplicateGroup(&'static str),
    #[error("channel group {0} has a zero upload interval")]
    InvalidInterval(&'static str),
    #[error("channel group {model}: {first} and {second} both claim address {address:#04x}")]
    AddressConflict {
        model: &'static str,
        address: u8,
        first: &'static str,
        second: &'static str,
    },
    #[error("channel group {model} has {channels} channels but {probes} probes")]
    ProbeMismatch {
        model: &'static str,
        channels: usize,
        probes: usize,
    },
    #[error("failed to parse station config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FirmwareError {
    #[error("firmware fetch failed: {0}")]
    Fetch(String),
    #[error("firmware store failed: {0}")]
    Store(String),
}
