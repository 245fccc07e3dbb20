use log::{debug, warn};

use crate::{
    config::ChannelConfig,
    error::SensorError,
    types::{ReadOutcome, Reading},
};

/// Runs `decode` and turns any fault into the channel's fallback value.
///
/// Non-finite values and values outside the channel's valid range count as
/// faults as well, so the returned [`Reading`] always carries a usable `f32`.
pub fn safe_read<F>(index: usize, channel: &ChannelConfig, now_ms: u64, decode: F) -> Reading
where
    F: FnOnce() -> Result<f32, SensorError>,
{
    let checked = decode().and_then(|value| {
        if !value.is_finite() {
            Err(SensorError::NotFinite)
        } else if !channel.in_range(value) {
            Err(SensorError::OutOfRange {
                value,
                min: channel.min,
                max: channel.max,
            })
        } else {
            Ok(value)
        }
    });

    match checked {
        Ok(value) => {
            debug!("[{}] {:.2} {}", channel.name, value, channel.kind.unit());
            Reading {
                channel: index,
                value,
                outcome: ReadOutcome::Measured,
                timestamp_ms: now_ms,
            }
        }
        Err(err) => {
            warn!(
                "[{}] read failed, using fallback {}: {err}",
                channel.name, channel.fallback
            );
            Reading {
                channel: index,
                value: channel.fallback,
                outcome: ReadOutcome::Fallback,
                timestamp_ms: now_ms,
            }
        }
    }
}
