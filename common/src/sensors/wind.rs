use embedded_hal::{delay::DelayNs, digital::InputPin};

use crate::error::SensorError;

const SAMPLE_PERIOD_MS: u32 = 1;

/// Cup anemometer on a reed switch: counts rising edges by polling for a
/// fixed window and converts pulses per second to wind speed.
pub struct WindSensor<P, D> {
    pin: P,
    delay: D,
    factor: f32,
    window_ms: u32,
}

impl<P: InputPin, D: DelayNs> WindSensor<P, D> {
    pub fn new(pin: P, delay: D, factor: f32, window_ms: u32) -> Self {
        Self {
            pin,
            delay,
            factor,
            window_ms: window_ms.max(SAMPLE_PERIOD_MS),
        }
    }

    pub fn count_pulses(&mut self) -> Result<u32, SensorError> {
        let mut last = self.pin.is_high().map_err(SensorError::bus)?;
        let mut pulses = 0_u32;
        let mut elapsed = 0;

        while elapsed < self.window_ms {
            self.delay.delay_ms(SAMPLE_PERIOD_MS);
            elapsed += SAMPLE_PERIOD_MS;

            let current = self.pin.is_high().map_err(SensorError::bus)?;
            if current && !last {
                pulses += 1;
            }
            last = current;
        }
        Ok(pulses)
    }

    pub fn speed(&mut self) -> Result<f32, SensorError> {
        let pulses = self.count_pulses()?;
        let per_second = pulses as f32 * 1000.0 / self.window_ms as f32;
        Ok(per_second * self.factor)
    }
}
