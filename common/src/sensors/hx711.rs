use embedded_hal::{
    delay::DelayNs,
    digital::{InputPin, OutputPin},
};

use crate::error::SensorError;

const READY_POLL_MS: u32 = 1;
const DEFAULT_TIMEOUT_MS: u32 = 1_000;

/// Channel/gain selected for the *next* conversion, encoded as the number
/// of extra clock pulses after the 24 data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hx711Gain {
    A128,
    A64,
    B32,
}

impl Hx711Gain {
    fn pulses(self) -> u8 {
        match self {
            Self::A128 => 1,
            Self::A64 => 3,
            Self::B32 => 2,
        }
    }
}

/// Bit-banged HX711 load-cell ADC.
pub struct Hx711<DOUT, SCK, D> {
    dout: DOUT,
    sck: SCK,
    delay: D,
    gain: Hx711Gain,
    timeout_ms: u32,
    offset: f32,
    scale: f32,
}

impl<DOUT, SCK, D> Hx711<DOUT, SCK, D>
where
    DOUT: InputPin,
    SCK: OutputPin,
    D: DelayNs,
{
    pub fn new(dout: DOUT, mut sck: SCK, delay: D, gain: Hx711Gain) -> Result<Self, SensorError> {
        sck.set_low().map_err(SensorError::bus)?;
        Ok(Self {
            dout,
            sck,
            delay,
            gain,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            offset: 0.0,
            scale: 1.0,
        })
    }

    pub fn set_calibration(&mut self, offset: f32, scale: f32) {
        self.offset = offset;
        if scale != 0.0 {
            self.scale = scale;
        }
    }

    pub fn offset(&self) -> f32 {
        self.offset
    }

    /// One signed 24-bit conversion.
    pub fn read_raw(&mut self) -> Result<i32, SensorError> {
        self.wait_ready()?;

        let mut data = 0_u32;
        for _ in 0..24 {
            self.sck.set_high().map_err(SensorError::bus)?;
            let bit = self.dout.is_high().map_err(SensorError::bus)?;
            self.sck.set_low().map_err(SensorError::bus)?;
            data = (data << 1) | u32::from(bit);
        }

        for _ in 0..self.gain.pulses() {
            self.sck.set_high().map_err(SensorError::bus)?;
            self.sck.set_low().map_err(SensorError::bus)?;
        }

        if data & 0x80_0000 != 0 {
            data |= 0xFF00_0000;
        }
        Ok(data as i32)
    }

    /// Mean of the conversions that succeeded out of `samples` attempts.
    pub fn read_average(&mut self, samples: usize) -> Result<f32, SensorError> {
        let mut total = 0_i64;
        let mut good = 0_i64;
        for _ in 0..samples {
            if let Ok(value) = self.read_raw() {
                total += i64::from(value);
                good += 1;
            }
        }

        if good == 0 {
            return Err(SensorError::NoSamples);
        }
        Ok((total as f64 / good as f64) as f32)
    }

    pub fn tare(&mut self, samples: usize) -> Result<(), SensorError> {
        self.offset = self.read_average(samples)?;
        Ok(())
    }

    pub fn weight(&mut self, samples: usize) -> Result<f32, SensorError> {
        let value = self.read_average(samples)?;
        Ok((value - self.offset) / self.scale)
    }

    fn wait_ready(&mut self) -> Result<(), SensorError> {
        let mut waited = 0;
        while !self.dout.is_low().map_err(SensorError::bus)? {
            if waited >= self.timeout_ms {
                return Err(SensorError::Timeout { what: "HX711 ready" });
            }
            self.delay.delay_ms(READY_POLL_MS);
            waited += READY_POLL_MS;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use std::{cell::RefCell, convert::Infallible, rc::Rc};

    use embedded_hal::digital::{ErrorType, InputPin, OutputPin};

    use super::*;
    use crate::sensors::fake::FakeDelay;

    /// Simulated ADC: DOUT idles high until `busy_polls` readiness checks
    /// have passed, then shifts out `value` MSB first on SCK rising edges.
    #[derive(Debug, Default)]
    struct Adc {
        values: Vec<u32>,
        busy_polls: u32,
        clocks: u32,
        conversions: usize,
        max_clocks: u32,
    }

    struct Dout(Rc<RefCell<Adc>>);
    struct Sck(Rc<RefCell<Adc>>);

    impl ErrorType for Dout {
        type Error = Infallible;
    }

    impl InputPin for Dout {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            let adc = self.0.borrow();
            let value = adc.values[adc.conversions % adc.values.len()];
            Ok(match adc.clocks {
                1..=24 => (value >> (24 - adc.clocks)) & 1 == 1,
                _ => false,
            })
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            let mut adc = self.0.borrow_mut();
            if adc.clocks > 0 {
                adc.clocks = 0;
                adc.conversions += 1;
            }
            if adc.busy_polls > 0 {
                adc.busy_polls -= 1;
                return Ok(false);
            }
            Ok(true)
        }
    }

    impl ErrorType for Sck {
        type Error = Infallible;
    }

    impl OutputPin for Sck {
        fn set_high(&mut self) -> Result<(), Infallible> {
            let mut adc = self.0.borrow_mut();
            adc.clocks += 1;
            adc.max_clocks = adc.max_clocks.max(adc.clocks);
            Ok(())
        }

        fn set_low(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    fn hx711(adc: Adc, gain: Hx711Gain) -> (Hx711<Dout, Sck, FakeDelay>, Rc<RefCell<Adc>>) {
        let adc = Rc::new(RefCell::new(adc));
        let sensor = Hx711::new(Dout(adc.clone()), Sck(adc.clone()), FakeDelay::default(), gain).unwrap();
        (sensor, adc)
    }

    #[test]
    fn reads_positive_and_negative_counts() {
        let (mut sensor, _) = hx711(
            Adc {
                values: vec![0x00_1234, 0xFF_FFFE],
                ..Default::default()
            },
            Hx711Gain::A128,
        );

        assert_eq!(sensor.read_raw().unwrap(), 0x1234);
        assert_eq!(sensor.read_raw().unwrap(), -2);
    }

    #[test]
    fn gain_selects_extra_pulses() {
        let (mut sensor, adc) = hx711(
            Adc {
                values: vec![1],
                ..Default::default()
            },
            Hx711Gain::A64,
        );

        sensor.read_raw().unwrap();
        assert_eq!(adc.borrow().max_clocks, 27);
    }

    #[test]
    fn busy_converter_times_out() {
        let (mut sensor, _) = hx711(
            Adc {
                values: vec![1],
                busy_polls: u32::MAX,
                ..Default::default()
            },
            Hx711Gain::A128,
        );

        assert_eq!(sensor.read_raw(), Err(SensorError::Timeout { what: "HX711 ready" }));
        assert_eq!(sensor.read_average(3), Err(SensorError::NoSamples));
    }

    #[test]
    fn weight_applies_tare_and_scale() {
        let (mut sensor, adc) = hx711(
            Adc {
                values: vec![1_000],
                ..Default::default()
            },
            Hx711Gain::A128,
        );

        sensor.tare(5).unwrap();
        assert_eq!(sensor.offset(), 1_000.0);

        adc.borrow_mut().values = vec![1_500];
        sensor.set_calibration(sensor.offset(), 2.0);
        assert_eq!(sensor.weight(5).unwrap(), 250.0);
    }
}
