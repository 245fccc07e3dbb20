use embedded_hal::{delay::DelayNs, i2c::I2c};

use crate::error::SensorError;

pub const ADDRESS_LOW: u8 = 0x44;
pub const ADDRESS_HIGH: u8 = 0x45;

/// Single shot, high repeatability, clock stretching enabled.
const MEASURE_HIGH_REPEATABILITY: [u8; 2] = [0x2C, 0x06];
const MEASUREMENT_DELAY_MS: u32 = 15;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub temperature_c: f32,
    pub humidity: f32,
}

pub struct Sht30<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C: I2c, D: DelayNs> Sht30<I2C, D> {
    pub fn new(i2c: I2C, delay: D, address: u8) -> Self {
        Self {
            i2c,
            delay,
            address,
        }
    }

    pub fn measure(&mut self) -> Result<Measurement, SensorError> {
        self.i2c
            .write(self.address, &MEASURE_HIGH_REPEATABILITY)
            .map_err(SensorError::bus)?;
        self.delay.delay_ms(MEASUREMENT_DELAY_MS);

        let mut frame = [0_u8; 6];
        self.i2c
            .read(self.address, &mut frame)
            .map_err(SensorError::bus)?;

        let raw_temp = checked_word(&frame[0..3])?;
        let raw_humidity = checked_word(&frame[3..6])?;

        Ok(Measurement {
            temperature_c: -45.0 + 175.0 * f32::from(raw_temp) / 65535.0,
            humidity: 100.0 * f32::from(raw_humidity) / 65535.0,
        })
    }

    pub fn temperature_c(&mut self) -> Result<f32, SensorError> {
        self.measure().map(|m| m.temperature_c)
    }

    pub fn humidity(&mut self) -> Result<f32, SensorError> {
        self.measure().map(|m| m.humidity)
    }
}

fn checked_word(chunk: &[u8]) -> Result<u16, SensorError> {
    let expected = crc8(&chunk[..2]);
    if expected != chunk[2] {
        return Err(SensorError::Crc {
            expected,
            actual: chunk[2],
        });
    }
    Ok(u16::from_be_bytes([chunk[0], chunk[1]]))
}

/// Sensirion CRC-8: polynomial 0x31, init 0xFF.
pub fn crc8(data: &[u8]) -> u8 {
    let mut crc = 0xFF_u8;
    for byte in data {
        crc ^= byte;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x31
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sensors::fake::{FakeBus, FakeDelay};

    fn frame(temp: u16, humidity: u16) -> Vec<u8> {
        let t = temp.to_be_bytes();
        let h = humidity.to_be_bytes();
        vec![t[0], t[1], crc8(&t), h[0], h[1], crc8(&h)]
    }

    #[test]
    fn crc_matches_datasheet_vector() {
        assert_eq!(crc8(&[0xBE, 0xEF]), 0x92);
    }

    #[test]
    fn decodes_temperature_and_humidity() {
        let mut bus = FakeBus::with_device(ADDRESS_HIGH);
        bus.respond(ADDRESS_HIGH, 0x2C, &frame(0x6666, 0x8000));
        let mut sensor = Sht30::new(bus, FakeDelay::default(), ADDRESS_HIGH);

        let m = sensor.measure().unwrap();
        assert!((m.temperature_c - 25.0).abs() < 0.01);
        assert!((m.humidity - 50.0).abs() < 0.01);
        assert_eq!(sensor.delay.total_ns, 15_000_000);
        assert_eq!(sensor.i2c.writes[0], (ADDRESS_HIGH, vec![0x2C, 0x06]));
    }

    #[test]
    fn corrupted_frame_is_rejected() {
        let mut bytes = frame(0x6666, 0x8000);
        bytes[2] ^= 0xFF;
        let mut bus = FakeBus::with_device(ADDRESS_LOW);
        bus.respond(ADDRESS_LOW, 0x2C, &bytes);
        let mut sensor = Sht30::new(bus, FakeDelay::default(), ADDRESS_LOW);

        assert!(matches!(sensor.measure(), Err(SensorError::Crc { .. })));
    }

    #[test]
    fn absent_device_is_a_bus_error() {
        let mut sensor = Sht30::new(FakeBus::default(), FakeDelay::default(), ADDRESS_LOW);
        assert!(matches!(sensor.temperature_c(), Err(SensorError::Bus(_))));
    }
}
