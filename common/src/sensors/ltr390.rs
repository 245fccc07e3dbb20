use embedded_hal::{delay::DelayNs, i2c::I2c};

use crate::error::SensorError;

pub const ADDRESS: u8 = 0x53;

const REG_MAIN_CTRL: u8 = 0x00;
const REG_MEAS_RATE: u8 = 0x04;
const REG_GAIN: u8 = 0x05;
const REG_PART_ID: u8 = 0x06;
const REG_UVS_DATA: u8 = 0x10;

const CTRL_ENABLE: u8 = 0x02;
const CTRL_UVS_MODE: u8 = 0x08;

/// 18 bit resolution, 100 ms measurement rate.
const MEAS_RATE_18BIT_100MS: u8 = 0x22;
const GAIN_6X: u8 = 0x02;
const CONVERSION_DELAY_MS: u32 = 100;

/// Counts per UV index at gain 18x / 20 bit, scaled to gain 6x / 18 bit.
const UV_COUNTS_PER_UVI: f32 = 2300.0 * (6.0 / 18.0) * 0.25;

pub struct Ltr390<I2C, D> {
    i2c: I2C,
    delay: D,
    address: u8,
}

impl<I2C: I2c, D: DelayNs> Ltr390<I2C, D> {
    /// Probes the part id and programs resolution and gain.
    pub fn new(i2c: I2C, delay: D) -> Result<Self, SensorError> {
        let mut sensor = Self {
            i2c,
            delay,
            address: ADDRESS,
        };

        // Several part revisions are in circulation, so the id is not checked.
        let mut part_id = [0_u8; 1];
        sensor
            .i2c
            .write_read(sensor.address, &[REG_PART_ID], &mut part_id)
            .map_err(SensorError::bus)?;

        sensor.write(REG_MAIN_CTRL, CTRL_ENABLE)?;
        sensor.delay.delay_ms(CONVERSION_DELAY_MS);
        sensor.write(REG_MEAS_RATE, MEAS_RATE_18BIT_100MS)?;
        sensor.write(REG_GAIN, GAIN_6X)?;
        Ok(sensor)
    }

    pub fn read_uv_raw(&mut self) -> Result<u32, SensorError> {
        self.write(REG_MAIN_CTRL, CTRL_ENABLE | CTRL_UVS_MODE)?;
        self.delay.delay_ms(CONVERSION_DELAY_MS);
        self.read20(REG_UVS_DATA)
    }

    pub fn uv_index(&mut self) -> Result<f32, SensorError> {
        self.read_uv_raw().map(uv_index_from_raw)
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(SensorError::bus)
    }

    fn read20(&mut self, register: u8) -> Result<u32, SensorError> {
        let mut data = [0_u8; 3];
        self.i2c
            .write_read(self.address, &[register], &mut data)
            .map_err(SensorError::bus)?;
        Ok(u32::from_le_bytes([data[0], data[1], data[2], 0]) & 0x000F_FFFF)
    }
}

pub fn uv_index_from_raw(raw: u32) -> f32 {
    raw as f32 / UV_COUNTS_PER_UVI
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sensors::fake::{FakeBus, FakeDelay};

    fn sensor(bus: FakeBus) -> Ltr390<FakeBus, FakeDelay> {
        Ltr390::new(bus, FakeDelay::default()).unwrap()
    }

    #[test]
    fn init_programs_rate_and_gain() {
        let ltr = sensor(FakeBus::with_device(ADDRESS));
        let writes: Vec<_> = ltr.i2c.writes.iter().map(|(_, bytes)| bytes.clone()).collect();

        assert_eq!(
            writes,
            vec![vec![0x06], vec![0x00, 0x02], vec![0x04, 0x22], vec![0x05, 0x02]]
        );
    }

    #[test]
    fn uv_read_switches_mode_and_masks_to_20_bits() {
        let mut bus = FakeBus::with_device(ADDRESS);
        bus.respond(ADDRESS, REG_UVS_DATA, &[0x34, 0x12, 0xF1]);
        let mut ltr = sensor(bus);

        assert_eq!(ltr.read_uv_raw().unwrap(), 0x0001_1234);
        assert!(ltr.i2c.writes.contains(&(ADDRESS, vec![0x00, 0x0A])));
    }

    #[test]
    fn uv_index_scales_counts() {
        let mut bus = FakeBus::with_device(ADDRESS);
        let raw = 1_150_u32.to_le_bytes();
        bus.respond(ADDRESS, REG_UVS_DATA, &raw[..3]);
        let mut ltr = sensor(bus);

        assert!((ltr.uv_index().unwrap() - 6.0).abs() < 0.01);
    }

    #[test]
    fn missing_device_fails_init() {
        assert!(Ltr390::new(FakeBus::default(), FakeDelay::default()).is_err());
    }
}
