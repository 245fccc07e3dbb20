use embedded_hal::{delay::DelayNs, i2c::I2c};

use crate::error::SensorError;

pub const ADDRESS: u8 = 0x29;

const COMMAND_BIT: u8 = 0xA0;
const REG_ENABLE: u8 = 0x00;
const REG_CONTROL: u8 = 0x01;
const REG_CH0_LOW: u8 = 0x14;
const REG_CH1_LOW: u8 = 0x16;

const ENABLE_POWERON: u8 = 0x01;
const ENABLE_AEN: u8 = 0x02;
const SETTLE_MS: u32 = 10;

/// Device counts per lux, from the manufacturer's application note.
const LUX_DF: f32 = 408.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tsl2591Gain {
    Low,
    Medium,
    High,
    Max,
}

impl Tsl2591Gain {
    fn bits(self) -> u8 {
        match self {
            Self::Low => 0x00,
            Self::Medium => 0x10,
            Self::High => 0x20,
            Self::Max => 0x30,
        }
    }

    fn multiplier(self) -> f32 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 25.0,
            Self::High => 428.0,
            Self::Max => 9876.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tsl2591Integration {
    Ms100,
    Ms200,
    Ms300,
    Ms400,
    Ms500,
    Ms600,
}

impl Tsl2591Integration {
    fn bits(self) -> u8 {
        match self {
            Self::Ms100 => 0x00,
            Self::Ms200 => 0x01,
            Self::Ms300 => 0x02,
            Self::Ms400 => 0x03,
            Self::Ms500 => 0x04,
            Self::Ms600 => 0x05,
        }
    }

    fn millis(self) -> f32 {
        f32::from(self.bits() + 1) * 100.0
    }
}

pub struct Tsl2591<I2C, D> {
    i2c: I2C,
    delay: D,
    gain: Tsl2591Gain,
    integration: Tsl2591Integration,
}

impl<I2C: I2c, D: DelayNs> Tsl2591<I2C, D> {
    pub fn new(i2c: I2C, delay: D) -> Result<Self, SensorError> {
        Self::with_timing(i2c, delay, Tsl2591Gain::Medium, Tsl2591Integration::Ms300)
    }

    pub fn with_timing(
        i2c: I2C,
        delay: D,
        gain: Tsl2591Gain,
        integration: Tsl2591Integration,
    ) -> Result<Self, SensorError> {
        let mut sensor = Self {
            i2c,
            delay,
            gain,
            integration,
        };
        sensor.write(REG_ENABLE, ENABLE_POWERON | ENABLE_AEN)?;
        sensor.delay.delay_ms(SETTLE_MS);
        sensor.write(REG_CONTROL, gain.bits() | integration.bits())?;
        sensor.delay.delay_ms(SETTLE_MS);
        Ok(sensor)
    }

    /// Full-spectrum (CH0) and infrared (CH1) counts.
    pub fn raw_luminosity(&mut self) -> Result<(u16, u16), SensorError> {
        let full = self.read16(REG_CH0_LOW)?;
        let ir = self.read16(REG_CH1_LOW)?;
        Ok((full, ir))
    }

    pub fn lux(&mut self) -> Result<f32, SensorError> {
        let (full, ir) = self.raw_luminosity()?;
        Ok(self.calculate_lux(full, ir))
    }

    pub fn infrared(&mut self) -> Result<f32, SensorError> {
        self.raw_luminosity().map(|(_, ir)| f32::from(ir))
    }

    pub fn calculate_lux(&self, full: u16, ir: u16) -> f32 {
        if full == 0 {
            return 0.0;
        }
        let visible = f32::from(full.saturating_sub(ir));
        let counts_per_lux = self.integration.millis() * self.gain.multiplier() / LUX_DF;
        visible / counts_per_lux
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(ADDRESS, &[COMMAND_BIT | register, value])
            .map_err(SensorError::bus)
    }

    fn read16(&mut self, register: u8) -> Result<u16, SensorError> {
        let mut data = [0_u8; 2];
        self.i2c
            .write_read(ADDRESS, &[COMMAND_BIT | register], &mut data)
            .map_err(SensorError::bus)?;
        Ok(u16::from_le_bytes(data))
    }
}
