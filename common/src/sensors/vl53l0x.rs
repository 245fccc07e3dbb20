use embedded_hal::{delay::DelayNs, i2c::I2c};

use crate::error::SensorError;

pub const ADDRESS: u8 = 0x29;

const REG_SYSRANGE_START: u8 = 0x00;
const REG_SYSTEM_INTERRUPT_CLEAR: u8 = 0x0B;
const REG_RESULT_INTERRUPT_STATUS: u8 = 0x13;
const REG_RESULT_RANGE_MM: u8 = 0x1E;

const START_CONTINUOUS: u8 = 0x02;
const STARTUP_DELAY_MS: u32 = 100;
const POLL_INTERVAL_MS: u32 = 5;
const DEFAULT_TIMEOUT_MS: u32 = 500;

/// Minimal bring-up: stop variable / power sequence from the vendor API.
const INIT_SEQUENCE: [(u8, u8); 8] = [
    (0x88, 0x00),
    (0x80, 0x01),
    (0xFF, 0x01),
    (0x00, 0x00),
    (0x91, 0x3C),
    (0x00, 0x01),
    (0xFF, 0x00),
    (0x80, 0x00),
];

pub struct Vl53l0x<I2C, D> {
    i2c: I2C,
    delay: D,
    timeout_ms: u32,
}

impl<I2C: I2c, D: DelayNs> Vl53l0x<I2C, D> {
    pub fn new(i2c: I2C, delay: D) -> Result<Self, SensorError> {
        let mut sensor = Self {
            i2c,
            delay,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        };
        for (register, value) in INIT_SEQUENCE {
            sensor.write(register, value)?;
        }
        sensor.write(REG_SYSRANGE_START, START_CONTINUOUS)?;
        sensor.delay.delay_ms(STARTUP_DELAY_MS);
        Ok(sensor)
    }

    pub fn set_timeout_ms(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    pub fn read_mm(&mut self) -> Result<u16, SensorError> {
        let mut waited = 0;
        while self.read8(REG_RESULT_INTERRUPT_STATUS)? & 0x07 == 0 {
            if waited >= self.timeout_ms {
                return Err(SensorError::Timeout {
                    what: "VL53L0X range",
                });
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
            waited += POLL_INTERVAL_MS;
        }

        let mut data = [0_u8; 2];
        self.i2c
            .write_read(ADDRESS, &[REG_RESULT_RANGE_MM], &mut data)
            .map_err(SensorError::bus)?;
        self.write(REG_SYSTEM_INTERRUPT_CLEAR, 0x01)?;

        Ok(u16::from_be_bytes(data))
    }

    pub fn distance_mm(&mut self) -> Result<f32, SensorError> {
        self.read_mm().map(f32::from)
    }

    fn write(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        self.i2c
            .write(ADDRESS, &[register, value])
            .map_err(SensorError::bus)
    }

    fn read8(&mut self, register: u8) -> Result<u8, SensorError> {
        let mut data = [0_u8; 1];
        self.i2c
            .write_read(ADDRESS, &[register], &mut data)
            .map_err(SensorError::bus)?;
        Ok(data[0])
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sensors::fake::{FakeBus, FakeDelay};

    #[test]
    fn waits_for_data_ready_then_clears_interrupt() {
        let mut bus = FakeBus::with_device(ADDRESS);
        bus.respond(ADDRESS, REG_RESULT_INTERRUPT_STATUS, &[0x00]);
        bus.respond(ADDRESS, REG_RESULT_INTERRUPT_STATUS, &[0x00]);
        bus.respond(ADDRESS, REG_RESULT_INTERRUPT_STATUS, &[0x04]);
        bus.respond(ADDRESS, REG_RESULT_RANGE_MM, &[0x01, 0x2C]);
        let mut tof = Vl53l0x::new(bus, FakeDelay::default()).unwrap();

        assert_eq!(tof.read_mm().unwrap(), 300);
        assert_eq!(tof.delay.total_ns, (100 + 2 * 5) * 1_000_000);
        assert_eq!(tof.i2c.writes.last(), Some(&(ADDRESS, vec![0x0B, 0x01])));
    }

    #[test]
    fn never_ready_times_out() {
        let mut bus = FakeBus::with_device(ADDRESS);
        bus.respond(ADDRESS, REG_RESULT_INTERRUPT_STATUS, &[0x00]);
        let mut tof = Vl53l0x::new(bus, FakeDelay::default()).unwrap();
        tof.set_timeout_ms(20);

        assert_eq!(
            tof.distance_mm(),
            Err(SensorError::Timeout {
                what: "VL53L0X range"
            })
        );
    }
}
