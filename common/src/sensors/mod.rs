//! Register-level decoders for the station's sensors.
//!
//! Every driver owns its bus handle and a delay source and is generic over
//! the `embedded-hal` 1.0 traits, so the same code runs against esp-idf
//! peripherals, shared `RefCellDevice` buses or the fakes in [`fake`].

pub mod hx711;
pub mod ltr390;
pub mod sht30;
pub mod tsl2591;
pub mod vl53l0x;
pub mod wind;

pub use hx711::{Hx711, Hx711Gain};
pub use ltr390::Ltr390;
pub use sht30::Sht30;
pub use tsl2591::{Tsl2591, Tsl2591Gain, Tsl2591Integration};
pub use vl53l0x::Vl53l0x;
pub use wind::WindSensor;

#[cfg(test)]
pub(crate) mod fake {
    use std::collections::{HashMap, VecDeque};

    use embedded_hal::{
        delay::DelayNs,
        i2c::{self, ErrorKind, NoAcknowledgeSource, Operation},
    };

    /// Register-map I2C target. The first byte of every write selects the
    /// register that following reads return.
    #[derive(Debug, Default)]
    pub struct FakeBus {
        present: Vec<u8>,
        responses: HashMap<(u8, u8), VecDeque<Vec<u8>>>,
        pointer: u8,
        pub writes: Vec<(u8, Vec<u8>)>,
    }

    impl FakeBus {
        pub fn with_device(address: u8) -> Self {
            Self {
                present: vec![address],
                ..Default::default()
            }
        }

        /// Queue a response; the last queued response repeats forever.
        pub fn respond(&mut self, address: u8, register: u8, bytes: &[u8]) {
            self.responses
                .entry((address, register))
                .or_default()
                .push_back(bytes.to_vec());
        }

        fn next_response(&mut self, address: u8) -> Vec<u8> {
            match self.responses.get_mut(&(address, self.pointer)) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
                Some(queue) => queue.front().cloned().unwrap_or_default(),
                None => Vec::new(),
            }
        }
    }

    impl i2c::ErrorType for FakeBus {
        type Error = ErrorKind;
    }

    impl i2c::I2c for FakeBus {
        fn transaction(
            &mut self,
            address: u8,
            operations: &mut [Operation<'_>],
        ) -> Result<(), Self::Error> {
            if !self.present.contains(&address) {
                return Err(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address));
            }

            for op in operations {
                match op {
                    Operation::Write(bytes) => {
                        if let Some(first) = bytes.first() {
                            self.pointer = *first;
                        }
                        self.writes.push((address, bytes.to_vec()));
                    }
                    Operation::Read(buffer) => {
                        let response = self.next_response(address);
                        for (slot, byte) in buffer.iter_mut().zip(response.iter().chain(std::iter::repeat(&0))) {
                            *slot = *byte;
                        }
                    }
                }
            }
            Ok(())
        }
    }

    #[derive(Debug, Default, Clone, Copy)]
    pub struct FakeDelay {
        pub total_ns: u64,
    }

    impl DelayNs for FakeDelay {
        fn delay_ns(&mut self, ns: u32) {
            self.total_ns += u64::from(ns);
        }
    }
}
