use crate::config::ChannelConfig;
use anyhow::{Context, Result};
use rppal::i2c::I2c;

/// Command byte instructing the monitor to start a conversion cycle.
pub const CMD_BEGIN_READ: u8 = 0x01;

/// Reserved status value meaning the device had no fresh measurement.
pub const NOT_READY: u8 = 0xFF;

/// Register-oriented bus the energy monitor answers on. The production
/// implementation is I2C; tests script this trait directly.
pub trait StatusBus {
    fn begin_read(&mut self) -> Result<()>;
    fn read_status(&mut self) -> Result<u8>;
}

pub struct I2cStatusBus {
    i2c: I2c,
}

impl I2cStatusBus {
    pub fn open(bus: u8, address: u16, timeout_ms: u32) -> Result<Self> {
        let mut i2c = I2c::with_bus(bus).with_context(|| format!("opening i2c bus {bus}"))?;
        i2c.set_slave_address(address)
            .with_context(|| format!("selecting device address {address:#04x}"))?;
        i2c.set_timeout(timeout_ms).context("setting i2c timeout")?;
        Ok(Self { i2c })
    }
}

impl StatusBus for I2cStatusBus {
    fn begin_read(&mut self) -> Result<()> {
        self.i2c.smbus_send_byte(CMD_BEGIN_READ)?;
        Ok(())
    }

    fn read_status(&mut self) -> Result<u8> {
        let byte = self.i2c.smbus_receive_byte()?;
        Ok(byte)
    }
}

/// One poll's worth of sensor output. `NotReady` and `Io` both mean "no
/// usable state this cycle", but the caller decides logging per kind.
#[derive(Debug)]
pub enum ReadOutcome {
    Ready(Vec<bool>),
    NotReady,
    Io(anyhow::Error),
}

pub struct SensorReader<B: StatusBus> {
    bus: B,
    bit_indices: Vec<u8>,
}

impl<B: StatusBus> SensorReader<B> {
    pub fn new(bus: B, channels: &[ChannelConfig]) -> Self {
        Self {
            bus,
            bit_indices: channels.iter().map(|c| c.bit_index).collect(),
        }
    }

    /// Best-effort kick of the device's conversion cycle. The caller logs
    /// and moves on; the next poll retries naturally.
    pub fn begin_read(&mut self) -> Result<()> {
        self.bus.begin_read()
    }

    pub fn read_state(&mut self) -> ReadOutcome {
        match self.bus.read_status() {
            Ok(NOT_READY) => ReadOutcome::NotReady,
            Ok(byte) => ReadOutcome::Ready(decode_state(byte, &self.bit_indices)),
            Err(err) => ReadOutcome::Io(err),
        }
    }
}

fn decode_state(byte: u8, bit_indices: &[u8]) -> Vec<bool> {
    bit_indices
        .iter()
        .map(|&bit| (byte >> bit) & 1 == 1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::VecDeque;

    struct ScriptedBus {
        reads: VecDeque<Result<u8>>,
    }

    impl StatusBus for ScriptedBus {
        fn begin_read(&mut self) -> Result<()> {
            Ok(())
        }

        fn read_status(&mut self) -> Result<u8> {
            self.reads.pop_front().unwrap_or(Err(anyhow!("script exhausted")))
        }
    }

    fn channels() -> Vec<ChannelConfig> {
        vec![
            ChannelConfig { name: "phase 1".into(), bit_index: 0 },
            ChannelConfig { name: "phase 2".into(), bit_index: 1 },
            ChannelConfig { name: "phase 3".into(), bit_index: 2 },
        ]
    }

    #[test]
    fn decode_extracts_configured_bits() {
        assert_eq!(decode_state(0b0000_0101, &[0, 1, 2]), vec![true, false, true]);
        assert_eq!(decode_state(0b0000_0000, &[0, 1, 2]), vec![false, false, false]);
        assert_eq!(decode_state(0b0000_0010, &[1]), vec![true]);
    }

    #[test]
    fn sentinel_byte_maps_to_not_ready() {
        let bus = ScriptedBus { reads: VecDeque::from([Ok(NOT_READY)]) };
        let mut reader = SensorReader::new(bus, &channels());
        assert!(matches!(reader.read_state(), ReadOutcome::NotReady));
    }

    #[test]
    fn bus_fault_maps_to_io() {
        let bus = ScriptedBus { reads: VecDeque::from([Err(anyhow!("remote i/o error"))]) };
        let mut reader = SensorReader::new(bus, &channels());
        assert!(matches!(reader.read_state(), ReadOutcome::Io(_)));
    }

    #[test]
    fn valid_byte_decodes_per_channel() {
        let bus = ScriptedBus { reads: VecDeque::from([Ok(0b0000_0011)]) };
        let mut reader = SensorReader::new(bus, &channels());
        match reader.read_state() {
            ReadOutcome::Ready(state) => assert_eq!(state, vec![true, true, false]),
            other => panic!("expected Ready, got {other:?}"),
        }
    }
}
