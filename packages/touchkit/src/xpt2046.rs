//! XPT2046 resistive touch controller sampler.
//!
//! The controller answers a one-byte channel command with a 12-bit
//! conversion result. A position read is always a paired X/Y exchange
//! inside a single chip-select window; letting other traffic onto the
//! bus between the two conversions corrupts the pair.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiBus;

const CMD_READ_X: u8 = 0b1101_0000;
const CMD_READ_Y: u8 = 0b1001_0000;

// A floating panel reads near zero or near full scale. Anything outside
// this window is electrical noise, not a contact.
const RAW_VALID_MIN: u16 = 32;
const RAW_VALID_MAX: u16 = 4000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawPoint {
    pub x: u16,
    pub y: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error<S, P> {
    Spi(S),
    Pin(P),
}

pub struct Xpt2046<Spi, Cs> {
    spi: Spi,
    cs: Cs,
}

impl<Spi, Cs> Xpt2046<Spi, Cs>
where
    Spi: SpiBus,
    Cs: OutputPin,
{
    pub fn new(spi: Spi, cs: Cs) -> Self {
        Self { spi, cs }
    }

    /// One paired X/Y conversion. `Ok(None)` means the panel is not being
    /// touched (or the reading was electrically implausible); the caller
    /// decides whether to re-poll.
    pub fn read_raw(&mut self) -> Result<Option<RawPoint>, Error<Spi::Error, Cs::Error>> {
        self.cs.set_low().map_err(Error::Pin)?;
        let pair = self.read_pair();
        // The select line is shared wiring on this board; it must be
        // released on every exit path or the bus locks up for the other
        // peripherals.
        let released = self.cs.set_high();
        let (x, y) = pair.map_err(Error::Spi)?;
        released.map_err(Error::Pin)?;

        if in_valid_window(x) && in_valid_window(y) {
            Ok(Some(RawPoint { x, y }))
        } else {
            Ok(None)
        }
    }

    fn read_pair(&mut self) -> Result<(u16, u16), Spi::Error> {
        let x = self.read_channel(CMD_READ_X)?;
        let y = self.read_channel(CMD_READ_Y)?;
        Ok((x, y))
    }

    fn read_channel(&mut self, command: u8) -> Result<u16, Spi::Error> {
        let mut frame = [command, 0, 0];
        self.spi.transfer_in_place(&mut frame)?;
        Ok(decode_frame(frame[1], frame[2]))
    }

    pub fn release(self) -> (Spi, Cs) {
        (self.spi, self.cs)
    }
}

fn decode_frame(high: u8, low: u8) -> u16 {
    ((high as u16) << 4) | ((low as u16) >> 4)
}

fn in_valid_window(value: u16) -> bool {
    (RAW_VALID_MIN..=RAW_VALID_MAX).contains(&value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Clone, Copy, Debug)]
    struct BusFault;

    impl embedded_hal::spi::Error for BusFault {
        fn kind(&self) -> embedded_hal::spi::ErrorKind {
            embedded_hal::spi::ErrorKind::Other
        }
    }

    struct ScriptedBus {
        // (high, low) conversion bytes returned per frame, oldest first
        responses: Vec<(u8, u8)>,
        commands: Vec<u8>,
        fail_on_frame: Option<usize>,
        frames_seen: usize,
    }

    impl ScriptedBus {
        fn new(responses: &[(u8, u8)]) -> Self {
            Self {
                responses: responses.iter().rev().copied().collect(),
                commands: Vec::new(),
                fail_on_frame: None,
                frames_seen: 0,
            }
        }
    }

    impl embedded_hal::spi::ErrorType for ScriptedBus {
        type Error = BusFault;
    }

    impl SpiBus for ScriptedBus {
        fn read(&mut self, _words: &mut [u8]) -> Result<(), BusFault> {
            Ok(())
        }

        fn write(&mut self, _words: &[u8]) -> Result<(), BusFault> {
            Ok(())
        }

        fn transfer(&mut self, _read: &mut [u8], _write: &[u8]) -> Result<(), BusFault> {
            Ok(())
        }

        fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), BusFault> {
            self.frames_seen += 1;
            if self.fail_on_frame == Some(self.frames_seen) {
                return Err(BusFault);
            }
            self.commands.push(words[0]);
            let (high, low) = self.responses.pop().unwrap_or((0, 0));
            words[0] = 0;
            words[1] = high;
            words[2] = low;
            Ok(())
        }

        fn flush(&mut self) -> Result<(), BusFault> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingPin {
        level_high: bool,
        transitions: Vec<bool>,
    }

    impl embedded_hal::digital::ErrorType for RecordingPin {
        type Error = core::convert::Infallible;
    }

    impl OutputPin for RecordingPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.level_high = false;
            self.transitions.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.level_high = true;
            self.transitions.push(true);
            Ok(())
        }
    }

    fn encode(value: u16) -> (u8, u8) {
        ((value >> 4) as u8, ((value & 0x0F) << 4) as u8)
    }

    #[test]
    fn paired_read_decodes_both_channels() {
        let bus = ScriptedBus::new(&[encode(1234), encode(987)]);
        let mut sampler = Xpt2046::new(bus, RecordingPin::default());

        let point = sampler.read_raw().unwrap();
        assert_eq!(point, Some(RawPoint { x: 1234, y: 987 }));

        let (bus, cs) = sampler.release();
        assert_eq!(bus.commands, std::vec![CMD_READ_X, CMD_READ_Y]);
        // CS low for the whole pair, then released once.
        assert_eq!(cs.transitions, std::vec![false, true]);
        assert!(cs.level_high);
    }

    #[test]
    fn out_of_window_reading_is_no_contact() {
        let bus = ScriptedBus::new(&[encode(5), encode(1200)]);
        let mut sampler = Xpt2046::new(bus, RecordingPin::default());
        assert_eq!(sampler.read_raw().unwrap(), None);

        let bus = ScriptedBus::new(&[encode(1200), encode(4090)]);
        let mut sampler = Xpt2046::new(bus, RecordingPin::default());
        assert_eq!(sampler.read_raw().unwrap(), None);
    }

    #[test]
    fn select_line_is_released_after_bus_error() {
        let mut bus = ScriptedBus::new(&[encode(1000), encode(1000)]);
        bus.fail_on_frame = Some(2);
        let mut sampler = Xpt2046::new(bus, RecordingPin::default());

        assert!(matches!(sampler.read_raw(), Err(Error::Spi(_))));
        let (_, cs) = sampler.release();
        assert!(cs.level_high);
    }

    #[test]
    fn window_boundaries_are_inclusive() {
        let bus = ScriptedBus::new(&[encode(RAW_VALID_MIN), encode(RAW_VALID_MAX)]);
        let mut sampler = Xpt2046::new(bus, RecordingPin::default());
        assert_eq!(
            sampler.read_raw().unwrap(),
            Some(RawPoint {
                x: RAW_VALID_MIN,
                y: RAW_VALID_MAX,
            })
        );
    }
}
