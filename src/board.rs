//! Bring-up for the ESP32-2432S028R ("cheap yellow display").
//!
//! Wiring, fixed by the board:
//! - ILI9341 panel on SPI2: sck 14, mosi 13, miso 12, cs 15, dc 2,
//!   backlight 21
//! - XPT2046 touch on its own SPI3 bus: sck 25, mosi 32, miso 39, cs 33,
//!   contact-detect (PENIRQ) 36
//! - ESP-NOW radio on the built-in WIFI peripheral

use embassy_executor::Spawner;
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig};
use esp_hal::peripherals::Peripherals;
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use log::warn;
use static_cell::StaticCell;

use touchkit::xpt2046::Xpt2046;

use crate::display::Display;
use crate::radio::Radio;
use crate::touch::{FlashCalibrationStore, Touch, TouchConfig};

const DISPLAY_SPI_MHZ: u32 = 40;
// The XPT2046 tops out at 2.5 MHz; stay well under it.
const TOUCH_SPI_MHZ: u32 = 1;

static DISPLAY_BUFFER: StaticCell<[u8; 512]> = StaticCell::new();

pub struct Board {
    pub display: Display,
    pub touch: Touch,
    pub radio: Option<Radio>,
}

#[derive(Clone, Copy, Debug)]
pub enum BoardError {
    Display,
}

impl Board {
    /// Brings up display, touch and radio. Touch and radio failures
    /// degrade to inert handles; only a dead display is fatal, since
    /// nothing useful runs without it.
    pub async fn init(
        peripherals: Peripherals,
        spawner: Spawner,
        touch_config: TouchConfig,
    ) -> Result<Self, BoardError> {
        let display_spi = Spi::new(
            peripherals.SPI2,
            SpiConfig::default().with_frequency(Rate::from_mhz(DISPLAY_SPI_MHZ)),
        )
        .map_err(|_| BoardError::Display)?
        .with_sck(peripherals.GPIO14)
        .with_mosi(peripherals.GPIO13)
        .with_miso(peripherals.GPIO12);
        let display = Display::new(
            display_spi,
            Output::new(peripherals.GPIO15, Level::High, OutputConfig::default()),
            Output::new(peripherals.GPIO2, Level::Low, OutputConfig::default()),
            Output::new(peripherals.GPIO21, Level::Low, OutputConfig::default()),
            DISPLAY_BUFFER.init([0u8; 512]),
        )
        .map_err(|_| BoardError::Display)?;

        let store = FlashCalibrationStore::new(peripherals.FLASH);
        let touch = match Spi::new(
            peripherals.SPI3,
            SpiConfig::default().with_frequency(Rate::from_mhz(TOUCH_SPI_MHZ)),
        ) {
            Ok(spi) => {
                let spi = spi
                    .with_sck(peripherals.GPIO25)
                    .with_mosi(peripherals.GPIO32)
                    .with_miso(peripherals.GPIO39);
                let cs = Output::new(peripherals.GPIO33, Level::High, OutputConfig::default());
                // PENIRQ is pulled up inside the controller; GPIO36 has no
                // internal pull anyway.
                let irq = Input::new(peripherals.GPIO36, InputConfig::default());
                Touch::attach(&touch_config, store, Xpt2046::new(spi, cs), irq, spawner)
            }
            Err(err) => {
                warn!("touch: spi_init_failed err={:?}", err);
                Touch::detached(&touch_config, store)
            }
        };

        let radio = match Radio::init(peripherals.WIFI).await {
            Ok(radio) => Some(radio),
            Err(err) => {
                warn!("radio: unavailable err={:?}", err);
                None
            }
        };

        Ok(Self {
            display,
            touch,
            radio,
        })
    }
}
