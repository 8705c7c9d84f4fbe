//! ILI9341 panel wrapper with a small classroom drawing API.
//!
//! Everything renders through embedded-graphics on a mipidsi driver; the
//! calibration engine sees this type only through its `GuidanceScreen`
//! trait.

use embedded_graphics::pixelcolor::raw::RawU16;
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Circle, Line, PrimitiveStyle, Rectangle};
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use esp_hal::gpio::Output;
use esp_hal::spi::master::Spi;
use esp_hal::Blocking;
use mipidsi::interface::SpiInterface;
use mipidsi::models::ILI9341Rgb565;
use mipidsi::options::{ColorOrder, Orientation, Rotation};
use u8g2_fonts::types::{FontColor, HorizontalAlignment, VerticalPosition};
use u8g2_fonts::{fonts, FontRenderer};

use touchkit::calibration::GuidanceScreen;
use touchkit::transform::ScreenPoint;

pub const SCREEN_WIDTH: u16 = 320;
pub const SCREEN_HEIGHT: u16 = 240;

const TEXT_FONT: FontRenderer = FontRenderer::new::<fonts::u8g2_font_6x13_tf>();
const TARGET_RADIUS_PX: i32 = 8;

type PanelSpiDevice = ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, NoDelay>;
type PanelInterface = SpiInterface<'static, PanelSpiDevice, Output<'static>>;
type Panel = mipidsi::Display<PanelInterface, ILI9341Rgb565, mipidsi::NoResetPin>;

/// The palette students refer to by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamedColor {
    Black,
    White,
    Red,
    Green,
    Blue,
    Yellow,
    Cyan,
    Magenta,
    Orange,
    Purple,
    Pink,
    Brown,
    Gray,
}

/// A color argument: a palette name, an explicit RGB triple, or a raw
/// RGB565 value. One resolution function, no guessing about what kind of
/// value was handed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    Named(NamedColor),
    Rgb(u8, u8, u8),
    Raw(u16),
}

impl Color {
    pub fn resolve(self) -> Rgb565 {
        match self {
            Color::Named(named) => named.resolve(),
            Color::Rgb(r, g, b) => Rgb565::new(r >> 3, g >> 2, b >> 3),
            Color::Raw(value) => Rgb565::from(RawU16::new(value)),
        }
    }
}

impl From<NamedColor> for Color {
    fn from(named: NamedColor) -> Self {
        Color::Named(named)
    }
}

impl NamedColor {
    fn resolve(self) -> Rgb565 {
        match self {
            NamedColor::Black => Rgb565::BLACK,
            NamedColor::White => Rgb565::WHITE,
            NamedColor::Red => Rgb565::RED,
            NamedColor::Green => Rgb565::GREEN,
            NamedColor::Blue => Rgb565::BLUE,
            NamedColor::Yellow => Rgb565::YELLOW,
            NamedColor::Cyan => Rgb565::CYAN,
            NamedColor::Magenta => Rgb565::MAGENTA,
            NamedColor::Orange => Rgb565::new(31, 41, 0),
            NamedColor::Purple => Rgb565::new(16, 0, 16),
            NamedColor::Pink => Rgb565::new(31, 48, 25),
            NamedColor::Brown => Rgb565::new(20, 10, 5),
            NamedColor::Gray => Rgb565::new(16, 32, 16),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DisplaySetupError;

pub struct Display {
    panel: Panel,
    backlight: Output<'static>,
}

impl Display {
    pub(crate) fn new(
        spi: Spi<'static, Blocking>,
        cs: Output<'static>,
        dc: Output<'static>,
        backlight: Output<'static>,
        buffer: &'static mut [u8],
    ) -> Result<Self, DisplaySetupError> {
        let spi_device = ExclusiveDevice::new_no_delay(spi, cs).map_err(|_| DisplaySetupError)?;
        let interface = SpiInterface::new(spi_device, dc, buffer);
        let panel = mipidsi::Builder::new(ILI9341Rgb565, interface)
            // Native portrait panel rotated into the board's landscape
            // orientation.
            .display_size(SCREEN_HEIGHT, SCREEN_WIDTH)
            .orientation(Orientation::new().rotate(Rotation::Deg90))
            .color_order(ColorOrder::Bgr)
            .init(&mut embassy_time::Delay)
            .map_err(|_| DisplaySetupError)?;

        let mut display = Self { panel, backlight };
        display.backlight.set_high();
        display.clear(NamedColor::Black.into());
        Ok(display)
    }

    pub fn width(&self) -> u16 {
        SCREEN_WIDTH
    }

    pub fn height(&self) -> u16 {
        SCREEN_HEIGHT
    }

    pub fn backlight(&mut self, on: bool) {
        if on {
            self.backlight.set_high();
        } else {
            self.backlight.set_low();
        }
    }

    pub fn clear(&mut self, color: Color) {
        let _ = self.panel.clear(color.resolve());
    }

    pub fn show_text_at(&mut self, x: u16, y: u16, text: &str, color: Color) {
        let _ = TEXT_FONT.render_aligned(
            text,
            Point::new(x as i32, y as i32),
            VerticalPosition::Top,
            HorizontalAlignment::Left,
            FontColor::Transparent(color.resolve()),
            &mut self.panel,
        );
    }

    pub fn draw_pixel(&mut self, x: u16, y: u16, color: Color) {
        let _ = Pixel(Point::new(x as i32, y as i32), color.resolve()).draw(&mut self.panel);
    }

    pub fn draw_line(&mut self, x1: u16, y1: u16, x2: u16, y2: u16, color: Color) {
        let _ = Line::new(
            Point::new(x1 as i32, y1 as i32),
            Point::new(x2 as i32, y2 as i32),
        )
        .into_styled(PrimitiveStyle::with_stroke(color.resolve(), 1))
        .draw(&mut self.panel);
    }

    pub fn draw_rectangle(&mut self, x: u16, y: u16, width: u16, height: u16, color: Color, filled: bool) {
        let rectangle = Rectangle::new(
            Point::new(x as i32, y as i32),
            Size::new(width as u32, height as u32),
        );
        let style = if filled {
            PrimitiveStyle::with_fill(color.resolve())
        } else {
            PrimitiveStyle::with_stroke(color.resolve(), 1)
        };
        let _ = rectangle.into_styled(style).draw(&mut self.panel);
    }

    pub fn draw_circle(&mut self, x: u16, y: u16, radius: u16, color: Color, filled: bool) {
        let circle = Circle::new(
            Point::new(x as i32 - radius as i32, y as i32 - radius as i32),
            (radius as u32) * 2,
        );
        let style = if filled {
            PrimitiveStyle::with_fill(color.resolve())
        } else {
            PrimitiveStyle::with_stroke(color.resolve(), 1)
        };
        let _ = circle.into_styled(style).draw(&mut self.panel);
    }
}

impl GuidanceScreen for Display {
    fn clear(&mut self) {
        Display::clear(self, NamedColor::Black.into());
    }

    fn text_at(&mut self, x: u16, y: u16, text: &str) {
        self.show_text_at(x, y, text, NamedColor::White.into());
    }

    fn target_marker(&mut self, at: ScreenPoint) {
        let center = Point::new(at.x as i32, at.y as i32);
        let _ = Circle::new(
            center - Point::new(TARGET_RADIUS_PX, TARGET_RADIUS_PX),
            (TARGET_RADIUS_PX * 2) as u32,
        )
        .into_styled(PrimitiveStyle::with_stroke(Rgb565::RED, 2))
        .draw(&mut self.panel);
        let _ = Line::new(center - Point::new(5, 0), center + Point::new(5, 0))
            .into_styled(PrimitiveStyle::with_stroke(Rgb565::WHITE, 1))
            .draw(&mut self.panel);
        let _ = Line::new(center - Point::new(0, 5), center + Point::new(0, 5))
            .into_styled(PrimitiveStyle::with_stroke(Rgb565::WHITE, 1))
            .draw(&mut self.panel);
    }
}
