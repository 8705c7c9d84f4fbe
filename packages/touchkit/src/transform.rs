//! Raw-sample to screen-coordinate mapping.
//!
//! The order is load-bearing: axis swap happens on raw values before the
//! linear rescale, axis flips happen on screen values after it. Stored
//! calibration bounds are expressed in the post-swap frame, so changing
//! the order silently invalidates every persisted calibration.

use serde::{Deserialize, Serialize};

use crate::xpt2046::RawPoint;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScreenPoint {
    pub x: u16,
    pub y: u16,
}

impl ScreenPoint {
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub width: u16,
    pub height: u16,
}

impl ScreenGeometry {
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    pub fn center(&self) -> ScreenPoint {
        ScreenPoint::new(self.width / 2, self.height / 2)
    }
}

/// Measured panel parameters for the ESP32-2432S028R. The bounds are the
/// raw window observed at the screen edges; the defaults below are the
/// stock values for an uncalibrated board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationParams {
    pub x_min: u16,
    pub x_max: u16,
    pub y_min: u16,
    pub y_max: u16,
    pub flip_x: bool,
    pub flip_y: bool,
    pub swap_xy: bool,
    pub calibrated: bool,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            x_min: 100,
            x_max: 1962,
            y_min: 100,
            y_max: 1900,
            flip_x: true,
            flip_y: true,
            swap_xy: true,
            calibrated: false,
        }
    }
}

pub fn normalize(params: &CalibrationParams, geometry: ScreenGeometry, raw: RawPoint) -> ScreenPoint {
    let (raw_x, raw_y) = if params.swap_xy {
        (raw.y, raw.x)
    } else {
        (raw.x, raw.y)
    };

    // Degenerate spans would divide by zero (or negative); clamp to 1 so a
    // broken record still produces an in-range point.
    let span_x = (params.x_max as i32 - params.x_min as i32).max(1);
    let span_y = (params.y_max as i32 - params.y_min as i32).max(1);

    let mut screen_x = (raw_x as i32 - params.x_min as i32) * geometry.width as i32 / span_x;
    let mut screen_y = (raw_y as i32 - params.y_min as i32) * geometry.height as i32 / span_y;

    if params.flip_x {
        screen_x = geometry.width as i32 - 1 - screen_x;
    }
    if params.flip_y {
        screen_y = geometry.height as i32 - 1 - screen_y;
    }

    ScreenPoint {
        x: screen_x.clamp(0, geometry.width as i32 - 1) as u16,
        y: screen_y.clamp(0, geometry.height as i32 - 1) as u16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GEOMETRY: ScreenGeometry = ScreenGeometry::new(320, 240);

    fn plain_params() -> CalibrationParams {
        CalibrationParams {
            x_min: 100,
            x_max: 1962,
            y_min: 100,
            y_max: 1900,
            flip_x: false,
            flip_y: false,
            swap_xy: false,
            calibrated: true,
        }
    }

    #[test]
    fn stock_panel_corners_map_to_screen_corners() {
        let params = plain_params();
        assert_eq!(
            normalize(&params, GEOMETRY, RawPoint { x: 100, y: 100 }),
            ScreenPoint::new(0, 0)
        );
        assert_eq!(
            normalize(&params, GEOMETRY, RawPoint { x: 1962, y: 1900 }),
            ScreenPoint::new(319, 239)
        );
    }

    #[test]
    fn output_is_always_clamped_to_screen() {
        let params = plain_params();
        for &(x, y) in &[(0u16, 0u16), (4095, 4095), (100, 4095), (4095, 100), (50, 2500)] {
            let point = normalize(&params, GEOMETRY, RawPoint { x, y });
            assert!(point.x < GEOMETRY.width);
            assert!(point.y < GEOMETRY.height);
        }
    }

    #[test]
    fn flips_mirror_after_rescale() {
        let mut params = plain_params();
        params.flip_x = true;
        params.flip_y = true;
        assert_eq!(
            normalize(&params, GEOMETRY, RawPoint { x: 100, y: 100 }),
            ScreenPoint::new(319, 239)
        );
        assert_eq!(
            normalize(&params, GEOMETRY, RawPoint { x: 1962, y: 1900 }),
            ScreenPoint::new(0, 0)
        );
    }

    #[test]
    fn swap_feeds_raw_y_into_screen_x() {
        let mut params = plain_params();
        params.swap_xy = true;
        // raw y drives screen x through the x bounds, raw x drives screen y.
        assert_eq!(
            normalize(&params, GEOMETRY, RawPoint { x: 100, y: 1962 }),
            ScreenPoint::new(319, 0)
        );
    }

    #[test]
    fn swap_before_rescale_and_flip_after_diverge_from_reordered_math() {
        // Asymmetric bounds make the operation order observable. The
        // reference below applies flip on raw values before the rescale,
        // which is exactly the bug this test guards against.
        let params = CalibrationParams {
            x_min: 200,
            x_max: 1800,
            y_min: 100,
            y_max: 1900,
            flip_x: true,
            flip_y: false,
            swap_xy: false,
            calibrated: true,
        };
        let raw = RawPoint { x: 700, y: 800 };

        let correct = normalize(&params, GEOMETRY, raw);

        let span_x = params.x_max as i32 - params.x_min as i32;
        let flipped_raw_x = params.x_max as i32 - (raw.x as i32 - params.x_min as i32);
        let wrong_x = (flipped_raw_x - params.x_min as i32) * GEOMETRY.width as i32 / span_x;

        assert_ne!(correct.x as i32, wrong_x.clamp(0, GEOMETRY.width as i32 - 1));
    }

    #[test]
    fn degenerate_bounds_do_not_divide_by_zero() {
        let mut params = plain_params();
        params.x_max = params.x_min;
        let point = normalize(&params, GEOMETRY, RawPoint { x: 1000, y: 1000 });
        assert!(point.x < GEOMETRY.width);
    }
}
