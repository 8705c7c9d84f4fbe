#![no_std]

#[cfg(test)]
extern crate std;

pub mod calibration;
pub mod gesture;
pub mod store;
pub mod transform;
pub mod xpt2046;

pub use gesture::{ContactSample, GestureEvent, GestureFlags, Rect, SwipeDirection, TouchEngine};
pub use transform::{CalibrationParams, ScreenGeometry, ScreenPoint};
pub use xpt2046::RawPoint;
