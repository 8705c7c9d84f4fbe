//! Interactive five-target calibration.
//!
//! The flow is poll driven: the caller shows the guidance screen, feeds
//! one raw sample (or a miss) per poll, and reacts to the returned step.
//! Capturing a target takes a sustained hold; an intermittent contact
//! restarts the hold from zero. A target that runs out of its poll
//! budget is skipped, not fatal; the run only fails when fewer than
//! four of the five targets were captured.

use core::fmt::Write;

use heapless::String;

use crate::transform::{normalize, CalibrationParams, ScreenGeometry, ScreenPoint};
use crate::xpt2046::RawPoint;

pub const TARGET_COUNT: usize = 5;
pub const HOLD_POLLS: u8 = 10;
pub const TARGET_POLL_BUDGET: u16 = 100;
pub const DEFAULT_TARGET_MARGIN_PX: u16 = 20;
const MIN_CAPTURED_TARGETS: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationError {
    /// Fewer than four targets were held long enough.
    Incomplete { captured: u8 },
    /// The captured points do not span the panel (all in one spot, or a
    /// zero raw range on one axis).
    Degenerate,
}

#[derive(Clone, Copy, Debug)]
pub struct CalibrationReport {
    pub params: CalibrationParams,
    pub mean_error_px: u16,
    pub captured: u8,
}

#[derive(Clone, Copy, Debug)]
pub enum CalibrationStep {
    Collecting { target: u8, hold: u8 },
    TargetCaptured { target: u8 },
    TargetMissed { target: u8 },
    Finished(CalibrationReport),
    Failed(CalibrationError),
}

/// Drawing surface for calibration guidance. The engine only ever clears
/// the screen, places text and draws target markers; everything else the
/// display can do is none of its business.
pub trait GuidanceScreen {
    fn clear(&mut self);
    fn text_at(&mut self, x: u16, y: u16, text: &str);
    fn target_marker(&mut self, at: ScreenPoint);
}

pub struct CalibrationFlow {
    geometry: ScreenGeometry,
    margin: u16,
    targets: [ScreenPoint; TARGET_COUNT],
    target_index: u8,
    hold_count: u8,
    acc_x: u32,
    acc_y: u32,
    polls_used: u16,
    captured: [Option<RawPoint>; TARGET_COUNT],
    finished: bool,
}

impl CalibrationFlow {
    pub fn new(geometry: ScreenGeometry, margin: u16) -> Self {
        Self {
            geometry,
            margin,
            targets: target_points(geometry, margin),
            target_index: 0,
            hold_count: 0,
            acc_x: 0,
            acc_y: 0,
            polls_used: 0,
            captured: [None; TARGET_COUNT],
            finished: false,
        }
    }

    pub fn targets(&self) -> &[ScreenPoint; TARGET_COUNT] {
        &self.targets
    }

    pub fn current_target(&self) -> Option<(u8, ScreenPoint)> {
        if self.finished {
            None
        } else {
            Some((self.target_index, self.targets[self.target_index as usize]))
        }
    }

    pub fn hold_count(&self) -> u8 {
        self.hold_count
    }

    pub fn feed(&mut self, raw: Option<RawPoint>) -> CalibrationStep {
        if self.finished {
            return self.finish_step();
        }

        self.polls_used = self.polls_used.saturating_add(1);

        match raw {
            Some(point) => {
                self.hold_count += 1;
                self.acc_x += point.x as u32;
                self.acc_y += point.y as u32;
                if self.hold_count >= HOLD_POLLS {
                    let samples = self.hold_count as u32;
                    let average = RawPoint {
                        x: (self.acc_x / samples) as u16,
                        y: (self.acc_y / samples) as u16,
                    };
                    let target = self.target_index;
                    self.captured[target as usize] = Some(average);
                    self.advance();
                    return CalibrationStep::TargetCaptured { target };
                }
            }
            None => {
                // No partial credit for intermittent contact.
                self.hold_count = 0;
                self.acc_x = 0;
                self.acc_y = 0;
            }
        }

        if self.polls_used >= TARGET_POLL_BUDGET {
            let target = self.target_index;
            self.advance();
            return CalibrationStep::TargetMissed { target };
        }

        CalibrationStep::Collecting {
            target: self.target_index,
            hold: self.hold_count,
        }
    }

    fn advance(&mut self) {
        self.target_index += 1;
        self.hold_count = 0;
        self.acc_x = 0;
        self.acc_y = 0;
        self.polls_used = 0;
        if self.target_index as usize == TARGET_COUNT {
            self.finished = true;
        }
    }

    fn finish_step(&self) -> CalibrationStep {
        match derive_params(self.geometry, self.margin, &self.captured, &self.targets) {
            Ok(report) => CalibrationStep::Finished(report),
            Err(err) => CalibrationStep::Failed(err),
        }
    }

    pub fn render(&self, screen: &mut impl GuidanceScreen) {
        screen.clear();
        screen.text_at(10, 10, "Touch calibration");
        match self.current_target() {
            Some((index, point)) => {
                screen.text_at(10, 26, "Hold the marked target");
                let mut line: String<24> = String::new();
                let _ = write!(&mut line, "Target {}/{}", index + 1, TARGET_COUNT);
                screen.text_at(10, 42, &line);
                screen.target_marker(point);
            }
            None => {
                screen.text_at(10, 26, "Working...");
            }
        }
    }

    /// Small per-poll progress line, cheap enough to redraw every poll.
    pub fn render_hold(&self, screen: &mut impl GuidanceScreen) {
        let mut line: String<24> = String::new();
        let _ = write!(&mut line, "Hold {}/{} ", self.hold_count, HOLD_POLLS);
        screen.text_at(10, self.geometry.height - 16, &line);
    }
}

fn target_points(geometry: ScreenGeometry, margin: u16) -> [ScreenPoint; TARGET_COUNT] {
    let right = geometry.width - 1 - margin;
    let bottom = geometry.height - 1 - margin;
    [
        ScreenPoint::new(margin, margin),
        ScreenPoint::new(right, margin),
        ScreenPoint::new(margin, bottom),
        ScreenPoint::new(right, bottom),
        geometry.center(),
    ]
}

// Corner slots in the target array.
const TOP_LEFT: usize = 0;
const TOP_RIGHT: usize = 1;
const BOTTOM_LEFT: usize = 2;
const BOTTOM_RIGHT: usize = 3;

fn derive_params(
    geometry: ScreenGeometry,
    margin: u16,
    captured: &[Option<RawPoint>; TARGET_COUNT],
    targets: &[ScreenPoint; TARGET_COUNT],
) -> Result<CalibrationReport, CalibrationError> {
    let captured_count = captured.iter().flatten().count() as u8;
    if captured_count < MIN_CAPTURED_TARGETS {
        return Err(CalibrationError::Incomplete {
            captured: captured_count,
        });
    }

    // Axis assignment: whichever wire axis spreads more across the screen
    // columns than across the rows is the horizontal one.
    let left = group_mean(captured, &[TOP_LEFT, BOTTOM_LEFT]).ok_or(CalibrationError::Degenerate)?;
    let right =
        group_mean(captured, &[TOP_RIGHT, BOTTOM_RIGHT]).ok_or(CalibrationError::Degenerate)?;
    let top = group_mean(captured, &[TOP_LEFT, TOP_RIGHT]).ok_or(CalibrationError::Degenerate)?;
    let bottom =
        group_mean(captured, &[BOTTOM_LEFT, BOTTOM_RIGHT]).ok_or(CalibrationError::Degenerate)?;

    let column_span_x = (right.0 - left.0).abs();
    let row_span_x = (bottom.0 - top.0).abs();
    let swap_xy = row_span_x > column_span_x;

    let analytic = analytic_params(geometry, margin, captured, swap_xy)?;

    // Refinement pass: score every swap/flip combination against the
    // captured targets and keep the lowest-error one. On sane data this
    // agrees with the analytic inference; on marginal holds it corrects
    // a wrong flip before it gets persisted.
    let mut best = analytic;
    let mut best_score = score_params(&analytic, geometry, captured, targets);
    for swap in [false, true] {
        let Ok(base) = analytic_params(geometry, margin, captured, swap) else {
            continue;
        };
        for flips in 0..4u8 {
            let candidate = CalibrationParams {
                flip_x: flips & 0b01 != 0,
                flip_y: flips & 0b10 != 0,
                ..base
            };
            let score = score_params(&candidate, geometry, captured, targets);
            if score < best_score {
                best_score = score;
                best = candidate;
            }
        }
    }

    let mean_error_px = int_sqrt_u32(best_score).min(u16::MAX as u32) as u16;
    log::debug!(
        "calibration: derived swap_xy={} flip_x={} flip_y={} mean_error_px={}",
        best.swap_xy,
        best.flip_x,
        best.flip_y,
        mean_error_px
    );
    Ok(CalibrationReport {
        params: best,
        mean_error_px,
        captured: captured_count,
    })
}

/// Bounds and flips for one axis assignment, inferred from the corner
/// means and extrapolated from the inset targets out to the screen edges
/// using the measured raw-per-pixel ratio.
fn analytic_params(
    geometry: ScreenGeometry,
    margin: u16,
    captured: &[Option<RawPoint>; TARGET_COUNT],
    swap_xy: bool,
) -> Result<CalibrationParams, CalibrationError> {
    let corner = |index: usize| {
        captured[index].map(|point| {
            if swap_xy {
                (point.y as i32, point.x as i32)
            } else {
                (point.x as i32, point.y as i32)
            }
        })
    };

    let mut x_low = i32::MAX;
    let mut x_high = i32::MIN;
    let mut y_low = i32::MAX;
    let mut y_high = i32::MIN;
    for index in [TOP_LEFT, TOP_RIGHT, BOTTOM_LEFT, BOTTOM_RIGHT] {
        if let Some((x, y)) = corner(index) {
            x_low = x_low.min(x);
            x_high = x_high.max(x);
            y_low = y_low.min(y);
            y_high = y_high.max(y);
        }
    }

    let inner_px_x = geometry.width as i32 - 1 - 2 * margin as i32;
    let inner_px_y = geometry.height as i32 - 1 - 2 * margin as i32;
    let raw_span_x = x_high - x_low;
    let raw_span_y = y_high - y_low;
    if inner_px_x <= 0 || inner_px_y <= 0 || raw_span_x <= 0 || raw_span_y <= 0 {
        return Err(CalibrationError::Degenerate);
    }

    let extend_x = raw_span_x * margin as i32 / inner_px_x;
    let extend_y = raw_span_y * margin as i32 / inner_px_y;

    let mean = |a: usize, b: usize| {
        let points: [Option<(i32, i32)>; 2] = [corner(a), corner(b)];
        let mut sum = (0i64, 0i64);
        let mut count = 0i64;
        for (x, y) in points.into_iter().flatten() {
            sum.0 += x as i64;
            sum.1 += y as i64;
            count += 1;
        }
        if count == 0 {
            None
        } else {
            Some(((sum.0 / count) as i32, (sum.1 / count) as i32))
        }
    };
    let left = mean(TOP_LEFT, BOTTOM_LEFT).ok_or(CalibrationError::Degenerate)?;
    let right = mean(TOP_RIGHT, BOTTOM_RIGHT).ok_or(CalibrationError::Degenerate)?;
    let top = mean(TOP_LEFT, TOP_RIGHT).ok_or(CalibrationError::Degenerate)?;
    let bottom = mean(BOTTOM_LEFT, BOTTOM_RIGHT).ok_or(CalibrationError::Degenerate)?;

    Ok(CalibrationParams {
        x_min: (x_low - extend_x).clamp(0, u16::MAX as i32) as u16,
        x_max: (x_high + extend_x).clamp(0, u16::MAX as i32) as u16,
        y_min: (y_low - extend_y).clamp(0, u16::MAX as i32) as u16,
        y_max: (y_high + extend_y).clamp(0, u16::MAX as i32) as u16,
        flip_x: left.0 > right.0,
        flip_y: top.1 > bottom.1,
        swap_xy,
        calibrated: true,
    })
}

fn group_mean(
    captured: &[Option<RawPoint>; TARGET_COUNT],
    indices: &[usize],
) -> Option<(i32, i32)> {
    let mut sum = (0i64, 0i64);
    let mut count = 0i64;
    for &index in indices {
        if let Some(point) = captured[index] {
            sum.0 += point.x as i64;
            sum.1 += point.y as i64;
            count += 1;
        }
    }
    if count == 0 {
        None
    } else {
        Some(((sum.0 / count) as i32, (sum.1 / count) as i32))
    }
}

/// Mean squared screen-space error of the captured points through the
/// candidate parameters.
fn score_params(
    params: &CalibrationParams,
    geometry: ScreenGeometry,
    captured: &[Option<RawPoint>; TARGET_COUNT],
    targets: &[ScreenPoint; TARGET_COUNT],
) -> u32 {
    let mut sum = 0u64;
    let mut count = 0u64;
    for (raw, target) in captured.iter().zip(targets) {
        let Some(raw) = raw else { continue };
        let mapped = normalize(params, geometry, *raw);
        let dx = mapped.x as i64 - target.x as i64;
        let dy = mapped.y as i64 - target.y as i64;
        sum += (dx * dx + dy * dy) as u64;
        count += 1;
    }
    if count == 0 {
        u32::MAX
    } else {
        (sum / count).min(u32::MAX as u64) as u32
    }
}

fn int_sqrt_u32(value: u32) -> u32 {
    if value == 0 {
        return 0;
    }
    let mut low = 0u32;
    let mut high = value.min(65_535) + 1;
    while low + 1 < high {
        let mid = low + (high - low) / 2;
        if mid.saturating_mul(mid) <= value {
            low = mid;
        } else {
            high = mid;
        }
    }
    low
}
