//! Contact-to-gesture state machine.
//!
//! The engine is tick driven: the sampling task feeds it one
//! `(now_ms, ContactSample)` per poll and it emits at most one completed
//! gesture per contact, classified at release time from the trajectory
//! endpoints. Latched results live in [`GestureFlags`], which implements
//! the consume-on-query semantics of the student-facing API.

use heapless::Vec;
use statig::{blocking::IntoStateMachineExt as _, prelude::*};

use crate::transform::ScreenPoint;

// Both press and release edges are gated by the same minimum inter-edge
// interval; the contact-detect line bounces electrically near both
// transitions.
const EDGE_DEBOUNCE_MS: u64 = 20;
pub const TAP_MAX_DISTANCE_PX: i32 = 8;
pub const SWIPE_MIN_DISTANCE_PX: i32 = 30;
const TRAJECTORY_CAP: usize = 128;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContactSample {
    /// Level of the contact-detect line at poll time.
    pub pen_down: bool,
    /// Normalized position, absent when the raw read was invalid.
    pub point: Option<ScreenPoint>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwipeDirection {
    Left,
    Right,
    Up,
    Down,
}

impl SwipeDirection {
    pub const ALL: [SwipeDirection; 4] = [
        SwipeDirection::Left,
        SwipeDirection::Right,
        SwipeDirection::Up,
        SwipeDirection::Down,
    ];

    fn index(self) -> usize {
        match self {
            SwipeDirection::Left => 0,
            SwipeDirection::Right => 1,
            SwipeDirection::Up => 2,
            SwipeDirection::Down => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub const fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, point: ScreenPoint) -> bool {
        point.x >= self.x
            && point.x < self.x.saturating_add(self.width)
            && point.y >= self.y
            && point.y < self.y.saturating_add(self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GestureEvent {
    Tap {
        at: ScreenPoint,
    },
    Swipe {
        direction: SwipeDirection,
        start: ScreenPoint,
        end: ScreenPoint,
    },
}

#[derive(Clone, Copy, Debug)]
struct TrajectoryPoint {
    point: ScreenPoint,
    t_ms: u64,
}

#[derive(Clone, Copy, Debug)]
enum TouchHsmEvent {
    Sample { now_ms: u64, sample: ContactSample },
}

#[derive(Clone, Copy, Debug, Default)]
struct DispatchContext {
    event: Option<GestureEvent>,
    live: Option<ScreenPoint>,
    active: bool,
}

impl DispatchContext {
    fn emit(&mut self, event: GestureEvent) {
        self.event = Some(event);
    }
}

pub struct TouchEngine {
    machine: statig::blocking::StateMachine<TouchHsm>,
    live: Option<ScreenPoint>,
    active: bool,
}

impl Default for TouchEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TouchEngine {
    pub fn new() -> Self {
        Self {
            machine: TouchHsm::new().state_machine(),
            live: None,
            active: false,
        }
    }

    pub fn tick(&mut self, now_ms: u64, sample: ContactSample) -> Option<GestureEvent> {
        let mut context = DispatchContext::default();
        self.machine
            .handle_with_context(&TouchHsmEvent::Sample { now_ms, sample }, &mut context);
        self.live = context.live;
        self.active = context.active;
        context.event
    }

    /// Live position of the contact currently in progress.
    pub fn current_touch(&self) -> Option<ScreenPoint> {
        self.live
    }

    pub fn contact_active(&self) -> bool {
        self.active
    }
}

struct TouchHsm {
    last_edge_ms: Option<u64>,
    trajectory: Vec<TrajectoryPoint, TRAJECTORY_CAP>,
    live_point: Option<ScreenPoint>,
}

impl TouchHsm {
    fn new() -> Self {
        Self {
            last_edge_ms: None,
            trajectory: Vec::new(),
            live_point: None,
        }
    }

    fn edge_allowed(&self, now_ms: u64) -> bool {
        self.last_edge_ms
            .is_none_or(|edge_ms| now_ms.saturating_sub(edge_ms) >= EDGE_DEBOUNCE_MS)
    }

    fn record_point(&mut self, now_ms: u64, point: ScreenPoint) {
        if self.trajectory.is_full() {
            // Drop the oldest half so long holds stay bounded while the
            // recent motion survives for classification.
            let keep = TRAJECTORY_CAP / 2;
            for index in 0..keep {
                self.trajectory[index] = self.trajectory[keep + index];
            }
            self.trajectory.truncate(keep);
        }
        let _ = self.trajectory.push(TrajectoryPoint {
            point,
            t_ms: now_ms,
        });
        self.live_point = Some(point);
    }

    fn classify(&self) -> Option<GestureEvent> {
        let first = self.trajectory.first()?.point;
        let last = self.trajectory.last()?.point;
        let distance_sq = squared_distance(first, last);

        if distance_sq <= squared_i32(TAP_MAX_DISTANCE_PX) {
            return Some(GestureEvent::Tap { at: last });
        }
        if distance_sq < squared_i32(SWIPE_MIN_DISTANCE_PX) {
            // Dead zone between the tap and swipe thresholds: ambiguous
            // motion is dropped rather than guessed at.
            return None;
        }

        let dx = last.x as i32 - first.x as i32;
        let dy = last.y as i32 - first.y as i32;
        let direction = if dx.abs() >= dy.abs() {
            if dx >= 0 {
                SwipeDirection::Right
            } else {
                SwipeDirection::Left
            }
        } else if dy >= 0 {
            SwipeDirection::Down
        } else {
            SwipeDirection::Up
        };
        Some(GestureEvent::Swipe {
            direction,
            start: first,
            end: last,
        })
    }
}

#[state_machine(initial = "State::idle()")]
impl TouchHsm {
    #[state]
    fn idle(&mut self, context: &mut DispatchContext, event: &TouchHsmEvent) -> Outcome<State> {
        match event {
            TouchHsmEvent::Sample { now_ms, sample } => {
                if !sample.pen_down || !self.edge_allowed(*now_ms) {
                    return Handled;
                }
                self.last_edge_ms = Some(*now_ms);
                self.trajectory.clear();
                self.live_point = None;
                if let Some(point) = sample.point {
                    self.record_point(*now_ms, point);
                }
                context.live = self.live_point;
                context.active = true;
                Transition(State::active())
            }
        }
    }

    #[state]
    fn active(&mut self, context: &mut DispatchContext, event: &TouchHsmEvent) -> Outcome<State> {
        match event {
            TouchHsmEvent::Sample { now_ms, sample } => {
                if sample.pen_down {
                    // Invalid polls during a contact are skipped, never
                    // treated as a release.
                    if let Some(point) = sample.point {
                        self.record_point(*now_ms, point);
                    }
                    context.live = self.live_point;
                    context.active = true;
                    return Handled;
                }

                if !self.edge_allowed(*now_ms) {
                    context.live = self.live_point;
                    context.active = true;
                    return Handled;
                }

                self.last_edge_ms = Some(*now_ms);
                if let (Some(first), Some(last)) = (self.trajectory.first(), self.trajectory.last())
                {
                    log::debug!(
                        "gesture: contact_end duration_ms={} points={}",
                        last.t_ms.saturating_sub(first.t_ms),
                        self.trajectory.len()
                    );
                }
                if let Some(event) = self.classify() {
                    context.emit(event);
                }
                self.trajectory.clear();
                self.live_point = None;
                Transition(State::idle())
            }
        }
    }
}

fn squared_distance(a: ScreenPoint, b: ScreenPoint) -> i32 {
    let dx = a.x as i32 - b.x as i32;
    let dy = a.y as i32 - b.y as i32;
    dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy))
}

fn squared_i32(value: i32) -> i32 {
    value.saturating_mul(value)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SwipeRecord {
    pub start: ScreenPoint,
    pub end: ScreenPoint,
}

/// Latched gesture results. Every query that "consumes" state does so
/// exactly the way the classroom API documents it: taps report once,
/// the counter resets on read, and matching any swipe clears all four
/// direction latches together.
#[derive(Debug, Default)]
pub struct GestureFlags {
    tapped: bool,
    tap_count: u16,
    swipes: [Option<SwipeRecord>; 4],
    last_touch: Option<ScreenPoint>,
}

impl GestureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latch(&mut self, event: GestureEvent) {
        match event {
            GestureEvent::Tap { at } => {
                self.tapped = true;
                self.tap_count = self.tap_count.saturating_add(1);
                self.last_touch = Some(at);
            }
            GestureEvent::Swipe {
                direction,
                start,
                end,
            } => {
                self.swipes[direction.index()] = Some(SwipeRecord { start, end });
                self.last_touch = Some(end);
            }
        }
    }

    /// Returns and clears the sticky tap flag.
    pub fn was_touched(&mut self) -> bool {
        core::mem::take(&mut self.tapped)
    }

    /// Returns the number of taps since the last call and resets it.
    pub fn take_touches(&mut self) -> u16 {
        core::mem::take(&mut self.tap_count)
    }

    /// Checks the directional latches. A `bounds` constraint requires both
    /// the start and the end of the recorded swipe to fall inside the
    /// rectangle. On any match all four direction latches are cleared
    /// together; callers that need per-direction history must query the
    /// specific direction first. This coupling is long-standing observed
    /// behavior and is kept for compatibility.
    pub fn was_swiped(&mut self, direction: Option<SwipeDirection>, bounds: Option<Rect>) -> bool {
        let matched = match direction {
            Some(direction) => self.swipes[direction.index()]
                .is_some_and(|record| record_in_bounds(record, bounds)),
            None => self
                .swipes
                .iter()
                .flatten()
                .any(|record| record_in_bounds(*record, bounds)),
        };
        if matched {
            self.swipes = [None; 4];
        }
        matched
    }

    /// Endpoint of the most recently completed gesture. Not consumed by
    /// the other queries.
    pub fn last_touch(&self) -> Option<ScreenPoint> {
        self.last_touch
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn record_in_bounds(record: SwipeRecord, bounds: Option<Rect>) -> bool {
    bounds.is_none_or(|rect| rect.contains(record.start) && rect.contains(record.end))
}

#[cfg(test)]
mod tests;
