use super::*;
use crate::transform::ScreenPoint;

fn down(x: u16, y: u16) -> ContactSample {
    ContactSample {
        pen_down: true,
        point: Some(ScreenPoint::new(x, y)),
    }
}

fn down_invalid() -> ContactSample {
    ContactSample {
        pen_down: true,
        point: None,
    }
}

fn up() -> ContactSample {
    ContactSample {
        pen_down: false,
        point: None,
    }
}

fn run_contact(engine: &mut TouchEngine, points: &[(u64, u16, u16)], release_ms: u64) -> Option<GestureEvent> {
    let mut event = None;
    for &(t_ms, x, y) in points {
        if let Some(e) = engine.tick(t_ms, down(x, y)) {
            event = Some(e);
        }
    }
    engine.tick(release_ms, up()).or(event)
}

#[test]
fn short_contact_classifies_as_tap_at_last_point() {
    let mut engine = TouchEngine::new();
    let event = run_contact(
        &mut engine,
        &[(0, 100, 120), (10, 101, 120), (20, 101, 121)],
        50,
    );
    assert_eq!(
        event,
        Some(GestureEvent::Tap {
            at: ScreenPoint::new(101, 121)
        })
    );
}

#[test]
fn displacement_of_exactly_tap_max_is_a_tap() {
    let mut engine = TouchEngine::new();
    let event = run_contact(&mut engine, &[(0, 100, 100), (10, 108, 100)], 40);
    assert_eq!(
        event,
        Some(GestureEvent::Tap {
            at: ScreenPoint::new(108, 100)
        })
    );
}

#[test]
fn displacement_of_exactly_swipe_min_is_a_swipe() {
    let mut engine = TouchEngine::new();
    let event = run_contact(&mut engine, &[(0, 100, 100), (10, 130, 100)], 40);
    assert_eq!(
        event,
        Some(GestureEvent::Swipe {
            direction: SwipeDirection::Right,
            start: ScreenPoint::new(100, 100),
            end: ScreenPoint::new(130, 100),
        })
    );
}

#[test]
fn displacement_between_thresholds_is_dropped() {
    let mut engine = TouchEngine::new();
    let event = run_contact(&mut engine, &[(0, 100, 100), (10, 120, 100)], 40);
    assert_eq!(event, None);
}

#[test]
fn all_four_directions_classify_by_dominant_axis() {
    let cases = [
        ((200u16, 100u16), (150u16, 110u16), SwipeDirection::Left),
        ((100, 100), (160, 92), SwipeDirection::Right),
        ((100, 200), (108, 150), SwipeDirection::Up),
        ((100, 100), (94, 160), SwipeDirection::Down),
    ];
    for (start, end, expected) in cases {
        let mut engine = TouchEngine::new();
        let event = run_contact(
            &mut engine,
            &[(0, start.0, start.1), (10, end.0, end.1)],
            40,
        );
        match event {
            Some(GestureEvent::Swipe { direction, .. }) => assert_eq!(direction, expected),
            other => panic!("expected swipe {:?}, got {:?}", expected, other),
        }
    }
}

#[test]
fn invalid_polls_during_contact_do_not_end_the_gesture() {
    let mut engine = TouchEngine::new();
    assert_eq!(engine.tick(0, down(100, 100)), None);
    assert_eq!(engine.tick(10, down_invalid()), None);
    assert_eq!(engine.tick(20, down_invalid()), None);
    assert!(engine.contact_active());
    assert_eq!(engine.tick(30, down(140, 100)), None);
    let event = engine.tick(70, up());
    assert_eq!(
        event,
        Some(GestureEvent::Swipe {
            direction: SwipeDirection::Right,
            start: ScreenPoint::new(100, 100),
            end: ScreenPoint::new(140, 100),
        })
    );
}

#[test]
fn release_flicker_inside_debounce_does_not_split_the_contact() {
    let mut engine = TouchEngine::new();
    assert_eq!(engine.tick(0, down(50, 100)), None);
    assert_eq!(engine.tick(10, down(90, 100)), None);
    // Pen line bounces up 16 ms after the press edge; the release edge is
    // still inside the debounce window and must be ignored.
    assert_eq!(engine.tick(16, up()), None);
    assert!(engine.contact_active());
    assert_eq!(engine.tick(24, down(150, 100)), None);
    let event = engine.tick(60, up());
    assert_eq!(
        event,
        Some(GestureEvent::Swipe {
            direction: SwipeDirection::Right,
            start: ScreenPoint::new(50, 100),
            end: ScreenPoint::new(150, 100),
        })
    );
}

#[test]
fn press_bounce_after_release_is_debounced() {
    let mut engine = TouchEngine::new();
    let mut taps = 0;
    for (t_ms, sample) in [
        (0, down(100, 100)),
        (10, down(100, 100)),
        (30, up()),
        // Bounce 10 ms after the release edge: no new contact.
        (40, down(100, 100)),
        (50, up()),
        // Real second press, well past the debounce interval.
        (60, down(100, 100)),
        (70, down(100, 100)),
        (100, up()),
    ] {
        if let Some(GestureEvent::Tap { .. }) = engine.tick(t_ms, sample) {
            taps += 1;
        }
    }
    assert_eq!(taps, 2);
}

#[test]
fn trajectory_cap_discards_oldest_half_but_keeps_recent_motion() {
    let mut engine = TouchEngine::new();
    assert_eq!(engine.tick(0, down(0, 100)), None);
    for step in 1..=200u16 {
        assert_eq!(engine.tick(step as u64 * 10, down(step, 100)), None);
    }
    let event = engine.tick(2100, up());
    assert_eq!(
        event,
        Some(GestureEvent::Swipe {
            direction: SwipeDirection::Right,
            start: ScreenPoint::new(128, 100),
            end: ScreenPoint::new(200, 100),
        })
    );
}

#[test]
fn live_position_tracks_contact_and_clears_on_release() {
    let mut engine = TouchEngine::new();
    assert_eq!(engine.current_touch(), None);
    engine.tick(0, down(120, 80));
    assert_eq!(engine.current_touch(), Some(ScreenPoint::new(120, 80)));
    engine.tick(10, down_invalid());
    assert_eq!(engine.current_touch(), Some(ScreenPoint::new(120, 80)));
    engine.tick(20, down(125, 82));
    assert_eq!(engine.current_touch(), Some(ScreenPoint::new(125, 82)));
    engine.tick(60, up());
    assert_eq!(engine.current_touch(), None);
    assert!(!engine.contact_active());
}

#[test]
fn was_touched_reports_each_tap_exactly_once() {
    let mut flags = GestureFlags::new();
    flags.latch(GestureEvent::Tap {
        at: ScreenPoint::new(10, 10),
    });
    assert!(flags.was_touched());
    assert!(!flags.was_touched());
}

#[test]
fn take_touches_counts_then_resets() {
    let mut flags = GestureFlags::new();
    flags.latch(GestureEvent::Tap {
        at: ScreenPoint::new(10, 10),
    });
    flags.latch(GestureEvent::Tap {
        at: ScreenPoint::new(12, 14),
    });
    assert_eq!(flags.take_touches(), 2);
    assert_eq!(flags.take_touches(), 0);
}

#[test]
fn directional_coupling_clears_all_flags_on_match() {
    let mut flags = GestureFlags::new();
    flags.latch(GestureEvent::Swipe {
        direction: SwipeDirection::Left,
        start: ScreenPoint::new(200, 100),
        end: ScreenPoint::new(100, 100),
    });

    // Wrong direction: no match, and the left latch survives.
    assert!(!flags.was_swiped(Some(SwipeDirection::Right), None));
    assert!(flags.was_swiped(Some(SwipeDirection::Left), None));

    // Documented surprise: matching any swipe cleared every direction, so
    // a latched right swipe would now be gone too.
    assert!(!flags.was_swiped(Some(SwipeDirection::Right), None));
    assert!(!flags.was_swiped(None, None));
}

#[test]
fn any_direction_query_matches_whatever_is_latched() {
    let mut flags = GestureFlags::new();
    assert!(!flags.was_swiped(None, None));
    flags.latch(GestureEvent::Swipe {
        direction: SwipeDirection::Up,
        start: ScreenPoint::new(100, 200),
        end: ScreenPoint::new(100, 120),
    });
    assert!(flags.was_swiped(None, None));
    assert!(!flags.was_swiped(None, None));
}

#[test]
fn bounded_swipe_requires_both_endpoints_inside() {
    let rect = Rect::new(0, 0, 50, 50);

    let mut flags = GestureFlags::new();
    flags.latch(GestureEvent::Swipe {
        direction: SwipeDirection::Right,
        start: ScreenPoint::new(10, 10),
        end: ScreenPoint::new(100, 10),
    });
    // Start inside, end outside: not a match, latch untouched.
    assert!(!flags.was_swiped(None, Some(rect)));
    assert!(flags.was_swiped(Some(SwipeDirection::Right), None));

    let mut flags = GestureFlags::new();
    flags.latch(GestureEvent::Swipe {
        direction: SwipeDirection::Right,
        start: ScreenPoint::new(5, 10),
        end: ScreenPoint::new(45, 12),
    });
    assert!(flags.was_swiped(None, Some(rect)));
}

#[test]
fn last_touch_survives_consuming_queries() {
    let mut flags = GestureFlags::new();
    flags.latch(GestureEvent::Tap {
        at: ScreenPoint::new(33, 44),
    });
    assert!(flags.was_touched());
    assert_eq!(flags.take_touches(), 1);
    assert_eq!(flags.last_touch(), Some(ScreenPoint::new(33, 44)));

    flags.latch(GestureEvent::Swipe {
        direction: SwipeDirection::Down,
        start: ScreenPoint::new(10, 10),
        end: ScreenPoint::new(12, 90),
    });
    assert_eq!(flags.last_touch(), Some(ScreenPoint::new(12, 90)));
}

#[test]
fn clear_resets_the_idle_baseline() {
    let mut flags = GestureFlags::new();
    flags.latch(GestureEvent::Tap {
        at: ScreenPoint::new(1, 1),
    });
    flags.latch(GestureEvent::Swipe {
        direction: SwipeDirection::Left,
        start: ScreenPoint::new(90, 10),
        end: ScreenPoint::new(20, 10),
    });
    flags.clear();
    assert!(!flags.was_touched());
    assert_eq!(flags.take_touches(), 0);
    assert!(!flags.was_swiped(None, None));
    assert_eq!(flags.last_touch(), None);
}
