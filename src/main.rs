#![no_std]
#![no_main]

//! Interactive tour of the touch engine: tap, counted taps, directional
//! swipes and zone-bounded swipes, with on-screen feedback and a radio
//! ping per completed step.

use core::fmt::Write;

use embassy_executor::Spawner;
use embassy_time::{Duration, Instant, Timer};
use esp_backtrace as _;
use esp_hal::timer::timg::TimerGroup;
use heapless::String;
use log::{error, info};

use cydkit::board::Board;
use cydkit::display::{Display, NamedColor};
use cydkit::touch::TouchConfig;
use cydkit::touchkit::gesture::{Rect, SwipeDirection};

const STEP_PAUSE_MS: u64 = 1200;
const POLL_MS: u64 = 50;

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();

    let peripherals = esp_hal::init(esp_hal::Config::default());

    // The radio stack allocates; everything else here is static.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let config = TouchConfig::default();
    let auto_calibrate = config.auto_calibrate;
    let mut board = match Board::init(peripherals, spawner, config).await {
        Ok(board) => board,
        Err(err) => {
            error!("demo: board_init_failed err={:?}", err);
            loop {
                Timer::after(Duration::from_secs(1)).await;
            }
        }
    };

    if auto_calibrate && !board.touch.is_calibrated() {
        let _ = board.touch.ensure_calibrated(&mut board.display).await;
        Timer::after(Duration::from_millis(STEP_PAUSE_MS)).await;
    }

    info!("demo: ready connected={}", board.touch.is_connected());
    loop {
        tap_step(&mut board).await;
        count_step(&mut board).await;
        swipe_step(&mut board).await;
        zone_step(&mut board).await;
    }
}

fn header(display: &mut Display, title: &str) {
    display.clear(NamedColor::Black.into());
    display.show_text_at(10, 10, "Touch demo", NamedColor::Cyan.into());
    display.show_text_at(10, 28, title, NamedColor::White.into());
}

fn announce(board: &mut Board, message: &str) {
    if let Some(radio) = board.radio.as_mut() {
        if radio.send(message).is_err() {
            info!("demo: radio_send_failed");
        }
    }
}

fn feedback_dot(board: &mut Board) {
    if let Some(at) = board.touch.is_touched() {
        board
            .display
            .draw_circle(at.x, at.y, 2, NamedColor::Yellow.into(), true);
    }
}

async fn tap_step(board: &mut Board) {
    header(&mut board.display, "Step 1: tap anywhere");
    board.touch.clear_touch_history();
    loop {
        feedback_dot(board);
        if board.touch.was_touched() {
            break;
        }
        Timer::after(Duration::from_millis(POLL_MS)).await;
    }
    if let Some(at) = board.touch.get_last_touch_coords() {
        board
            .display
            .draw_circle(at.x, at.y, 5, NamedColor::Green.into(), true);
        let mut line: String<32> = String::new();
        let _ = write!(&mut line, "Tap at ({}, {})", at.x, at.y);
        board
            .display
            .show_text_at(10, 210, &line, NamedColor::Green.into());
    }
    announce(board, "tap done");
    Timer::after(Duration::from_millis(STEP_PAUSE_MS)).await;
}

async fn count_step(board: &mut Board) {
    header(&mut board.display, "Step 2: tap fast for 5 seconds");
    board.touch.clear_touch_history();
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        feedback_dot(board);
        Timer::after(Duration::from_millis(POLL_MS)).await;
    }
    let taps = board.touch.get_touches();
    let mut line: String<32> = String::new();
    let _ = write!(&mut line, "Counted {} taps", taps);
    board
        .display
        .show_text_at(10, 210, &line, NamedColor::Green.into());
    // The counter was consumed above; a second read must be zero.
    debug_assert_eq!(board.touch.get_touches(), 0);
    announce(board, "count done");
    Timer::after(Duration::from_millis(STEP_PAUSE_MS)).await;
}

async fn swipe_step(board: &mut Board) {
    header(&mut board.display, "Step 3: swipe all four ways");
    board.touch.clear_touch_history();
    let mut seen = [false; 4];
    let labels = ["left", "right", "up", "down"];
    while seen.iter().any(|done| !done) {
        feedback_dot(board);
        for (index, direction) in SwipeDirection::ALL.iter().enumerate() {
            if !seen[index] && board.touch.was_swiped(Some(*direction), None) {
                seen[index] = true;
                let y = 60 + index as u16 * 18;
                let mut line: String<16> = String::new();
                let _ = write!(&mut line, "{} ok", labels[index]);
                board
                    .display
                    .show_text_at(10, y, &line, NamedColor::Green.into());
            }
        }
        Timer::after(Duration::from_millis(POLL_MS)).await;
    }
    announce(board, "swipes done");
    Timer::after(Duration::from_millis(STEP_PAUSE_MS)).await;
}

async fn zone_step(board: &mut Board) {
    header(&mut board.display, "Step 4: swipe inside one half");
    let width = board.display.width();
    let height = board.display.height();
    let left_zone = Rect::new(0, 50, width / 2, height - 50);
    let right_zone = Rect::new(width / 2, 50, width / 2, height - 50);
    board
        .display
        .draw_line(width / 2, 50, width / 2, height - 1, NamedColor::Gray.into());
    board.touch.clear_touch_history();
    loop {
        feedback_dot(board);
        if board.touch.was_swiped(None, Some(left_zone)) {
            board
                .display
                .show_text_at(40, 210, "left zone", NamedColor::Green.into());
            break;
        }
        if board.touch.was_swiped(None, Some(right_zone)) {
            board
                .display
                .show_text_at(200, 210, "right zone", NamedColor::Green.into());
            break;
        }
        Timer::after(Duration::from_millis(POLL_MS)).await;
    }
    announce(board, "zones done");
    Timer::after(Duration::from_millis(STEP_PAUSE_MS)).await;
}
