//! Touch engine wiring: the sampling task, the shared state cell and the
//! student-facing query handle.
//!
//! One embassy task owns the XPT2046 and the contact-detect line. While
//! nothing touches the panel it parks on the falling edge; during a
//! contact (or while a calibration run needs raw visibility) it samples
//! every [`SAMPLE_PERIOD_MS`] and feeds the gesture engine. Foreground
//! queries and the task meet only inside the critical-section cell, plus
//! one single-word atomic for the calibration force-poll request.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use critical_section::Mutex;
use embassy_executor::Spawner;
use embassy_time::{Duration, Instant, Timer};
use embedded_storage::{ReadStorage, Storage};
use esp_hal::gpio::{Input, Output};
use esp_hal::spi::master::Spi;
use esp_hal::Blocking;
use esp_storage::FlashStorage;
use log::{info, warn};
use static_cell::StaticCell;

use touchkit::calibration::{
    CalibrationError, CalibrationFlow, CalibrationReport, CalibrationStep,
    DEFAULT_TARGET_MARGIN_PX,
};
use touchkit::gesture::{ContactSample, GestureFlags, Rect, SwipeDirection, TouchEngine};
use touchkit::store::{decode_record, encode_record, CalibrationStore, StoreError, RECORD_LEN};
use touchkit::transform::{normalize, CalibrationParams, ScreenGeometry, ScreenPoint};
use touchkit::xpt2046::{RawPoint, Xpt2046};

use crate::display::{Display, NamedColor, SCREEN_HEIGHT, SCREEN_WIDTH};

pub const SAMPLE_PERIOD_MS: u64 = 10;
const CALIBRATION_POLL_MS: u64 = 100;
const ACCURACY_WARN_PX: u16 = 12;

pub struct TouchConfig {
    pub width: u16,
    pub height: u16,
    /// `Some` overrides whatever the stored calibration says.
    pub flip_x: Option<bool>,
    pub flip_y: Option<bool>,
    pub swap_xy: Option<bool>,
    pub auto_calibrate: bool,
}

impl Default for TouchConfig {
    fn default() -> Self {
        Self {
            width: SCREEN_WIDTH,
            height: SCREEN_HEIGHT,
            flip_x: None,
            flip_y: None,
            swap_xy: None,
            auto_calibrate: true,
        }
    }
}

struct SharedState {
    engine: TouchEngine,
    flags: GestureFlags,
    params: CalibrationParams,
    geometry: ScreenGeometry,
    raw_seq: u32,
    last_raw: Option<RawPoint>,
}

pub struct TouchShared {
    state: Mutex<RefCell<SharedState>>,
    force_poll: AtomicBool,
}

impl TouchShared {
    fn new(params: CalibrationParams, geometry: ScreenGeometry) -> Self {
        Self {
            state: Mutex::new(RefCell::new(SharedState {
                engine: TouchEngine::new(),
                flags: GestureFlags::new(),
                params,
                geometry,
                raw_seq: 0,
                last_raw: None,
            })),
            force_poll: AtomicBool::new(false),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut SharedState) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }
}

static TOUCH_SHARED: StaticCell<TouchShared> = StaticCell::new();

#[embassy_executor::task]
async fn touch_task(
    shared: &'static TouchShared,
    mut sampler: Xpt2046<Spi<'static, Blocking>, Output<'static>>,
    mut irq: Input<'static>,
) {
    info!("touch: task_started");
    loop {
        let active = shared.with(|state| state.engine.contact_active());
        let force = shared.force_poll.load(Ordering::Relaxed);
        if !active && !force && irq.is_high() {
            // The periodic sampler never runs across an idle period.
            irq.wait_for_falling_edge().await;
        }

        let pen_down = irq.is_low();
        // Transient bus errors and invalid readings are both just "no
        // sample this poll"; the engine skips them.
        let raw = sampler.read_raw().unwrap_or(None);
        let now_ms = Instant::now().as_millis();

        shared.with(|state| {
            state.raw_seq = state.raw_seq.wrapping_add(1);
            state.last_raw = raw;
            let point = raw.map(|raw| normalize(&state.params, state.geometry, raw));
            if let Some(event) = state.engine.tick(now_ms, ContactSample { pen_down, point }) {
                state.flags.latch(event);
            }
        });

        Timer::after(Duration::from_millis(SAMPLE_PERIOD_MS)).await;
    }
}

/// Calibration record in the last flash sector.
pub struct FlashCalibrationStore {
    flash: FlashStorage<'static>,
    offset: u32,
}

impl FlashCalibrationStore {
    pub fn new(flash_peripheral: esp_hal::peripherals::FLASH<'static>) -> Self {
        let flash = FlashStorage::new(flash_peripheral).multicore_auto_park();
        let capacity = flash.capacity() as u32;
        let offset = capacity.saturating_sub(FlashStorage::SECTOR_SIZE);
        Self { flash, offset }
    }
}

impl CalibrationStore for FlashCalibrationStore {
    fn load(&mut self) -> Option<CalibrationParams> {
        let mut record = [0u8; RECORD_LEN];
        self.flash.read(self.offset, &mut record).ok()?;
        decode_record(&record)
    }

    fn save(&mut self, params: &CalibrationParams) -> Result<(), StoreError> {
        let record = encode_record(params).ok_or(StoreError::WriteFailed)?;
        self.flash
            .write(self.offset, &record)
            .map_err(|_| StoreError::WriteFailed)
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        let erased = [0xFFu8; RECORD_LEN];
        self.flash
            .write(self.offset, &erased)
            .map_err(|_| StoreError::WriteFailed)
    }
}

#[derive(Clone, Copy)]
enum TouchLink {
    Live(&'static TouchShared),
    /// Hardware never came up. Every query answers "nothing happening" so
    /// application code does not need hardware-presence branches.
    Disconnected,
}

pub struct Touch {
    link: TouchLink,
    store: FlashCalibrationStore,
    geometry: ScreenGeometry,
    fallback_params: CalibrationParams,
}

impl Touch {
    pub(crate) fn attach(
        config: &TouchConfig,
        mut store: FlashCalibrationStore,
        sampler: Xpt2046<Spi<'static, Blocking>, Output<'static>>,
        irq: Input<'static>,
        spawner: Spawner,
    ) -> Self {
        let geometry = ScreenGeometry::new(config.width, config.height);
        let params = boot_params(config, &mut store);
        let shared = TOUCH_SHARED.init(TouchShared::new(params, geometry));
        match spawner.spawn(touch_task(shared, sampler, irq)) {
            Ok(()) => Self {
                link: TouchLink::Live(shared),
                store,
                geometry,
                fallback_params: params,
            },
            Err(err) => {
                warn!("touch: task_spawn_failed err={:?}", err);
                Self {
                    link: TouchLink::Disconnected,
                    store,
                    geometry,
                    fallback_params: params,
                }
            }
        }
    }

    pub(crate) fn detached(config: &TouchConfig, mut store: FlashCalibrationStore) -> Self {
        let geometry = ScreenGeometry::new(config.width, config.height);
        let params = boot_params(config, &mut store);
        Self {
            link: TouchLink::Disconnected,
            store,
            geometry,
            fallback_params: params,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.link, TouchLink::Live(_))
    }

    /// Live position of the contact in progress. Never consumes anything.
    pub fn is_touched(&self) -> Option<ScreenPoint> {
        match self.link {
            TouchLink::Live(shared) => shared.with(|state| state.engine.current_touch()),
            TouchLink::Disconnected => None,
        }
    }

    /// Returns and clears the sticky tap flag.
    pub fn was_touched(&self) -> bool {
        match self.link {
            TouchLink::Live(shared) => shared.with(|state| state.flags.was_touched()),
            TouchLink::Disconnected => false,
        }
    }

    /// Taps since the last call; resets the counter.
    pub fn get_touches(&self) -> u16 {
        match self.link {
            TouchLink::Live(shared) => shared.with(|state| state.flags.take_touches()),
            TouchLink::Disconnected => 0,
        }
    }

    pub fn was_swiped(&self, direction: Option<SwipeDirection>, bounds: Option<Rect>) -> bool {
        match self.link {
            TouchLink::Live(shared) => shared.with(|state| state.flags.was_swiped(direction, bounds)),
            TouchLink::Disconnected => false,
        }
    }

    pub fn get_last_touch_coords(&self) -> Option<ScreenPoint> {
        match self.link {
            TouchLink::Live(shared) => shared.with(|state| state.flags.last_touch()),
            TouchLink::Disconnected => None,
        }
    }

    pub fn clear_touch_history(&self) {
        if let TouchLink::Live(shared) = self.link {
            shared.with(|state| state.flags.clear());
        }
    }

    /// Latest raw controller reading, for diagnostics.
    pub fn read_raw(&self) -> Option<RawPoint> {
        match self.link {
            TouchLink::Live(shared) => shared.with(|state| state.last_raw),
            TouchLink::Disconnected => None,
        }
    }

    pub fn params(&self) -> CalibrationParams {
        match self.link {
            TouchLink::Live(shared) => shared.with(|state| state.params),
            TouchLink::Disconnected => self.fallback_params,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.params().calibrated
    }

    /// Manual bounds override for people who measured their panel
    /// themselves. Only the given fields change.
    pub fn calibrate(
        &mut self,
        x_min: Option<u16>,
        x_max: Option<u16>,
        y_min: Option<u16>,
        y_max: Option<u16>,
        save: bool,
    ) {
        let mut params = self.params();
        if let Some(value) = x_min {
            params.x_min = value;
        }
        if let Some(value) = x_max {
            params.x_max = value;
        }
        if let Some(value) = y_min {
            params.y_min = value;
        }
        if let Some(value) = y_max {
            params.y_max = value;
        }
        params.calibrated = true;
        self.replace_params(params);
        if save {
            self.persist(&params);
        }
    }

    pub fn set_orientation(
        &mut self,
        flip_x: Option<bool>,
        flip_y: Option<bool>,
        swap_xy: Option<bool>,
    ) {
        let mut params = self.params();
        if let Some(value) = flip_x {
            params.flip_x = value;
        }
        if let Some(value) = flip_y {
            params.flip_y = value;
        }
        if let Some(value) = swap_xy {
            params.swap_xy = value;
        }
        self.replace_params(params);
    }

    /// Deletes the stored record and returns to stock parameters.
    pub fn reset_calibration(&mut self) {
        if let Err(err) = self.store.clear() {
            warn!("touch: calibration_clear_failed err={:?}", err);
        }
        self.replace_params(CalibrationParams::default());
        info!("touch: calibration_reset");
    }

    /// Runs the interactive calibration only when no measured record is
    /// in effect.
    pub async fn ensure_calibrated(&mut self, display: &mut Display) -> bool {
        if self.is_calibrated() {
            return true;
        }
        info!("touch: no_calibration_found");
        self.recalibrate(display).await.is_ok()
    }

    /// Forced interactive calibration. On failure the previous parameters
    /// stay in effect, untouched.
    pub async fn recalibrate(
        &mut self,
        display: &mut Display,
    ) -> Result<CalibrationReport, CalibrationError> {
        let TouchLink::Live(shared) = self.link else {
            warn!("touch: calibration_skipped_no_hardware");
            return Err(CalibrationError::Incomplete { captured: 0 });
        };

        shared.force_poll.store(true, Ordering::Relaxed);
        let mut flow = CalibrationFlow::new(self.geometry, DEFAULT_TARGET_MARGIN_PX);
        flow.render(display);

        let mut last_seq = shared.with(|state| state.raw_seq);
        let mut last_hold = 0u8;
        let result = loop {
            Timer::after(Duration::from_millis(CALIBRATION_POLL_MS)).await;
            let (seq, raw) = shared.with(|state| (state.raw_seq, state.last_raw));
            // Only a fresh task poll counts; a stale snapshot is a miss.
            let sample = if seq != last_seq {
                last_seq = seq;
                raw
            } else {
                None
            };
            match flow.feed(sample) {
                CalibrationStep::Collecting { hold, .. } => {
                    if hold != last_hold {
                        last_hold = hold;
                        flow.render_hold(display);
                    }
                }
                CalibrationStep::TargetCaptured { target } => {
                    info!("touch: calibration_target_captured index={}", target);
                    last_hold = 0;
                    flow.render(display);
                }
                CalibrationStep::TargetMissed { target } => {
                    warn!("touch: calibration_target_missed index={}", target);
                    last_hold = 0;
                    flow.render(display);
                }
                CalibrationStep::Finished(report) => break Ok(report),
                CalibrationStep::Failed(err) => break Err(err),
            }
        };
        shared.force_poll.store(false, Ordering::Relaxed);

        match result {
            Ok(report) => {
                self.replace_params(report.params);
                self.persist(&report.params);
                if report.mean_error_px > ACCURACY_WARN_PX {
                    warn!(
                        "touch: calibration_low_accuracy mean_error_px={}",
                        report.mean_error_px
                    );
                }
                info!(
                    "touch: calibration_done captured={} mean_error_px={}",
                    report.captured, report.mean_error_px
                );
                display.clear(NamedColor::Black.into());
                display.show_text_at(90, 110, "Calibration complete", NamedColor::Green.into());
                Ok(report)
            }
            Err(err) => {
                warn!("touch: calibration_failed err={:?}", err);
                display.clear(NamedColor::Black.into());
                display.show_text_at(90, 102, "Calibration failed", NamedColor::Red.into());
                display.show_text_at(72, 120, "Keeping previous settings", NamedColor::White.into());
                Err(err)
            }
        }
    }

    fn replace_params(&mut self, params: CalibrationParams) {
        self.fallback_params = params;
        if let TouchLink::Live(shared) = self.link {
            shared.with(|state| state.params = params);
        }
    }

    fn persist(&mut self, params: &CalibrationParams) {
        // A failed write is logged and otherwise ignored; the in-memory
        // calibration keeps working for the session.
        if let Err(err) = self.store.save(params) {
            warn!("touch: calibration_save_failed err={:?}", err);
        }
    }
}

fn boot_params(config: &TouchConfig, store: &mut FlashCalibrationStore) -> CalibrationParams {
    let mut params = store.load().unwrap_or_default();
    if let Some(flip_x) = config.flip_x {
        params.flip_x = flip_x;
    }
    if let Some(flip_y) = config.flip_y {
        params.flip_y = flip_y;
    }
    if let Some(swap_xy) = config.swap_xy {
        params.swap_xy = swap_xy;
    }
    params
}
