//! ESP-NOW broadcast messaging with group filtering.
//!
//! Every frame goes to the broadcast address; a one-byte group id in the
//! frame header keeps classrooms from hearing each other. Received
//! frames land in a bounded queue, oldest dropped first.

use esp_radio::esp_now::{EspNow, PeerInfo, BROADCAST_ADDRESS};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController};
use heapless::{Deque, String, Vec};
use log::{info, warn};
use static_cell::StaticCell;

pub const MESSAGE_MAX: usize = 200;
pub const QUEUE_CAPACITY: usize = 10;
pub const DEFAULT_GROUP: u8 = 1;

const FRAME_MAGIC: [u8; 2] = [0x43, 0x59];
const FRAME_HEADER_LEN: usize = 3;

#[derive(Clone, Debug)]
pub struct RadioMessage {
    pub from: [u8; 6],
    pub group: u8,
    pub text: String<MESSAGE_MAX>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RadioStats {
    pub sent: u32,
    pub received: u32,
    /// Frames from another group or with a bad header.
    pub filtered: u32,
    /// Messages pushed out of a full queue before anyone read them.
    pub dropped: u32,
}

#[derive(Clone, Copy, Debug)]
pub enum RadioError {
    Init,
    TooLong,
    SendFailed,
}

pub struct Radio {
    esp_now: EspNow<'static>,
    _controller: WifiController<'static>,
    group: u8,
    queue: Deque<RadioMessage, QUEUE_CAPACITY>,
    stats: RadioStats,
}

impl Radio {
    pub(crate) async fn init(wifi: esp_hal::peripherals::WIFI<'static>) -> Result<Self, RadioError> {
        static RADIO_CTRL: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();

        let radio_ctrl = esp_radio::init().map_err(|err| {
            warn!("radio: init_failed err={:?}", err);
            RadioError::Init
        })?;
        let radio_ctrl = RADIO_CTRL.init(radio_ctrl);

        let (mut controller, interfaces) =
            esp_radio::wifi::new(radio_ctrl, wifi, esp_radio::wifi::Config::default()).map_err(
                |err| {
                    warn!("radio: wifi_init_failed err={:?}", err);
                    RadioError::Init
                },
            )?;

        // ESP-NOW rides on the station interface; no association needed.
        controller
            .set_config(&ModeConfig::Client(ClientConfig::default()))
            .map_err(|err| {
                warn!("radio: wifi_config_failed err={:?}", err);
                RadioError::Init
            })?;
        controller.start_async().await.map_err(|err| {
            warn!("radio: wifi_start_failed err={:?}", err);
            RadioError::Init
        })?;

        let mut esp_now = interfaces.esp_now;
        esp_now
            .add_peer(PeerInfo {
                peer_address: BROADCAST_ADDRESS,
                lmk: None,
                channel: None,
                encrypt: false,
            })
            .map_err(|err| {
                warn!("radio: peer_add_failed err={:?}", err);
                RadioError::Init
            })?;

        info!("radio: ready group={}", DEFAULT_GROUP);
        Ok(Self {
            esp_now,
            _controller: controller,
            group: DEFAULT_GROUP,
            queue: Deque::new(),
            stats: RadioStats::default(),
        })
    }

    pub fn send(&mut self, text: &str) -> Result<(), RadioError> {
        if text.len() > MESSAGE_MAX {
            return Err(RadioError::TooLong);
        }
        let mut frame: Vec<u8, { MESSAGE_MAX + FRAME_HEADER_LEN }> = Vec::new();
        let _ = frame.extend_from_slice(&FRAME_MAGIC);
        let _ = frame.push(self.group);
        let _ = frame.extend_from_slice(text.as_bytes());

        let waiter = self
            .esp_now
            .send(&BROADCAST_ADDRESS, &frame)
            .map_err(|_| RadioError::SendFailed)?;
        waiter.wait().map_err(|_| RadioError::SendFailed)?;
        self.stats.sent = self.stats.sent.saturating_add(1);
        Ok(())
    }

    /// Drains the driver's receive buffer into the message queue.
    pub fn poll(&mut self) {
        while let Some(received) = self.esp_now.receive() {
            let data = received.data();
            if data.len() < FRAME_HEADER_LEN || data[..2] != FRAME_MAGIC {
                self.stats.filtered = self.stats.filtered.saturating_add(1);
                continue;
            }
            let group = data[2];
            if group != self.group {
                self.stats.filtered = self.stats.filtered.saturating_add(1);
                continue;
            }
            let Ok(text) = core::str::from_utf8(&data[FRAME_HEADER_LEN..]) else {
                self.stats.filtered = self.stats.filtered.saturating_add(1);
                continue;
            };
            let mut message = RadioMessage {
                from: received.info.src_address,
                group,
                text: String::new(),
            };
            if message.text.push_str(text).is_err() {
                self.stats.filtered = self.stats.filtered.saturating_add(1);
                continue;
            }
            if self.queue.is_full() {
                let _ = self.queue.pop_front();
                self.stats.dropped = self.stats.dropped.saturating_add(1);
            }
            let _ = self.queue.push_back(message);
            self.stats.received = self.stats.received.saturating_add(1);
        }
    }

    /// Oldest queued message for this group, if any arrived.
    pub fn receive(&mut self) -> Option<RadioMessage> {
        self.poll();
        self.queue.pop_front()
    }

    /// Takes every queued message at once, leaving the queue empty.
    pub fn receive_all(&mut self) -> Deque<RadioMessage, QUEUE_CAPACITY> {
        self.poll();
        core::mem::take(&mut self.queue)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn clear_queue(&mut self) {
        self.queue.clear();
    }

    pub fn group(&self) -> u8 {
        self.group
    }

    /// Changing groups drops queued messages from the old one.
    pub fn set_group(&mut self, group: u8) {
        if group != self.group {
            self.group = group;
            self.queue.clear();
        }
    }

    pub fn my_address(&self) -> [u8; 6] {
        esp_hal::efuse::Efuse::mac_address()
    }

    pub fn stats(&self) -> RadioStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = RadioStats::default();
    }
}
